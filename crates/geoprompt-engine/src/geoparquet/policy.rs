//! Render policy evaluation
//!
//! A render policy widens eligible feature classes as zoom increases and
//! caps how many candidates are even considered, ranked by a cheap SQL
//! expression so geometry never gets decoded just to be thrown away.

use std::collections::{BTreeMap, BTreeSet};

use geoprompt_core::GeometryKind;
use geoprompt_scenarios::RenderPolicy;

use super::bbox::BBoxExprs;

/// Hard decode caps; LOD runs *after* decoding, so without a pre-cap a
/// worst-case AOI spends seconds decoding WKB that is then dropped.
pub const HARD_CAP_LINES: usize = 9_000;
pub const HARD_CAP_POLYGONS: usize = 5_000;

/// Safety caps by kind and zoom band.
pub fn safety_limit(kind: GeometryKind, view_zoom: f64) -> usize {
    if view_zoom <= 7.5 {
        match kind {
            GeometryKind::Points => 50_000,
            GeometryKind::Lines => 20_000,
            GeometryKind::Polygons => 10_000,
        }
    } else if view_zoom <= 9.0 {
        match kind {
            GeometryKind::Points => 150_000,
            GeometryKind::Lines => 60_000,
            GeometryKind::Polygons => 30_000,
        }
    } else {
        match kind {
            GeometryKind::Points => 500_000,
            GeometryKind::Lines => 200_000,
            GeometryKind::Polygons => 100_000,
        }
    }
}

/// Choose from `{max zoom -> value}` where max zoom is an inclusive upper
/// bound, scanned ascending; the last entry is the default above all
/// listed zooms. Unparseable keys are skipped.
pub fn choose_by_max_zoom(mapping: Option<&BTreeMap<String, u64>>, zoom: f64) -> Option<usize> {
    let mapping = mapping?;
    let mut items: Vec<(f64, usize)> = mapping
        .iter()
        .filter_map(|(k, v)| k.parse::<f64>().ok().map(|kz| (kz, *v as usize)))
        .collect();
    if items.is_empty() {
        return None;
    }
    items.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    for &(max_zoom, value) in &items {
        if zoom <= max_zoom {
            return Some(value);
        }
    }
    items.last().map(|&(_, value)| value)
}

/// Classes eligible at this zoom per `minZoomForGeometryByClass`;
/// `None` when the policy doesn't restrict classes (or none qualify).
pub fn allowed_classes(policy: Option<&RenderPolicy>, zoom: f64) -> Option<BTreeSet<String>> {
    let by_class = policy?.min_zoom_for_geometry_by_class.as_ref()?;
    let allowed: BTreeSet<String> = by_class
        .iter()
        .filter(|(_, &min_z)| zoom >= min_z)
        .map(|(cls, _)| cls.clone())
        .collect();
    if allowed.is_empty() {
        None
    } else {
        Some(allowed)
    }
}

/// Candidate ordering: the policy's `orderBy`, or bbox diagonal DESC as a
/// cheap importance proxy that avoids geometry decoding.
pub fn order_by(policy: Option<&RenderPolicy>, bbox: &BBoxExprs) -> String {
    if let Some(raw) = policy.and_then(|p| p.order_by.as_deref()) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let dx = format!("CAST({} AS DOUBLE) - CAST({} AS DOUBLE)", bbox.xmax, bbox.xmin);
    let dy = format!("CAST({} AS DOUBLE) - CAST({} AS DOUBLE)", bbox.ymax, bbox.ymin);
    format!("(({dx})*({dx}) + ({dy})*({dy})) DESC")
}
