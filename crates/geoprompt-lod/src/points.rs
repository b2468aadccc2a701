//! Point clustering and capping
//!
//! Dense point layers collapse into grid clusters in EPSG:3857: one
//! synthetic marker per non-empty cell at the cell centroid, carrying the
//! collapsed count. Coarser grids at low zoom.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use geoprompt_core::{mercator, PointFeature};

/// Synthetic marker for a grid cell of collapsed points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMarker {
    pub lon: f64,
    pub lat: f64,
    pub count: usize,
}

/// `(max zoom, cell side in meters)`; the last row covers higher zooms.
pub const CLUSTER_GRID_M: [(f64, f64); 6] = [
    (6.0, 8_000.0),
    (8.0, 4_000.0),
    (9.0, 2_000.0),
    (10.0, 1_000.0),
    (11.0, 500.0),
    (f64::INFINITY, 250.0),
];

/// Cluster when zoomed out, or when raw points would exceed the budget.
pub fn should_cluster_points(zoom: f64, n_points: usize, max_points: usize) -> bool {
    zoom <= 9.5 || n_points > max_points
}

pub fn grid_size_m(zoom: f64) -> f64 {
    for &(max_zoom, size) in &CLUSTER_GRID_M {
        if zoom <= max_zoom {
            return size;
        }
    }
    250.0
}

/// Grid-cluster points; output sorted by count desc, ties by cell position.
pub fn cluster_points(points: &[PointFeature], zoom: f64) -> Vec<ClusterMarker> {
    let grid = grid_size_m(zoom);

    // (cell_x, cell_y) -> (count, sum_x, sum_y); BTreeMap keeps the
    // fallback ordering deterministic.
    let mut buckets: BTreeMap<(i64, i64), (usize, f64, f64)> = BTreeMap::new();
    for p in points {
        let (x, y) = mercator::forward(p.lon, p.lat);
        let cell = ((x / grid).floor() as i64, (y / grid).floor() as i64);
        let entry = buckets.entry(cell).or_insert((0, 0.0, 0.0));
        entry.0 += 1;
        entry.1 += x;
        entry.2 += y;
    }

    let mut out: Vec<ClusterMarker> = buckets
        .into_values()
        .map(|(count, sx, sy)| {
            let (lon, lat) = mercator::inverse(sx / count as f64, sy / count as f64);
            ClusterMarker { lon, lat, count }
        })
        .collect();

    // Larger clusters first (nice at low zoom); stable sort preserves the
    // cell ordering for equal counts.
    out.sort_by(|a, b| b.count.cmp(&a.count));
    out
}

/// Deterministically cap a point list, preferring `keep_ids`.
pub fn cap_points(
    points: &[PointFeature],
    max_points: usize,
    keep_ids: Option<&BTreeSet<String>>,
) -> Vec<PointFeature> {
    if points.len() <= max_points {
        return points.to_vec();
    }
    let empty = BTreeSet::new();
    let keep = keep_ids.unwrap_or(&empty);

    let mut kept: Vec<PointFeature> = points
        .iter()
        .filter(|p| keep.contains(&p.id))
        .cloned()
        .collect();
    kept.sort_by(|a, b| a.id.cmp(&b.id));
    if kept.len() >= max_points {
        kept.truncate(max_points);
        return kept;
    }

    let mut remaining: Vec<PointFeature> = points
        .iter()
        .filter(|p| !keep.contains(&p.id))
        .cloned()
        .collect();
    remaining.sort_by(|a, b| a.id.cmp(&b.id));

    kept.extend(remaining);
    kept.truncate(max_points);
    kept
}
