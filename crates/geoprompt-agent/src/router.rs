//! Prompt routing
//!
//! Evaluation order:
//! 1. empty prompt / show-layers keywords -> layer listing
//! 2. scenario highlight rules (props filter + optional mask)
//! 3. "escape roads" family
//! 4. count-in-mask
//! 5. recommend-N (proximity-ranked)
//! 6. help fallback
//!
//! Everything is computed on the AOI-sliced, pre-LOD bundle so counts and
//! highlight ids are independent of render budgets.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use geo::{EuclideanDistance, Intersects};
use geo_types::MultiPolygon;
use once_cell::sync::Lazy;
use regex::Regex;

use geoprompt_core::{
    ops, BBox, GeoIndex, GeometryKind, Highlight, Layer, LayerBundle, LineFeature, PointFeature,
};
use geoprompt_scenarios::{HighlightRule, MaskMode, RoutingConfig};

use crate::AgentResponse;

/// Budget (not a semantic limit) on the escape-roads overlays.
pub const ESCAPE_FLOODED_CAP: usize = 500;
pub const ESCAPE_ROADS_CAP: usize = 300;

static FIRST_INT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)").expect("static regex"));

/// View center as `(lat, lon)` degrees.
pub type ViewCenter = (f64, f64);

pub fn route_prompt(
    prompt: &str,
    layers: &LayerBundle,
    index: &GeoIndex,
    aoi: &BBox,
    routing: &RoutingConfig,
    view_center: Option<ViewCenter>,
) -> AgentResponse {
    let p = prompt.trim().to_lowercase();

    if p.is_empty() || contains_any(&p, &routing.show_layers_keywords) {
        let titles: Vec<String> = layers
            .layers
            .iter()
            .map(|layer| format!("- {} ({})", layer.title, layer.kind))
            .collect();
        return AgentResponse::message_only(format!("Loaded layers:\n{}", titles.join("\n")));
    }

    for rule in &routing.highlight_rules {
        if rule
            .keywords
            .iter()
            .any(|k| !k.is_empty() && p.contains(&k.to_lowercase()))
        {
            return apply_highlight_rule(layers, index, aoi, routing, rule);
        }
    }

    if p.contains("escape road") {
        return escape_roads_for_flooded_places(layers, index, aoi, routing);
    }

    let mentions_points = [
        routing.point_label_singular.to_lowercase(),
        routing.point_label_plural.to_lowercase(),
    ]
    .iter()
    .any(|k| !k.is_empty() && p.contains(k));

    if contains_any(&p, &routing.count_keywords)
        && contains_any(&p, &routing.mask_keywords)
        && mentions_points
    {
        return count_points_in_mask(layers, index, aoi, routing);
    }

    if contains_any(&p, &routing.recommend_keywords) && mentions_points {
        let n = extract_number(&p, 5, (1, 50));
        let b = aoi.normalized();
        let center = view_center.unwrap_or(((b.min_lat + b.max_lat) / 2.0, (b.min_lon + b.max_lon) / 2.0));
        let ranked = recommend_points(layers, index, aoi, routing, n, center);
        let ids: BTreeSet<String> = ranked.iter().map(|(pt, _)| pt.id.clone()).collect();
        let bullets: Vec<String> = ranked
            .iter()
            .map(|(pt, _)| format!("- {}", pt.label().unwrap_or(&pt.id)))
            .collect();
        let highlight = Highlight::new(
            routing.primary_points_layer_id.clone(),
            ids,
            Some(format!("Recommended {}", ranked.len())),
            "prompt",
        );
        return AgentResponse {
            message: format!("My {} recommendations:\n{}", ranked.len(), bullets.join("\n")),
            highlight: Some(highlight.clone()),
            highlights: vec![highlight],
            focus_map: true,
        };
    }

    let mask_word = routing
        .mask_keywords
        .first()
        .map(String::as_str)
        .unwrap_or("flooded");
    AgentResponse::message_only(format!(
        "I didn't recognize that prompt yet. Try:\n- show layers\n- how many {} are {}?\n- recommend 5 {}\n",
        routing.point_label_plural, mask_word, routing.point_label_plural
    ))
}

fn contains_any(prompt: &str, keywords: &[String]) -> bool {
    keywords
        .iter()
        .any(|k| !k.is_empty() && prompt.contains(&k.to_lowercase()))
}

fn count_points_in_mask(
    layers: &LayerBundle,
    index: &GeoIndex,
    aoi: &BBox,
    routing: &RoutingConfig,
) -> AgentResponse {
    let Some(pts_layer) = point_layer(layers, &routing.primary_points_layer_id) else {
        return AgentResponse::message_only("This scenario has no configured primary point layer.");
    };
    let pts: Vec<&PointFeature> = pts_layer.points().collect();

    let Some(mask_layer_id) = routing.mask_polygons_layer_id.as_deref() else {
        return AgentResponse::message_only(format!(
            "I found {} {}.",
            pts.len(),
            routing.point_label_plural
        ));
    };

    let union = index.polygon_union_for_aoi(mask_layer_id, aoi);
    let n_in = pts
        .iter()
        .filter(|pt| ops::point_in_union(&union, pt.lon, pt.lat))
        .count();
    let n_out = pts.len() - n_in;
    AgentResponse::message_only(format!(
        "I found {} {} in {} and {} outside of it.",
        n_in, routing.point_label_plural, routing.mask_label, n_out
    ))
}

fn apply_highlight_rule(
    layers: &LayerBundle,
    index: &GeoIndex,
    aoi: &BBox,
    routing: &RoutingConfig,
    rule: &HighlightRule,
) -> AgentResponse {
    let Some(layer) = layers.get(&rule.layer_id) else {
        return AgentResponse::message_only(format!("I couldn't find layer '{}'.", rule.layer_id));
    };

    let before_filters: Vec<&geoprompt_core::LayerFeature> = layer.features.iter().collect();
    let mut feats = before_filters.clone();

    // Props filter: AND of "prop value in allowed set", stringified.
    if let Some(props_filter) = &rule.props {
        feats.retain(|f| {
            props_filter.iter().all(|(key, allowed)| {
                f.props()
                    .get(key)
                    .filter(|v| !v.is_null())
                    .map(|v| allowed.contains(&v.as_text()))
                    .unwrap_or(false)
            })
        });
    }

    // Mask filter (point layers only).
    if let Some(mask_layer_id) = &rule.mask_layer_id {
        if layer.kind == GeometryKind::Points {
            let union = index.polygon_union_for_aoi(mask_layer_id, aoi);
            feats.retain(|f| {
                f.as_point()
                    .map(|pt| {
                        let inside = ops::point_in_union(&union, pt.lon, pt.lat);
                        match rule.mask_mode {
                            MaskMode::InMask => inside,
                            MaskMode::OutsideMask => !inside,
                        }
                    })
                    .unwrap_or(false)
            });
        }
    }

    let ids_all: Vec<&str> = feats.iter().map(|f| f.id()).filter(|id| !id.is_empty()).collect();
    let ids: Vec<&str> = ids_all.iter().copied().take(rule.max_features).collect();

    if ids.is_empty() {
        return empty_rule_response(layer, rule, routing, &before_filters);
    }

    let title = rule
        .title
        .clone()
        .unwrap_or_else(|| format!("Highlighted ({})", layer.title));
    // Always state matched vs rendered so budget/cap behavior is explicit.
    let clipped_note = if ids_all.len() > ids.len() {
        format!("matched {}, rendering {} due to budget.", ids_all.len(), ids.len())
    } else {
        format!("matched {}, rendering {}.", ids_all.len(), ids.len())
    };
    let msg = match (&rule.mask_layer_id, rule.mask_mode) {
        (Some(_), MaskMode::InMask) => {
            format!("{} overlapping {}: {}", layer.title, routing.mask_label, clipped_note)
        }
        (Some(_), MaskMode::OutsideMask) => {
            format!("{} outside {}: {}", layer.title, routing.mask_label, clipped_note)
        }
        (None, _) => format!("{}: {}", layer.title, clipped_note),
    };

    let highlight = Highlight::new(
        layer.id.clone(),
        ids.iter().map(|s| s.to_string()).collect(),
        Some(title),
        "prompt",
    );
    AgentResponse::with_highlight(msg, highlight, layer.kind == GeometryKind::Points)
}

/// Helpful zero-match messages: distinguish "layer not decoded at this
/// zoom" from "filter found none".
fn empty_rule_response(
    layer: &Layer,
    rule: &HighlightRule,
    _routing: &RoutingConfig,
    before_filters: &[&geoprompt_core::LayerFeature],
) -> AgentResponse {
    if before_filters.is_empty()
        && matches!(layer.kind, GeometryKind::Lines | GeometryKind::Polygons)
    {
        return AgentResponse::message_only(format!(
            "I can't highlight anything yet because `{}` has no decoded features at the current zoom. Zoom in a bit (or pan) and try again.",
            layer.title
        ));
    }

    if let Some(props_filter) = &rule.props {
        let props_bits: Vec<String> = props_filter
            .iter()
            .filter(|(_, allowed)| !allowed.is_empty())
            .map(|(k, allowed)| format!("{k} in {allowed:?}"))
            .collect();
        let props_msg = if props_bits.is_empty() {
            String::new()
        } else {
            format!(" ({})", props_bits.join(", "))
        };

        if !before_filters.is_empty() {
            // Hint at the classes present in the current view.
            let mut present: Vec<String> = Vec::new();
            let mut seen: BTreeSet<String> = BTreeSet::new();
            for f in before_filters {
                if let Some(v) = f.props().get("fclass").filter(|v| !v.is_null()) {
                    let s = v.as_text();
                    if !s.is_empty() && seen.insert(s.clone()) {
                        present.push(s);
                    }
                    if present.len() >= 6 {
                        break;
                    }
                }
            }
            let present_msg = if present.is_empty() {
                String::new()
            } else {
                format!(" (present fclass: {})", present.join(", "))
            };
            return AgentResponse::message_only(format!(
                "I can see {} `{}` features in the current view, but none match your filter{}.{} Try panning to a major highway corridor or zooming out slightly and ask again.",
                before_filters.len(), layer.title, props_msg, present_msg
            ));
        }

        return AgentResponse::message_only(format!(
            "I couldn't find any `{}` matching your request{} in the current map view. Try zooming out a bit (or panning) and ask again.",
            layer.title, props_msg
        ));
    }

    AgentResponse::message_only(
        "I couldn't find anything matching that request in your current map view. Try zooming out a bit (or panning) and ask again.",
    )
}

fn escape_roads_for_flooded_places(
    layers: &LayerBundle,
    index: &GeoIndex,
    aoi: &BBox,
    routing: &RoutingConfig,
) -> AgentResponse {
    let Some(pts_layer) = point_layer(layers, &routing.primary_points_layer_id) else {
        return AgentResponse::message_only("This scenario has no configured places layer.");
    };
    let roads_layer = layers
        .layers
        .iter()
        .find(|layer| layer.kind == GeometryKind::Lines && layer.id.contains("road"))
        .or_else(|| layers.layers.iter().find(|l| l.kind == GeometryKind::Lines));
    let Some(roads_layer) = roads_layer else {
        return AgentResponse::message_only("This scenario has no road layer to highlight.");
    };
    let Some(mask_layer_id) = routing.mask_polygons_layer_id.as_deref() else {
        return AgentResponse::message_only("This scenario has no flood mask configured.");
    };

    let flood_union = index.polygon_union_for_aoi(mask_layer_id, aoi);
    let flooded_points: Vec<&PointFeature> = pts_layer
        .points()
        .filter(|pt| ops::point_in_union(&flood_union, pt.lon, pt.lat))
        .collect();
    if flooded_points.is_empty() {
        return AgentResponse::message_only(
            "Flooded places: matched 0, rendering 0. No flooded places are visible in the current map view.",
        );
    }

    let flooded_ids_all: Vec<&str> = flooded_points
        .iter()
        .map(|p| p.id.as_str())
        .filter(|id| !id.is_empty())
        .collect();
    let flooded_ids: Vec<&str> = flooded_ids_all.iter().copied().take(ESCAPE_FLOODED_CAP).collect();
    if flooded_ids.is_empty() {
        return AgentResponse::message_only("I could not resolve flooded place IDs in this view.");
    }

    let flooded_m: Vec<geo_types::Point<f64>> = flooded_points
        .iter()
        .map(|p| ops::point_3857(p.lon, p.lat))
        .collect();

    let road_candidates: Vec<&LineFeature> = roads_layer
        .lines()
        .filter(|r| r.coords.len() >= 2 && !r.id.is_empty())
        .collect();
    let dry_candidates: Vec<&LineFeature> = road_candidates
        .iter()
        .copied()
        .filter(|r| !intersects_union(r, &flood_union))
        .collect();
    let use_candidates = if dry_candidates.is_empty() {
        &road_candidates
    } else {
        &dry_candidates
    };

    let mut scored: Vec<(f64, &LineFeature)> = Vec::new();
    for &r in use_candidates {
        let Some(line_m) = ops::line_string_3857(r) else {
            continue;
        };
        let d = flooded_m
            .iter()
            .map(|p| line_m.euclidean_distance(p))
            .fold(f64::INFINITY, f64::min);
        if d.is_finite() {
            scored.push((d, r));
        }
    }
    scored.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.1.id.cmp(&b.1.id))
    });

    let roads_ids_all: Vec<&str> = scored.iter().map(|(_, r)| r.id.as_str()).collect();
    let roads_ids: Vec<&str> = roads_ids_all.iter().copied().take(ESCAPE_ROADS_CAP).collect();

    let flooded_h = Highlight::new(
        pts_layer.id.clone(),
        flooded_ids.iter().map(|s| s.to_string()).collect(),
        Some("Flooded places".to_string()),
        "prompt",
    );
    let roads_h = Highlight::new(
        roads_layer.id.clone(),
        roads_ids.iter().map(|s| s.to_string()).collect(),
        Some("Escape roads".to_string()),
        "prompt",
    );
    let msg = format!(
        "Flooded places: matched {}, rendering {} due to budget. Escape roads: matched {}, rendering {} due to budget.",
        flooded_ids_all.len(),
        flooded_ids.len(),
        roads_ids_all.len(),
        roads_ids.len()
    );
    AgentResponse {
        message: msg,
        highlight: Some(flooded_h.clone()),
        highlights: vec![flooded_h, roads_h],
        focus_map: false,
    }
}

fn intersects_union(line: &LineFeature, union: &MultiPolygon<f64>) -> bool {
    if union.0.is_empty() {
        return false;
    }
    match ops::line_string(&line.coords) {
        Some(ls) => ls.intersects(union),
        None => true, // degenerate lines never qualify as escape routes
    }
}

fn recommend_points<'a>(
    layers: &'a LayerBundle,
    index: &GeoIndex,
    aoi: &BBox,
    routing: &RoutingConfig,
    top_n: usize,
    prefer_center: ViewCenter,
) -> Vec<(&'a PointFeature, f64)> {
    let Some(pts_layer) = point_layer(layers, &routing.primary_points_layer_id) else {
        return Vec::new();
    };
    let pts: Vec<&PointFeature> = pts_layer.points().collect();
    if pts.is_empty() {
        return Vec::new();
    }

    // Masked-out points never get recommended.
    let candidates: Vec<&PointFeature> = match routing.mask_polygons_layer_id.as_deref() {
        Some(mask_layer_id) => {
            let union = index.polygon_union_for_aoi(mask_layer_id, aoi);
            pts.iter()
                .copied()
                .filter(|pt| !ops::point_in_union(&union, pt.lon, pt.lat))
                .collect()
        }
        None => pts,
    };
    if candidates.is_empty() {
        return Vec::new();
    }

    let (center_lat, center_lon) = prefer_center;
    let center = ops::point_3857(center_lon, center_lat);
    let local_key = |pt: &PointFeature| -> (f64, String) {
        let p = ops::point_3857(pt.lon, pt.lat);
        let dx = p.x() - center.x();
        let dy = p.y() - center.y();
        (dx * dx + dy * dy, pt.id.clone())
    };

    let rank_local = |mut cands: Vec<&'a PointFeature>| -> Vec<(&'a PointFeature, f64)> {
        cands.sort_by(|a, b| {
            let ka = local_key(a);
            let kb = local_key(b);
            ka.0.partial_cmp(&kb.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| ka.1.cmp(&kb.1))
        });
        cands.into_iter().take(top_n).map(|pt| (pt, 0.0)).collect()
    };

    if routing.proximity.is_empty() {
        return rank_local(candidates);
    }

    let mut scored: Vec<(&PointFeature, f64)> = Vec::new();
    for &pt in &candidates {
        let mut best = f64::INFINITY;
        for rule in &routing.proximity {
            let d = index.distance_to_nearest_point_m(pt, &rule.layer_id);
            if d <= rule.max_meters {
                best = best.min(d * rule.penalty);
            }
        }
        if best.is_finite() {
            scored.push((pt, best));
        }
    }

    if scored.is_empty() {
        return rank_local(candidates);
    }

    scored.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                let ka = local_key(a.0);
                let kb = local_key(b.0);
                ka.0.partial_cmp(&kb.0)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| ka.1.cmp(&kb.1))
            })
    });
    scored.truncate(top_n);
    scored
}

fn point_layer<'a>(layers: &'a LayerBundle, layer_id: &str) -> Option<&'a Layer> {
    layers
        .get(layer_id)
        .filter(|layer| layer.kind == GeometryKind::Points)
}

/// First integer in the prompt, clamped; parse failures return the default.
fn extract_number(prompt: &str, default: usize, clamp: (usize, usize)) -> usize {
    let n = FIRST_INT
        .captures(prompt)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<usize>().ok())
        .unwrap_or(default);
    n.clamp(clamp.0, clamp.1)
}
