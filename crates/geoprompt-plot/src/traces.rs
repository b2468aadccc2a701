//! Plotly trace construction
//!
//! One `scattermapbox` trace per layer, polygons and lines as
//! null-separated coordinate runs, points as marker scatters. Highlight
//! traces always come from the pre-LOD source bundle and are capped under
//! their own budgets.

use serde_json::{json, Value};

use geoprompt_core::{
    features::id_matches, BBox, Highlight, Layer, LayerBundle, LineFeature, PointFeature,
    PolygonFeature,
};
use geoprompt_lod::ClusterMarker;

use crate::{HIGHLIGHT_MAX_LINE_VERTICES, HIGHLIGHT_MAX_POINTS, HIGHLIGHT_MAX_POLY_VERTICES};

fn style_str<'a>(style: &'a Value, path: &[&str], default: &'a str) -> &'a str {
    let mut cur = style;
    for key in path {
        match cur.get(key) {
            Some(v) => cur = v,
            None => return default,
        }
    }
    cur.as_str().unwrap_or(default)
}

fn style_u64(style: &Value, path: &[&str], default: u64) -> u64 {
    let mut cur = style;
    for key in path {
        match cur.get(key) {
            Some(v) => cur = v,
            None => return default,
        }
    }
    cur.as_u64().unwrap_or(default)
}

/// Thin outline of the request AOI; excluded from the legend.
pub fn trace_aoi_bbox(aoi: &BBox) -> Value {
    let b = aoi.normalized();
    json!({
        "type": "scattermapbox",
        "name": "AOI (viewport bbox)",
        "lon": [b.min_lon, b.max_lon, b.max_lon, b.min_lon, b.min_lon],
        "lat": [b.min_lat, b.min_lat, b.max_lat, b.max_lat, b.min_lat],
        "mode": "lines",
        "line": {"color": "rgba(55, 71, 79, 0.7)", "width": 1},
        "hoverinfo": "skip",
        "showlegend": false,
    })
}

fn polygon_runs<'a>(polys: impl Iterator<Item = &'a PolygonFeature>) -> (Vec<Value>, Vec<Value>) {
    let mut lons: Vec<Value> = Vec::new();
    let mut lats: Vec<Value> = Vec::new();
    for f in polys {
        let Some(ring) = f.closed_outer() else {
            continue;
        };
        for (lon, lat) in ring {
            lons.push(json!(lon));
            lats.push(json!(lat));
        }
        lons.push(Value::Null);
        lats.push(Value::Null);
    }
    (lons, lats)
}

fn line_runs<'a>(lines: impl Iterator<Item = &'a LineFeature>) -> (Vec<Value>, Vec<Value>) {
    let mut lons: Vec<Value> = Vec::new();
    let mut lats: Vec<Value> = Vec::new();
    for f in lines {
        if f.coords.len() < 2 {
            continue;
        }
        for &(lon, lat) in &f.coords {
            lons.push(json!(lon));
            lats.push(json!(lat));
        }
        lons.push(Value::Null);
        lats.push(Value::Null);
    }
    (lons, lats)
}

pub fn trace_polygons(layer: &Layer) -> Value {
    let (lons, lats) = polygon_runs(layer.polygons());
    json!({
        "type": "scattermapbox",
        "name": layer.title,
        "lon": lons,
        "lat": lats,
        "mode": "lines",
        "fill": "toself",
        "fillcolor": style_str(&layer.style, &["fillcolor"], "rgba(30, 136, 229, 0.20)"),
        "line": {
            "color": style_str(&layer.style, &["line", "color"], "rgba(30, 136, 229, 0.65)"),
            "width": style_u64(&layer.style, &["line", "width"], 1),
        },
        "hoverinfo": "skip",
    })
}

pub fn trace_lines(layer: &Layer) -> Value {
    let (lons, lats) = line_runs(layer.lines());
    json!({
        "type": "scattermapbox",
        "name": layer.title,
        "lon": lons,
        "lat": lats,
        "mode": "lines",
        "line": {
            "color": style_str(&layer.style, &["line", "color"], "rgba(67, 160, 71, 0.9)"),
            "width": style_u64(&layer.style, &["line", "width"], 2),
        },
        "hoverinfo": "skip",
    })
}

pub fn trace_points(layer: &Layer) -> Value {
    let feats: Vec<&PointFeature> = layer.points().collect();
    json!({
        "type": "scattermapbox",
        "name": layer.title,
        "lon": feats.iter().map(|p| p.lon).collect::<Vec<_>>(),
        "lat": feats.iter().map(|p| p.lat).collect::<Vec<_>>(),
        "mode": "markers",
        "text": feats.iter().map(|p| p.label().unwrap_or("")).collect::<Vec<_>>(),
        "marker": {
            "size": style_u64(&layer.style, &["marker", "size"], 6),
            "color": style_str(&layer.style, &["marker", "color"], "rgba(255, 193, 7, 0.75)"),
        },
        "hovertemplate": "%{text}<extra></extra>",
    })
}

/// Cluster markers for the primary point layer; bubble size grows with
/// sqrt(count), capped so low-zoom views stay readable.
pub fn trace_point_clusters(layer: &Layer, clusters: &[ClusterMarker]) -> Value {
    let color = style_str(&layer.style, &["marker", "color"], "rgba(255, 193, 7, 0.55)");
    json!({
        "type": "scattermapbox",
        "name": format!("{} (clusters)", layer.title),
        "lon": clusters.iter().map(|c| c.lon).collect::<Vec<_>>(),
        "lat": clusters.iter().map(|c| c.lat).collect::<Vec<_>>(),
        "mode": "markers+text",
        "text": clusters.iter().map(|c| c.count.to_string()).collect::<Vec<_>>(),
        "textposition": "middle center",
        "marker": {
            "size": clusters
                .iter()
                .map(|c| 26.min(8 + ((c.count as f64).sqrt() as u64) * 2))
                .collect::<Vec<_>>(),
            "color": color,
            "line": {"color": "rgba(255, 193, 7, 0.9)", "width": 1},
        },
        "hovertemplate": "%{text}<extra></extra>",
    })
}

/// Point features of `layer_id` matching the highlight id set, in id order.
pub fn selected_points<'a>(
    layers: &'a LayerBundle,
    layer_id: &str,
    ids: &std::collections::BTreeSet<String>,
) -> Vec<&'a PointFeature> {
    let Some(layer) = layers.get(layer_id) else {
        return Vec::new();
    };
    let mut out: Vec<&PointFeature> = layer
        .points()
        .filter(|p| id_matches(&p.id, ids))
        .collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
}

/// Build one highlight overlay trace from the pre-LOD bundle.
///
/// Returns the trace and the number of features actually rendered after
/// the overlay budget. Unknown layers render as an empty trace.
pub fn trace_highlight_layer(source_layers: &LayerBundle, highlight: &Highlight) -> (Value, usize) {
    let title = highlight.title.clone().unwrap_or_else(|| "Highlighted".to_string());
    let empty = json!({
        "type": "scattermapbox",
        "name": title,
        "lon": [],
        "lat": [],
    });
    let Some(layer) = source_layers.get(&highlight.layer_id) else {
        return (empty, 0);
    };

    match layer.kind {
        geoprompt_core::GeometryKind::Points => {
            let mut selected = selected_points(source_layers, &highlight.layer_id, &highlight.feature_ids);
            selected.truncate(HIGHLIGHT_MAX_POINTS);
            let trace = json!({
                "type": "scattermapbox",
                "name": title,
                "lon": selected.iter().map(|p| p.lon).collect::<Vec<_>>(),
                "lat": selected.iter().map(|p| p.lat).collect::<Vec<_>>(),
                "mode": "markers+text",
                "text": selected.iter().map(|p| p.label().unwrap_or("")).collect::<Vec<_>>(),
                "textposition": "top center",
                "marker": {"size": 11, "color": "rgba(229, 57, 53, 0.95)"},
                "hovertemplate": "%{text}<extra></extra>",
            });
            (trace, selected.len())
        }
        geoprompt_core::GeometryKind::Lines => {
            let mut matches: Vec<&LineFeature> = layer
                .lines()
                .filter(|f| id_matches(&f.id, &highlight.feature_ids))
                .collect();
            matches.sort_by(|a, b| a.id.cmp(&b.id));
            let kept = take_until_vertex_budget(
                &matches,
                HIGHLIGHT_MAX_LINE_VERTICES,
                |l| l.coords.len(),
            );
            let (lons, lats) = line_runs(kept.iter().copied());
            let trace = json!({
                "type": "scattermapbox",
                "name": title,
                "lon": lons,
                "lat": lats,
                "mode": "lines",
                "line": {"color": "rgba(229, 57, 53, 0.95)", "width": 4},
                "hoverinfo": "skip",
            });
            (trace, kept.len())
        }
        geoprompt_core::GeometryKind::Polygons => {
            let mut matches: Vec<&PolygonFeature> = layer
                .polygons()
                .filter(|f| id_matches(&f.id, &highlight.feature_ids))
                .collect();
            matches.sort_by(|a, b| a.id.cmp(&b.id));
            let kept = take_until_vertex_budget(
                &matches,
                HIGHLIGHT_MAX_POLY_VERTICES,
                |p| p.vertex_count(),
            );
            let (lons, lats) = polygon_runs(kept.iter().copied());
            let trace = json!({
                "type": "scattermapbox",
                "name": title,
                "lon": lons,
                "lat": lats,
                "mode": "lines",
                "fill": "toself",
                "fillcolor": "rgba(229, 57, 53, 0.15)",
                "line": {"color": "rgba(229, 57, 53, 0.95)", "width": 2},
                "hoverinfo": "skip",
            });
            (trace, kept.len())
        }
    }
}

fn take_until_vertex_budget<'a, T>(
    items: &[&'a T],
    max_vertices: usize,
    vertices_of: impl Fn(&T) -> usize,
) -> Vec<&'a T> {
    let mut out = Vec::new();
    let mut total = 0usize;
    for item in items {
        let v = vertices_of(item);
        if total + v > max_vertices {
            break;
        }
        total += v;
        out.push(*item);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoprompt_core::{GeometryKind, LayerFeature, Props};
    use std::collections::BTreeSet;

    fn points_layer(ids: &[&str]) -> Layer {
        Layer {
            id: "places".to_string(),
            kind: GeometryKind::Points,
            title: "Places".to_string(),
            features: ids
                .iter()
                .map(|id| {
                    LayerFeature::Point(PointFeature {
                        id: id.to_string(),
                        lon: 14.0,
                        lat: 50.0,
                        props: Props::new(),
                    })
                })
                .collect(),
            style: serde_json::Value::Null,
        }
    }

    #[test]
    fn aoi_trace_closes_the_ring() {
        let t = trace_aoi_bbox(&BBox::new(0.0, 0.0, 1.0, 1.0));
        let lons = t["lon"].as_array().unwrap();
        assert_eq!(lons.len(), 5);
        assert_eq!(lons[0], lons[4]);
    }

    #[test]
    fn highlight_points_match_multipart_base_ids() {
        let bundle = LayerBundle::new(vec![points_layer(&["way/1:0", "way/1:1", "way/2"])]);
        let ids: BTreeSet<String> = ["way/1".to_string()].into_iter().collect();
        let highlight = Highlight::new("places", ids, None, "prompt");
        let (_, rendered) = trace_highlight_layer(&bundle, &highlight);
        assert_eq!(rendered, 2);
    }

    #[test]
    fn highlight_line_budget_caps_whole_features() {
        let features = (0..5)
            .map(|i| {
                LayerFeature::Line(LineFeature {
                    id: format!("l{i}"),
                    coords: (0..50).map(|v| (v as f64, 0.0)).collect(),
                    props: Props::new(),
                })
            })
            .collect();
        let bundle = LayerBundle::new(vec![Layer {
            id: "roads".to_string(),
            kind: GeometryKind::Lines,
            title: "Roads".to_string(),
            features,
            style: serde_json::Value::Null,
        }]);
        let ids: BTreeSet<String> = (0..5).map(|i| format!("l{i}")).collect();
        let highlight = Highlight::new("roads", ids, None, "prompt");
        let (trace, rendered) = trace_highlight_layer(&bundle, &highlight);
        assert_eq!(rendered, 5);
        assert!(trace["lon"].as_array().unwrap().len() > 0);
    }

    #[test]
    fn unknown_highlight_layer_renders_empty() {
        let bundle = LayerBundle::new(vec![]);
        let ids: BTreeSet<String> = ["x".to_string()].into_iter().collect();
        let (trace, rendered) = trace_highlight_layer(&bundle, &Highlight::new("nope", ids, None, "prompt"));
        assert_eq!(rendered, 0);
        assert_eq!(trace["lon"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn cluster_bubble_size_saturates() {
        let layer = points_layer(&["a"]);
        let clusters = vec![
            ClusterMarker { lon: 14.0, lat: 50.0, count: 1 },
            ClusterMarker { lon: 14.1, lat: 50.1, count: 10_000 },
        ];
        let t = trace_point_clusters(&layer, &clusters);
        let sizes = t["marker"]["size"].as_array().unwrap();
        assert_eq!(sizes[0], 10); // 8 + sqrt(1)*2
        assert_eq!(sizes[1], 26); // capped
    }
}
