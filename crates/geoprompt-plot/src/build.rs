//! Map payload assembly
//!
//! Trace order is fixed: AOI outline, polygons, lines, points (or cluster
//! markers for the primary layer), then highlight overlays. The meta block
//! carries highlight echo data and the stats the HUD/telemetry consume.

use serde_json::{json, Value};

use geoprompt_core::{BBox, GeometryKind, Highlight, LayerBundle};
use geoprompt_lod::ClusterMarker;

use crate::traces::{
    selected_points, trace_aoi_bbox, trace_highlight_layer, trace_lines, trace_point_clusters,
    trace_points, trace_polygons,
};
use crate::view::fit_view_to_points;

/// Zoom-out floor when focusing: never jump out more than this.
const FOCUS_MAX_ZOOM_OUT: f64 = 2.0;

#[derive(Debug, Clone, Default)]
pub struct PlotOptions<'a> {
    pub aoi: Option<&'a BBox>,
    /// `(lat, lon)`.
    pub view_center: Option<(f64, f64)>,
    pub view_zoom: Option<f64>,
    /// `(width, height)` pixels.
    pub viewport: Option<(u32, u32)>,
    pub focus_map: bool,
    pub clusters: Option<&'a [ClusterMarker]>,
    pub cluster_layer_id: Option<&'a str>,
}

/// Build the full Plotly payload.
///
/// `lod_layers` drive the base traces; `highlight_source_layers` is the
/// pre-LOD bundle that highlight overlays and focus fitting read from, so
/// overlays survive LOD caps.
pub fn build_map_plot(
    lod_layers: &LayerBundle,
    highlights: &[Highlight],
    highlight_source_layers: &LayerBundle,
    opts: &PlotOptions<'_>,
) -> Value {
    let mut traces: Vec<Value> = Vec::new();

    if let Some(aoi) = opts.aoi {
        traces.push(trace_aoi_bbox(aoi));
    }

    // Stable render order: polygons -> lines -> points.
    for layer in lod_layers.of_kind(GeometryKind::Polygons) {
        traces.push(trace_polygons(layer));
    }
    for layer in lod_layers.of_kind(GeometryKind::Lines) {
        traces.push(trace_lines(layer));
    }
    for layer in lod_layers.of_kind(GeometryKind::Points) {
        match (opts.clusters, opts.cluster_layer_id) {
            (Some(clusters), Some(cluster_id)) if layer.id == cluster_id => {
                traces.push(trace_point_clusters(layer, clusters));
            }
            _ => traces.push(trace_points(layer)),
        }
    }

    let active: Vec<&Highlight> = highlights
        .iter()
        .filter(|h| !h.feature_ids.is_empty())
        .collect();

    let mut overlay_meta: Vec<Value> = Vec::new();
    let mut highlight_requested = 0usize;
    let mut highlight_rendered = 0usize;
    for highlight in &active {
        let (trace, rendered) = trace_highlight_layer(highlight_source_layers, highlight);
        traces.push(trace);
        highlight_requested += highlight.feature_ids.len();
        highlight_rendered += rendered;
        overlay_meta.push(json!({
            "layerId": highlight.layer_id,
            "requested": highlight.feature_ids.len(),
            "rendered": rendered,
            "mode": highlight.mode,
            "title": highlight.title.clone().unwrap_or_else(|| "Highlighted".to_string()),
        }));
    }

    // View: keep the caller's center/zoom unless focus is requested and
    // point highlights exist to focus on.
    let mut center = opts
        .view_center
        .map(|(lat, lon)| json!({"lat": lat, "lon": lon}))
        .unwrap_or_else(|| json!({"lat": 0.0, "lon": 0.0}));
    let mut zoom = opts.view_zoom.unwrap_or(2.0);

    if opts.focus_map && !active.is_empty() {
        let focus_points: Vec<_> = active
            .iter()
            .flat_map(|h| selected_points(highlight_source_layers, &h.layer_id, &h.feature_ids))
            .collect();
        if let Some(((fit_lat, fit_lon), fit_zoom)) =
            fit_view_to_points(&focus_points, opts.viewport)
        {
            center = json!({"lat": fit_lat, "lon": fit_lon});
            zoom = match opts.view_zoom {
                Some(current) => fit_zoom.max(current - FOCUS_MAX_ZOOM_OUT),
                None => fit_zoom,
            };
        }
    }

    let mut meta = serde_json::Map::new();
    if let Some(first) = active.first() {
        meta.insert(
            "highlight".to_string(),
            json!({
                "layerId": first.layer_id,
                "featureIds": first.feature_ids.iter().collect::<Vec<_>>(),
                "title": first.title.clone().unwrap_or_else(|| "Highlighted".to_string()),
            }),
        );
    }
    if !overlay_meta.is_empty() {
        meta.insert("highlights".to_string(), json!(overlay_meta));
    }
    meta.insert(
        "stats".to_string(),
        stats_block(
            lod_layers,
            opts.clusters,
            highlight_requested,
            highlight_rendered,
        ),
    );

    json!({
        "data": traces,
        "layout": {
            "mapbox": {
                "center": center,
                "zoom": zoom,
                "style": "carto-positron",
            },
            "showlegend": true,
            "legend": {
                "x": 0.99,
                "y": 0.99,
                "xanchor": "right",
                "yanchor": "top",
                "bgcolor": "rgba(255, 255, 255, 0.75)",
                "bordercolor": "rgba(120, 120, 120, 0.35)",
                "borderwidth": 1,
                "font": {"size": 11},
            },
            "meta": Value::Object(meta),
        },
    })
}

fn stats_block(
    lod_layers: &LayerBundle,
    clusters: Option<&[ClusterMarker]>,
    highlight_requested: usize,
    highlight_rendered: usize,
) -> Value {
    let pts: usize = lod_layers
        .of_kind(GeometryKind::Points)
        .map(|l| l.features.len())
        .sum();
    let lines: usize = lod_layers
        .of_kind(GeometryKind::Lines)
        .map(|l| l.features.len())
        .sum();
    let polys: usize = lod_layers
        .of_kind(GeometryKind::Polygons)
        .map(|l| l.features.len())
        .sum();
    let line_vertices: usize = lod_layers
        .of_kind(GeometryKind::Lines)
        .flat_map(|l| l.lines())
        .map(|f| f.coords.len())
        .sum();
    let poly_vertices: usize = lod_layers
        .of_kind(GeometryKind::Polygons)
        .flat_map(|l| l.polygons())
        .map(|f| f.vertex_count())
        .sum();

    json!({
        "clusterMode": clusters.is_some(),
        "renderedPoints": pts,
        "renderedLines": lines,
        "renderedPolygons": polys,
        "renderedClusters": clusters.map(<[ClusterMarker]>::len).unwrap_or(0),
        "lineVertices": line_vertices,
        "polyVertices": poly_vertices,
        "highlightRequested": highlight_requested,
        "highlightRendered": highlight_rendered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoprompt_core::{Layer, LayerFeature, PointFeature, Props};
    use std::collections::BTreeSet;

    fn places(ids: &[&str]) -> Layer {
        Layer {
            id: "places".to_string(),
            kind: GeometryKind::Points,
            title: "Places".to_string(),
            features: ids
                .iter()
                .enumerate()
                .map(|(i, id)| {
                    LayerFeature::Point(PointFeature {
                        id: id.to_string(),
                        lon: 14.4 + i as f64 * 0.01,
                        lat: 50.0 + i as f64 * 0.01,
                        props: Props::new(),
                    })
                })
                .collect(),
            style: serde_json::Value::Null,
        }
    }

    #[test]
    fn trace_order_is_aoi_then_layers_then_overlays() {
        let bundle = LayerBundle::new(vec![places(&["a", "b"])]);
        let ids: BTreeSet<String> = ["a".to_string()].into_iter().collect();
        let highlight = Highlight::new("places", ids, Some("H".to_string()), "prompt");
        let aoi = BBox::new(14.0, 49.9, 15.0, 50.5);
        let plot = build_map_plot(
            &bundle,
            &[highlight],
            &bundle,
            &PlotOptions {
                aoi: Some(&aoi),
                view_center: Some((50.0, 14.4)),
                view_zoom: Some(12.0),
                ..Default::default()
            },
        );
        let data = plot["data"].as_array().unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data[0]["name"], "AOI (viewport bbox)");
        assert_eq!(data[1]["name"], "Places");
        assert_eq!(data[2]["name"], "H");
    }

    #[test]
    fn highlight_stats_count_requested_vs_rendered() {
        let source = LayerBundle::new(vec![places(&["a", "b", "c"])]);
        let lod = LayerBundle::new(vec![places(&["a"])]); // LOD dropped b, c
        let ids: BTreeSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let highlight = Highlight::new("places", ids, None, "prompt");
        let plot = build_map_plot(&lod, &[highlight], &source, &PlotOptions::default());
        let stats = &plot["layout"]["meta"]["stats"];
        assert_eq!(stats["highlightRequested"], 3);
        // Built from the pre-LOD source, so all 3 render.
        assert_eq!(stats["highlightRendered"], 3);
        let overlays = plot["layout"]["meta"]["highlights"].as_array().unwrap();
        assert_eq!(overlays[0]["requested"], 3);
        assert_eq!(overlays[0]["rendered"], 3);
    }

    #[test]
    fn empty_highlight_is_a_noop() {
        let bundle = LayerBundle::new(vec![places(&["a"])]);
        let highlight = Highlight::new("places", BTreeSet::new(), None, "prompt");
        let plot = build_map_plot(&bundle, &[highlight], &bundle, &PlotOptions::default());
        assert_eq!(plot["data"].as_array().unwrap().len(), 1);
        assert!(plot["layout"]["meta"].get("highlight").is_none());
    }

    #[test]
    fn focus_map_floors_zoom_at_current_minus_two() {
        let bundle = LayerBundle::new(vec![places(&["a", "b"])]);
        let ids: BTreeSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let highlight = Highlight::new("places", ids, None, "prompt");
        let plot = build_map_plot(
            &bundle,
            &[highlight],
            &bundle,
            &PlotOptions {
                view_center: Some((20.0, 0.0)),
                view_zoom: Some(15.0),
                focus_map: true,
                ..Default::default()
            },
        );
        let zoom = plot["layout"]["mapbox"]["zoom"].as_f64().unwrap();
        assert!(zoom >= 13.0, "zoom floored at current-2, got {zoom}");
        // Center moved to the highlighted points.
        let lat = plot["layout"]["mapbox"]["center"]["lat"].as_f64().unwrap();
        assert!((lat - 50.005).abs() < 0.01, "lat {lat}");
    }

    #[test]
    fn cluster_trace_replaces_primary_point_trace() {
        let bundle = LayerBundle::new(vec![places(&["a", "b"])]);
        let clusters = vec![ClusterMarker { lon: 14.4, lat: 50.0, count: 2 }];
        let plot = build_map_plot(
            &bundle,
            &[],
            &bundle,
            &PlotOptions {
                clusters: Some(&clusters),
                cluster_layer_id: Some("places"),
                ..Default::default()
            },
        );
        let data = plot["data"].as_array().unwrap();
        assert_eq!(data[0]["name"], "Places (clusters)");
        assert_eq!(plot["layout"]["meta"]["stats"]["renderedClusters"], 1);
        assert_eq!(plot["layout"]["meta"]["stats"]["clusterMode"], true);
    }
}
