//! Geoprompt LOD
//!
//! Level-of-detail pipeline: reduces an AOI feature bundle to a rendering
//! budget before trace building. LOD affects only the *rendered* payload -
//! spatial reasoning (routing, masks, highlights) always runs on the
//! non-LOD features.
//!
//! Guarantees:
//! - Output layer ids and order match the input bundle exactly.
//! - Deterministic for identical inputs; all sort keys tie-break by id.
//! - Highlighted features survive hard caps until nothing else is left.

pub mod points;
pub mod simplify;

use std::collections::{BTreeMap, BTreeSet};

use geoprompt_core::{GeometryKind, LayerBundle};

pub use points::{cap_points, cluster_points, should_cluster_points, ClusterMarker};
pub use simplify::{
    count_line_vertices, count_poly_vertices, simplify_lines_until_budget,
    simplify_polygons_until_budget, LINE_TOLERANCE_M, POLY_TOLERANCE_M,
};

/// Per-request vertex/marker budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LodBudgets {
    /// Marker cap for the primary (clusterable) point layer.
    pub max_points_rendered: usize,
    /// Marker cap for each auxiliary point layer.
    pub max_aux_points_rendered: usize,
    pub max_line_vertices: usize,
    pub max_poly_vertices: usize,
}

impl Default for LodBudgets {
    fn default() -> Self {
        Self {
            max_points_rendered: 2_500,
            max_aux_points_rendered: 2_500,
            max_line_vertices: 40_000,
            max_poly_vertices: 80_000,
        }
    }
}

/// Highlight keep-sets per layer id; kept features survive hard caps.
pub type KeepSets = BTreeMap<String, BTreeSet<String>>;

/// Apply zoom-aware level-of-detail policies to a bundle.
///
/// `cluster_points_layer_id` names the primary point layer: at low zoom
/// (or over budget) it is clustered into grid markers returned as a
/// parallel artifact while its raw features stay in the bundle for
/// highlight lookup. Auxiliary point layers are only capped, never
/// clustered.
pub fn apply_lod(
    layers: &LayerBundle,
    view_zoom: f64,
    cluster_points_layer_id: &str,
    keep: &KeepSets,
    budgets: &LodBudgets,
) -> (LayerBundle, Option<Vec<ClusterMarker>>) {
    let n_poly_layers = layers.of_kind(GeometryKind::Polygons).count().max(1);
    let n_line_layers = layers.of_kind(GeometryKind::Lines).count().max(1);
    let poly_budget = budgets.max_poly_vertices / n_poly_layers;
    let line_budget = budgets.max_line_vertices / n_line_layers;

    let mut clusters: Option<Vec<ClusterMarker>> = None;
    let mut out_layers = Vec::with_capacity(layers.layers.len());

    for layer in &layers.layers {
        let keep_ids = keep.get(&layer.id);
        match layer.kind {
            GeometryKind::Polygons => {
                let polys: Vec<_> = layer.polygons().cloned().collect();
                let simplified =
                    simplify_polygons_until_budget(&polys, view_zoom, poly_budget, keep_ids);
                out_layers.push(layer.with_features(
                    simplified
                        .into_iter()
                        .map(geoprompt_core::LayerFeature::Polygon)
                        .collect(),
                ));
            }
            GeometryKind::Lines => {
                let lines: Vec<_> = layer.lines().cloned().collect();
                let simplified =
                    simplify_lines_until_budget(&lines, view_zoom, line_budget, keep_ids);
                out_layers.push(layer.with_features(
                    simplified
                        .into_iter()
                        .map(geoprompt_core::LayerFeature::Line)
                        .collect(),
                ));
            }
            GeometryKind::Points => {
                let pts: Vec<_> = layer.points().cloned().collect();
                if layer.id == cluster_points_layer_id {
                    if should_cluster_points(view_zoom, pts.len(), budgets.max_points_rendered) {
                        let mut markers = cluster_points(&pts, view_zoom);
                        markers.truncate(budgets.max_points_rendered);
                        clusters = Some(markers);
                        // Raw features stay for highlight lookup.
                        out_layers.push(layer.clone());
                    } else if pts.len() > budgets.max_points_rendered {
                        let capped =
                            cap_points(&pts, budgets.max_points_rendered, keep_ids);
                        out_layers.push(layer.with_features(
                            capped
                                .into_iter()
                                .map(geoprompt_core::LayerFeature::Point)
                                .collect(),
                        ));
                    } else {
                        out_layers.push(layer.clone());
                    }
                } else if pts.len() > budgets.max_aux_points_rendered {
                    let capped = cap_points(&pts, budgets.max_aux_points_rendered, keep_ids);
                    out_layers.push(layer.with_features(
                        capped
                            .into_iter()
                            .map(geoprompt_core::LayerFeature::Point)
                            .collect(),
                    ));
                } else {
                    out_layers.push(layer.clone());
                }
            }
        }
    }

    (LayerBundle::new(out_layers), clusters)
}
