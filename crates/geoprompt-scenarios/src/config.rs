//! Scenario config model
//!
//! Mirrors the `scenario.yaml` schema. Field names are camelCase on disk.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use geoprompt_core::GeometryKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewCenter {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultView {
    pub center: ViewCenter,
    pub zoom: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerSourceType {
    GeojsonPolygons,
    OverpassPoints,
    OverpassLines,
    Geoparquet,
}

/// Per-source GeoParquet options, kept under `source` so the YAML stays
/// self-contained.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoParquetOptions {
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default)]
    pub name_column: Option<String>,
    #[serde(default)]
    pub class_column: Option<String>,
    #[serde(default = "default_geometry_column")]
    pub geometry_column: String,
    /// Below this zoom, line/polygon geometry is not decoded at all
    /// (unless a render policy opens specific classes earlier).
    #[serde(default)]
    pub min_zoom_for_geometry: Option<f64>,
    #[serde(default)]
    pub render_policy: Option<RenderPolicy>,
}

fn default_id_column() -> String {
    "osm_id".to_string()
}

fn default_geometry_column() -> String {
    "geometry".to_string()
}

/// Zoom-dependent candidate selection for dense GeoParquet layers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderPolicy {
    /// `fclass -> min zoom`: the class becomes eligible at that zoom.
    #[serde(default)]
    pub min_zoom_for_geometry_by_class: Option<BTreeMap<String, f64>>,
    /// `max zoom (inclusive, stringified) -> candidate cap`; the last entry
    /// is the default above all listed zooms.
    #[serde(default)]
    pub max_candidates_by_zoom: Option<BTreeMap<String, u64>>,
    /// SQL ordering expression used to rank candidates when capping.
    #[serde(default)]
    pub order_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSource {
    #[serde(rename = "type")]
    pub source_type: LayerSourceType,
    pub path: String,
    #[serde(default)]
    pub geoparquet: Option<GeoParquetOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
    pub id: String,
    pub title: String,
    pub kind: GeometryKind,
    pub source: LayerSource,
    /// Plot styling hints (free-form, interpreted by the plot builder).
    #[serde(default)]
    pub style: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProximityRule {
    pub layer_id: String,
    pub max_meters: f64,
    #[serde(default = "default_penalty")]
    pub penalty: f64,
}

fn default_penalty() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MaskMode {
    #[default]
    #[serde(rename = "IN_MASK")]
    InMask,
    #[serde(rename = "OUTSIDE_MASK")]
    OutsideMask,
}

/// A rule that highlights a subset of features on the map, for prompts
/// like "show flooded places" or "highlight motorways".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightRule {
    pub keywords: Vec<String>,
    pub layer_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "default_max_features")]
    pub max_features: usize,

    #[serde(default)]
    pub mask_layer_id: Option<String>,
    #[serde(default)]
    pub mask_mode: MaskMode,

    /// Props filter, all conditions must match.
    /// Example: `{"fclass": ["motorway", "trunk"]}`.
    #[serde(default)]
    pub props: Option<BTreeMap<String, Vec<String>>>,
}

fn default_max_features() -> usize {
    500
}

/// Prompt-router configuration. Keyword matching only, kept simple on
/// purpose.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfig {
    pub primary_points_layer_id: String,
    #[serde(default)]
    pub mask_polygons_layer_id: Option<String>,
    #[serde(default = "default_point_singular")]
    pub point_label_singular: String,
    #[serde(default = "default_point_plural")]
    pub point_label_plural: String,
    #[serde(default = "default_mask_label")]
    pub mask_label: String,

    #[serde(default = "default_show_layers_keywords")]
    pub show_layers_keywords: Vec<String>,
    #[serde(default = "default_count_keywords")]
    pub count_keywords: Vec<String>,
    #[serde(default = "default_mask_keywords")]
    pub mask_keywords: Vec<String>,
    #[serde(default = "default_recommend_keywords")]
    pub recommend_keywords: Vec<String>,

    #[serde(default)]
    pub proximity: Vec<ProximityRule>,
    #[serde(default)]
    pub highlight_rules: Vec<HighlightRule>,
}

fn default_point_singular() -> String {
    "point".to_string()
}

fn default_point_plural() -> String {
    "points".to_string()
}

fn default_mask_label() -> String {
    "masked area".to_string()
}

fn default_show_layers_keywords() -> Vec<String> {
    ["show layers", "help", "reset", "start over"]
        .map(String::from)
        .to_vec()
}

fn default_count_keywords() -> Vec<String> {
    vec!["how many".to_string()]
}

fn default_mask_keywords() -> Vec<String> {
    ["flood", "flooded", "water"].map(String::from).to_vec()
}

fn default_recommend_keywords() -> Vec<String> {
    vec!["recommend".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotConfig {
    /// Which point layer the agent may highlight/cluster.
    pub highlight_layer_id: String,
    /// Optional per-layer trace title overrides.
    #[serde(default)]
    pub trace_titles: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioConfig {
    pub id: String,
    pub title: String,
    pub default_view: DefaultView,
    /// Engine hint: "large" scenarios are forced onto the DuckDB engine.
    #[serde(default = "default_data_size")]
    pub data_size: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Example prompts surfaced in the UI and the router's help fallback.
    #[serde(default)]
    pub example_prompts: Vec<String>,

    pub layers: Vec<LayerConfig>,
    pub routing: RoutingConfig,
    pub plot: PlotConfig,
}

fn default_data_size() -> String {
    "small".to_string()
}

fn default_enabled() -> bool {
    true
}

impl ScenarioConfig {
    pub fn is_large(&self) -> bool {
        self.data_size.eq_ignore_ascii_case("large")
    }

    pub fn has_geoparquet_layers(&self) -> bool {
        self.layers
            .iter()
            .any(|l| l.source.source_type == LayerSourceType::Geoparquet)
    }

    pub fn layer(&self, layer_id: &str) -> Option<&LayerConfig> {
        self.layers.iter().find(|l| l.id == layer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
id: demo_city
title: Demo city
defaultView:
  center: { lat: 50.08, lon: 14.44 }
  zoom: 12.0
dataSize: small
layers:
  - id: flood
    title: Flood zone
    kind: polygons
    source: { type: geojson_polygons, path: data/flood.geojson }
    style: { fillcolor: "rgba(30, 136, 229, 0.20)" }
  - id: places
    title: Places
    kind: points
    source: { type: overpass_points, path: data/places.json }
routing:
  primaryPointsLayerId: places
  maskPolygonsLayerId: flood
  pointLabelSingular: place
  pointLabelPlural: places
  maskLabel: water
  highlightRules:
    - keywords: ["show flooded places"]
      layerId: places
      maskLayerId: flood
      maskMode: IN_MASK
      title: Flooded places
plot:
  highlightLayerId: places
"#;

    #[test]
    fn parses_scenario_yaml_with_defaults() {
        let cfg: ScenarioConfig = serde_yaml::from_str(YAML).unwrap();
        assert_eq!(cfg.id, "demo_city");
        assert!(cfg.enabled);
        assert!(!cfg.is_large());
        assert_eq!(cfg.routing.count_keywords, vec!["how many"]);
        assert_eq!(cfg.routing.highlight_rules[0].max_features, 500);
        assert_eq!(cfg.routing.highlight_rules[0].mask_mode, MaskMode::InMask);
        assert_eq!(
            cfg.layers[0].source.source_type,
            LayerSourceType::GeojsonPolygons
        );
        assert!(!cfg.has_geoparquet_layers());
    }

    #[test]
    fn parses_geoparquet_options_and_policy() {
        let yaml = r#"
type: geoparquet
path: data/roads.parquet
geoparquet:
  idColumn: osm_id
  classColumn: fclass
  minZoomForGeometry: 10.5
  renderPolicy:
    minZoomForGeometryByClass: { motorway: 6.0, residential: 13.0 }
    maxCandidatesByZoom: { "7.5": 3000, "9.0": 8000, "20.0": 40000 }
"#;
        let source: LayerSource = serde_yaml::from_str(yaml).unwrap();
        let opts = source.geoparquet.unwrap();
        assert_eq!(opts.id_column, "osm_id");
        assert_eq!(opts.geometry_column, "geometry");
        assert_eq!(opts.min_zoom_for_geometry, Some(10.5));
        let policy = opts.render_policy.unwrap();
        assert_eq!(
            policy
                .min_zoom_for_geometry_by_class
                .as_ref()
                .unwrap()
                .get("motorway"),
            Some(&6.0)
        );
        assert_eq!(policy.max_candidates_by_zoom.as_ref().unwrap().len(), 3);
    }
}
