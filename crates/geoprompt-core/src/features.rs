//! Feature and layer model
//!
//! Scenario data is generic: a bundle of ordered layers, each holding
//! point, line, or polygon features with a stable string id and a typed
//! property map. All scenario-specific semantics (titles, styling,
//! routing roles) live in scenario configuration, not here.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// A scalar property value as found in GeoJSON properties / OSM tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl PropValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Stringified form used for rule matching (`props` filters compare text).
    pub fn as_text(&self) -> String {
        match self {
            PropValue::Null => String::new(),
            PropValue::Bool(b) => b.to_string(),
            PropValue::Int(i) => i.to_string(),
            PropValue::Float(f) => f.to_string(),
            PropValue::Str(s) => s.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PropValue::Null)
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        PropValue::Str(s.to_string())
    }
}

impl From<String> for PropValue {
    fn from(s: String) -> Self {
        PropValue::Str(s)
    }
}

impl From<i64> for PropValue {
    fn from(i: i64) -> Self {
        PropValue::Int(i)
    }
}

impl From<&serde_json::Value> for PropValue {
    fn from(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => PropValue::Null,
            serde_json::Value::Bool(b) => PropValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    PropValue::Int(i)
                } else {
                    PropValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => PropValue::Str(s.clone()),
            // Arrays/objects do not occur in feature props; keep the text form.
            other => PropValue::Str(other.to_string()),
        }
    }
}

/// Property map with stable iteration order (deterministic serialization).
pub type Props = BTreeMap<String, PropValue>;

/// Lookup helpers shared by all feature variants.
fn prop_str<'a>(props: &'a Props, key: &str) -> Option<&'a str> {
    props.get(key).and_then(PropValue::as_str)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointFeature {
    pub id: String,
    pub lon: f64,
    pub lat: f64,
    #[serde(default)]
    pub props: Props,
}

impl PointFeature {
    /// Display label: explicit `label`, else `name`, else nothing.
    pub fn label(&self) -> Option<&str> {
        prop_str(&self.props, "label").or_else(|| prop_str(&self.props, "name"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineFeature {
    pub id: String,
    /// Ordered `(lon, lat)` vertices; valid lines have at least two.
    pub coords: Vec<(f64, f64)>,
    #[serde(default)]
    pub props: Props,
}

impl LineFeature {
    pub fn fclass(&self) -> Option<&str> {
        prop_str(&self.props, "fclass")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonFeature {
    pub id: String,
    /// `rings[0]` is the outer ring, the rest are holes.
    pub rings: Vec<Vec<(f64, f64)>>,
    #[serde(default)]
    pub props: Props,
}

impl PolygonFeature {
    /// Build a polygon feature, auto-closing the outer ring.
    pub fn new(id: impl Into<String>, mut rings: Vec<Vec<(f64, f64)>>, props: Props) -> Self {
        if let Some(outer) = rings.first_mut() {
            if outer.len() >= 3 && outer.first() != outer.last() {
                let first = outer[0];
                outer.push(first);
            }
        }
        Self {
            id: id.into(),
            rings,
            props,
        }
    }

    /// Outer ring closed (first == last), or `None` when degenerate.
    pub fn closed_outer(&self) -> Option<Vec<(f64, f64)>> {
        let outer = self.rings.first()?;
        if outer.is_empty() {
            return None;
        }
        let mut ring = outer.clone();
        if ring.first() != ring.last() {
            let first = ring[0];
            ring.push(first);
        }
        if ring.len() < 4 {
            return None;
        }
        Some(ring)
    }

    pub fn vertex_count(&self) -> usize {
        self.rings.iter().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryKind {
    Points,
    Lines,
    Polygons,
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryKind::Points => write!(f, "points"),
            GeometryKind::Lines => write!(f, "lines"),
            GeometryKind::Polygons => write!(f, "polygons"),
        }
    }
}

/// One feature of any geometry kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LayerFeature {
    Point(PointFeature),
    Line(LineFeature),
    Polygon(PolygonFeature),
}

impl LayerFeature {
    pub fn id(&self) -> &str {
        match self {
            LayerFeature::Point(p) => &p.id,
            LayerFeature::Line(l) => &l.id,
            LayerFeature::Polygon(p) => &p.id,
        }
    }

    pub fn props(&self) -> &Props {
        match self {
            LayerFeature::Point(p) => &p.props,
            LayerFeature::Line(l) => &l.props,
            LayerFeature::Polygon(p) => &p.props,
        }
    }

    pub fn kind(&self) -> GeometryKind {
        match self {
            LayerFeature::Point(_) => GeometryKind::Points,
            LayerFeature::Line(_) => GeometryKind::Lines,
            LayerFeature::Polygon(_) => GeometryKind::Polygons,
        }
    }

    pub fn as_point(&self) -> Option<&PointFeature> {
        match self {
            LayerFeature::Point(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_line(&self) -> Option<&LineFeature> {
        match self {
            LayerFeature::Line(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_polygon(&self) -> Option<&PolygonFeature> {
        match self {
            LayerFeature::Polygon(p) => Some(p),
            _ => None,
        }
    }
}

/// A scenario-defined layer with a stable id and free-form style hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: String,
    pub kind: GeometryKind,
    pub title: String,
    pub features: Vec<LayerFeature>,
    /// Styling hints (colors/widths) consumed by the plot builder.
    #[serde(default)]
    pub style: serde_json::Value,
}

impl Layer {
    /// Same layer metadata with an empty feature list.
    pub fn empty_like(&self) -> Layer {
        Layer {
            id: self.id.clone(),
            kind: self.kind,
            title: self.title.clone(),
            features: Vec::new(),
            style: self.style.clone(),
        }
    }

    /// Same layer metadata with a replaced feature list.
    pub fn with_features(&self, features: Vec<LayerFeature>) -> Layer {
        Layer {
            id: self.id.clone(),
            kind: self.kind,
            title: self.title.clone(),
            features,
            style: self.style.clone(),
        }
    }

    pub fn points(&self) -> impl Iterator<Item = &PointFeature> {
        self.features.iter().filter_map(LayerFeature::as_point)
    }

    pub fn lines(&self) -> impl Iterator<Item = &LineFeature> {
        self.features.iter().filter_map(LayerFeature::as_line)
    }

    pub fn polygons(&self) -> impl Iterator<Item = &PolygonFeature> {
        self.features.iter().filter_map(LayerFeature::as_polygon)
    }
}

/// Ordered list of layers; the order drives render ordering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerBundle {
    pub layers: Vec<Layer>,
}

impl LayerBundle {
    pub fn new(layers: Vec<Layer>) -> Self {
        Self { layers }
    }

    pub fn get(&self, layer_id: &str) -> Option<&Layer> {
        let lid = layer_id.trim();
        self.layers.iter().find(|layer| layer.id == lid)
    }

    pub fn of_kind(&self, kind: GeometryKind) -> impl Iterator<Item = &Layer> {
        self.layers.iter().filter(move |layer| layer.kind == kind)
    }
}

/// Emphasis on a subset of features in a single layer, rendered on top of
/// the LOD'd base layers. An empty id set is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub layer_id: String,
    pub feature_ids: BTreeSet<String>,
    pub title: Option<String>,
    pub mode: String,
}

impl Highlight {
    pub fn new(
        layer_id: impl Into<String>,
        feature_ids: BTreeSet<String>,
        title: Option<String>,
        mode: impl Into<String>,
    ) -> Self {
        Self {
            layer_id: layer_id.into(),
            feature_ids,
            title: title.map(Into::into),
            mode: mode.into(),
        }
    }
}

/// Match a feature id against a highlight id set, accepting multipart
/// suffixes: `"way/1:2"` matches a requested `"way/1"`.
pub fn id_matches(fid: &str, ids: &BTreeSet<String>) -> bool {
    if ids.contains(fid) {
        return true;
    }
    match fid.split_once(':') {
        Some((base, _)) if !base.is_empty() => ids.contains(base),
        _ => false,
    }
}
