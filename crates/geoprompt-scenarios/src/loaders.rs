//! Layer source loaders
//!
//! File-based layer ingestion for small scenarios:
//! - GeoJSON polygon collections
//! - Overpass JSON with `out center;` (points)
//! - Overpass JSON with `out geom;` (way lines)
//!
//! Parse failures are fatal for the scenario; malformed individual
//! elements are skipped silently.

use std::path::Path;

use geojson::{GeoJson, Value as GjValue};
use serde_json::Value;

use geoprompt_core::{
    Layer, LayerBundle, LayerFeature, LineFeature, PointFeature, PolygonFeature, Props, PropValue,
};

use crate::config::LayerSourceType;
use crate::registry::ScenarioRegistry;
use crate::ScenarioError;

/// Load all file-backed layers of a scenario into a bundle.
///
/// GeoParquet layers cannot be materialized here; scenarios declaring them
/// must go through the DuckDB engine.
pub fn load_scenario_layers(
    registry: &ScenarioRegistry,
    scenario_id: Option<&str>,
) -> Result<LayerBundle, ScenarioError> {
    let entry = registry.get(scenario_id);
    let cfg = &entry.config;

    let mut layers = Vec::with_capacity(cfg.layers.len());
    for layer_cfg in &cfg.layers {
        let path = registry.resolve_data_path(&layer_cfg.source.path);
        if layer_cfg.source.source_type == LayerSourceType::Geoparquet {
            return Err(ScenarioError::GeoParquetNotLoadable {
                scenario: cfg.id.clone(),
                layer: layer_cfg.id.clone(),
            });
        }
        if !path.exists() {
            return Err(ScenarioError::MissingFile {
                scenario: cfg.id.clone(),
                path: layer_cfg.source.path.clone(),
            });
        }

        let features = match layer_cfg.source.source_type {
            LayerSourceType::GeojsonPolygons => load_geojson_polygons(&path)?
                .into_iter()
                .map(LayerFeature::Polygon)
                .collect(),
            LayerSourceType::OverpassPoints => load_overpass_points(&path)?
                .into_iter()
                .map(LayerFeature::Point)
                .collect(),
            LayerSourceType::OverpassLines => load_overpass_lines(&path)?
                .into_iter()
                .map(LayerFeature::Line)
                .collect(),
            LayerSourceType::Geoparquet => unreachable!("checked above"),
        };

        layers.push(Layer {
            id: layer_cfg.id.clone(),
            kind: layer_cfg.kind,
            title: layer_cfg.title.clone(),
            features,
            style: layer_cfg.style.clone(),
        });
    }

    Ok(LayerBundle::new(layers))
}

/// GeoJSON FeatureCollection -> polygon features. MultiPolygons explode
/// into one feature per part with `-{j}` id suffixes.
pub fn load_geojson_polygons(path: &Path) -> Result<Vec<PolygonFeature>, ScenarioError> {
    let raw = read(path)?;
    let geojson: GeoJson = raw
        .parse()
        .map_err(|e: geojson::Error| malformed("geojson_polygons", path, e.to_string()))?;

    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(malformed(
            "geojson_polygons",
            path,
            "expected a FeatureCollection".to_string(),
        ));
    };

    let mut out = Vec::new();
    for (i, feature) in collection.features.into_iter().enumerate() {
        let props = json_map_to_props(feature.properties.as_ref());
        let fid = feature
            .id
            .as_ref()
            .map(|id| match id {
                geojson::feature::Id::String(s) => s.clone(),
                geojson::feature::Id::Number(n) => n.to_string(),
            })
            .or_else(|| props.get("id").map(PropValue::as_text))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("poly-{i}"));

        let Some(geometry) = feature.geometry else {
            continue;
        };
        match geometry.value {
            GjValue::Polygon(rings) => {
                let rings = convert_rings(&rings);
                if !rings.is_empty() {
                    out.push(PolygonFeature::new(fid, rings, props));
                }
            }
            GjValue::MultiPolygon(polys) => {
                for (j, poly) in polys.iter().enumerate() {
                    let rings = convert_rings(poly);
                    if !rings.is_empty() {
                        out.push(PolygonFeature::new(
                            format!("{fid}-{j}"),
                            rings,
                            props.clone(),
                        ));
                    }
                }
            }
            _ => {}
        }
    }
    Ok(out)
}

fn convert_rings(rings: &[Vec<Vec<f64>>]) -> Vec<Vec<(f64, f64)>> {
    rings
        .iter()
        .map(|ring| {
            ring.iter()
                .filter(|p| p.len() >= 2)
                .map(|p| (p[0], p[1]))
                .collect::<Vec<_>>()
        })
        .filter(|ring: &Vec<(f64, f64)>| !ring.is_empty())
        .collect()
}

/// Overpass JSON (`out center;`): nodes carry `lat`/`lon`, ways/relations
/// may carry `center: {lat, lon}`. Ids are `{type}/{id}`.
pub fn load_overpass_points(path: &Path) -> Result<Vec<PointFeature>, ScenarioError> {
    let data: Value = parse_json(path, "overpass_points")?;
    let mut out = Vec::new();

    for el in elements(&data) {
        let etype = el.get("type").and_then(Value::as_str).unwrap_or("node");
        let Some(eid) = el.get("id").and_then(Value::as_i64) else {
            continue;
        };

        let (lon, lat) = match (lon_lat_of(el), lon_lat_of_center(el)) {
            (Some(pos), _) | (None, Some(pos)) => pos,
            (None, None) => continue,
        };

        let tags = el.get("tags").and_then(Value::as_object);
        let mut props = Props::new();
        props.insert("osm_type".to_string(), PropValue::from(etype));
        props.insert("osm_id".to_string(), PropValue::Int(eid));
        if let Some(tags) = tags {
            for (k, v) in tags {
                props.insert(k.clone(), PropValue::from(v));
            }
            if let Some(name) = tags.get("name").and_then(Value::as_str) {
                props
                    .entry("label".to_string())
                    .or_insert_with(|| PropValue::from(name));
            }
        }

        out.push(PointFeature {
            id: format!("{etype}/{eid}"),
            lon,
            lat,
            props,
        });
    }
    Ok(out)
}

/// Overpass JSON (`out geom;`): ways carry `geometry: [{lat, lon}, ...]`.
pub fn load_overpass_lines(path: &Path) -> Result<Vec<LineFeature>, ScenarioError> {
    let data: Value = parse_json(path, "overpass_lines")?;
    let mut out = Vec::new();

    for el in elements(&data) {
        if el.get("type").and_then(Value::as_str) != Some("way") {
            continue;
        }
        let Some(eid) = el.get("id").and_then(Value::as_i64) else {
            continue;
        };

        let coords: Vec<(f64, f64)> = el
            .get("geometry")
            .and_then(Value::as_array)
            .map(|geom| {
                geom.iter()
                    .filter_map(|p| {
                        Some((
                            p.get("lon")?.as_f64()?,
                            p.get("lat")?.as_f64()?,
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default();
        if coords.len() < 2 {
            continue;
        }

        let mut props = Props::new();
        props.insert("osm_type".to_string(), PropValue::from("way"));
        props.insert("osm_id".to_string(), PropValue::Int(eid));
        if let Some(tags) = el.get("tags").and_then(Value::as_object) {
            for (k, v) in tags {
                props.insert(k.clone(), PropValue::from(v));
            }
        }

        out.push(LineFeature {
            id: format!("way/{eid}"),
            coords,
            props,
        });
    }
    Ok(out)
}

fn elements(data: &Value) -> impl Iterator<Item = &Value> {
    data.get("elements")
        .and_then(Value::as_array)
        .map(|a| a.iter())
        .into_iter()
        .flatten()
}

fn lon_lat_of(el: &Value) -> Option<(f64, f64)> {
    Some((el.get("lon")?.as_f64()?, el.get("lat")?.as_f64()?))
}

fn lon_lat_of_center(el: &Value) -> Option<(f64, f64)> {
    let center = el.get("center")?;
    Some((center.get("lon")?.as_f64()?, center.get("lat")?.as_f64()?))
}

fn json_map_to_props(map: Option<&serde_json::Map<String, Value>>) -> Props {
    let mut props = Props::new();
    if let Some(map) = map {
        for (k, v) in map {
            props.insert(k.clone(), PropValue::from(v));
        }
    }
    props
}

fn read(path: &Path) -> Result<String, ScenarioError> {
    std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn parse_json(path: &Path, kind: &'static str) -> Result<Value, ScenarioError> {
    let raw = read(path)?;
    serde_json::from_str(&raw).map_err(|e| malformed(kind, path, e.to_string()))
}

fn malformed(kind: &'static str, path: &Path, reason: String) -> ScenarioError {
    ScenarioError::MalformedSource {
        kind,
        path: path.display().to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn geojson_polygons_explode_multipolygons() {
        let f = write_tmp(
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{"name":"zone"},"geometry":{
                    "type":"MultiPolygon","coordinates":[
                        [[[0,0],[1,0],[1,1],[0,1],[0,0]]],
                        [[[5,5],[6,5],[6,6],[5,6],[5,5]]]
                    ]}}
            ]}"#,
        );
        let polys = load_geojson_polygons(f.path()).unwrap();
        assert_eq!(polys.len(), 2);
        assert_eq!(polys[0].id, "poly-0-0");
        assert_eq!(polys[1].id, "poly-0-1");
        assert_eq!(polys[0].props.get("name"), Some(&PropValue::from("zone")));
    }

    #[test]
    fn overpass_points_take_node_and_center_positions() {
        let f = write_tmp(
            r#"{"elements":[
                {"type":"node","id":1,"lat":50.0,"lon":14.0,"tags":{"name":"U Fleku","amenity":"pub"}},
                {"type":"way","id":2,"center":{"lat":50.1,"lon":14.1},"tags":{}},
                {"type":"node","id":3}
            ]}"#,
        );
        let pts = load_overpass_points(f.path()).unwrap();
        assert_eq!(pts.len(), 2);
        assert_eq!(pts[0].id, "node/1");
        assert_eq!(pts[0].label(), Some("U Fleku"));
        assert_eq!(pts[1].id, "way/2");
        assert_eq!(pts[1].lon, 14.1);
    }

    #[test]
    fn overpass_lines_require_way_geometry() {
        let f = write_tmp(
            r#"{"elements":[
                {"type":"way","id":10,"geometry":[{"lat":50.0,"lon":14.0},{"lat":50.01,"lon":14.01}],"tags":{"highway":"primary"}},
                {"type":"way","id":11,"geometry":[{"lat":50.0,"lon":14.0}]},
                {"type":"node","id":12,"lat":50.0,"lon":14.0}
            ]}"#,
        );
        let lines = load_overpass_lines(f.path()).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].id, "way/10");
        assert_eq!(lines[0].coords.len(), 2);
        assert_eq!(
            lines[0].props.get("highway"),
            Some(&PropValue::from("primary"))
        );
    }

    #[test]
    fn malformed_geojson_is_a_config_error() {
        let f = write_tmp("{not json");
        assert!(matches!(
            load_geojson_polygons(f.path()),
            Err(ScenarioError::MalformedSource { .. })
        ));
    }
}
