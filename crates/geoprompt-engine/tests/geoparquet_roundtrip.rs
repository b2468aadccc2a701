//! End-to-end GeoParquet engine tests against real parquet files written
//! through DuckDB's COPY.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use duckdb::{params, Connection};
use geozero::{CoordDimensions, ToWkb};

use geoprompt_core::BBox;
use geoprompt_engine::{DuckDbEngine, LayerEngine, MapContext, PinSets};
use geoprompt_scenarios::ScenarioRegistry;

fn write_file(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut f = std::fs::File::create(path).unwrap();
    f.write_all(content.as_bytes()).unwrap();
}

fn write_points_parquet(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE pts (osm_id VARCHAR, name VARCHAR, fclass VARCHAR,
                           xmin DOUBLE, ymin DOUBLE, xmax DOUBLE, ymax DOUBLE);
         INSERT INTO pts VALUES
           ('1', 'A', 'pub', 14.44, 50.08, 14.44, 50.08),
           ('2', 'B', 'cafe', 14.45, 50.085, 14.45, 50.085),
           ('3', 'far', 'pub', 10.0, 10.0, 10.0, 10.0);",
    )
    .unwrap();
    conn.execute_batch(&format!(
        "COPY (SELECT * FROM pts) TO '{}' (FORMAT PARQUET);",
        path.display()
    ))
    .unwrap();
}

fn line_wkb(coords: &[(f64, f64)]) -> Vec<u8> {
    let ls = geo_types::LineString::from(coords.to_vec());
    geo_types::Geometry::LineString(ls)
        .to_wkb(CoordDimensions::xy())
        .unwrap()
}

/// Lines parquet using the struct-column bbox encoding.
fn write_lines_parquet(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE ways (osm_id VARCHAR, name VARCHAR, fclass VARCHAR, geometry BLOB,
                            gxmin DOUBLE, gymin DOUBLE, gxmax DOUBLE, gymax DOUBLE);",
    )
    .unwrap();
    let rows: Vec<(&str, &str, Vec<(f64, f64)>)> = vec![
        ("10", "motorway", vec![(14.40, 50.06), (14.48, 50.10)]),
        ("11", "residential", vec![(14.41, 50.07), (14.42, 50.08)]),
    ];
    for (id, fclass, coords) in rows {
        let (mut xmin, mut ymin, mut xmax, mut ymax) =
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for &(x, y) in &coords {
            xmin = xmin.min(x);
            ymin = ymin.min(y);
            xmax = xmax.max(x);
            ymax = ymax.max(y);
        }
        conn.execute(
            "INSERT INTO ways VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![id, id, fclass, line_wkb(&coords), xmin, ymin, xmax, ymax],
        )
        .unwrap();
    }
    conn.execute_batch(&format!(
        "COPY (SELECT osm_id, name, fclass, geometry,
                      {{'xmin': gxmin, 'ymin': gymin, 'xmax': gxmax, 'ymax': gymax}} AS geometry_bbox
                 FROM ways) TO '{}' (FORMAT PARQUET);",
        path.display()
    ))
    .unwrap();
}

fn fixture() -> tempfile::TempDir {
    let tmp = tempfile::tempdir().unwrap();
    write_points_parquet(&tmp.path().join("data/places.parquet"));
    write_lines_parquet(&tmp.path().join("data/roads.parquet"));
    write_file(
        &tmp.path().join("scenarios/big_city/scenario.yaml"),
        r#"
id: big_city
title: Big city
defaultView: { center: { lat: 50.08, lon: 14.44 }, zoom: 12.0 }
dataSize: large
layers:
  - id: places
    title: Places
    kind: points
    source:
      type: geoparquet
      path: data/places.parquet
      geoparquet: { idColumn: osm_id, nameColumn: name, classColumn: fclass }
  - id: roads
    title: Roads
    kind: lines
    source:
      type: geoparquet
      path: data/roads.parquet
      geoparquet:
        idColumn: osm_id
        nameColumn: name
        classColumn: fclass
        minZoomForGeometry: 11.0
routing:
  primaryPointsLayerId: places
plot: { highlightLayerId: places }
"#,
    );
    tmp
}

fn ctx(zoom: f64) -> MapContext {
    MapContext {
        scenario_id: "big_city".to_string(),
        aoi: BBox::new(14.40, 50.05, 14.50, 50.12),
        view_center: (50.08, 14.44),
        view_zoom: zoom,
        viewport: None,
    }
}

#[test]
fn points_decode_from_bbox_columns() {
    let tmp = fixture();
    let registry = Arc::new(ScenarioRegistry::discover(tmp.path()).unwrap());
    let engine = DuckDbEngine::new(registry);

    let result = engine.get(&ctx(12.0)).unwrap();
    let places = result.layers.get("places").unwrap();
    let mut ids: Vec<&str> = places.features.iter().map(|f| f.id()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["1", "2"]);

    let stats = result.stats.expect("geoparquet stats");
    let layers = stats["layers"].as_array().unwrap();
    assert_eq!(layers[0]["layerId"], "places");
    assert_eq!(layers[0]["n"], 2);
    assert_eq!(layers[0]["cap"]["safetyLimit"], 500_000);
}

#[test]
fn lines_skip_below_geometry_zoom_floor() {
    let tmp = fixture();
    let registry = Arc::new(ScenarioRegistry::discover(tmp.path()).unwrap());
    let engine = DuckDbEngine::new(registry);

    let result = engine.get(&ctx(8.0)).unwrap();
    let roads = result.layers.get("roads").unwrap();
    assert!(roads.features.is_empty());
    let stats = result.stats.unwrap();
    assert_eq!(
        stats["layers"][1]["skippedReason"],
        "belowMinZoomForGeometry"
    );
    assert_eq!(stats["layers"][1]["geomMinZoom"], 11.0);
}

#[test]
fn lines_decode_above_geometry_zoom_floor() {
    let tmp = fixture();
    let registry = Arc::new(ScenarioRegistry::discover(tmp.path()).unwrap());
    let engine = DuckDbEngine::new(registry);

    let result = engine.get(&ctx(13.0)).unwrap();
    let roads = result.layers.get("roads").unwrap();
    assert_eq!(roads.features.len(), 2);
    let ids: BTreeSet<&str> = roads.features.iter().map(|f| f.id()).collect();
    assert!(ids.contains("10") && ids.contains("11"));
}

#[test]
fn identical_requests_hit_the_bundle_cache() {
    let tmp = fixture();
    let registry = Arc::new(ScenarioRegistry::discover(tmp.path()).unwrap());
    let engine = DuckDbEngine::new(registry);

    let a = engine.get(&ctx(12.0)).unwrap();
    let b = engine.get(&ctx(12.0)).unwrap();
    assert_eq!(a.layers, b.layers);
}

#[test]
fn pinned_ids_survive_policy_caps() {
    let tmp = fixture();
    // Tighten the roads layer to a single candidate via render policy.
    let yaml_path = tmp.path().join("scenarios/big_city/scenario.yaml");
    let yaml = std::fs::read_to_string(&yaml_path).unwrap();
    let yaml = yaml.replace(
        "        minZoomForGeometry: 11.0\n",
        "        minZoomForGeometry: 11.0\n        renderPolicy:\n          maxCandidatesByZoom: { \"20.0\": 1 }\n",
    );
    write_file(&yaml_path, &yaml);

    let registry = Arc::new(ScenarioRegistry::discover(tmp.path()).unwrap());
    let engine = DuckDbEngine::new(registry);

    let capped = engine.get(&ctx(13.0)).unwrap();
    let roads = capped.layers.get("roads").unwrap();
    assert_eq!(roads.features.len(), 1, "policy cap keeps one candidate");
    let rendered_id = roads.features[0].id().to_string();
    let missing_id = if rendered_id == "10" { "11" } else { "10" };

    let mut pins = PinSets::new();
    pins.insert(
        "roads".to_string(),
        [missing_id.to_string()].into_iter().collect(),
    );
    let pinned = engine.get_with_pins(&ctx(13.0), &pins).unwrap();
    let roads = pinned.layers.get("roads").unwrap();
    let ids: BTreeSet<&str> = roads.features.iter().map(|f| f.id()).collect();
    assert!(ids.contains(missing_id), "pinned id fetched past the cap");
}
