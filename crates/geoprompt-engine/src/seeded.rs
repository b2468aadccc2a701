//! DuckDB engine
//!
//! Two modes, chosen by the scenario's source declarations:
//! - Seeded mode (small scenarios): load features into generic
//!   points/lines/polygons tables once per database file, then slice by
//!   tile bbox queries.
//! - Query-on-read GeoParquet mode (large scenarios): see `geoparquet`.
//!
//! Connections are per-thread (DuckDB connections are not shared across
//! threads here), and so are the per-tile bundle caches.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use duckdb::{params, Connection};
use parking_lot::Mutex;
use tracing::info;

use geoprompt_core::{
    tiles::{tile_bbox, tile_zoom_for_view_zoom, tiles_for_bbox, TileId},
    BBox, BoundedCache, GeoIndex, Layer, LayerBundle, LayerFeature, LineFeature, PointFeature,
    PolygonFeature, Props,
};
use geoprompt_scenarios::{loaders::load_scenario_layers, ScenarioRegistry};

use crate::geoparquet::GeoParquetStore;
use crate::{env, EngineError, EngineResult, LayerEngine, MapContext, PinSets, ENGINE_DUCKDB};

const THREAD_TILE_CACHE_ITEMS: usize = 256;

thread_local! {
    /// One connection per (thread, database file).
    static CONNECTIONS: RefCell<HashMap<PathBuf, Connection>> = RefCell::new(HashMap::new());
    /// Per-thread memoized tile slices, keyed per database file.
    static TILE_CACHES: RefCell<HashMap<PathBuf, BoundedCache<TileId, LayerBundle>>> =
        RefCell::new(HashMap::new());
}

pub struct DuckDbEngine {
    registry: Arc<ScenarioRegistry>,
    override_path: Option<PathBuf>,
    seeded: Mutex<HashMap<String, Arc<SeededBase>>>,
    geoparquet: GeoParquetStore,
}

impl DuckDbEngine {
    pub fn new(registry: Arc<ScenarioRegistry>) -> Self {
        Self {
            registry,
            override_path: None,
            seeded: Mutex::new(HashMap::new()),
            geoparquet: GeoParquetStore::new(),
        }
    }

    pub fn with_path(registry: Arc<ScenarioRegistry>, path: PathBuf) -> Self {
        Self {
            override_path: Some(path),
            ..Self::new(registry)
        }
    }

    fn seeded_base(&self, scenario_id: &str) -> Result<Arc<SeededBase>, EngineError> {
        let mut seeded = self.seeded.lock();
        if let Some(base) = seeded.get(scenario_id) {
            return Ok(base.clone());
        }
        let layers = load_scenario_layers(&self.registry, Some(scenario_id))?;
        let index = Arc::new(GeoIndex::build(layers.clone()));
        let base = Arc::new(SeededBase {
            scenario_id: scenario_id.to_string(),
            path: env::duckdb_path_for_scenario(scenario_id, self.override_path.as_ref()),
            threads: env::duckdb_threads(),
            layers,
            index,
            init_lock: Mutex::new(()),
            initialized: AtomicBool::new(false),
        });
        seeded.insert(scenario_id.to_string(), base.clone());
        Ok(base)
    }
}

impl LayerEngine for DuckDbEngine {
    fn name(&self) -> &'static str {
        ENGINE_DUCKDB
    }

    fn get(&self, ctx: &MapContext) -> Result<EngineResult, EngineError> {
        self.get_with_pins(ctx, &PinSets::new())
    }

    fn get_with_pins(&self, ctx: &MapContext, pins: &PinSets) -> Result<EngineResult, EngineError> {
        let scenario = self.registry.get(Some(&ctx.scenario_id)).config.clone();

        if scenario.has_geoparquet_layers() {
            let (mut layers, stats) =
                self.geoparquet
                    .bundle(&self.registry, &scenario, &ctx.aoi, ctx.view_zoom)?;
            if !pins.is_empty() {
                self.geoparquet.merge_pinned(
                    &self.registry,
                    &scenario,
                    &ctx.aoi,
                    ctx.view_zoom,
                    pins,
                    &mut layers,
                )?;
            }
            let index = Arc::new(GeoIndex::build(layers.clone()));
            return Ok(EngineResult {
                layers,
                index,
                stats: Some(stats),
            });
        }

        // Seeded mode never caps candidates, so pins need no special path.
        let base = self.seeded_base(&scenario.id)?;
        base.ensure_initialized()?;
        let tile_zoom = tile_zoom_for_view_zoom(ctx.view_zoom);
        let sliced = base.slice_layers_tiled(&ctx.aoi, tile_zoom)?;
        Ok(EngineResult {
            layers: sliced,
            index: base.index.clone(),
            stats: None,
        })
    }
}

/// Seeded per-scenario state: full layer bundle, its index, and the
/// one-shot database seeding guard.
struct SeededBase {
    scenario_id: String,
    path: PathBuf,
    threads: usize,
    layers: LayerBundle,
    index: Arc<GeoIndex>,
    init_lock: Mutex<()>,
    initialized: AtomicBool,
}

impl SeededBase {
    /// Idempotent schema + seed, once per database file. Lock-free after
    /// the initialized flag is set.
    fn ensure_initialized(&self) -> Result<(), EngineError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.init_lock.lock();
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        let conn = open_connection(&self.path, self.threads)?;
        init_schema(&conn)?;
        seed_all_layers(&conn, &self.layers)?;
        info!(scenario = %self.scenario_id, path = %self.path.display(), "seeded duckdb tables");

        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Tile-aligned slice through the seeded tables; same dedupe/ordering
    /// contract as the in-memory index.
    fn slice_layers_tiled(&self, aoi: &BBox, tile_zoom: u8) -> Result<LayerBundle, EngineError> {
        let tiles = tiles_for_bbox(tile_zoom, aoi);
        if tiles.is_empty() {
            let layers = self.layers.layers.iter().map(Layer::empty_like).collect();
            return Ok(LayerBundle::new(layers));
        }

        let mut merged: HashMap<&str, BTreeMap<String, LayerFeature>> = self
            .layers
            .layers
            .iter()
            .map(|layer| (layer.id.as_str(), BTreeMap::new()))
            .collect();

        for tile in tiles {
            let cached = TILE_CACHES.with(|caches| {
                caches
                    .borrow_mut()
                    .entry(self.path.clone())
                    .or_insert_with(|| BoundedCache::new(THREAD_TILE_CACHE_ITEMS))
                    .get(&tile)
            });
            let sliced = match cached {
                Some(bundle) => bundle,
                None => {
                    let bundle = self.with_conn(|conn| {
                        query_seeded_layers_bbox(conn, &tile_bbox(tile), &self.layers)
                    })?;
                    TILE_CACHES.with(|caches| {
                        caches
                            .borrow_mut()
                            .entry(self.path.clone())
                            .or_insert_with(|| BoundedCache::new(THREAD_TILE_CACHE_ITEMS))
                            .put(tile, bundle.clone());
                    });
                    bundle
                }
            };
            for layer in &sliced.layers {
                let Some(bucket) = merged.get_mut(layer.id.as_str()) else {
                    continue;
                };
                for feature in &layer.features {
                    let fid = feature.id();
                    if fid.is_empty() {
                        continue;
                    }
                    bucket
                        .entry(fid.to_string())
                        .or_insert_with(|| feature.clone());
                }
            }
        }

        let mut out_layers = Vec::with_capacity(self.layers.layers.len());
        for base in &self.layers.layers {
            let features = merged
                .remove(base.id.as_str())
                .map(|bucket| bucket.into_values().collect())
                .unwrap_or_default();
            out_layers.push(base.with_features(features));
        }
        Ok(LayerBundle::new(out_layers))
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        CONNECTIONS.with(|conns| {
            let mut conns = conns.borrow_mut();
            if !conns.contains_key(&self.path) {
                conns.insert(self.path.clone(), open_connection(&self.path, self.threads)?);
            }
            f(conns.get(&self.path).expect("just inserted"))
        })
    }
}

fn open_connection(path: &Path, threads: usize) -> Result<Connection, EngineError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| EngineError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch(&format!("PRAGMA threads={threads};"))?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> Result<(), EngineError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS points (
          layer_id TEXT,
          id TEXT,
          lon DOUBLE,
          lat DOUBLE,
          props_json TEXT,
          min_lon DOUBLE,
          min_lat DOUBLE,
          max_lon DOUBLE,
          max_lat DOUBLE,
          PRIMARY KEY(layer_id, id)
        );
        CREATE TABLE IF NOT EXISTS lines (
          layer_id TEXT,
          id TEXT,
          coords_json TEXT,
          props_json TEXT,
          min_lon DOUBLE,
          min_lat DOUBLE,
          max_lon DOUBLE,
          max_lat DOUBLE,
          PRIMARY KEY(layer_id, id)
        );
        CREATE TABLE IF NOT EXISTS polygons (
          layer_id TEXT,
          id TEXT,
          rings_json TEXT,
          props_json TEXT,
          min_lon DOUBLE,
          min_lat DOUBLE,
          max_lon DOUBLE,
          max_lat DOUBLE,
          PRIMARY KEY(layer_id, id)
        );
        "#,
    )?;
    Ok(())
}

fn table_count(conn: &Connection, table: &str) -> Result<i64, EngineError> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })?;
    Ok(n)
}

fn props_json(props: &Props) -> String {
    serde_json::to_string(props).unwrap_or_else(|_| "{}".to_string())
}

fn coords_bbox(coords: &[(f64, f64)]) -> (f64, f64, f64, f64) {
    let mut b = (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
    for &(lon, lat) in coords {
        b.0 = b.0.min(lon);
        b.1 = b.1.min(lat);
        b.2 = b.2.max(lon);
        b.3 = b.3.max(lat);
    }
    if !b.0.is_finite() {
        return (0.0, 0.0, 0.0, 0.0);
    }
    b
}

/// Seed only if empty, per table per database file.
fn seed_all_layers(conn: &Connection, layers: &LayerBundle) -> Result<(), EngineError> {
    if table_count(conn, "points")? == 0 {
        let mut stmt = conn.prepare(
            "INSERT OR IGNORE INTO points VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for layer in &layers.layers {
            for f in layer.points() {
                stmt.execute(params![
                    layer.id,
                    f.id,
                    f.lon,
                    f.lat,
                    props_json(&f.props),
                    f.lon,
                    f.lat,
                    f.lon,
                    f.lat,
                ])?;
            }
        }
    }

    if table_count(conn, "lines")? == 0 {
        let mut stmt =
            conn.prepare("INSERT OR IGNORE INTO lines VALUES (?, ?, ?, ?, ?, ?, ?, ?)")?;
        for layer in &layers.layers {
            for f in layer.lines() {
                let (min_lon, min_lat, max_lon, max_lat) = coords_bbox(&f.coords);
                stmt.execute(params![
                    layer.id,
                    f.id,
                    serde_json::to_string(&f.coords).unwrap_or_default(),
                    props_json(&f.props),
                    min_lon,
                    min_lat,
                    max_lon,
                    max_lat,
                ])?;
            }
        }
    }

    if table_count(conn, "polygons")? == 0 {
        let mut stmt =
            conn.prepare("INSERT OR IGNORE INTO polygons VALUES (?, ?, ?, ?, ?, ?, ?, ?)")?;
        for layer in &layers.layers {
            for f in layer.polygons() {
                let all: Vec<(f64, f64)> = f.rings.iter().flatten().copied().collect();
                let (min_lon, min_lat, max_lon, max_lat) = coords_bbox(&all);
                stmt.execute(params![
                    layer.id,
                    f.id,
                    serde_json::to_string(&f.rings).unwrap_or_default(),
                    props_json(&f.props),
                    min_lon,
                    min_lat,
                    max_lon,
                    max_lat,
                ])?;
            }
        }
    }

    Ok(())
}

/// One bbox query per table; results grouped back into the scenario's
/// layer order with features sorted by id.
fn query_seeded_layers_bbox(
    conn: &Connection,
    aoi: &BBox,
    base_layers: &LayerBundle,
) -> Result<LayerBundle, EngineError> {
    let b = aoi.normalized();
    let where_sql = "max_lon >= ? AND min_lon <= ? AND max_lat >= ? AND min_lat <= ?";
    let bind = params![b.min_lon, b.max_lon, b.min_lat, b.max_lat];

    let mut by_layer: HashMap<String, Vec<LayerFeature>> = HashMap::new();

    let mut stmt = conn.prepare(&format!(
        "SELECT layer_id, id, lon, lat, props_json FROM points WHERE {where_sql}"
    ))?;
    let rows = stmt.query_map(bind, |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, f64>(2)?,
            row.get::<_, f64>(3)?,
            row.get::<_, Option<String>>(4)?,
        ))
    })?;
    for row in rows {
        let (layer_id, id, lon, lat, props) = row?;
        by_layer
            .entry(layer_id)
            .or_default()
            .push(LayerFeature::Point(PointFeature {
                id,
                lon,
                lat,
                props: parse_props(props),
            }));
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT layer_id, id, coords_json, props_json FROM lines WHERE {where_sql}"
    ))?;
    let rows = stmt.query_map(bind, |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<String>>(3)?,
        ))
    })?;
    for row in rows {
        let (layer_id, id, coords, props) = row?;
        let coords: Vec<(f64, f64)> = coords
            .and_then(|c| serde_json::from_str(&c).ok())
            .unwrap_or_default();
        by_layer
            .entry(layer_id)
            .or_default()
            .push(LayerFeature::Line(LineFeature {
                id,
                coords,
                props: parse_props(props),
            }));
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT layer_id, id, rings_json, props_json FROM polygons WHERE {where_sql}"
    ))?;
    let rows = stmt.query_map(bind, |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<String>>(3)?,
        ))
    })?;
    for row in rows {
        let (layer_id, id, rings, props) = row?;
        let rings: Vec<Vec<(f64, f64)>> = rings
            .and_then(|r| serde_json::from_str(&r).ok())
            .unwrap_or_default();
        by_layer
            .entry(layer_id)
            .or_default()
            .push(LayerFeature::Polygon(PolygonFeature {
                id,
                rings,
                props: parse_props(props),
            }));
    }

    let mut out = Vec::with_capacity(base_layers.layers.len());
    for base in &base_layers.layers {
        let mut features = by_layer.remove(&base.id).unwrap_or_default();
        features.retain(|f| f.kind() == base.kind);
        features.sort_by(|a, b| a.id().cmp(b.id()));
        out.push(base.with_features(features));
    }
    Ok(LayerBundle::new(out))
}

fn parse_props(raw: Option<String>) -> Props {
    raw.and_then(|r| serde_json::from_str(&r).ok())
        .unwrap_or_default()
}
