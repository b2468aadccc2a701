//! Query-on-read GeoParquet mode
//!
//! Large scenarios never materialize fully: each request runs bounded
//! bbox queries against the GeoParquet files, one per layer, and the
//! resulting bundle is memoized per (scenario, rounded AOI, zoom bucket).
//!
//! The AOI is snapped to its cache key before querying so a cache hit and
//! a fresh query always see the same extent.

pub mod bbox;
pub mod decode;
pub mod layer;
pub mod pins;
pub mod policy;
pub mod sql;
pub mod stats;

use std::collections::BTreeMap;

use duckdb::Connection;
use parking_lot::Mutex;
use serde_json::json;
use tracing::debug;

use geoprompt_core::{AoiKey, BBox, BoundedCache, Layer, LayerBundle};
use geoprompt_scenarios::{LayerSourceType, ScenarioConfig, ScenarioRegistry};

use crate::{env, EngineError, PinSets};

const BUNDLE_CACHE_ITEMS: usize = 128;

type BundleKey = (String, AoiKey, i64);

/// Memoized GeoParquet bundles plus the shared bbox-encoding cache.
pub struct GeoParquetStore {
    bundle_cache: Mutex<BoundedCache<BundleKey, (LayerBundle, serde_json::Value)>>,
}

impl GeoParquetStore {
    pub fn new() -> Self {
        Self {
            bundle_cache: Mutex::new(BoundedCache::new(BUNDLE_CACHE_ITEMS)),
        }
    }

    /// The AOI bundle for a scenario, memoized by
    /// `(scenario, rounded AOI, zoom bucket)`.
    pub fn bundle(
        &self,
        registry: &ScenarioRegistry,
        scenario: &ScenarioConfig,
        aoi: &BBox,
        view_zoom: f64,
    ) -> Result<(LayerBundle, serde_json::Value), EngineError> {
        let decimals = env::geoparquet_aoi_decimals();
        let aoi_key = aoi.rounded_key(decimals);
        let zoom_bucket = (view_zoom * 2.0).round() as i64;
        let key = (scenario.id.clone(), aoi_key, zoom_bucket);

        if let Some(hit) = self.bundle_cache.lock().get(&key) {
            return Ok(hit);
        }

        let snapped_aoi = aoi_key.to_bbox(decimals);
        let bucket_zoom = zoom_bucket as f64 / 2.0;

        let conn = open_memory_connection()?;
        let mut out_layers = Vec::with_capacity(scenario.layers.len());
        let mut layer_stats = Vec::with_capacity(scenario.layers.len());

        for layer_cfg in &scenario.layers {
            if layer_cfg.source.source_type != LayerSourceType::Geoparquet {
                out_layers.push(empty_layer(layer_cfg));
                layer_stats.push(json!({
                    "layerId": layer_cfg.id,
                    "kind": layer_cfg.kind.to_string(),
                    "source": "file",
                    "n": 0,
                }));
                continue;
            }
            let path = registry.resolve_data_path(&layer_cfg.source.path);
            let (layer, stats) =
                layer::query_geoparquet_layer_bbox(&conn, layer_cfg, &path, &snapped_aoi, bucket_zoom)?;
            debug!(layer = %layer_cfg.id, n = layer.features.len(), "geoparquet layer sliced");
            out_layers.push(layer);
            layer_stats.push(stats);
        }

        let bundle = LayerBundle::new(out_layers);
        let stats = json!({
            "aoiKey": aoi_key,
            "zoomBucket": zoom_bucket,
            "layers": layer_stats,
        });
        self.bundle_cache
            .lock()
            .put(key, (bundle.clone(), stats.clone()));
        Ok((bundle, stats))
    }

    /// Fetch pinned ids per GeoParquet layer (bypassing caps/policy) and
    /// merge them into the bundle so highlights survive candidate caps.
    pub fn merge_pinned(
        &self,
        registry: &ScenarioRegistry,
        scenario: &ScenarioConfig,
        aoi: &BBox,
        view_zoom: f64,
        pins: &PinSets,
        bundle: &mut LayerBundle,
    ) -> Result<(), EngineError> {
        let conn = open_memory_connection()?;
        for (layer_id, ids) in pins {
            if ids.is_empty() {
                continue;
            }
            let Some(layer_cfg) = scenario.layer(layer_id) else {
                continue;
            };
            if layer_cfg.source.source_type != LayerSourceType::Geoparquet {
                continue;
            }
            let path = registry.resolve_data_path(&layer_cfg.source.path);
            let pinned = pins::query_layer_pinned_ids(&conn, layer_cfg, &path, aoi, ids)?;

            let Some(target) = bundle.layers.iter_mut().find(|l| l.id == *layer_id) else {
                continue;
            };
            let mut merged: BTreeMap<String, geoprompt_core::LayerFeature> = target
                .features
                .drain(..)
                .map(|f| (f.id().to_string(), f))
                .collect();
            for feature in pinned.features {
                merged.entry(feature.id().to_string()).or_insert(feature);
            }
            target.features = merged.into_values().collect();
        }
        Ok(())
    }

}

impl Default for GeoParquetStore {
    fn default() -> Self {
        Self::new()
    }
}

fn open_memory_connection() -> Result<Connection, EngineError> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(&format!("PRAGMA threads={};", env::duckdb_threads()))?;
    Ok(conn)
}

fn empty_layer(cfg: &geoprompt_scenarios::LayerConfig) -> Layer {
    Layer {
        id: cfg.id.clone(),
        kind: cfg.kind,
        title: cfg.title.clone(),
        features: Vec::new(),
        style: cfg.style.clone(),
    }
}
