//! LOD result cache
//!
//! `/plot` refreshes on pan/zoom should be cheap: LOD output is cached by
//! AOI bucket + zoom bucket + covering tile set + highlight key. The tile
//! set is part of the key, so a pan that stays within the same tiles hits
//! cache even when the raw bbox changed.

use parking_lot::Mutex;
use serde_json::json;

use geoprompt_core::{AoiKey, BBox, BoundedCache, LayerBundle, TileId};
use geoprompt_core::tiles::{tile_zoom_for_view_zoom, tiles_for_bbox};
use geoprompt_lod::{apply_lod, ClusterMarker, KeepSets, LodBudgets};

const LOD_CACHE_ITEMS: usize = 64;
const AOI_DECIMALS: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LodKey {
    scenario_id: String,
    engine_name: String,
    cluster_layer_id: String,
    tile_zoom: u8,
    /// `round(zoom * 2)` - half-zoom buckets.
    zoom_bucket: i64,
    tiles: Vec<TileId>,
    aoi_key: AoiKey,
    highlight_key: Vec<(String, Vec<String>)>,
}

type LodValue = (LayerBundle, Option<Vec<ClusterMarker>>);

pub struct LodCache {
    cache: Mutex<BoundedCache<LodKey, LodValue>>,
}

impl LodCache {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(BoundedCache::new(LOD_CACHE_ITEMS)),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    /// LOD with caching; returns the result plus the cache-stats block the
    /// payload reports.
    pub fn apply(
        &self,
        layers: &LayerBundle,
        aoi: &BBox,
        view_zoom: f64,
        scenario_id: &str,
        engine_name: &str,
        cluster_layer_id: &str,
        keep: &KeepSets,
        budgets: &LodBudgets,
    ) -> (LodValue, serde_json::Value) {
        let tile_zoom = tile_zoom_for_view_zoom(view_zoom);
        let tiles = tiles_for_bbox(tile_zoom, aoi);
        let aoi_key = aoi.rounded_key(AOI_DECIMALS);
        let zoom_bucket = (view_zoom * 2.0).round() as i64;
        let highlight_key: Vec<(String, Vec<String>)> = keep
            .iter()
            .map(|(layer, ids)| (layer.clone(), ids.iter().cloned().collect()))
            .collect();

        let key = LodKey {
            scenario_id: scenario_id.to_string(),
            engine_name: engine_name.to_string(),
            cluster_layer_id: cluster_layer_id.to_string(),
            tile_zoom,
            zoom_bucket,
            tiles: tiles.clone(),
            aoi_key,
            highlight_key,
        };

        let stats = |hit: bool| {
            json!({
                "tileZoom": tile_zoom,
                "tilesUsed": tiles.len(),
                "zoomBucket": zoom_bucket as f64 / 2.0,
                "aoiKey": aoi_key,
                "cacheHit": hit,
            })
        };

        if let Some(hit) = self.cache.lock().get(&key) {
            return (hit, stats(true));
        }

        let value = apply_lod(layers, view_zoom, cluster_layer_id, keep, budgets);
        self.cache.lock().put(key, value.clone());
        (value, stats(false))
    }
}

impl Default for LodCache {
    fn default() -> Self {
        Self::new()
    }
}
