//! In-memory engine
//!
//! Loads a scenario's layer sources once, builds a `GeoIndex`, then
//! answers every request with a tile-aligned slice. Base indexes are kept
//! per scenario in a small bounded cache.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use geoprompt_core::{tiles::tile_zoom_for_view_zoom, BoundedCache, GeoIndex};
use geoprompt_scenarios::{loaders::load_scenario_layers, ScenarioRegistry};

use crate::{EngineError, EngineResult, LayerEngine, MapContext, ENGINE_IN_MEMORY};

const MAX_SCENARIO_BASES: usize = 4;

pub struct InMemoryEngine {
    registry: Arc<ScenarioRegistry>,
    bases: Mutex<BoundedCache<String, Arc<GeoIndex>>>,
}

impl InMemoryEngine {
    pub fn new(registry: Arc<ScenarioRegistry>) -> Self {
        Self {
            registry,
            bases: Mutex::new(BoundedCache::new(MAX_SCENARIO_BASES)),
        }
    }

    /// Base `(layers, index)` for a scenario, built on first use.
    /// Construction holds the cache lock: concurrent first requests for
    /// the same scenario must not load the sources twice.
    fn base(&self, scenario_id: &str) -> Result<Arc<GeoIndex>, EngineError> {
        let mut bases = self.bases.lock();
        if let Some(base) = bases.get(&scenario_id.to_string()) {
            return Ok(base);
        }
        let bundle = load_scenario_layers(&self.registry, Some(scenario_id))?;
        let n_features: usize = bundle.layers.iter().map(|l| l.features.len()).sum();
        info!(scenario = scenario_id, n_features, "built in-memory geo index");
        let base = Arc::new(GeoIndex::build(bundle));
        bases.put(scenario_id.to_string(), base.clone());
        Ok(base)
    }
}

impl LayerEngine for InMemoryEngine {
    fn name(&self) -> &'static str {
        ENGINE_IN_MEMORY
    }

    fn get(&self, ctx: &MapContext) -> Result<EngineResult, EngineError> {
        // Resolve through the registry so unknown scenario ids fall back.
        let scenario_id = self.registry.get(Some(&ctx.scenario_id)).config.id.clone();
        let base = self.base(&scenario_id)?;
        let tile_zoom = tile_zoom_for_view_zoom(ctx.view_zoom);
        let sliced = base.slice_layers_tiled(&ctx.aoi, tile_zoom);
        Ok(EngineResult {
            layers: sliced,
            index: base,
            stats: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoprompt_core::BBox;
    use std::io::Write;
    use std::path::Path;

    fn write_file(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    fn scenario_fixture() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        write_file(
            &tmp.path().join("scenarios/demo_city/scenario.yaml"),
            r#"
id: demo_city
title: Demo
defaultView: { center: { lat: 50.08, lon: 14.44 }, zoom: 12.0 }
layers:
  - id: places
    title: Places
    kind: points
    source: { type: overpass_points, path: data/places.json }
routing:
  primaryPointsLayerId: places
plot: { highlightLayerId: places }
"#,
        );
        write_file(
            &tmp.path().join("data/places.json"),
            r#"{"elements":[
                {"type":"node","id":1,"lat":50.08,"lon":14.44,"tags":{"name":"A"}},
                {"type":"node","id":2,"lat":50.09,"lon":14.45,"tags":{"name":"B"}},
                {"type":"node","id":3,"lat":10.0,"lon":10.0,"tags":{"name":"far"}}
            ]}"#,
        );
        tmp
    }

    #[test]
    fn slices_scenario_by_aoi() {
        let tmp = scenario_fixture();
        let registry = Arc::new(ScenarioRegistry::discover(tmp.path()).unwrap());
        let engine = InMemoryEngine::new(registry);

        let ctx = MapContext {
            scenario_id: "demo_city".to_string(),
            aoi: BBox::new(14.40, 50.05, 14.50, 50.12),
            view_center: (50.08, 14.44),
            view_zoom: 12.0,
            viewport: None,
        };
        let result = engine.get(&ctx).unwrap();
        assert_eq!(result.layers.layers.len(), 1);
        let ids: Vec<&str> = result.layers.layers[0]
            .features
            .iter()
            .map(|f| f.id())
            .collect();
        assert_eq!(ids, vec!["node/1", "node/2"]);
        // Full base index remains available for mask/distance queries.
        assert_eq!(result.index.layers().layers[0].features.len(), 3);
    }

    #[test]
    fn base_is_cached_per_scenario() {
        let tmp = scenario_fixture();
        let registry = Arc::new(ScenarioRegistry::discover(tmp.path()).unwrap());
        let engine = InMemoryEngine::new(registry);
        let ctx = MapContext {
            scenario_id: "demo_city".to_string(),
            aoi: BBox::new(14.40, 50.05, 14.50, 50.12),
            view_center: (50.08, 14.44),
            view_zoom: 12.0,
            viewport: None,
        };
        let a = engine.get(&ctx).unwrap();
        let b = engine.get(&ctx).unwrap();
        assert!(Arc::ptr_eq(&a.index, &b.index));
    }
}
