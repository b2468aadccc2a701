//! Shared application state

use std::path::Path;
use std::sync::Arc;

use geoprompt_engine::{
    env::default_engine_name, DuckDbEngine, InMemoryEngine, LayerEngine, ENGINE_DUCKDB,
};
use geoprompt_scenarios::{ScenarioConfig, ScenarioError, ScenarioRegistry};
use geoprompt_telemetry::TelemetryStore;

use crate::lod_cache::LodCache;

pub struct AppState {
    pub registry: Arc<ScenarioRegistry>,
    in_memory: Arc<InMemoryEngine>,
    duckdb: Arc<DuckDbEngine>,
    pub lod_cache: LodCache,
    pub telemetry: Option<Arc<TelemetryStore>>,
}

impl AppState {
    pub fn new(repo_root: &Path) -> Result<Self, ScenarioError> {
        let registry = Arc::new(ScenarioRegistry::discover(repo_root)?);
        Ok(Self {
            in_memory: Arc::new(InMemoryEngine::new(registry.clone())),
            duckdb: Arc::new(DuckDbEngine::new(registry.clone())),
            registry,
            lod_cache: LodCache::new(),
            telemetry: TelemetryStore::from_env(),
        })
    }

    /// Resolve the engine for a request: large scenarios are forced onto
    /// DuckDB; otherwise the client hint (or `ENGINE`) decides.
    pub fn engine_for(
        &self,
        scenario: &ScenarioConfig,
        client_hint: Option<&str>,
    ) -> Arc<dyn LayerEngine> {
        let name = match client_hint {
            Some(hint) => geoprompt_engine::normalize_engine_name(Some(hint)),
            None => default_engine_name(),
        };
        let name = if scenario.is_large() { ENGINE_DUCKDB } else { name };
        if name == ENGINE_DUCKDB {
            self.duckdb.clone()
        } else {
            self.in_memory.clone()
        }
    }
}
