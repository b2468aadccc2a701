//! Geoprompt engines
//!
//! An engine produces AOI-sliced layers for a request:
//! - `InMemoryEngine`: loads layer sources once per scenario, slices
//!   through an STR-tree index
//! - `DuckDbEngine`: seeded generic tables for small scenarios, or
//!   query-on-read GeoParquet for large ones
//!
//! Both return the same `(LayerBundle, GeoIndex)` shape so everything
//! downstream (router, LOD, plot) is engine-agnostic.

pub mod env;
pub mod geoparquet;
pub mod in_memory;
pub mod seeded;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use thiserror::Error;

use geoprompt_core::{BBox, GeoIndex, LayerBundle};
use geoprompt_scenarios::ScenarioError;

pub use in_memory::InMemoryEngine;
pub use seeded::DuckDbEngine;

/// Request-scoped map context coming from the frontend.
#[derive(Debug, Clone)]
pub struct MapContext {
    pub scenario_id: String,
    pub aoi: BBox,
    /// `(lat, lon)` degrees.
    pub view_center: (f64, f64),
    pub view_zoom: f64,
    /// `(width, height)` pixels.
    pub viewport: Option<(u32, u32)>,
}

/// What an engine returns for a given request.
#[derive(Clone)]
pub struct EngineResult {
    pub layers: LayerBundle,
    pub index: Arc<GeoIndex>,
    /// Engine-specific stats (per-layer GeoParquet timings etc.).
    pub stats: Option<serde_json::Value>,
}

/// Must-render feature ids per layer; fetched past caps/policy so
/// highlights stay visible at any zoom.
pub type PinSets = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("GeoParquet missing covering bbox columns: {path}. Expected xmin/ymin/xmax/ymax or geometry_bbox(xmin,ymin,xmax,ymax).")]
    GeoParquetBBox { path: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Data engine strategy.
pub trait LayerEngine: Send + Sync {
    /// Stable engine name used in cache keys and stats.
    fn name(&self) -> &'static str;

    fn get(&self, ctx: &MapContext) -> Result<EngineResult, EngineError>;

    /// Like `get`, but additionally fetches the pinned ids per layer
    /// (bypassing candidate caps) and merges them into the bundle.
    /// Engines without caps just ignore the pins.
    fn get_with_pins(&self, ctx: &MapContext, _pins: &PinSets) -> Result<EngineResult, EngineError> {
        self.get(ctx)
    }
}

/// Engine names accepted from clients and `ENGINE`.
pub const ENGINE_IN_MEMORY: &str = "in_memory";
pub const ENGINE_DUCKDB: &str = "duckdb";

/// Unknown names fall back to the in-memory default.
pub fn normalize_engine_name(name: Option<&str>) -> &'static str {
    match name.map(str::trim).map(str::to_lowercase).as_deref() {
        Some(ENGINE_DUCKDB) => ENGINE_DUCKDB,
        Some(ENGINE_IN_MEMORY) => ENGINE_IN_MEMORY,
        _ => ENGINE_IN_MEMORY,
    }
}
