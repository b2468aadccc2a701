//! Geoprompt scenarios
//!
//! Scenario configuration and layer ingestion. A scenario is a YAML file
//! (`scenarios/<id>/scenario.yaml`) declaring layers (with their data
//! sources), prompt-routing rules, and plot hints. All solution-specific
//! semantics live here so the engines and the router stay generic.

pub mod config;
pub mod loaders;
pub mod registry;

pub use config::{
    GeoParquetOptions, HighlightRule, LayerConfig, LayerSource, LayerSourceType, MaskMode,
    PlotConfig, ProximityRule, RenderPolicy, RoutingConfig, ScenarioConfig,
};
pub use registry::{ScenarioEntry, ScenarioRegistry};

use thiserror::Error;

/// Configuration-class failures: fatal for the affected scenario or layer,
/// surfaced to the caller as a clear message.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("No scenarios discovered under `{0}`")]
    NoScenarios(String),

    #[error("Invalid scenario config {path}: {reason}")]
    InvalidConfig { path: String, reason: String },

    #[error("Scenario '{scenario}' missing file: {path}")]
    MissingFile { scenario: String, path: String },

    #[error("Scenario '{scenario}' includes GeoParquet layer '{layer}'. Use the DuckDB engine for GeoParquet-backed scenarios.")]
    GeoParquetNotLoadable { scenario: String, layer: String },

    #[error("Malformed {kind} source {path}: {reason}")]
    MalformedSource {
        kind: &'static str,
        path: String,
        reason: String,
    },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
