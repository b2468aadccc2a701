//! Geoprompt telemetry
//!
//! Best-effort request timing log in a DuckDB file. Recording is
//! non-blocking: events go onto a bounded channel and a dedicated writer
//! thread batches them into the database. Reads (summary, slowest) run
//! in-process against the same connection - DuckDB file locks make
//! opening the file from a second process unreliable while we write.
//!
//! Telemetry must never fail a request: overflow drops events, write
//! errors are logged and swallowed.

pub mod sql;
pub mod store;

pub use store::{SummaryRow, TelemetryEvent, TelemetryStore};

/// `TELEMETRY` truthiness; disabled by default.
pub fn telemetry_enabled() -> bool {
    std::env::var("TELEMETRY")
        .map(|v| {
            matches!(
                v.trim().to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}

/// `TELEMETRY_PATH`, defaulting to `data/telemetry.duckdb`.
pub fn telemetry_path() -> std::path::PathBuf {
    std::env::var("TELEMETRY_PATH")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("data/telemetry.duckdb"))
}
