//! Engine environment knobs
//!
//! String-valued env vars; malformed values fall back to defaults rather
//! than erroring (a bad knob must not take the backend down).

use std::path::PathBuf;

fn env_trimmed(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Default engine name from `ENGINE`.
pub fn default_engine_name() -> &'static str {
    crate::normalize_engine_name(env_trimmed("ENGINE").as_deref())
}

/// DuckDB file for a seeded scenario: `DUCKDB_PATH` wins, else
/// `DUCKDB_DIR/<scenario>.duckdb` (dir defaults to `data/duckdb`).
pub fn duckdb_path_for_scenario(scenario_id: &str, override_path: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path.clone();
    }
    if let Some(path) = env_trimmed("DUCKDB_PATH") {
        return PathBuf::from(path);
    }
    let base_dir = env_trimmed("DUCKDB_DIR").unwrap_or_else(|| "data/duckdb".to_string());
    PathBuf::from(base_dir).join(format!("{scenario_id}.duckdb"))
}

/// `DUCKDB_THREADS`, defaulting to the machine's parallelism.
pub fn duckdb_threads() -> usize {
    env_trimmed("DUCKDB_THREADS")
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&n| n >= 1)
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1)
        })
}

/// `GEOPARQUET_AOI_DECIMALS`, clamped to [2, 6]; default 3 (~110 m keys,
/// coarse on purpose so pans reuse bundles).
pub fn geoparquet_aoi_decimals() -> u32 {
    env_trimmed("GEOPARQUET_AOI_DECIMALS")
        .and_then(|v| v.parse::<i64>().ok())
        .map(|n| n.clamp(2, 6) as u32)
        .unwrap_or(3)
}

/// `GEOPARQUET_GEOM_MIN_ZOOM` default when a layer doesn't set one.
pub fn default_geom_min_zoom() -> f64 {
    env_trimmed("GEOPARQUET_GEOM_MIN_ZOOM")
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(11.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_path_uses_dir_convention() {
        // Not setting env vars here: other tests run in parallel in the
        // same process, so only exercise the override and default paths.
        let p = duckdb_path_for_scenario("demo_city", None);
        assert!(p.ends_with("demo_city.duckdb"));

        let over = PathBuf::from("/tmp/x.duckdb");
        assert_eq!(duckdb_path_for_scenario("demo_city", Some(&over)), over);
    }

    #[test]
    fn knob_defaults() {
        assert!(duckdb_threads() >= 1);
        let d = geoparquet_aoi_decimals();
        assert!((2..=6).contains(&d));
    }
}
