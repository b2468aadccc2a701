//! Scenario registry
//!
//! Discovers `scenarios/*/scenario.yaml` under the repo root, validates the
//! configs, and answers scenario lookups. Unknown scenario ids fall back to
//! the default scenario rather than erroring - the frontend may race a
//! scenario switch against an in-flight request.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::ScenarioConfig;
use crate::ScenarioError;

#[derive(Debug, Clone)]
pub struct ScenarioEntry {
    pub config: ScenarioConfig,
    /// Absolute path of the scenario.yaml on disk (debugging aid).
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct ScenarioRegistry {
    repo_root: PathBuf,
    entries: BTreeMap<String, ScenarioEntry>,
}

impl ScenarioRegistry {
    /// Scan `<repo_root>/scenarios/*/scenario.yaml`.
    pub fn discover(repo_root: impl Into<PathBuf>) -> Result<Self, ScenarioError> {
        let repo_root = repo_root.into();
        let scenarios_root = repo_root.join("scenarios");

        let mut entries = BTreeMap::new();
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Ok(dir) = std::fs::read_dir(&scenarios_root) {
            for child in dir.flatten() {
                let yaml = child.path().join("scenario.yaml");
                if yaml.is_file() {
                    candidates.push(yaml);
                }
            }
        }
        candidates.sort();

        for path in candidates {
            let raw = std::fs::read_to_string(&path).map_err(|source| ScenarioError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let config: ScenarioConfig =
                serde_yaml::from_str(&raw).map_err(|e| ScenarioError::InvalidConfig {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            if config.enabled && config.layers.is_empty() {
                return Err(ScenarioError::InvalidConfig {
                    path: path.display().to_string(),
                    reason: "enabled scenario is missing `layers`".to_string(),
                });
            }
            if !config.enabled {
                debug!(scenario = %config.id, "skipping disabled scenario");
                continue;
            }
            entries.insert(config.id.clone(), ScenarioEntry { config, path });
        }

        if entries.is_empty() {
            return Err(ScenarioError::NoScenarios(
                scenarios_root.display().to_string(),
            ));
        }

        Ok(Self { repo_root, entries })
    }

    /// First scenario id in stable (sorted) order.
    pub fn default_scenario_id(&self) -> &str {
        self.entries
            .keys()
            .next()
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Look up a scenario; blank or unknown ids resolve to the default.
    pub fn get(&self, scenario_id: Option<&str>) -> &ScenarioEntry {
        let sid = scenario_id.map(str::trim).filter(|s| !s.is_empty());
        match sid.and_then(|s| self.entries.get(s)) {
            Some(entry) => entry,
            None => {
                if let Some(requested) = sid {
                    warn!(requested, "unknown scenario id, using default");
                }
                self.entries
                    .get(self.default_scenario_id())
                    .expect("registry is never empty")
            }
        }
    }

    pub fn list(&self) -> impl Iterator<Item = &ScenarioConfig> {
        self.entries.values().map(|e| &e.config)
    }

    /// Resolve a repo-relative data path ("data/..." and "/data/..." are
    /// both accepted).
    pub fn resolve_data_path(&self, repo_relative: &str) -> PathBuf {
        self.repo_root
            .join(repo_relative.trim_start_matches('/'))
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
id: {ID}
title: Test
defaultView:
  center: { lat: 0.0, lon: 0.0 }
  zoom: 10.0
layers:
  - id: places
    title: Places
    kind: points
    source: { type: overpass_points, path: data/places.json }
routing:
  primaryPointsLayerId: places
plot:
  highlightLayerId: places
"#;

    fn write_scenario(root: &Path, id: &str, body: &str) {
        let dir = root.join("scenarios").join(id);
        std::fs::create_dir_all(&dir).unwrap();
        let mut f = std::fs::File::create(dir.join("scenario.yaml")).unwrap();
        f.write_all(body.replace("{ID}", id).as_bytes()).unwrap();
    }

    #[test]
    fn discovers_and_sorts_scenarios() {
        let tmp = tempfile::tempdir().unwrap();
        write_scenario(tmp.path(), "b_city", MINIMAL);
        write_scenario(tmp.path(), "a_city", MINIMAL);

        let reg = ScenarioRegistry::discover(tmp.path()).unwrap();
        assert_eq!(reg.default_scenario_id(), "a_city");
        let ids: Vec<&str> = reg.list().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a_city", "b_city"]);
    }

    #[test]
    fn unknown_scenario_falls_back_to_default() {
        let tmp = tempfile::tempdir().unwrap();
        write_scenario(tmp.path(), "only_city", MINIMAL);
        let reg = ScenarioRegistry::discover(tmp.path()).unwrap();
        assert_eq!(reg.get(Some("nope")).config.id, "only_city");
        assert_eq!(reg.get(None).config.id, "only_city");
        assert_eq!(reg.get(Some("  ")).config.id, "only_city");
    }

    #[test]
    fn disabled_scenarios_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        write_scenario(tmp.path(), "on_city", MINIMAL);
        write_scenario(
            tmp.path(),
            "off_city",
            &MINIMAL.replace("title: Test", "title: Test\nenabled: false"),
        );
        let reg = ScenarioRegistry::discover(tmp.path()).unwrap();
        let ids: Vec<&str> = reg.list().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["on_city"]);
    }

    #[test]
    fn empty_root_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            ScenarioRegistry::discover(tmp.path()),
            Err(ScenarioError::NoScenarios(_))
        ));
    }

    #[test]
    fn data_paths_normalize_leading_slash() {
        let tmp = tempfile::tempdir().unwrap();
        write_scenario(tmp.path(), "c_city", MINIMAL);
        let reg = ScenarioRegistry::discover(tmp.path()).unwrap();
        assert_eq!(
            reg.resolve_data_path("/data/places.json"),
            reg.resolve_data_path("data/places.json")
        );
    }
}
