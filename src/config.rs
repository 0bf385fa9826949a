//! Configuration document loading (spec §6).
//!
//! `RawConfig` mirrors the YAML schema field-for-field and is deserialized
//! with `serde_yaml`, the same crate the retrieval pack's config-driven
//! pipeline tool depends on for its own document loading. `RawConfig` is
//! then lowered into the runtime [`Config`] the rest of the crate consumes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{HermesError, Result};

const DEFAULT_PAGE_SIZE: u32 = 1024 * 1024;

/// Per-path flushing policy (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterMode {
    Default,
    Bypass,
    Scratch,
    Workflow,
}

impl Default for AdapterMode {
    fn default() -> Self {
        AdapterMode::Default
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawAdapterModeEntry {
    path: String,
    mode: AdapterMode,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    mount_points: Vec<String>,
    #[serde(default)]
    path_inclusions: Vec<String>,
    #[serde(default)]
    path_exclusions: Vec<String>,
    #[serde(default)]
    buffer_pool_shmem_name: Option<String>,
    #[serde(default)]
    page_size: Option<u32>,
    #[serde(default)]
    adapter_mode: Vec<RawAdapterModeEntry>,
    #[serde(default)]
    base_adapter_mode: Option<AdapterMode>,
}

/// Runtime configuration consumed by the scope filter, page mapper, and
/// flush pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    pub page_size: u32,
    pub path_inclusions: Vec<String>,
    pub path_exclusions: Vec<String>,
    pub base_adapter_mode: AdapterMode,
    pub adapter_mode_overrides: HashMap<String, AdapterMode>,
    pub async_flush: bool,
    pub write_only_hint: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            path_inclusions: Vec::new(),
            path_exclusions: Vec::new(),
            base_adapter_mode: AdapterMode::Default,
            adapter_mode_overrides: HashMap::new(),
            async_flush: false,
            write_only_hint: false,
        }
    }
}

impl Config {
    /// Load from the path named by `HERMES_CONF`, if set, folding in the
    /// `HERMES_WRITE_ONLY` / `HERMES_ASYNC_FLUSH` env toggles. Mirrors
    /// `PopulateBufferingPath`'s behavior of silently proceeding with
    /// defaults when no config path is set.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var_os("HERMES_CONF") {
            Some(path) => Self::from_yaml_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.write_only_hint = std::env::var("HERMES_WRITE_ONLY")
            .map(|v| v == "1")
            .unwrap_or(false);
        config.async_flush = std::env::var("HERMES_ASYNC_FLUSH")
            .map(|v| v == "1")
            .unwrap_or(false);
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(HermesError::Backend)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let raw: RawConfig =
            serde_yaml::from_str(yaml).map_err(|e| HermesError::Config(e.to_string()))?;
        Ok(Self::lower(raw))
    }

    fn lower(raw: RawConfig) -> Self {
        let mut path_exclusions = raw.path_exclusions;
        // mount_points and the shmem name are the daemon's own files; they
        // are excluded from tracking the same way PopulateBufferingPath
        // folds them into hermes_paths_exclusion.
        path_exclusions.extend(raw.mount_points);
        if let Some(shmem) = raw.buffer_pool_shmem_name {
            path_exclusions.push(shmem);
        }

        let adapter_mode_overrides = raw
            .adapter_mode
            .into_iter()
            .map(|entry| (entry.path, entry.mode))
            .collect();

        Config {
            page_size: raw.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            path_inclusions: raw.path_inclusions,
            path_exclusions,
            base_adapter_mode: raw.base_adapter_mode.unwrap_or(AdapterMode::Default),
            adapter_mode_overrides,
            async_flush: false,
            write_only_hint: false,
        }
    }

    /// Per-path mode, falling back to the base mode — grounded on
    /// `MetadataManager::GetAdapterMode` in `filesystem_mdm.cc`.
    pub fn adapter_mode_for(&self, canonical_path: &PathBuf) -> AdapterMode {
        let key = canonical_path.to_string_lossy();
        self.adapter_mode_overrides
            .get(key.as_ref())
            .copied()
            .unwrap_or(self.base_adapter_mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_config() {
        let c = Config::default();
        assert_eq!(c.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(c.base_adapter_mode, AdapterMode::Default);
    }

    #[test]
    fn parses_yaml_document() {
        let yaml = r#"
page_size: 4096
path_inclusions:
  - /scratch
path_exclusions:
  - /tmp
mount_points:
  - /mnt/hermes
base_adapter_mode: bypass
adapter_mode:
  - path: /scratch/workflow.dat
    mode: workflow
"#;
        let c = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(c.page_size, 4096);
        assert_eq!(c.path_inclusions, vec!["/scratch".to_string()]);
        assert!(c.path_exclusions.contains(&"/tmp".to_string()));
        assert!(c.path_exclusions.contains(&"/mnt/hermes".to_string()));
        assert_eq!(c.base_adapter_mode, AdapterMode::Bypass);
        assert_eq!(
            c.adapter_mode_overrides.get("/scratch/workflow.dat"),
            Some(&AdapterMode::Workflow)
        );
    }
}
