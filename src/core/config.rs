// src/core/config.rs

use crate::core::common::MdStoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Split policy and resource settings for one workspace.
///
/// The split settings are fixed for the lifetime of a workspace and are persisted with it.
/// The residency settings only shape the running process and are never saved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// A leaf holding more events than this is eligible to split.
    pub split_threshold: usize,
    /// Slabs per dimension on split; a split creates `split_factor^nd` children.
    pub split_factor: u32,
    /// Boxes at this depth never split, however many events they hold.
    pub max_depth: u32,
    /// Split leaves as soon as they cross the threshold during insertion.
    pub split_on_insert: bool,
    /// Upper bound on events held in memory across all leaves. `None` keeps everything resident.
    pub max_resident_events: Option<usize>,
    /// Bulk insertion polls its cancellation token once per this many events.
    pub cancellation_check_interval: usize,
    /// Worker threads used by a split pass.
    pub split_threads: usize,
}

#[derive(Debug, Clone, Default)]
pub struct WorkspaceConfigBuilder {
    split_threshold: Option<usize>,
    split_factor: Option<u32>,
    max_depth: Option<u32>,
    split_on_insert: Option<bool>,
    max_resident_events: Option<Option<usize>>,
    cancellation_check_interval: Option<usize>,
    split_threads: Option<usize>,
}

impl WorkspaceConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn split_threshold(mut self, threshold: usize) -> Self {
        self.split_threshold = Some(threshold);
        self
    }

    pub const fn split_factor(mut self, factor: u32) -> Self {
        self.split_factor = Some(factor);
        self
    }

    pub const fn max_depth(mut self, depth: u32) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub const fn split_on_insert(mut self, enabled: bool) -> Self {
        self.split_on_insert = Some(enabled);
        self
    }

    /// Sets the resident event budget; `None` disables eviction.
    pub const fn max_resident_events(mut self, budget: Option<usize>) -> Self {
        self.max_resident_events = Some(budget);
        self
    }

    pub const fn cancellation_check_interval(mut self, interval: usize) -> Self {
        self.cancellation_check_interval = Some(interval);
        self
    }

    pub const fn split_threads(mut self, threads: usize) -> Self {
        self.split_threads = Some(threads);
        self
    }

    /// Builds the config and validates it.
    pub fn build(self) -> Result<WorkspaceConfig, MdStoreError> {
        let defaults = WorkspaceConfig::default();
        let config = WorkspaceConfig {
            split_threshold: self.split_threshold.unwrap_or(defaults.split_threshold),
            split_factor: self.split_factor.unwrap_or(defaults.split_factor),
            max_depth: self.max_depth.unwrap_or(defaults.max_depth),
            split_on_insert: self.split_on_insert.unwrap_or(defaults.split_on_insert),
            max_resident_events: self.max_resident_events.unwrap_or(defaults.max_resident_events),
            cancellation_check_interval: self
                .cancellation_check_interval
                .unwrap_or(defaults.cancellation_check_interval),
            split_threads: self.split_threads.unwrap_or(defaults.split_threads),
        };
        config.validate()?;
        Ok(config)
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            split_threshold: 1000,
            split_factor: 2,
            max_depth: 20,
            split_on_insert: false,
            max_resident_events: None,
            cancellation_check_interval: 1024,
            split_threads: 1,
        }
    }
}

impl WorkspaceConfig {
    pub fn builder() -> WorkspaceConfigBuilder {
        WorkspaceConfigBuilder::new()
    }

    /// Checks the settings that do not depend on the workspace dimensionality.
    pub fn validate(&self) -> Result<(), MdStoreError> {
        if self.split_threshold == 0 {
            return Err(MdStoreError::Configuration(
                "split_threshold must be greater than 0".to_string(),
            ));
        }

        if self.split_factor < 2 {
            return Err(MdStoreError::Configuration(format!(
                "split_factor must be at least 2, got {}",
                self.split_factor
            )));
        }

        if self.max_resident_events == Some(0) {
            return Err(MdStoreError::Configuration(
                "max_resident_events must be greater than 0 when set".to_string(),
            ));
        }

        if self.cancellation_check_interval == 0 {
            return Err(MdStoreError::Configuration(
                "cancellation_check_interval must be greater than 0".to_string(),
            ));
        }

        if self.split_threads == 0 {
            return Err(MdStoreError::Configuration(
                "split_threads must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Loads configuration from a TOML file. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `MdStoreError::Configuration` if the file cannot be parsed or fails validation.
    pub fn load_from_file(path: &Path) -> Result<Self, MdStoreError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Self = toml::from_str(&contents).map_err(|e| {
                    MdStoreError::Configuration(format!(
                        "Failed to parse config file '{}': {}",
                        path.display(),
                        e
                    ))
                })?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(MdStoreError::Io(e)),
        }
    }

    pub fn load_or_default(optional_path: Option<&Path>) -> Result<Self, MdStoreError> {
        match optional_path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Small thresholds so tests build deep trees from a handful of events.
    pub fn for_testing() -> Result<Self, MdStoreError> {
        Self::builder().split_threshold(4).max_depth(8).cancellation_check_interval(16).build()
    }

    /// Larger leaves and a bounded working set for multi-million event runs.
    pub fn for_large_datasets() -> Result<Self, MdStoreError> {
        Self::builder()
            .split_threshold(10_000)
            .max_depth(24)
            .max_resident_events(Some(50_000_000))
            .split_threads(4)
            .build()
    }
}
