// src/core/dimension.rs

use crate::core::common::MdStoreError;
use serde::{Deserialize, Serialize};

/// Static description of one axis of the event space.
///
/// The engine never interprets `units`; it is carried through save/load for the benefit of
/// whoever reads the workspace back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub n_bins: u32,
    #[serde(default)]
    pub units: Option<String>,
}

impl Dimension {
    pub fn new(name: impl Into<String>, min: f64, max: f64, n_bins: u32) -> Self {
        Self { name: name.into(), min, max, n_bins, units: None }
    }

    #[must_use]
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    /// Width of one display bin.
    pub fn bin_width(&self) -> f64 {
        self.width() / f64::from(self.n_bins.max(1))
    }

    pub fn validate(&self) -> Result<(), MdStoreError> {
        if self.name.trim().is_empty() {
            return Err(MdStoreError::Configuration(
                "dimension name must not be empty".to_string(),
            ));
        }
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(MdStoreError::Configuration(format!(
                "dimension '{}' has non-finite extents [{}, {})",
                self.name, self.min, self.max
            )));
        }
        if self.min >= self.max {
            return Err(MdStoreError::Configuration(format!(
                "dimension '{}' requires min < max, got [{}, {})",
                self.name, self.min, self.max
            )));
        }
        if self.n_bins == 0 {
            return Err(MdStoreError::Configuration(format!(
                "dimension '{}' must have at least one bin",
                self.name
            )));
        }
        Ok(())
    }
}
