// src/core/event/mod.rs

//! Point events and their on-disk block encoding.

pub mod codec;

pub use codec::{decode_block, encode_block, encoded_len};

use crate::core::common::MdStoreError;
use serde::{Deserialize, Serialize};

/// Largest dimensionality a workspace can be created with. Every split produces
/// `split_factor^nd` children, so beyond this the child arrays stop being tractable.
pub const MAX_DIMENSIONS: usize = 9;

/// Where an event came from. Only present on full-form events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventProvenance {
    pub run_index: u32,
    pub detector_id: u32,
}

/// One measurement: a position, a signal and its one-sigma error.
///
/// Coordinates live in a fixed array so events are `Copy`; only the first `nd` slots are
/// meaningful.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    coords: [f64; MAX_DIMENSIONS],
    nd: u8,
    pub signal: f64,
    pub error: f64,
    pub provenance: Option<EventProvenance>,
}

impl Event {
    /// Builds a lean event.
    ///
    /// # Errors
    /// `Dimensionality` if `coords` is empty or longer than [`MAX_DIMENSIONS`].
    pub fn new(coords: &[f64], signal: f64, error: f64) -> Result<Self, MdStoreError> {
        if coords.is_empty() || coords.len() > MAX_DIMENSIONS {
            return Err(MdStoreError::Dimensionality {
                requested: coords.len(),
                max: MAX_DIMENSIONS,
            });
        }
        let mut fixed = [0.0; MAX_DIMENSIONS];
        fixed[..coords.len()].copy_from_slice(coords);
        #[allow(clippy::cast_possible_truncation)]
        let nd = coords.len() as u8;
        Ok(Self { coords: fixed, nd, signal, error, provenance: None })
    }

    /// Builds a full-form event carrying run and detector ids.
    pub fn with_provenance(
        coords: &[f64],
        signal: f64,
        error: f64,
        run_index: u32,
        detector_id: u32,
    ) -> Result<Self, MdStoreError> {
        let mut event = Self::new(coords, signal, error)?;
        event.provenance = Some(EventProvenance { run_index, detector_id });
        Ok(event)
    }

    pub fn coords(&self) -> &[f64] {
        &self.coords[..self.nd()]
    }

    pub const fn nd(&self) -> usize {
        self.nd as usize
    }

    pub fn error_squared(&self) -> f64 {
        self.error * self.error
    }

    pub const fn is_full(&self) -> bool {
        self.provenance.is_some()
    }

    pub fn has_finite_coords(&self) -> bool {
        self.coords().iter().all(|c| c.is_finite())
    }
}
