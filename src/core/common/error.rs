//! Error types for mdstore
//!
//! A single error enum is shared by every layer of the engine. Disk backends, the codec,
//! the split machinery and the persistence layer all surface `MdStoreError` so callers get one
//! typed error regardless of where the failure happened.

use crate::core::common::types::BoxId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MdStoreError {
    /// Requested dimensionality is zero or beyond what the box arrays can hold.
    #[error("Dimensionality Error: {requested} dimensions requested, supported range is 1..={max}")]
    Dimensionality { requested: usize, max: usize },

    /// A disk read returned malformed or short data, or a persisted table is inconsistent.
    #[error("Corrupt Data: {0}")]
    CorruptData(String),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration Error: {0}")]
    Configuration(String),

    #[error("Invalid Input: {message}")]
    InvalidInput { message: String },

    #[error("Box not found: {0}")]
    BoxNotFound(BoxId),

    #[error("Lock Error: {0}")]
    Lock(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    /// Bulk insertion observed its cancellation token. `committed` events were stored first.
    #[error("Insertion cancelled after {committed} events were committed")]
    Cancelled { committed: usize },
}

impl From<serde_json::Error> for MdStoreError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            Self::Io(err.into())
        } else {
            Self::CorruptData(format!("box table could not be decoded: {err}"))
        }
    }
}

impl From<toml::de::Error> for MdStoreError {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl MdStoreError {
    /// Create an IO error with a custom message
    #[must_use]
    pub fn io_error(message: String) -> Self {
        use std::io::{Error, ErrorKind};
        Self::Io(Error::new(ErrorKind::Other, message))
    }

    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput { message: message.into() }
    }

    /// True for the two failure classes a disk read can produce.
    #[must_use]
    pub const fn is_storage_failure(&self) -> bool {
        matches!(self, Self::Io(_) | Self::CorruptData(_))
    }
}
