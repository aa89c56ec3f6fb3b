#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![forbid(unsafe_code)]
#![warn(clippy::all)]

//! # mdstore: adaptive N-dimensional event storage
//!
//! `mdstore` keeps large collections of weighted point events (coordinates, signal,
//! error) in a tree of boxes that subdivides itself where the data is dense.
//! It features:
//! - Running signal and squared-error totals on every box
//! - Concurrent insertion and parallel splitting through `&self`
//! - A resident-event budget that moves cold leaves to a disk backend
//! - Single-file snapshots with checksummed event blocks, loadable eagerly or file-backed
//! - Lazy iteration over the events of any subtree
//!
//! ```no_run
//! use mdstore::{Dimension, Event, EventWorkspace};
//!
//! let dims = vec![Dimension::new("x", 0.0, 10.0, 100), Dimension::new("y", 0.0, 10.0, 100)];
//! let ws = EventWorkspace::create(2, dims, 1000, 2, 20)?;
//! ws.add_events(&[Event::new(&[1.0, 2.0], 1.0, 1.0)?])?;
//! ws.split_all_if_needed()?;
//! ws.save(std::path::Path::new("events.mds"))?;
//! # Ok::<(), mdstore::MdStoreError>(())
//! ```

pub mod api;
pub mod core;

// Re-export key types for easier use by library consumers
pub use api::{BoxEvents, BoxSummary, CancellationToken, EventIter, EventWorkspace};
pub use crate::core::common::{BoxId, MdStoreError};
pub use crate::core::config::WorkspaceConfig;
pub use crate::core::dimension::Dimension;
pub use crate::core::event::{Event, EventProvenance, MAX_DIMENSIONS};
pub use crate::core::geometry::{Extents, Interval};
pub use crate::core::storage::engine::{
    DiskBackend, DiskBackendHandle, FileDiskBackend, InMemoryDiskBackend,
};
pub use crate::core::validation::{InvariantReport, TreeStats};

/// Core result type for the library
pub type Result<T> = std::result::Result<T, MdStoreError>;
