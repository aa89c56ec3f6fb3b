//! Block storage for evicted leaves and the on-disk workspace format.

pub mod engine;
pub mod persistence;

pub use engine::{DiskBackend, DiskBackendHandle, DiskBlock, FileDiskBackend, InMemoryDiskBackend};
