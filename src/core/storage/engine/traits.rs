use crate::core::common::MdStoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Byte range holding one encoded event block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiskBlock {
    pub offset: u64,
    pub length: u64,
}

/// Narrow interface the engine uses to move event blocks out of memory.
///
/// Implementations serialize their own state internally; every method takes `&self` so one
/// backend can be shared by all boxes of a workspace.
pub trait DiskBackend: Send + Sync + fmt::Debug {
    /// Reserves `size` bytes and returns the offset of the range.
    fn allocate(&self, size: u64) -> Result<u64, MdStoreError>;

    /// Writes `bytes` starting at `offset`, which must lie inside one allocated range.
    fn write(&self, offset: u64, bytes: &[u8]) -> Result<(), MdStoreError>;

    /// Reads exactly `len` bytes at `offset`.
    /// A short read is reported as `CorruptData`.
    fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>, MdStoreError>;

    /// Returns the range starting at `offset` to the allocator.
    fn free(&self, offset: u64) -> Result<(), MdStoreError>;

    /// Pushes buffered writes to durable storage.
    fn flush(&self) -> Result<(), MdStoreError> {
        Ok(())
    }

    /// Bytes currently held by live allocations.
    fn bytes_in_use(&self) -> u64;

    /// Short human readable description used in log lines.
    fn describe(&self) -> String;
}

pub type DiskBackendHandle = Arc<dyn DiskBackend>;

/// Allocates a range sized for `bytes`, writes them and returns the block.
///
/// If the write fails the range is released again so a failed eviction leaks nothing.
pub fn store_block(backend: &dyn DiskBackend, bytes: &[u8]) -> Result<DiskBlock, MdStoreError> {
    let length = bytes.len() as u64;
    let offset = backend.allocate(length)?;
    if let Err(write_err) = backend.write(offset, bytes) {
        if let Err(free_err) = backend.free(offset) {
            log::warn!("failed to release block at {offset} after write error: {free_err}");
        }
        return Err(write_err);
    }
    Ok(DiskBlock { offset, length })
}
