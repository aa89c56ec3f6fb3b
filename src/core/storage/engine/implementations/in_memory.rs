// src/core/storage/engine/implementations/in_memory.rs
use crate::core::common::lock_utils::lock_poisoned;
use crate::core::common::MdStoreError;
use crate::core::storage::engine::traits::DiskBackend;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct MemoryState {
    next_offset: u64,
    blocks: HashMap<u64, Vec<u8>>,
}

/// Disk backend that keeps every allocation in a heap buffer.
///
/// Used when a workspace has no backing file. Evicting to it does not reduce memory use,
/// but it exercises exactly the same code paths as the file backend.
#[derive(Debug, Default)]
pub struct InMemoryDiskBackend {
    state: Mutex<MemoryState>,
}

impl InMemoryDiskBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live allocations.
    pub fn block_count(&self) -> usize {
        self.state.lock().map_or(0, |state| state.blocks.len())
    }
}

impl DiskBackend for InMemoryDiskBackend {
    fn allocate(&self, size: u64) -> Result<u64, MdStoreError> {
        if size == 0 {
            return Err(MdStoreError::invalid_input("cannot allocate a zero-length range"));
        }
        let len = usize::try_from(size)
            .map_err(|_| MdStoreError::invalid_input(format!("allocation of {size} bytes too large")))?;
        let mut state = self.state.lock().map_err(lock_poisoned)?;
        let offset = state.next_offset;
        state.next_offset += size;
        state.blocks.insert(offset, vec![0u8; len]);
        Ok(offset)
    }

    fn write(&self, offset: u64, bytes: &[u8]) -> Result<(), MdStoreError> {
        let mut state = self.state.lock().map_err(lock_poisoned)?;
        let block = state.blocks.get_mut(&offset).ok_or_else(|| {
            MdStoreError::invalid_input(format!("offset {offset} is not an allocated range"))
        })?;
        if bytes.len() > block.len() {
            return Err(MdStoreError::invalid_input(format!(
                "write of {} bytes overflows the {} byte range at {}",
                bytes.len(),
                block.len(),
                offset
            )));
        }
        block[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>, MdStoreError> {
        let state = self.state.lock().map_err(lock_poisoned)?;
        let block = state.blocks.get(&offset).ok_or_else(|| {
            MdStoreError::CorruptData(format!("no block stored at offset {offset}"))
        })?;
        match usize::try_from(len) {
            Ok(len) if len <= block.len() => Ok(block[..len].to_vec()),
            _ => Err(MdStoreError::CorruptData(format!(
                "read of {} bytes at offset {} exceeds the {} byte block",
                len,
                offset,
                block.len()
            ))),
        }
    }

    fn free(&self, offset: u64) -> Result<(), MdStoreError> {
        let mut state = self.state.lock().map_err(lock_poisoned)?;
        state.blocks.remove(&offset).map(|_| ()).ok_or_else(|| {
            MdStoreError::invalid_input(format!("offset {offset} is not an allocated range"))
        })
    }

    fn bytes_in_use(&self) -> u64 {
        self.state
            .lock()
            .map_or(0, |state| state.blocks.values().map(|b| b.len() as u64).sum())
    }

    fn describe(&self) -> String {
        "in-memory backend".to_string()
    }
}
