//! Workspace-wide split policy, id allocation and the route to the disk backend.

use crate::core::boxes::MdBox;
use crate::core::common::{BoxId, MdStoreError};
use crate::core::config::WorkspaceConfig;
use crate::core::event::{decode_block, encode_block, Event};
use crate::core::geometry::checked_children;
use crate::core::storage::engine::{store_block, DiskBackendHandle, DiskBlock, ResidencyManager};
use std::sync::atomic::{AtomicU64, Ordering};

/// Largest child array a single split may create.
pub const MAX_CHILDREN_PER_SPLIT: usize = 1 << 20;

/// Shared by every box of a workspace. Boxes are addressed by id only; the controller
/// never holds box references.
#[derive(Debug)]
pub struct BoxController {
    nd: usize,
    split_threshold: usize,
    split_factor: usize,
    max_depth: u32,
    split_on_insert: bool,
    children_per_split: usize,
    next_id: AtomicU64,
    backend: DiskBackendHandle,
    residency: ResidencyManager,
}

impl BoxController {
    /// Builds a controller for an `nd`-dimensional workspace whose root already holds id 0.
    ///
    /// # Errors
    /// `Configuration` if the config is invalid or `split_factor^nd` is unmanageable.
    pub fn new(
        config: &WorkspaceConfig,
        nd: usize,
        backend: DiskBackendHandle,
    ) -> Result<Self, MdStoreError> {
        config.validate()?;
        let split_factor = usize::try_from(config.split_factor).map_err(|_| {
            MdStoreError::Configuration(format!("split_factor {} too large", config.split_factor))
        })?;
        let children_per_split = checked_children(split_factor, nd)
            .filter(|&n| n <= MAX_CHILDREN_PER_SPLIT)
            .ok_or_else(|| {
                MdStoreError::Configuration(format!(
                    "split_factor {split_factor} in {nd} dimensions exceeds {MAX_CHILDREN_PER_SPLIT} children per split"
                ))
            })?;

        Ok(Self {
            nd,
            split_threshold: config.split_threshold,
            split_factor,
            max_depth: config.max_depth,
            split_on_insert: config.split_on_insert,
            children_per_split,
            next_id: AtomicU64::new(1),
            backend,
            residency: ResidencyManager::new(config.max_resident_events),
        })
    }

    /// Continues id allocation after a restored tree.
    pub(crate) fn with_next_id(self, next_id: u64) -> Self {
        self.next_id.store(next_id.max(1), Ordering::Release);
        self
    }

    pub const fn nd(&self) -> usize {
        self.nd
    }

    pub const fn split_threshold(&self) -> usize {
        self.split_threshold
    }

    pub const fn split_factor(&self) -> usize {
        self.split_factor
    }

    pub const fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub const fn split_on_insert(&self) -> bool {
        self.split_on_insert
    }

    pub const fn children_per_split(&self) -> usize {
        self.children_per_split
    }

    /// The id the next allocation will start at.
    pub fn next_id(&self) -> u64 {
        self.next_id.load(Ordering::Acquire)
    }

    /// Ids handed out so far, the root included.
    pub fn allocated_ids(&self) -> u64 {
        self.next_id()
    }

    /// Reserves `count` consecutive ids and returns the first.
    pub fn allocate_ids(&self, count: usize) -> Result<BoxId, MdStoreError> {
        let count = u64::try_from(count)
            .map_err(|_| MdStoreError::invalid_input("id range too large"))?;
        let first = self.next_id.fetch_add(count, Ordering::AcqRel);
        if first.checked_add(count).is_none() {
            return Err(MdStoreError::invalid_input("box id space exhausted"));
        }
        Ok(BoxId(first))
    }

    /// A box should split when it is a leaf, over the threshold and above the depth limit.
    pub fn should_split(&self, md_box: &MdBox) -> bool {
        md_box.is_leaf()
            && md_box.event_count() > self.split_threshold
            && md_box.depth() < self.max_depth
    }

    pub fn backend(&self) -> &DiskBackendHandle {
        &self.backend
    }

    pub const fn residency(&self) -> &ResidencyManager {
        &self.residency
    }

    /// Encodes `events` and stores them as one block.
    pub(crate) fn write_events(&self, events: &[Event]) -> Result<DiskBlock, MdStoreError> {
        let bytes = encode_block(events, self.nd)?;
        store_block(self.backend.as_ref(), &bytes)
    }

    /// Reads a block back and checks it holds exactly `count` events.
    pub(crate) fn read_events(&self, block: DiskBlock, count: usize) -> Result<Vec<Event>, MdStoreError> {
        let bytes = self.backend.read(block.offset, block.length)?;
        let events = decode_block(&bytes, self.nd)?;
        if events.len() != count {
            return Err(MdStoreError::CorruptData(format!(
                "block at {} holds {} events, expected {}",
                block.offset,
                events.len(),
                count
            )));
        }
        Ok(events)
    }

    /// Returns a block to the backend. A failure only leaks the range, so it is logged.
    pub(crate) fn release_block(&self, block: DiskBlock) {
        if let Err(e) = self.backend.free(block.offset) {
            log::warn!(
                "could not release block at {} on {}: {}",
                block.offset,
                self.backend.describe(),
                e
            );
        }
    }

    pub fn flush(&self) -> Result<(), MdStoreError> {
        self.backend.flush()
    }
}
