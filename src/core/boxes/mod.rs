//! Boxes of the adaptive tree.
//!
//! Every box covers a half-open region and carries the running totals of all events below
//! it. A box starts as a leaf holding its events directly and may later turn into a grid of
//! `split_factor^nd` children. The switch happens in place under the box's own lock, so the
//! box keeps its id and every reference to it stays valid.

pub mod arena;
pub mod split;

pub use arena::BoxArena;

use crate::core::common::lock_utils::box_lock_poisoned;
use crate::core::common::{AtomicF64, BoxId, MdStoreError};
use crate::core::controller::BoxController;
use crate::core::event::Event;
use crate::core::geometry::Extents;
use crate::core::storage::engine::DiskBlock;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};

/// Where a leaf's events currently live.
#[derive(Debug, Clone, PartialEq)]
pub enum EventBuffer {
    Resident(Vec<Event>),
    OnDisk { block: DiskBlock, count: usize },
}

impl EventBuffer {
    pub fn len(&self) -> usize {
        match self {
            Self::Resident(events) => events.len(),
            Self::OnDisk { count, .. } => *count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn is_resident(&self) -> bool {
        matches!(self, Self::Resident(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoxState {
    Leaf(EventBuffer),
    /// Child ids in row-major order, dimension 0 varying fastest.
    Grid(Vec<BoxId>),
}

/// Aggregate signal, squared error and event count of a subtree.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoxTotals {
    pub signal: f64,
    pub error_squared: f64,
    pub n_points: u64,
}

impl BoxTotals {
    pub fn of_events(events: &[Event]) -> Self {
        events.iter().fold(Self::default(), |acc, e| Self {
            signal: acc.signal + e.signal,
            error_squared: acc.error_squared + e.error_squared(),
            n_points: acc.n_points + 1,
        })
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            signal: self.signal + other.signal,
            error_squared: self.error_squared + other.error_squared,
            n_points: self.n_points + other.n_points,
        }
    }
}

#[derive(Debug)]
pub struct MdBox {
    id: BoxId,
    depth: u32,
    parent: Option<BoxId>,
    extents: Extents,
    at_max_depth: bool,
    signal: AtomicF64,
    error_squared: AtomicF64,
    n_points: AtomicU64,
    is_grid: AtomicBool,
    resident_events: AtomicUsize,
    last_access: AtomicU64,
    depth_warned: AtomicBool,
    state: Mutex<BoxState>,
}

impl MdBox {
    /// An empty resident leaf.
    pub(crate) fn new_leaf(
        id: BoxId,
        depth: u32,
        parent: Option<BoxId>,
        extents: Extents,
        max_depth: u32,
    ) -> Self {
        Self::restored(
            id,
            depth,
            parent,
            extents,
            max_depth,
            BoxTotals::default(),
            BoxState::Leaf(EventBuffer::Resident(Vec::new())),
        )
    }

    /// A resident leaf that already holds `events`, as created by a split.
    pub(crate) fn leaf_with_events(
        id: BoxId,
        depth: u32,
        parent: Option<BoxId>,
        extents: Extents,
        max_depth: u32,
        events: Vec<Event>,
    ) -> Self {
        let totals = BoxTotals::of_events(&events);
        Self::restored(
            id,
            depth,
            parent,
            extents,
            max_depth,
            totals,
            BoxState::Leaf(EventBuffer::Resident(events)),
        )
    }

    /// A box rebuilt from saved state.
    pub(crate) fn restored(
        id: BoxId,
        depth: u32,
        parent: Option<BoxId>,
        extents: Extents,
        max_depth: u32,
        totals: BoxTotals,
        state: BoxState,
    ) -> Self {
        let (is_grid, resident) = match &state {
            BoxState::Grid(_) => (true, 0),
            BoxState::Leaf(EventBuffer::Resident(events)) => (false, events.len()),
            BoxState::Leaf(EventBuffer::OnDisk { .. }) => (false, 0),
        };
        Self {
            id,
            depth,
            parent,
            extents,
            at_max_depth: depth >= max_depth,
            signal: AtomicF64::new(totals.signal),
            error_squared: AtomicF64::new(totals.error_squared),
            n_points: AtomicU64::new(totals.n_points),
            is_grid: AtomicBool::new(is_grid),
            resident_events: AtomicUsize::new(resident),
            last_access: AtomicU64::new(0),
            depth_warned: AtomicBool::new(false),
            state: Mutex::new(state),
        }
    }

    pub const fn id(&self) -> BoxId {
        self.id
    }

    pub const fn depth(&self) -> u32 {
        self.depth
    }

    pub const fn parent(&self) -> Option<BoxId> {
        self.parent
    }

    pub const fn extents(&self) -> &Extents {
        &self.extents
    }

    pub fn signal(&self) -> f64 {
        self.signal.load()
    }

    pub fn error_squared(&self) -> f64 {
        self.error_squared.load()
    }

    pub fn n_points(&self) -> u64 {
        self.n_points.load(Ordering::Acquire)
    }

    pub fn totals(&self) -> BoxTotals {
        BoxTotals {
            signal: self.signal(),
            error_squared: self.error_squared(),
            n_points: self.n_points(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        !self.is_grid.load(Ordering::Acquire)
    }

    /// Events held by this box and everything below it.
    pub fn event_count(&self) -> usize {
        usize::try_from(self.n_points()).unwrap_or(usize::MAX)
    }

    /// True once the box sits at `max_depth` and can never split.
    pub const fn is_at_max_depth(&self) -> bool {
        self.at_max_depth
    }

    /// Events of this leaf currently held in memory.
    pub fn resident_events(&self) -> usize {
        self.resident_events.load(Ordering::Acquire)
    }

    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    pub(crate) fn lock_state(&self) -> Result<MutexGuard<'_, BoxState>, MdStoreError> {
        self.state.lock().map_err(box_lock_poisoned)
    }

    /// Child ids when this box is a grid.
    pub fn children(&self) -> Result<Option<Vec<BoxId>>, MdStoreError> {
        Ok(match &*self.lock_state()? {
            BoxState::Grid(children) => Some(children.clone()),
            BoxState::Leaf(_) => None,
        })
    }

    pub(crate) fn add_totals(&self, signal: f64, error_squared: f64, n_points: u64) {
        self.signal.fetch_add(signal);
        self.error_squared.fetch_add(error_squared);
        self.n_points.fetch_add(n_points, Ordering::AcqRel);
    }

    pub(crate) fn touch(&self, controller: &BoxController) {
        self.last_access.store(controller.residency().tick(), Ordering::Relaxed);
    }

    pub(crate) fn mark_grid(&self) {
        self.is_grid.store(true, Ordering::Release);
        self.resident_events.store(0, Ordering::Release);
    }

    /// Makes the leaf's events resident and returns them.
    ///
    /// An on-disk leaf is read back and its block released, so afterwards the in-memory
    /// buffer is the only copy. If the read fails the leaf stays on disk.
    pub(crate) fn ensure_resident<'a>(
        &self,
        state: &'a mut BoxState,
        controller: &BoxController,
    ) -> Result<&'a mut Vec<Event>, MdStoreError> {
        if let BoxState::Leaf(EventBuffer::OnDisk { block, count }) = *state {
            let events = controller.read_events(block, count)?;
            *state = BoxState::Leaf(EventBuffer::Resident(events));
            controller.release_block(block);
            self.resident_events.store(count, Ordering::Release);
            controller.residency().add_resident(count);
            controller.residency().record_load();
            log::debug!("loaded {} events of box {} from disk", count, self.id);
        }
        match state {
            BoxState::Leaf(EventBuffer::Resident(events)) => Ok(events),
            _ => Err(MdStoreError::invalid_input(format!("box {} is not a leaf", self.id))),
        }
    }

    /// Appends one event to this leaf and updates its own totals.
    pub(crate) fn push_event(
        &self,
        state: &mut BoxState,
        event: Event,
        controller: &BoxController,
    ) -> Result<(), MdStoreError> {
        let events = self.ensure_resident(state, controller)?;
        events.push(event);
        self.resident_events.store(events.len(), Ordering::Release);
        controller.residency().add_resident(1);
        self.add_totals(event.signal, event.error_squared(), 1);
        self.touch(controller);
        Ok(())
    }

    /// Copies the leaf's events, loading them if needed. `None` for a grid.
    pub(crate) fn read_events(&self, controller: &BoxController) -> Result<Option<Vec<Event>>, MdStoreError> {
        let mut state = self.lock_state()?;
        if matches!(&*state, BoxState::Grid(_)) {
            return Ok(None);
        }
        let events = self.ensure_resident(&mut state, controller)?.clone();
        self.touch(controller);
        Ok(Some(events))
    }

    /// Writes the leaf's events to the backend if the box is idle.
    ///
    /// Returns `Ok(false)` without waiting if another thread holds the box, or if it is not
    /// a non-empty resident leaf. A failed write leaves the events resident.
    pub(crate) fn try_evict(&self, controller: &BoxController) -> Result<bool, MdStoreError> {
        let mut state = match self.state.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Ok(false),
            Err(TryLockError::Poisoned(poisoned)) => return Err(box_lock_poisoned(poisoned)),
        };
        let BoxState::Leaf(EventBuffer::Resident(events)) = &*state else {
            return Ok(false);
        };
        if events.is_empty() {
            return Ok(false);
        }
        let count = events.len();
        let block = controller.write_events(events)?;
        *state = BoxState::Leaf(EventBuffer::OnDisk { block, count });
        self.resident_events.store(0, Ordering::Release);
        controller.residency().remove_resident(count);
        controller.residency().record_eviction();
        log::trace!("evicted {} events of box {} to {} bytes at {}", count, self.id, block.length, block.offset);
        Ok(true)
    }

    /// Logs, once per box, that an over-threshold leaf is pinned at the depth limit.
    pub(crate) fn warn_at_depth_limit(&self, threshold: usize) {
        if !self.depth_warned.swap(true, Ordering::AcqRel) {
            log::warn!(
                "box {} holds {} events (threshold {}) but is at max depth {}; it will not split",
                self.id,
                self.event_count(),
                threshold,
                self.depth
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::WorkspaceConfig;
    use crate::core::storage::engine::InMemoryDiskBackend;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn controller() -> BoxController {
        BoxController::new(&WorkspaceConfig::default(), 2, Arc::new(InMemoryDiskBackend::new())).unwrap()
    }

    fn leaf() -> MdBox {
        MdBox::new_leaf(BoxId(3), 1, Some(BoxId::ROOT), Extents::from_ranges(&[(0.0, 1.0), (0.0, 1.0)]), 20)
    }

    fn event(x: f64, y: f64, signal: f64) -> Event {
        Event::new(&[x, y], signal, 0.5).unwrap()
    }

    #[test]
    fn test_push_updates_totals_and_residency() {
        let c = controller();
        let b = leaf();
        {
            let mut state = b.lock_state().unwrap();
            b.push_event(&mut state, event(0.1, 0.1, 2.0), &c).unwrap();
            b.push_event(&mut state, event(0.2, 0.3, 3.0), &c).unwrap();
        }
        assert_relative_eq!(b.signal(), 5.0);
        assert_relative_eq!(b.error_squared(), 0.5);
        assert_eq!(b.n_points(), 2);
        assert_eq!(b.resident_events(), 2);
        assert_eq!(c.residency().resident_events(), 2);
        assert!(b.last_access() > 0);
    }

    #[test]
    fn test_evict_then_reload_frees_block() {
        let c = controller();
        let b = leaf();
        {
            let mut state = b.lock_state().unwrap();
            b.push_event(&mut state, event(0.1, 0.1, 1.0), &c).unwrap();
        }
        assert!(b.try_evict(&c).unwrap());
        assert_eq!(b.resident_events(), 0);
        assert_eq!(c.residency().resident_events(), 0);
        assert!(c.backend().bytes_in_use() > 0);
        assert!(matches!(&*b.lock_state().unwrap(), BoxState::Leaf(EventBuffer::OnDisk { count: 1, .. })));

        let events = b.read_events(&c).unwrap().unwrap();
        assert_eq!(events, vec![event(0.1, 0.1, 1.0)]);
        assert_eq!(c.backend().bytes_in_use(), 0);
        assert_eq!(c.residency().resident_events(), 1);
        // Totals never move during eviction.
        assert_eq!(b.n_points(), 1);
    }

    #[test]
    fn test_empty_or_busy_leaf_is_not_evicted() {
        let c = controller();
        let b = leaf();
        assert!(!b.try_evict(&c).unwrap());

        {
            let mut state = b.lock_state().unwrap();
            b.push_event(&mut state, event(0.5, 0.5, 1.0), &c).unwrap();
            assert!(!b.try_evict(&c).unwrap());
        }
        assert!(b.try_evict(&c).unwrap());
    }

    #[test]
    fn test_depth_limit_flag() {
        let b = MdBox::new_leaf(BoxId(9), 4, Some(BoxId(1)), Extents::from_ranges(&[(0.0, 1.0)]), 4);
        assert!(b.is_at_max_depth());
        assert!(!leaf().is_at_max_depth());
    }

    #[test]
    fn test_totals_merge() {
        let a = BoxTotals::of_events(&[event(0.1, 0.1, 1.0), event(0.2, 0.2, 2.0)]);
        let b = BoxTotals::of_events(&[event(0.3, 0.3, 4.0)]);
        let merged = a.merge(b);
        assert_relative_eq!(merged.signal, 7.0);
        assert_eq!(merged.n_points, 3);
    }
}
