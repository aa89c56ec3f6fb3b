//! Working-set accounting for resident leaf boxes.
//!
//! The manager owns no boxes. Leaves report their resident event counts and access ticks,
//! and the manager decides which of them should be flushed when the budget is exceeded.
//! Victim selection is least-recently-accessed first; a victim that is busy (locked by an
//! inserting or splitting thread) is skipped by the caller, the same way a pinned frame is
//! skipped by a buffer pool replacer.

use crate::core::common::BoxId;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// A resident leaf considered for eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub id: BoxId,
    pub last_access: u64,
    pub resident_events: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResidencySnapshot {
    pub budget: Option<usize>,
    pub resident_events: usize,
    pub evictions: u64,
    pub loads: u64,
}

#[derive(Debug)]
pub struct ResidencyManager {
    budget: Option<usize>,
    clock: AtomicU64,
    resident_events: AtomicUsize,
    evictions: AtomicU64,
    loads: AtomicU64,
}

impl ResidencyManager {
    pub fn new(budget: Option<usize>) -> Self {
        Self {
            budget,
            clock: AtomicU64::new(0),
            resident_events: AtomicUsize::new(0),
            evictions: AtomicU64::new(0),
            loads: AtomicU64::new(0),
        }
    }

    pub const fn budget(&self) -> Option<usize> {
        self.budget
    }

    /// Next access tick. Ticks only order accesses; they carry no wall-clock meaning.
    pub fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add_resident(&self, events: usize) {
        self.resident_events.fetch_add(events, Ordering::AcqRel);
    }

    pub fn remove_resident(&self, events: usize) {
        // Saturating: accounting must never wrap even if a caller double-reports.
        let _ = self.resident_events.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            Some(current.saturating_sub(events))
        });
    }

    pub fn resident_events(&self) -> usize {
        self.resident_events.load(Ordering::Acquire)
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    /// Resident events above the budget, zero when within it or unlimited.
    pub fn excess(&self) -> usize {
        self.budget.map_or(0, |budget| self.resident_events().saturating_sub(budget))
    }

    pub fn over_budget(&self) -> bool {
        self.excess() > 0
    }

    /// Orders `candidates` least-recently-accessed first and keeps just enough of them to
    /// bring the resident total back within budget. Empty leaves are never chosen.
    pub fn plan_evictions(&self, mut candidates: Vec<EvictionCandidate>) -> Vec<EvictionCandidate> {
        let mut needed = self.excess();
        if needed == 0 {
            return Vec::new();
        }
        candidates.retain(|c| c.resident_events > 0);
        candidates.sort_by_key(|c| (c.last_access, c.id));

        let mut plan = Vec::new();
        for candidate in candidates {
            if needed == 0 {
                break;
            }
            needed = needed.saturating_sub(candidate.resident_events);
            plan.push(candidate);
        }
        plan
    }

    pub fn snapshot(&self) -> ResidencySnapshot {
        ResidencySnapshot {
            budget: self.budget,
            resident_events: self.resident_events(),
            evictions: self.evictions.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
        }
    }
}
