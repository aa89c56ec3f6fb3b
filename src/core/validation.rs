//! Structural checks and summary statistics over a whole box tree.
//!
//! Both walks lock one box at a time and read other boxes only through their atomic totals.
//! Results are exact when the workspace is quiescent; during concurrent insertion the sum
//! checks may report transient mismatches.

use crate::core::boxes::{BoxArena, BoxState, BoxTotals, EventBuffer};
use crate::core::common::{BoxId, MdStoreError};
use crate::core::controller::BoxController;
use crate::core::geometry::Extents;
use serde::Serialize;
use std::collections::HashMap;

const RELATIVE_TOLERANCE: f64 = 1e-9;

/// Float sums compared with a relative tolerance, absolute near zero.
pub(crate) fn sums_match(a: f64, b: f64) -> bool {
    (a - b).abs() <= RELATIVE_TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

pub(crate) fn extents_match(a: &Extents, b: &Extents) -> bool {
    a.nd() == b.nd()
        && a.intervals()
            .iter()
            .zip(b.intervals())
            .all(|(x, y)| sums_match(x.min, y.min) && sums_match(x.max, y.max))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InvariantReport {
    pub boxes_checked: usize,
    pub leaves_checked: usize,
    /// Leaves whose events were not inspected because they are on disk.
    pub on_disk_leaves: usize,
    pub violations: Vec<String>,
}

impl InvariantReport {
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TreeStats {
    pub n_boxes: usize,
    pub n_leaves: usize,
    pub n_grids: usize,
    pub deepest_box: u32,
    pub leaves_at_max_depth: usize,
    pub resident_leaves: usize,
    pub on_disk_leaves: usize,
    pub largest_leaf: usize,
    pub total_events: u64,
    pub total_signal: f64,
    pub total_error_squared: f64,
    pub resident_events: usize,
    pub allocated_ids: u64,
    pub backend_bytes: u64,
    pub evictions: u64,
    pub loads: u64,
    pub rejected_events: u64,
}

pub(crate) fn collect_stats(arena: &BoxArena, controller: &BoxController) -> Result<TreeStats, MdStoreError> {
    let mut stats = TreeStats::default();
    for md_box in arena.snapshot()? {
        stats.n_boxes += 1;
        stats.deepest_box = stats.deepest_box.max(md_box.depth());
        if md_box.id() == BoxId::ROOT {
            let totals = md_box.totals();
            stats.total_events = totals.n_points;
            stats.total_signal = totals.signal;
            stats.total_error_squared = totals.error_squared;
        }
        match &*md_box.lock_state()? {
            BoxState::Grid(_) => stats.n_grids += 1,
            BoxState::Leaf(buffer) => {
                stats.n_leaves += 1;
                stats.largest_leaf = stats.largest_leaf.max(buffer.len());
                if md_box.is_at_max_depth() {
                    stats.leaves_at_max_depth += 1;
                }
                if buffer.is_resident() {
                    stats.resident_leaves += 1;
                } else {
                    stats.on_disk_leaves += 1;
                }
            }
        }
    }
    let residency = controller.residency().snapshot();
    stats.resident_events = residency.resident_events;
    stats.evictions = residency.evictions;
    stats.loads = residency.loads;
    stats.allocated_ids = controller.allocated_ids();
    stats.backend_bytes = controller.backend().bytes_in_use();
    Ok(stats)
}

pub(crate) fn check_tree(
    arena: &BoxArena,
    controller: &BoxController,
    root_extents: &Extents,
) -> Result<InvariantReport, MdStoreError> {
    let boxes = arena.snapshot()?;
    let mut report = InvariantReport::default();
    let mut claimed = vec![0usize; boxes.len()];
    let positions: HashMap<BoxId, usize> =
        boxes.iter().enumerate().map(|(i, b)| (b.id(), i)).collect();
    let factor = controller.split_factor();
    let mut previous: Option<BoxId> = None;

    for md_box in &boxes {
        report.boxes_checked += 1;
        let id = md_box.id();
        if previous.is_some_and(|p| p >= id) {
            report.violations.push(format!("box id {id} is not unique"));
        }
        previous = Some(id);

        if md_box.depth() > controller.max_depth() {
            report.violations.push(format!(
                "box {id} at depth {} exceeds max depth {}",
                md_box.depth(),
                controller.max_depth()
            ));
        }
        if id == BoxId::ROOT && !extents_match(md_box.extents(), root_extents) {
            report.violations.push("root extents differ from the workspace extents".to_string());
        }

        let totals = md_box.totals();
        match &*md_box.lock_state()? {
            BoxState::Grid(children) => {
                if children.len() != controller.children_per_split() {
                    report.violations.push(format!(
                        "grid {id} has {} children, expected {}",
                        children.len(),
                        controller.children_per_split()
                    ));
                }
                let mut sum = BoxTotals::default();
                for (index, &child_id) in children.iter().enumerate() {
                    let child = match arena.get(child_id) {
                        Ok(child) => child,
                        Err(_) => {
                            report.violations.push(format!("grid {id} lists missing child {child_id}"));
                            continue;
                        }
                    };
                    if let Some(&position) = positions.get(&child_id) {
                        claimed[position] += 1;
                    }
                    if child_id <= id {
                        report.violations.push(format!("child {child_id} allocated before parent {id}"));
                    }
                    if child.parent() != Some(id) || child.depth() != md_box.depth() + 1 {
                        report.violations.push(format!("child {child_id} is not linked to parent {id}"));
                    }
                    if !extents_match(child.extents(), &md_box.extents().child(index, factor)) {
                        report.violations.push(format!("child {child_id} extents do not tile parent {id}"));
                    }
                    sum = sum.merge(child.totals());
                }
                compare_totals(&mut report, id, totals, sum);
            }
            BoxState::Leaf(EventBuffer::Resident(events)) => {
                report.leaves_checked += 1;
                if let Some(outside) = events.iter().find(|e| !md_box.extents().contains_point(e.coords())) {
                    report.violations.push(format!(
                        "leaf {id} holds event at {:?} outside its extents",
                        outside.coords()
                    ));
                }
                compare_totals(&mut report, id, totals, BoxTotals::of_events(events));
            }
            BoxState::Leaf(EventBuffer::OnDisk { count, .. }) => {
                report.on_disk_leaves += 1;
                if *count as u64 != totals.n_points {
                    report.violations.push(format!(
                        "leaf {id} stores {count} events on disk but counts {}",
                        totals.n_points
                    ));
                }
            }
        }
    }

    for (md_box, &times) in boxes.iter().zip(&claimed) {
        if md_box.id() != BoxId::ROOT && times != 1 {
            report.violations.push(format!("box {} is reachable {} times", md_box.id(), times));
        }
    }
    Ok(report)
}

fn compare_totals(report: &mut InvariantReport, id: BoxId, recorded: BoxTotals, actual: BoxTotals) {
    if recorded.n_points != actual.n_points {
        report.violations.push(format!(
            "box {id} counts {} events, contents hold {}",
            recorded.n_points, actual.n_points
        ));
    }
    if !sums_match(recorded.signal, actual.signal) {
        report.violations.push(format!(
            "box {id} signal {} differs from contents {}",
            recorded.signal, actual.signal
        ));
    }
    if !sums_match(recorded.error_squared, actual.error_squared) {
        report.violations.push(format!(
            "box {id} squared error {} differs from contents {}",
            recorded.error_squared, actual.error_squared
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sums_match_is_relative() {
        assert!(sums_match(1e6, 1e6 + 1e-4));
        assert!(!sums_match(1e6, 1e6 + 1.0));
        assert!(sums_match(0.0, 1e-12));
        assert!(!sums_match(0.0, 1e-3));
    }

    #[test]
    fn test_report_ok() {
        let mut report = InvariantReport::default();
        assert!(report.is_ok());
        compare_totals(
            &mut report,
            BoxId(1),
            BoxTotals { signal: 2.0, error_squared: 1.0, n_points: 2 },
            BoxTotals { signal: 2.0, error_squared: 1.0, n_points: 3 },
        );
        assert_eq!(report.violations.len(), 1);
    }
}
