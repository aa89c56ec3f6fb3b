//! Conversion of an over-full leaf into a grid.

use super::{BoxArena, BoxState, MdBox};
use crate::core::common::{BoxId, MdStoreError};
use crate::core::controller::BoxController;
use crate::core::event::Event;
use std::sync::Arc;

/// Splits `md_box` into `split_factor^nd` leaf children and redistributes its events.
///
/// The caller holds the box lock and passes the guarded state. The state is replaced by
/// the grid only after every child is published, so any failure leaves the box an intact
/// leaf. Totals of the box and its ancestors do not change.
pub(crate) fn split_leaf(
    md_box: &MdBox,
    state: &mut BoxState,
    controller: &BoxController,
    arena: &BoxArena,
) -> Result<Vec<BoxId>, MdStoreError> {
    let factor = controller.split_factor();
    let n_children = controller.children_per_split();
    let events = md_box.ensure_resident(state, controller)?;
    let moved = events.len();

    let mut buckets: Vec<Vec<Event>> = vec![Vec::new(); n_children];
    for event in events.iter() {
        buckets[md_box.extents().child_index(event.coords(), factor)].push(*event);
    }

    let first = controller.allocate_ids(n_children)?;
    let depth = md_box.depth() + 1;
    let children: Vec<Arc<MdBox>> = buckets
        .into_iter()
        .enumerate()
        .map(|(index, bucket)| {
            let child = MdBox::leaf_with_events(
                BoxId(first.0 + index as u64),
                depth,
                Some(md_box.id()),
                md_box.extents().child(index, factor),
                controller.max_depth(),
                bucket,
            );
            child.touch(controller);
            Arc::new(child)
        })
        .collect();
    let ids: Vec<BoxId> = children.iter().map(|c| c.id()).collect();

    arena.publish(children)?;
    *state = BoxState::Grid(ids.clone());
    // The moved events stay resident, now owned by the children.
    md_box.mark_grid();

    log::debug!(
        "split box {} at depth {} into {} children ({} events)",
        md_box.id(),
        md_box.depth(),
        n_children,
        moved
    );
    Ok(ids)
}
