//! Lazy, leaf-by-leaf iteration over the events below a box.

use super::workspace::{EventWorkspace, Visit};
use crate::core::common::{BoxId, MdStoreError};
use crate::core::event::Event;
use std::vec;

/// Restartable handle over the events of one subtree.
///
/// Every call to [`BoxEvents::iter`] walks the subtree afresh. On-disk leaves are loaded as
/// the walk reaches them and stay resident afterwards, subject to the residency budget.
#[derive(Debug, Clone, Copy)]
pub struct BoxEvents<'a> {
    workspace: &'a EventWorkspace,
    root: BoxId,
}

impl<'a> BoxEvents<'a> {
    pub(crate) const fn new(workspace: &'a EventWorkspace, root: BoxId) -> Self {
        Self { workspace, root }
    }

    pub const fn root(&self) -> BoxId {
        self.root
    }

    pub fn iter(&self) -> EventIter<'a> {
        EventIter {
            workspace: self.workspace,
            pending: vec![self.root],
            current: Vec::new().into_iter(),
        }
    }

    /// Collects every event, stopping at the first error.
    pub fn to_vec(&self) -> Result<Vec<Event>, MdStoreError> {
        self.iter().collect()
    }
}

impl<'a> IntoIterator for &BoxEvents<'a> {
    type Item = Result<Event, MdStoreError>;
    type IntoIter = EventIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug)]
pub struct EventIter<'a> {
    workspace: &'a EventWorkspace,
    pending: Vec<BoxId>,
    current: vec::IntoIter<Event>,
}

impl Iterator for EventIter<'_> {
    type Item = Result<Event, MdStoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.current.next() {
                return Some(Ok(event));
            }
            let id = self.pending.pop()?;
            match self.workspace.visit(id) {
                Ok(Visit::Children(children)) => self.pending.extend(children.into_iter().rev()),
                Ok(Visit::Events(events)) => self.current = events.into_iter(),
                Err(e) => {
                    // Fused after an error.
                    self.pending.clear();
                    return Some(Err(e));
                }
            }
        }
    }
}
