use super::MdBox;
use crate::core::common::lock_utils::{read_lock_poisoned, write_lock_poisoned};
use crate::core::common::{BoxId, MdStoreError};
use std::sync::{Arc, RwLock};

/// Id-indexed storage for every box of a workspace.
///
/// Slot `i` holds the box with id `i`. Ids are allocated before their boxes are published,
/// so a slot may briefly be empty while a concurrent split is still building its children.
#[derive(Debug, Default)]
pub struct BoxArena {
    slots: RwLock<Vec<Option<Arc<MdBox>>>>,
}

impl BoxArena {
    pub fn with_root(root: MdBox) -> Self {
        Self { slots: RwLock::new(vec![Some(Arc::new(root))]) }
    }

    /// Builds an arena from restored boxes. Ids must be dense from zero.
    pub fn from_boxes(boxes: Vec<MdBox>) -> Result<Self, MdStoreError> {
        let mut slots = Vec::with_capacity(boxes.len());
        for (index, md_box) in boxes.into_iter().enumerate() {
            if md_box.id().index() != index {
                return Err(MdStoreError::CorruptData(format!(
                    "box {} stored in slot {}",
                    md_box.id(),
                    index
                )));
            }
            slots.push(Some(Arc::new(md_box)));
        }
        Ok(Self { slots: RwLock::new(slots) })
    }

    pub fn get(&self, id: BoxId) -> Result<Arc<MdBox>, MdStoreError> {
        let slots = self.slots.read().map_err(read_lock_poisoned)?;
        slots
            .get(id.index())
            .and_then(Option::as_ref)
            .map(Arc::clone)
            .ok_or(MdStoreError::BoxNotFound(id))
    }

    pub fn contains(&self, id: BoxId) -> bool {
        self.get(id).is_ok()
    }

    /// Makes freshly allocated boxes reachable by id.
    pub fn publish(&self, boxes: Vec<Arc<MdBox>>) -> Result<(), MdStoreError> {
        let Some(highest) = boxes.iter().map(|b| b.id().index()).max() else {
            return Ok(());
        };
        let mut slots = self.slots.write().map_err(write_lock_poisoned)?;
        if slots.len() <= highest {
            slots.resize(highest + 1, None);
        }
        for md_box in boxes {
            let index = md_box.id().index();
            slots[index] = Some(md_box);
        }
        Ok(())
    }

    /// Number of published boxes.
    pub fn len(&self) -> usize {
        self.slots.read().map_or(0, |slots| slots.iter().flatten().count())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All published boxes in id order.
    pub fn snapshot(&self) -> Result<Vec<Arc<MdBox>>, MdStoreError> {
        let slots = self.slots.read().map_err(read_lock_poisoned)?;
        Ok(slots.iter().flatten().cloned().collect())
    }
}
