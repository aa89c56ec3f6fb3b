use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a box inside one workspace arena.
///
/// Ids are handed out by the box controller in allocation order and double as the index of
/// the box in the arena, so they are dense from zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BoxId(pub u64);

impl BoxId {
    pub const ROOT: Self = Self(0);

    #[must_use]
    pub const fn index(self) -> usize {
        // Arena indices; a workspace never holds more than usize::MAX boxes.
        #[allow(clippy::cast_possible_truncation)]
        let idx = self.0 as usize;
        idx
    }
}

impl fmt::Display for BoxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BoxId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}
