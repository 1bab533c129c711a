use foundation::time::Timestamp;

use crate::allocator::SlotIndex;

/// Identifies one load operation handed to the loader.
///
/// Progress and completion messages carry this id so late messages from a
/// load the cache no longer tracks can be recognised and dropped.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoadId(pub u64);

/// One timestamp to fetch and the slot it is written into.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LoadTarget {
    pub timestamp: Timestamp,
    pub slot: SlotIndex,
}

/// A started load. Normal loads have one target; the bootstrap load fetches
/// the initial pair together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub id: LoadId,
    pub targets: Vec<LoadTarget>,
}

impl LoadTicket {
    pub fn is_bootstrap(&self) -> bool {
        self.targets.len() > 1
    }

    pub fn covers(&self, timestamp: Timestamp) -> bool {
        self.targets.iter().any(|t| t.timestamp == timestamp)
    }
}
