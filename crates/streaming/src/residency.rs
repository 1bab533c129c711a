use foundation::time::Timestamp;

use crate::allocator::SlotIndex;

/// Lifecycle of a timestamp inside the slot cache.
///
/// `Absent → Loading → Resident → (evicted) → Absent`. A resident timestamp
/// never goes back to `Loading` without first being evicted.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResidencyState {
    Loading,
    Resident,
}

/// One entry in the residency table.
///
/// Created when a load is started, updated in place as progressive chunks
/// arrive, and removed outright on eviction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TimestepSlot {
    pub timestamp: Timestamp,
    pub slot: SlotIndex,
    pub loaded: bool,
    pub loaded_points: usize,
}

impl TimestepSlot {
    pub fn loading(timestamp: Timestamp, slot: SlotIndex) -> Self {
        Self {
            timestamp,
            slot,
            loaded: false,
            loaded_points: 0,
        }
    }

    pub fn state(&self) -> ResidencyState {
        if self.loaded {
            ResidencyState::Resident
        } else {
            ResidencyState::Loading
        }
    }
}
