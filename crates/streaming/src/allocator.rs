use std::collections::BTreeSet;
use std::fmt;

/// Index of one fixed-size GPU slot holding a single timestep's field.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotIndex(pub u32);

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    /// The pool is empty. Callers should check `has_free` and defer instead.
    #[error("slot pool exhausted (capacity {capacity})")]
    Exhausted { capacity: usize },
    #[error("{index} released twice")]
    DoubleRelease { index: SlotIndex },
    #[error("{index} out of range for capacity {capacity}")]
    OutOfRange { index: SlotIndex, capacity: usize },
}

/// Fixed pool of `N` slot indices, `N = budget / bytes_per_timestep`.
///
/// Hands out the lowest free index first so allocation order is
/// deterministic. Never overcommits.
#[derive(Debug, Clone)]
pub struct SlotAllocator {
    capacity: usize,
    free: BTreeSet<SlotIndex>,
}

impl SlotAllocator {
    pub fn with_capacity(capacity: usize) -> Self {
        let free = (0..capacity as u32).map(SlotIndex).collect();
        Self { capacity, free }
    }

    /// Capacity from a memory budget; zero `bytes_per_timestep` yields an empty pool.
    pub fn from_budget(budget_bytes: u64, bytes_per_timestep: u64) -> Self {
        let capacity = budget_bytes.checked_div(bytes_per_timestep).unwrap_or(0);
        Self::with_capacity(capacity as usize)
    }

    /// Rebuilds a pool in which `acquired` are in use and everything else is free.
    pub fn with_acquired(capacity: usize, acquired: impl IntoIterator<Item = SlotIndex>) -> Self {
        let mut pool = Self::with_capacity(capacity);
        for index in acquired {
            pool.free.remove(&index);
        }
        pool
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.free.len()
    }

    pub fn has_free(&self) -> bool {
        !self.free.is_empty()
    }

    pub fn is_free(&self, index: SlotIndex) -> bool {
        self.free.contains(&index)
    }

    pub fn acquire(&mut self) -> Result<SlotIndex, SlotError> {
        self.free.pop_first().ok_or(SlotError::Exhausted {
            capacity: self.capacity,
        })
    }

    /// Returns `index` to the pool.
    ///
    /// Releasing an index that is not currently acquired is a programming
    /// error: it panics in debug builds and is reported as an error otherwise.
    pub fn release(&mut self, index: SlotIndex) -> Result<(), SlotError> {
        if index.0 as usize >= self.capacity {
            debug_assert!(false, "{index} out of range for capacity {}", self.capacity);
            return Err(SlotError::OutOfRange {
                index,
                capacity: self.capacity,
            });
        }
        if !self.free.insert(index) {
            debug_assert!(false, "{index} released twice");
            return Err(SlotError::DoubleRelease { index });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{SlotAllocator, SlotError, SlotIndex};

    #[test]
    fn capacity_is_floor_of_budget() {
        assert_eq!(SlotAllocator::from_budget(100, 30).capacity(), 3);
        assert_eq!(SlotAllocator::from_budget(29, 30).capacity(), 0);
        assert_eq!(SlotAllocator::from_budget(100, 0).capacity(), 0);
    }

    #[test]
    fn acquires_lowest_index_and_never_overcommits() {
        let mut pool = SlotAllocator::with_capacity(2);
        assert_eq!(pool.acquire(), Ok(SlotIndex(0)));
        assert_eq!(pool.acquire(), Ok(SlotIndex(1)));
        assert!(!pool.has_free());
        assert_eq!(pool.acquire(), Err(SlotError::Exhausted { capacity: 2 }));
        assert_eq!(pool.in_use(), 2);

        pool.release(SlotIndex(0)).unwrap();
        assert!(pool.is_free(SlotIndex(0)));
        assert_eq!(pool.free_count() + pool.in_use(), pool.capacity());
        assert_eq!(pool.acquire(), Ok(SlotIndex(0)));
    }

    #[test]
    fn rebuild_marks_acquired_indices() {
        let mut pool = SlotAllocator::with_acquired(3, [SlotIndex(0), SlotIndex(2)]);
        assert_eq!(pool.free_count(), 1);
        assert_eq!(pool.acquire(), Ok(SlotIndex(1)));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "released twice")]
    fn double_release_panics_in_debug() {
        let mut pool = SlotAllocator::with_capacity(1);
        let idx = pool.acquire().unwrap();
        pool.release(idx).unwrap();
        let _ = pool.release(idx);
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn double_release_is_reported() {
        let mut pool = SlotAllocator::with_capacity(1);
        let idx = pool.acquire().unwrap();
        pool.release(idx).unwrap();
        assert_eq!(pool.release(idx), Err(SlotError::DoubleRelease { index: idx }));
        assert_eq!(pool.free_count(), 1);
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn out_of_range_release_is_reported() {
        let mut pool = SlotAllocator::with_capacity(1);
        assert!(matches!(
            pool.release(SlotIndex(7)),
            Err(SlotError::OutOfRange { .. })
        ));
    }
}
