//! Deterministic event queue used to trampoline state-machine work.
//!
//! Key properties:
//! - Total ordering on `(priority, id)`.
//! - Equal priorities are processed in insertion order.
//! - `push_if_absent` coalesces duplicate pending payloads, so a handler that
//!   re-queues "reconcile" from inside a drain loop never piles up work.
//!
//! Handlers push follow-up events instead of calling back into themselves,
//! which keeps the call stack flat no matter how many cycles chain together.

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Key {
    // Smaller values run earlier.
    priority: i32,
    id: EventId,
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
struct Item<T> {
    key: Key,
    payload: T,
}

#[derive(Debug)]
pub struct EventQueue<T> {
    next_id: u64,
    items: Vec<Item<T>>,
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            items: Vec::new(),
        }
    }
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn push(&mut self, priority: i32, payload: T) -> EventId {
        let id = EventId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.items.push(Item {
            key: Key { priority, id },
            payload,
        });
        id
    }

    /// Pops the next (lowest priority value, then oldest) event.
    pub fn pop_next(&mut self) -> Option<(EventId, T)> {
        let idx = self
            .items
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.key.cmp(&b.key))
            .map(|(idx, _)| idx)?;
        let item = self.items.swap_remove(idx);
        Some((item.key.id, item.payload))
    }
}

impl<T: PartialEq> EventQueue<T> {
    pub fn contains(&self, payload: &T) -> bool {
        self.items.iter().any(|i| &i.payload == payload)
    }

    /// Pushes `payload` unless an equal event is already pending.
    ///
    /// Returns `None` when the event was coalesced.
    pub fn push_if_absent(&mut self, priority: i32, payload: T) -> Option<EventId> {
        if self.contains(&payload) {
            return None;
        }
        Some(self.push(priority, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::EventQueue;

    #[test]
    fn same_priority_is_insertion_order() {
        let mut q = EventQueue::new();
        q.push(0, "a");
        q.push(0, "b");
        q.push(0, "c");

        let (_, a) = q.pop_next().unwrap();
        let (_, b) = q.pop_next().unwrap();
        let (_, c) = q.pop_next().unwrap();
        assert_eq!((a, b, c), ("a", "b", "c"));
        assert!(q.pop_next().is_none());
    }

    #[test]
    fn lower_priority_value_runs_first() {
        let mut q = EventQueue::new();
        q.push(10, "late");
        q.push(-1, "early");
        q.push(10, "later");
        let order: Vec<_> = std::iter::from_fn(|| q.pop_next().map(|(_, v)| v)).collect();
        assert_eq!(order, vec!["early", "late", "later"]);
    }

    #[test]
    fn push_if_absent_coalesces_pending_duplicates() {
        let mut q = EventQueue::new();
        assert!(q.push_if_absent(1, "reconcile").is_some());
        assert!(q.push_if_absent(1, "reconcile").is_none());
        assert_eq!(q.len(), 1);

        q.pop_next();
        assert!(q.is_empty());
        assert!(q.push_if_absent(1, "reconcile").is_some());
    }

    #[test]
    fn clear_drops_everything() {
        let mut q = EventQueue::new();
        q.push(0, 1);
        q.push(0, 2);
        q.clear();
        assert!(q.is_empty());
        assert!(!q.contains(&1));
    }
}
