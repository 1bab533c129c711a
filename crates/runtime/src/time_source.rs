use foundation::time::Timestamp;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

type Listener = Box<dyn FnMut(Timestamp) + Send>;

/// The current playback time with explicit observer registration.
///
/// Delivery is synchronous and ordered: `set` calls every subscriber in
/// registration order before returning. Setting the same value again is not a
/// change and notifies nobody. User scrubs, keyboard stepping and restored
/// URL state all funnel through `set`.
pub struct TimeSource {
    current: Timestamp,
    next_id: u64,
    listeners: Vec<(SubscriptionId, Listener)>,
}

impl std::fmt::Debug for TimeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSource")
            .field("current", &self.current)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl TimeSource {
    pub fn new(initial: Timestamp) -> Self {
        Self {
            current: initial,
            next_id: 0,
            listeners: Vec::new(),
        }
    }

    pub fn get(&self) -> Timestamp {
        self.current
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn subscribe(&mut self, listener: impl FnMut(Timestamp) + Send + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns `true` if a subscription was removed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sid, _)| *sid != id);
        self.listeners.len() != before
    }

    /// Updates the current time and notifies subscribers if it changed.
    pub fn set(&mut self, t: Timestamp) -> bool {
        if t == self.current {
            return false;
        }
        self.current = t;
        for (_, listener) in &mut self.listeners {
            listener(t);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use foundation::time::Timestamp;

    use super::TimeSource;

    #[test]
    fn notifies_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut source = TimeSource::new(Timestamp(0));

        let a = seen.clone();
        source.subscribe(move |t| a.lock().unwrap().push(("a", t)));
        let b = seen.clone();
        source.subscribe(move |t| b.lock().unwrap().push(("b", t)));

        assert!(source.set(Timestamp(5)));
        assert!(source.set(Timestamp(7)));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("a", Timestamp(5)),
                ("b", Timestamp(5)),
                ("a", Timestamp(7)),
                ("b", Timestamp(7)),
            ]
        );
    }

    #[test]
    fn unchanged_value_is_not_delivered() {
        let count = Arc::new(Mutex::new(0));
        let mut source = TimeSource::new(Timestamp(1));
        let c = count.clone();
        source.subscribe(move |_| *c.lock().unwrap() += 1);

        assert!(!source.set(Timestamp(1)));
        assert!(source.set(Timestamp(2)));
        assert!(!source.set(Timestamp(2)));
        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(source.get(), Timestamp(2));
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let count = Arc::new(Mutex::new(0));
        let mut source = TimeSource::new(Timestamp(0));
        let c = count.clone();
        let id = source.subscribe(move |_| *c.lock().unwrap() += 1);

        source.set(Timestamp(1));
        assert!(source.unsubscribe(id));
        assert!(!source.unsubscribe(id));
        source.set(Timestamp(2));
        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(source.subscriber_count(), 0);
    }
}
