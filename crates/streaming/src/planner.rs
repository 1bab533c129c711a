use foundation::time::Timestamp;

use crate::config::LoadingStrategy;
use crate::resolver::TimestepResolver;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Direction {
    Past,
    Future,
}

/// Computes the ideal ordered set of timestamps to keep resident.
///
/// The adjacent pair always comes first; everything after it is in load
/// priority order as dictated by the strategy.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoadWindowPlanner;

impl LoadWindowPlanner {
    pub fn new() -> Self {
        Self
    }

    pub fn plan_window(
        &self,
        resolver: &TimestepResolver,
        query: Timestamp,
        strategy: LoadingStrategy,
        capacity: usize,
    ) -> Vec<Timestamp> {
        let Some(pair) = resolver.adjacent_pair(query) else {
            return Vec::new();
        };

        let mut slots = vec![pair.t0, pair.t1];
        let mut past = resolver.previous(pair.t0);
        let mut future = resolver.next(pair.t1);
        let mut past_added = 0usize;
        let mut future_added = 0usize;

        while slots.len() < capacity {
            let preferred = match strategy {
                LoadingStrategy::FutureFirst => Direction::Future,
                LoadingStrategy::PastFirst => Direction::Past,
                LoadingStrategy::Alternate if past_added < future_added => Direction::Past,
                LoadingStrategy::Alternate => Direction::Future,
            };

            let direction = match (preferred, past, future) {
                (_, None, None) => break,
                (Direction::Future, _, Some(_)) | (Direction::Past, None, Some(_)) => {
                    Direction::Future
                }
                _ => Direction::Past,
            };

            match direction {
                Direction::Future => {
                    if let Some(t) = future {
                        slots.push(t);
                        future_added += 1;
                        future = resolver.next(t);
                    }
                }
                Direction::Past => {
                    if let Some(t) = past {
                        slots.push(t);
                        past_added += 1;
                        past = resolver.previous(t);
                    }
                }
            }
        }

        slots
    }
}
