//! In-memory collaborators for unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use foundation::time::{DataWindow, MILLIS_PER_HOUR, Timestamp};
use parking_lot::Mutex;

use crate::allocator::SlotIndex;
use crate::source::{ArchiveSource, BoxFuture, LoadError, Renderer};

/// Archive whose field values are a pure function of timestamp and point.
pub struct FakeArchive {
    points: usize,
    latest_run: Timestamp,
    window: DataWindow,
    // timestamp -> (slice that fails, fetches left before it)
    one_shot_failures: Mutex<BTreeMap<Timestamp, (usize, usize)>>,
    always_fail: Mutex<BTreeSet<Timestamp>>,
    truncated: Mutex<BTreeSet<Timestamp>>,
    fetches: Mutex<Vec<(Timestamp, Range<usize>)>>,
    yield_between_slices: bool,
}

impl FakeArchive {
    pub fn new(points: usize) -> Self {
        let latest_run = Timestamp::from_hours(0);
        Self {
            points,
            latest_run,
            window: DataWindow::around(latest_run, 10),
            one_shot_failures: Mutex::new(BTreeMap::new()),
            always_fail: Mutex::new(BTreeSet::new()),
            truncated: Mutex::new(BTreeSet::new()),
            fetches: Mutex::new(Vec::new()),
            yield_between_slices: false,
        }
    }

    pub fn with_run(mut self, latest_run: Timestamp, window: DataWindow) -> Self {
        self.latest_run = latest_run;
        self.window = window;
        self
    }

    /// Suspends once per slice so other tasks can interleave.
    pub fn yielding(mut self) -> Self {
        self.yield_between_slices = true;
        self
    }

    pub fn field(&self, timestamp: Timestamp) -> Vec<f32> {
        (0..self.points)
            .map(|i| Self::value(timestamp, i))
            .collect()
    }

    fn value(timestamp: Timestamp, point: usize) -> f32 {
        (timestamp.0 / MILLIS_PER_HOUR) as f32 * 0.5 + point as f32
    }

    /// The next load of `timestamp` fails on slice `slice`; later loads succeed.
    pub fn fail_slice(&self, timestamp: Timestamp, slice: usize) {
        self.one_shot_failures
            .lock()
            .insert(timestamp, (slice, slice));
    }

    pub fn fail_always(&self, timestamp: Timestamp) {
        self.always_fail.lock().insert(timestamp);
    }

    pub fn truncate_slices(&self, timestamp: Timestamp) {
        self.truncated.lock().insert(timestamp);
    }

    pub fn fetches(&self) -> Vec<(Timestamp, Range<usize>)> {
        self.fetches.lock().clone()
    }

    fn check_failure(&self, timestamp: Timestamp) -> Option<usize> {
        if self.always_fail.lock().contains(&timestamp) {
            return Some(0);
        }
        let mut failures = self.one_shot_failures.lock();
        let (slice, left) = failures.get_mut(&timestamp)?;
        if *left == 0 {
            let slice = *slice;
            failures.remove(&timestamp);
            return Some(slice);
        }
        *left -= 1;
        None
    }
}

impl ArchiveSource for FakeArchive {
    fn latest_run(&self) -> Timestamp {
        self.latest_run
    }

    fn data_window(&self) -> DataWindow {
        self.window
    }

    fn points_per_timestep(&self) -> usize {
        self.points
    }

    fn fetch_slice(
        &self,
        timestamp: Timestamp,
        range: Range<usize>,
    ) -> BoxFuture<'_, Result<Vec<f32>, LoadError>> {
        self.fetches.lock().push((timestamp, range.clone()));
        let failure = self.check_failure(timestamp);
        let truncated = self.truncated.lock().contains(&timestamp);
        let yield_now = self.yield_between_slices;
        Box::pin(async move {
            if yield_now {
                tokio::task::yield_now().await;
            }
            if let Some(slice) = failure {
                return Err(LoadError::Fetch {
                    timestamp,
                    slice,
                    message: "injected failure".to_string(),
                });
            }
            let mut points: Vec<f32> = range.map(|i| Self::value(timestamp, i)).collect();
            if truncated {
                points.pop();
            }
            Ok(points)
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderCall {
    ActiveSlots(SlotIndex, SlotIndex),
    Interpolation(f32),
}

/// Renderer that keeps slot contents in memory and logs state calls.
pub struct RecordingRenderer {
    slots: Mutex<Vec<Vec<f32>>>,
    calls: Mutex<Vec<RenderCall>>,
}

impl RecordingRenderer {
    pub fn new(slot_count: usize, points: usize) -> Self {
        Self {
            slots: Mutex::new(vec![vec![f32::NAN; points]; slot_count]),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn slot_contents(&self, slot: SlotIndex) -> Vec<f32> {
        self.slots.lock()[slot.0 as usize].clone()
    }

    pub fn calls(&self) -> Vec<RenderCall> {
        self.calls.lock().clone()
    }

    pub fn last_active_slots(&self) -> Option<(SlotIndex, SlotIndex)> {
        self.calls.lock().iter().rev().find_map(|c| match c {
            RenderCall::ActiveSlots(a, b) => Some((*a, *b)),
            RenderCall::Interpolation(_) => None,
        })
    }

    pub fn last_interpolation(&self) -> Option<f32> {
        self.calls.lock().iter().rev().find_map(|c| match c {
            RenderCall::Interpolation(lerp) => Some(*lerp),
            RenderCall::ActiveSlots(..) => None,
        })
    }
}

impl Renderer for RecordingRenderer {
    fn upload_chunk(&self, slot: SlotIndex, point_offset: usize, points: &[f32]) {
        let mut slots = self.slots.lock();
        let buffer = &mut slots[slot.0 as usize];
        buffer[point_offset..point_offset + points.len()].copy_from_slice(points);
    }

    fn set_active_slots(&self, slot0: SlotIndex, slot1: SlotIndex) {
        self.calls.lock().push(RenderCall::ActiveSlots(slot0, slot1));
    }

    fn set_interpolation(&self, lerp: f32) {
        self.calls.lock().push(RenderCall::Interpolation(lerp));
    }
}
