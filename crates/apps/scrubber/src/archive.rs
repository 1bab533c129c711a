use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use foundation::time::{DataWindow, Timestamp};
use streaming::source::{ArchiveSource, BoxFuture, LoadError};
use tracing::debug;

/// Stand-in for the remote weather archive.
///
/// Field values are a smooth function of timestamp and point index, so a
/// slot's contents can be checked against the timestamp it claims to hold.
pub struct SyntheticArchive {
    latest_run: Timestamp,
    window: DataWindow,
    points: usize,
    latency: Duration,
    // Every Nth slice fetch fails; 0 disables injection.
    fail_every: u64,
    fetches: AtomicU64,
    failures: AtomicU64,
}

impl SyntheticArchive {
    pub fn new(latest_run: Timestamp, window: DataWindow, points: usize) -> Self {
        Self {
            latest_run,
            window,
            points,
            latency: Duration::ZERO,
            fail_every: 0,
            fetches: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_fail_every(mut self, n: u64) -> Self {
        self.fail_every = n;
        self
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn value(&self, timestamp: Timestamp, point: usize) -> f32 {
        let hours = timestamp.offset_hours_from(self.latest_run);
        let phase = point as f64 / self.points.max(1) as f64;
        (280.0 + 10.0 * (hours / 24.0 * std::f64::consts::TAU + phase).sin()) as f32
    }
}

impl ArchiveSource for SyntheticArchive {
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
        let n = self.fetches.fetch_add(1, Ordering::Relaxed) + 1;
        let inject = self.fail_every > 0 && n % self.fail_every == 0;
        Box::pin(async move {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if inject {
                self.failures.fetch_add(1, Ordering::Relaxed);
                return Err(LoadError::Fetch {
                    timestamp,
                    slice: range.start,
                    message: format!("injected failure on fetch #{n}"),
                });
            }
            if !self.window.contains(timestamp) || range.end > self.points {
                return Err(LoadError::Decode {
                    timestamp,
                    message: format!("no data for points {range:?}"),
                });
            }
            debug!("served {timestamp} points {range:?}");
            Ok(range.map(|i| self.value(timestamp, i)).collect())
        })
    }
}
