//! Collaborator interfaces consumed by the slot cache.
//!
//! The archive decodes weather fields; the renderer owns GPU memory. Both are
//! external to this crate and are reached through these traits only.

use std::future::Future;
use std::ops::Range;
use std::pin::Pin;

use foundation::time::{DataWindow, Timestamp};

use crate::allocator::SlotIndex;

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Failure while fetching or decoding part of a timestep.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("fetch failed for {timestamp} slice {slice}: {message}")]
    Fetch {
        timestamp: Timestamp,
        slice: usize,
        message: String,
    },
    #[error("decode failed for {timestamp}: {message}")]
    Decode {
        timestamp: Timestamp,
        message: String,
    },
    #[error("short slice for {timestamp}: expected {expected} points, got {got}")]
    ShortSlice {
        timestamp: Timestamp,
        expected: usize,
        got: usize,
    },
}

/// Remote archive of time-indexed weather fields.
///
/// Methods return boxed futures for dyn-compatibility.
pub trait ArchiveSource: Send + Sync {
    /// Reference time of the most recent model run.
    fn latest_run(&self) -> Timestamp;

    /// Absolute range of timestamps the archive serves.
    fn data_window(&self) -> DataWindow;

    /// Decoded `f32` points per timestep (grid size).
    fn points_per_timestep(&self) -> usize;

    /// Fetch and decode the points in `range` of one timestep.
    fn fetch_slice(
        &self,
        timestamp: Timestamp,
        range: Range<usize>,
    ) -> BoxFuture<'_, Result<Vec<f32>, LoadError>>;

    /// Fetch a whole timestep as one buffer (non-progressive).
    fn fetch_timestep(&self, timestamp: Timestamp) -> BoxFuture<'_, Result<Vec<f32>, LoadError>> {
        self.fetch_slice(timestamp, 0..self.points_per_timestep())
    }
}

/// GPU side of the cache. The cache is the only writer of slot contents.
///
/// `INTERPOLATION_SUPPRESSED` passed to `set_interpolation` means "do not
/// draw interpolated data this frame".
pub trait Renderer: Send + Sync {
    /// Write `points` into `slot` starting at `point_offset`.
    fn upload_chunk(&self, slot: SlotIndex, point_offset: usize, points: &[f32]);

    fn upload_to_slot(&self, slot: SlotIndex, points: &[f32]) {
        self.upload_chunk(slot, 0, points);
    }

    fn set_active_slots(&self, slot0: SlotIndex, slot1: SlotIndex);

    fn set_interpolation(&self, lerp: f32);
}

/// Out-of-band interpolation value: skip drawing interpolated data.
pub const INTERPOLATION_SUPPRESSED: f32 = -1.0;
