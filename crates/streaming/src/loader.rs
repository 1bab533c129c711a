use std::ops::Range;

use foundation::time::Timestamp;
use tracing::debug;

use crate::request::LoadTarget;
use crate::source::{ArchiveSource, LoadError, Renderer};

/// Progress report emitted after every uploaded slice.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LoadProgress {
    pub timestamp: Timestamp,
    pub points_so_far: usize,
    pub total_points: usize,
    pub slice_index: usize,
    pub total_slices: usize,
    pub done: bool,
}

/// Fetches one timestep in sequential slices and uploads each slice to its
/// slot as soon as it arrives, so the renderer can show data filling in.
///
/// The loader keeps no state between calls. Callers must not start a second
/// load while one is unresolved: the archive decoder's peak memory is bounded
/// by that rule, and the slot cache enforces it.
#[derive(Debug, Clone, Copy)]
pub struct StreamingLoader {
    slices: usize,
}

impl StreamingLoader {
    pub fn new(slices_per_load: u32) -> Self {
        Self {
            slices: (slices_per_load as usize).max(1),
        }
    }

    pub fn slices_per_load(&self) -> usize {
        self.slices
    }

    fn slice_count(&self, total_points: usize) -> usize {
        self.slices.min(total_points.max(1))
    }

    /// Contiguous point range of slice `index` out of `total_slices`.
    pub fn slice_range(total_points: usize, total_slices: usize, index: usize) -> Range<usize> {
        let start = total_points * index / total_slices;
        let end = total_points * (index + 1) / total_slices;
        start..end
    }

    pub async fn load<F>(
        &self,
        source: &dyn ArchiveSource,
        renderer: &dyn Renderer,
        target: LoadTarget,
        on_progress: F,
    ) -> Result<(), LoadError>
    where
        F: FnMut(LoadProgress) + Send,
    {
        self.load_targets(source, renderer, &[target], on_progress)
            .await
    }

    /// Combined fetch of the initial pair, slices interleaved so both
    /// timesteps fill in together.
    pub async fn load_pair<F>(
        &self,
        source: &dyn ArchiveSource,
        renderer: &dyn Renderer,
        targets: [LoadTarget; 2],
        on_progress: F,
    ) -> Result<(), LoadError>
    where
        F: FnMut(LoadProgress) + Send,
    {
        self.load_targets(source, renderer, &targets, on_progress)
            .await
    }

    /// Loads every target slice by slice; the first failing slice aborts the
    /// whole operation.
    pub async fn load_targets<F>(
        &self,
        source: &dyn ArchiveSource,
        renderer: &dyn Renderer,
        targets: &[LoadTarget],
        mut on_progress: F,
    ) -> Result<(), LoadError>
    where
        F: FnMut(LoadProgress) + Send,
    {
        let total_points = source.points_per_timestep();
        let total_slices = self.slice_count(total_points);

        for slice_index in 0..total_slices {
            let range = Self::slice_range(total_points, total_slices, slice_index);
            for target in targets {
                let points = source.fetch_slice(target.timestamp, range.clone()).await?;
                if points.len() != range.len() {
                    return Err(LoadError::ShortSlice {
                        timestamp: target.timestamp,
                        expected: range.len(),
                        got: points.len(),
                    });
                }
                renderer.upload_chunk(target.slot, range.start, &points);
                on_progress(LoadProgress {
                    timestamp: target.timestamp,
                    points_so_far: range.end,
                    total_points,
                    slice_index,
                    total_slices,
                    done: slice_index + 1 == total_slices,
                });
            }
        }

        for target in targets {
            debug!(
                "loaded {} into {} ({total_points} points, {total_slices} slices)",
                target.timestamp, target.slot
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use foundation::time::Timestamp;
    use pretty_assertions::assert_eq;

    use super::{LoadProgress, StreamingLoader};
    use crate::allocator::SlotIndex;
    use crate::request::LoadTarget;
    use crate::source::LoadError;
    use crate::test_support::{FakeArchive, RecordingRenderer};

    fn target(hours: i64, slot: u32) -> LoadTarget {
        LoadTarget {
            timestamp: Timestamp::from_hours(hours),
            slot: SlotIndex(slot),
        }
    }

    #[test]
    fn slice_ranges_cover_all_points() {
        let ranges: Vec<_> = (0..3)
            .map(|i| StreamingLoader::slice_range(10, 3, i))
            .collect();
        assert_eq!(ranges, vec![0..3, 3..6, 6..10]);
    }

    #[tokio::test]
    async fn reports_progress_after_every_slice() {
        let archive = FakeArchive::new(10);
        let renderer = RecordingRenderer::new(2, 10);
        let loader = StreamingLoader::new(4);

        let mut seen = Vec::new();
        loader
            .load(&archive, &renderer, target(7, 1), |p| seen.push(p))
            .await
            .unwrap();

        let points: Vec<_> = seen.iter().map(|p| p.points_so_far).collect();
        assert_eq!(points, vec![2, 5, 7, 10]);
        assert!(seen.iter().take(3).all(|p| !p.done));
        assert_eq!(
            seen.last().copied(),
            Some(LoadProgress {
                timestamp: Timestamp::from_hours(7),
                points_so_far: 10,
                total_points: 10,
                slice_index: 3,
                total_slices: 4,
                done: true,
            })
        );
        assert_eq!(renderer.slot_contents(SlotIndex(1)), archive.field(Timestamp::from_hours(7)));
    }

    #[tokio::test]
    async fn pair_load_interleaves_slices() {
        let archive = FakeArchive::new(4);
        let renderer = RecordingRenderer::new(2, 4);
        let loader = StreamingLoader::new(2);

        let mut order = Vec::new();
        loader
            .load_pair(&archive, &renderer, [target(1, 0), target(2, 1)], |p| {
                order.push((p.timestamp, p.slice_index))
            })
            .await
            .unwrap();

        let h = Timestamp::from_hours;
        assert_eq!(order, vec![(h(1), 0), (h(2), 0), (h(1), 1), (h(2), 1)]);
        assert_eq!(renderer.slot_contents(SlotIndex(0)), archive.field(h(1)));
        assert_eq!(renderer.slot_contents(SlotIndex(1)), archive.field(h(2)));
    }

    #[tokio::test]
    async fn slice_failure_aborts_load() {
        let archive = Arc::new(FakeArchive::new(8));
        archive.fail_slice(Timestamp::from_hours(3), 1);
        let renderer = RecordingRenderer::new(1, 8);
        let loader = StreamingLoader::new(4);

        let mut seen = 0;
        let err = loader
            .load(archive.as_ref(), &renderer, target(3, 0), |_| seen += 1)
            .await
            .unwrap_err();

        assert!(matches!(err, LoadError::Fetch { slice: 1, .. }));
        assert_eq!(seen, 1);
    }

    #[tokio::test]
    async fn short_slice_is_a_decode_error() {
        let archive = FakeArchive::new(6);
        archive.truncate_slices(Timestamp::from_hours(4));
        let renderer = RecordingRenderer::new(1, 6);
        let loader = StreamingLoader::new(2);

        let err = loader
            .load(&archive, &renderer, target(4, 0), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::ShortSlice { expected: 3, got: 2, .. }));
    }
}
