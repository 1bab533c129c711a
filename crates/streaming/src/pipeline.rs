use std::sync::Arc;

use foundation::time::Timestamp;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cache::SlotCache;
use crate::config::{ConfigError, SlotCacheConfig};
use crate::loader::{LoadProgress, StreamingLoader};
use crate::request::{LoadId, LoadTicket};
use crate::resolver::TimestepResolver;
use crate::source::{ArchiveSource, BoxFuture, LoadError, Renderer};

type Completion = (LoadId, Result<(), LoadError>);

/// Async driver around a `SlotCache`.
///
/// The cache decides; the pipeline executes. It runs the one load the cache
/// has started, forwards slice progress and the final outcome back, and feeds
/// time changes in arrival order. Everything happens on the calling task, so
/// the cache itself never needs a lock.
pub struct Pipeline {
    cache: SlotCache,
    source: Arc<dyn ArchiveSource>,
    renderer: Arc<dyn Renderer>,
    loader: StreamingLoader,
}

impl Pipeline {
    pub fn new(
        cache: SlotCache,
        source: Arc<dyn ArchiveSource>,
        renderer: Arc<dyn Renderer>,
        loader: StreamingLoader,
    ) -> Self {
        Self {
            cache,
            source,
            renderer,
            loader,
        }
    }

    /// Builds the cache from `config`, taking the run and data window from `source`.
    pub fn from_config(
        config: &SlotCacheConfig,
        source: Arc<dyn ArchiveSource>,
        renderer: Arc<dyn Renderer>,
        current: Timestamp,
    ) -> Result<Self, ConfigError> {
        let resolver = TimestepResolver::new(source.latest_run(), source.data_window());
        let cache = SlotCache::new(config, resolver, current, Arc::clone(&renderer))?;
        let loader = StreamingLoader::new(config.slices_per_load);
        Ok(Self::new(cache, source, renderer, loader))
    }

    pub fn cache(&self) -> &SlotCache {
        &self.cache
    }

    /// Drives the cache until `times` closes and no load is left to run,
    /// then hands the cache back.
    pub async fn run(mut self, mut times: mpsc::UnboundedReceiver<Timestamp>) -> SlotCache {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<(LoadId, LoadProgress)>();
        let mut in_flight: Option<BoxFuture<'static, Completion>> = None;
        let mut times_open = true;

        self.cache.begin_bootstrap();

        loop {
            if in_flight.is_none() {
                if let Some(ticket) = self.cache.take_ready_load() {
                    in_flight = Some(self.start(ticket, progress_tx.clone()));
                }
            }
            if !times_open && in_flight.is_none() {
                break;
            }

            tokio::select! {
                biased;

                Some((id, progress)) = progress_rx.recv() => {
                    self.cache.record_progress(id, progress);
                }
                (id, result) = wait_in_flight(&mut in_flight) => {
                    while let Ok((late_id, progress)) = progress_rx.try_recv() {
                        self.cache.record_progress(late_id, progress);
                    }
                    self.cache.finish_load(id, result);
                }
                time = times.recv(), if times_open => match time {
                    Some(t) => self.cache.set_current_time(t),
                    None => {
                        debug!("time channel closed; finishing outstanding loads");
                        times_open = false;
                    }
                },
            }
        }

        info!(
            "pipeline stopped: {} resident, {} free, active {:?}",
            self.cache.resident_timestamps().len(),
            self.cache.free_slots(),
            self.cache.active_pair()
        );
        self.cache
    }

    fn start(
        &self,
        ticket: LoadTicket,
        progress: mpsc::UnboundedSender<(LoadId, LoadProgress)>,
    ) -> BoxFuture<'static, Completion> {
        let source = Arc::clone(&self.source);
        let renderer = Arc::clone(&self.renderer);
        let loader = self.loader;
        Box::pin(async move {
            let id = ticket.id;
            let result = loader
                .load_targets(source.as_ref(), renderer.as_ref(), &ticket.targets, |p| {
                    // The receiver lives as long as the run loop.
                    let _ = progress.send((id, p));
                })
                .await;
            (id, result)
        })
    }
}

async fn wait_in_flight(slot: &mut Option<BoxFuture<'static, Completion>>) -> Completion {
    match slot.as_mut() {
        Some(load) => {
            let out = load.await;
            *slot = None;
            out
        }
        None => std::future::pending().await,
    }
}
