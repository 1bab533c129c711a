mod archive;
mod gpu;

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use foundation::time::{DataWindow, MILLIS_PER_HOUR, Timestamp};
use runtime::time_source::TimeSource;
use serde::Serialize;
use streaming::{CacheStats, ConfigError, LoadingStrategy, Pipeline, SlotCache, SlotCacheConfig};
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::archive::SyntheticArchive;
use crate::gpu::GpuSlots;

/// Grid size used when no config file is given; O1280 is too large to emulate comfortably.
const DEMO_POINTS: u64 = 65_536;
const DEMO_BUDGET_MB: u64 = 4;
const RUN_INTERVAL_HOURS: i64 = 6;

#[derive(Parser, Debug)]
#[command(author, version, about = "Replays a time scrub against the weather slot cache")]
struct Args {
    /// JSON slot cache config; built-in demo settings otherwise
    #[arg(long)]
    config: Option<PathBuf>,

    /// GPU memory budget for timesteps, in MB
    #[arg(long)]
    budget_mb: Option<u64>,

    /// Grid points per timestep
    #[arg(long)]
    points: Option<u64>,

    /// alternate | future-first | past-first
    #[arg(long)]
    strategy: Option<LoadingStrategy>,

    /// Data window half width, in days
    #[arg(long)]
    half_width_days: Option<u32>,

    /// Slices per progressive load
    #[arg(long)]
    slices: Option<u32>,

    /// Scrub steps forward (then the same number back)
    #[arg(long, default_value_t = 12)]
    steps: u32,

    /// Hours moved per scrub step
    #[arg(long, default_value_t = 1.0)]
    step_hours: f64,

    /// Simulated archive latency per slice [default: 2]
    #[arg(long)]
    latency_ms: Option<u64>,

    /// Pause between scrub steps
    #[arg(long, default_value_t = 20)]
    pause_ms: u64,

    /// Fail every Nth slice fetch (0 = never) [default: 0]
    #[arg(long)]
    fail_every: Option<u64>,
}

#[derive(Serialize)]
struct Summary {
    latest_run: String,
    current: String,
    strategy: LoadingStrategy,
    capacity: usize,
    free_slots: usize,
    resident: Vec<String>,
    loading: Vec<String>,
    active_pair: Option<[String; 2]>,
    interpolation: f32,
    sample: Option<f32>,
    stats: CacheStats,
    archive_fetches: u64,
    archive_failures: u64,
    gpu_uploads: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let latency_ms = args
        .latency_ms
        .or_else(|| env_var_parse("SCRUBBER_LATENCY_MS"))
        .unwrap_or(2);
    let fail_every = args
        .fail_every
        .or_else(|| env_var_parse("SCRUBBER_FAIL_EVERY"))
        .unwrap_or(0);

    let now = Timestamp::now();
    let latest_run = latest_run_before(now);
    let window = DataWindow::around(now, config.data_window_half_width_days);
    let points = config.points_per_timestep as usize;
    info!(
        "latest run {latest_run}, window {} .. {}, {} slots of {points} points ({})",
        window.start,
        window.end,
        config.slot_capacity(),
        config.strategy
    );

    let archive = Arc::new(
        SyntheticArchive::new(latest_run, window, points)
            .with_latency(Duration::from_millis(latency_ms))
            .with_fail_every(fail_every),
    );
    let gpu = Arc::new(GpuSlots::new(config.slot_capacity() as usize, points));
    let pipeline = Pipeline::from_config(&config, archive.clone(), gpu.clone(), now)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let mut clock = TimeSource::new(now);
    clock.subscribe(move |t| {
        if tx.send(t).is_err() {
            debug!("pipeline gone; dropping time {t}");
        }
    });
    let step = Duration::from_secs_f64(args.step_hours.abs() * 3600.0);
    let script = tokio::spawn(scrub(
        clock,
        args.steps,
        step,
        Duration::from_millis(args.pause_ms),
    ));

    let cache = pipeline.run(rx).await;
    script.await?;

    let summary = summarize(&cache, latest_run, &archive, &gpu)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Layers config file (or demo defaults), then `SCRUBBER_*` env vars, then flags.
fn load_config(args: &Args) -> Result<SlotCacheConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => SlotCacheConfig::from_file(path)?,
        None => SlotCacheConfig {
            gpu_budget_mb: DEMO_BUDGET_MB,
            points_per_timestep: DEMO_POINTS,
            ..SlotCacheConfig::default()
        },
    };

    if let Some(v) = args.budget_mb.or_else(|| env_var_parse("SCRUBBER_BUDGET_MB")) {
        config.gpu_budget_mb = v;
    }
    if let Some(v) = args.points.or_else(|| env_var_parse("SCRUBBER_POINTS")) {
        config.points_per_timestep = v;
    }
    if let Some(v) = args.strategy.or_else(|| env_var_parse("SCRUBBER_STRATEGY")) {
        config.strategy = v;
    }
    if let Some(v) = args
        .half_width_days
        .or_else(|| env_var_parse("SCRUBBER_HALF_WIDTH_DAYS"))
    {
        config.data_window_half_width_days = v;
    }
    if let Some(v) = args.slices.or_else(|| env_var_parse("SCRUBBER_SLICES")) {
        config.slices_per_load = v;
    }

    config.validate()?;
    Ok(config)
}

fn env_var_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Model runs start every six hours on the hour (00/06/12/18 UTC).
fn latest_run_before(now: Timestamp) -> Timestamp {
    let interval = RUN_INTERVAL_HOURS * MILLIS_PER_HOUR;
    Timestamp(now.millis() - now.millis().rem_euclid(interval))
}

/// Moves the clock forward `steps` times, then back to where it started.
async fn scrub(mut clock: TimeSource, steps: u32, step: Duration, pause: Duration) {
    let step_ms = step.as_millis() as i64;
    for direction in [1, -1] {
        for _ in 0..steps {
            let next = clock.get().plus_millis(direction * step_ms);
            clock.set(next);
            tokio::time::sleep(pause).await;
        }
    }
    info!("scrub finished at {}", clock.get());
}

fn summarize(
    cache: &SlotCache,
    latest_run: Timestamp,
    archive: &SyntheticArchive,
    gpu: &GpuSlots,
) -> Result<Summary, foundation::time::TimeError> {
    let keys = |ts: Vec<Timestamp>| -> Result<Vec<String>, foundation::time::TimeError> {
        ts.into_iter().map(Timestamp::timestep_key).collect()
    };
    let loading = cache
        .slots()
        .filter(|s| !s.loaded)
        .map(|s| s.timestamp)
        .collect();
    let active_pair = match cache.active_pair() {
        Some(pair) => Some([pair.t0.timestep_key()?, pair.t1.timestep_key()?]),
        None => None,
    };

    Ok(Summary {
        latest_run: latest_run.timestep_key()?,
        current: cache.current_time().to_string(),
        strategy: cache.strategy(),
        capacity: cache.capacity(),
        free_slots: cache.free_slots(),
        resident: keys(cache.loaded_timestamps())?,
        loading: keys(loading)?,
        active_pair,
        interpolation: cache.interpolation(),
        sample: gpu.sample(0),
        stats: cache.stats(),
        archive_fetches: archive.fetches(),
        archive_failures: archive.failures(),
        gpu_uploads: gpu.uploads(),
    })
}
