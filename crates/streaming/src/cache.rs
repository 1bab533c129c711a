use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use foundation::time::{DataWindow, Timestamp};
use runtime::event_queue::EventQueue;
use tracing::{debug, error, info, warn};

use crate::allocator::{SlotAllocator, SlotIndex};
use crate::config::{ConfigError, LoadingStrategy, SlotCacheConfig};
use crate::loader::LoadProgress;
use crate::planner::LoadWindowPlanner;
use crate::request::{LoadId, LoadTarget, LoadTicket};
use crate::residency::TimestepSlot;
use crate::resolver::{TimestepPair, TimestepResolver};
use crate::source::{INTERPOLATION_SUPPRESSED, LoadError, Renderer};
use crate::stats::CacheStats;

/// Work items drained by the cache's trampoline.
#[derive(Debug, Clone, PartialEq)]
enum CacheEvent {
    LoadFinished {
        id: LoadId,
        error: Option<LoadError>,
    },
    TimeChanged(Timestamp),
    StrategyChanged(LoadingStrategy),
    WindowChanged(DataWindow),
    LatestRunChanged(Timestamp),
    Reconcile,
}

impl CacheEvent {
    fn priority(&self) -> i32 {
        match self {
            CacheEvent::LoadFinished { .. } => 0,
            CacheEvent::Reconcile => 2,
            _ => 1,
        }
    }
}

/// A broken cache invariant. These indicate programming errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("{timestamp} is resident outside the data window")]
    OutsideWindow { timestamp: Timestamp },
    #[error("{resident} resident timesteps exceed capacity {capacity}")]
    OverCapacity { resident: usize, capacity: usize },
    #[error("free ({free}) + resident ({resident}) != capacity ({capacity})")]
    SlotLeak {
        free: usize,
        resident: usize,
        capacity: usize,
    },
    #[error("{slot} is held by both {first} and {second}")]
    SharedSlot {
        slot: SlotIndex,
        first: Timestamp,
        second: Timestamp,
    },
    #[error("{slot} is resident for {timestamp} but also in the free pool")]
    FreedWhileResident { slot: SlotIndex, timestamp: Timestamp },
    #[error("{timestamp} is loading without an in-flight load")]
    OrphanedLoad { timestamp: Timestamp },
    #[error("active pair member {timestamp} is not resident and loaded")]
    ActivePairNotLoaded { timestamp: Timestamp },
}

/// Time-indexed GPU slot cache.
///
/// Keeps a sliding window of weather timesteps resident in a fixed pool of
/// GPU slots while the current time moves freely. Every time change runs a
/// reconciliation pass:
///
/// 1. plan the ideal window around the current time;
/// 2. evict resident timestamps that fell out of it (even one still loading);
/// 3. if nothing is in flight and a slot is free, start loading the first
///    missing planned timestamp (the adjacent pair always leads the plan);
/// 4. recompute the active interpolation pair and push it to the renderer.
///
/// The cache never awaits. Started loads are handed to a driver through
/// `take_ready_load`, which reports back via `record_progress` and
/// `finish_load`. At most one load is in flight at a time.
///
/// Follow-up passes go through an internal event queue rather than recursion.
pub struct SlotCache {
    resolver: TimestepResolver,
    planner: LoadWindowPlanner,
    allocator: SlotAllocator,
    strategy: LoadingStrategy,
    renderer: Arc<dyn Renderer>,
    slots: BTreeMap<Timestamp, TimestepSlot>,
    current: Timestamp,
    initialized: bool,
    in_flight: Option<LoadTicket>,
    ready: Option<LoadTicket>,
    next_load_id: u64,
    // Failed timestamps wait here until the next time change.
    parked: BTreeSet<Timestamp>,
    active: Option<TimestepPair>,
    lerp: f32,
    sent_slots: Option<(SlotIndex, SlotIndex)>,
    sent_lerp: Option<f32>,
    events: EventQueue<CacheEvent>,
    stats: CacheStats,
}

impl std::fmt::Debug for SlotCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotCache")
            .field("current", &self.current)
            .field("strategy", &self.strategy)
            .field("capacity", &self.allocator.capacity())
            .field("slots", &self.slots)
            .field("in_flight", &self.in_flight)
            .field("active", &self.active)
            .field("lerp", &self.lerp)
            .finish()
    }
}

impl SlotCache {
    pub fn new(
        config: &SlotCacheConfig,
        resolver: TimestepResolver,
        current: Timestamp,
        renderer: Arc<dyn Renderer>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let capacity = config.slot_capacity() as usize;
        Ok(Self::with_capacity(
            capacity,
            config.strategy,
            resolver,
            current,
            renderer,
        ))
    }

    pub fn with_capacity(
        capacity: usize,
        strategy: LoadingStrategy,
        resolver: TimestepResolver,
        current: Timestamp,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            resolver,
            planner: LoadWindowPlanner::new(),
            allocator: SlotAllocator::with_capacity(capacity),
            strategy,
            renderer,
            slots: BTreeMap::new(),
            current,
            initialized: false,
            in_flight: None,
            ready: None,
            next_load_id: 1,
            parked: BTreeSet::new(),
            active: None,
            lerp: INTERPOLATION_SUPPRESSED,
            sent_slots: None,
            sent_lerp: None,
            events: EventQueue::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn resolver(&self) -> &TimestepResolver {
        &self.resolver
    }

    pub fn capacity(&self) -> usize {
        self.allocator.capacity()
    }

    pub fn free_slots(&self) -> usize {
        self.allocator.free_count()
    }

    pub fn current_time(&self) -> Timestamp {
        self.current
    }

    pub fn strategy(&self) -> LoadingStrategy {
        self.strategy
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn in_flight(&self) -> Option<&LoadTicket> {
        self.in_flight.as_ref()
    }

    pub fn slot(&self, timestamp: Timestamp) -> Option<&TimestepSlot> {
        self.slots.get(&timestamp)
    }

    pub fn slots(&self) -> impl Iterator<Item = &TimestepSlot> {
        self.slots.values()
    }

    /// Every timestamp in the residency table (loading or loaded), ascending.
    pub fn resident_timestamps(&self) -> Vec<Timestamp> {
        self.slots.keys().copied().collect()
    }

    pub fn loaded_timestamps(&self) -> Vec<Timestamp> {
        self.slots
            .values()
            .filter(|s| s.loaded)
            .map(|s| s.timestamp)
            .collect()
    }

    pub fn is_loaded(&self, timestamp: Timestamp) -> bool {
        self.slots.get(&timestamp).is_some_and(|s| s.loaded)
    }

    /// The loaded pair bracketing the current time, if any.
    pub fn active_pair(&self) -> Option<TimestepPair> {
        self.active
    }

    pub fn active_slots(&self) -> Option<(SlotIndex, SlotIndex)> {
        let pair = self.active?;
        Some((self.slots.get(&pair.t0)?.slot, self.slots.get(&pair.t1)?.slot))
    }

    /// Current interpolation factor, or `INTERPOLATION_SUPPRESSED`.
    pub fn interpolation(&self) -> f32 {
        self.lerp
    }

    /// The ideal window for the current time and strategy.
    pub fn planned_window(&self) -> Vec<Timestamp> {
        self.planner.plan_window(
            &self.resolver,
            self.current,
            self.strategy,
            self.allocator.capacity(),
        )
    }

    pub fn set_current_time(&mut self, t: Timestamp) {
        self.dispatch(CacheEvent::TimeChanged(t));
    }

    pub fn set_strategy(&mut self, strategy: LoadingStrategy) {
        self.dispatch(CacheEvent::StrategyChanged(strategy));
    }

    /// Replaces the data window; resident timesteps outside it are evicted.
    pub fn set_data_window(&mut self, window: DataWindow) {
        self.dispatch(CacheEvent::WindowChanged(window));
    }

    /// Follows a newer model run; the timestep grid shifts with it.
    pub fn set_latest_run(&mut self, latest_run: Timestamp) {
        self.dispatch(CacheEvent::LatestRunChanged(latest_run));
    }

    /// Runs a reconciliation pass without any input change.
    pub fn reconcile(&mut self) {
        self.dispatch(CacheEvent::Reconcile);
    }

    /// Takes the load the cache has started, for the driver to execute.
    pub fn take_ready_load(&mut self) -> Option<LoadTicket> {
        self.ready.take()
    }

    /// Starts the initial combined load of the adjacent pair.
    ///
    /// The renderer is pointed at the two slots right away so data shows up
    /// as it streams in; the confirmed active pair stays empty until both
    /// loads finish. Returns `false` (and activates reactive reconciliation
    /// directly) when there is nothing to bootstrap.
    pub fn begin_bootstrap(&mut self) -> bool {
        if self.initialized || self.in_flight.is_some() {
            return false;
        }

        let pair = self
            .resolver
            .adjacent_pair(self.current)
            .filter(|_| self.allocator.free_count() >= 2);
        let Some(pair) = pair else {
            info!("no initial pair to bootstrap at {}", self.current);
            self.initialized = true;
            self.dispatch(CacheEvent::Reconcile);
            return false;
        };

        let mut targets = Vec::with_capacity(2);
        for timestamp in [pair.t0, pair.t1] {
            match self.allocator.acquire() {
                Ok(slot) => {
                    self.slots
                        .insert(timestamp, TimestepSlot::loading(timestamp, slot));
                    targets.push(LoadTarget { timestamp, slot });
                }
                Err(err) => {
                    warn!("bootstrap allocation failed for {timestamp}: {err}");
                }
            }
        }

        if let [first, second] = targets.as_slice() {
            self.renderer.set_active_slots(first.slot, second.slot);
            self.sent_slots = Some((first.slot, second.slot));
            let preview = pair.lerp(self.current).unwrap_or(INTERPOLATION_SUPPRESSED);
            self.renderer.set_interpolation(preview);
            self.sent_lerp = Some(preview);
        }

        info!("bootstrapping {} and {}", pair.t0, pair.t1);
        self.stats.loads_started += targets.len() as u64;
        let ticket = LoadTicket {
            id: self.next_load_id(),
            targets,
        };
        self.in_flight = Some(ticket.clone());
        self.ready = Some(ticket);
        true
    }

    /// Records partial progress of the in-flight load.
    pub fn record_progress(&mut self, id: LoadId, progress: LoadProgress) {
        let target = self
            .in_flight
            .as_ref()
            .filter(|t| t.id == id)
            .and_then(|t| t.targets.iter().find(|t| t.timestamp == progress.timestamp))
            .copied();
        let entry = target.and_then(|target| {
            self.slots
                .get_mut(&target.timestamp)
                .filter(|s| s.slot == target.slot && !s.loaded)
        });
        match entry {
            Some(entry) => entry.loaded_points = progress.points_so_far,
            None => {
                self.stats.stale_progress += 1;
                debug!(
                    "dropping progress for {} ({}/{} points): load {id:?} no longer tracked",
                    progress.timestamp, progress.points_so_far, progress.total_points
                );
            }
        }
    }

    /// Reports the outcome of the load identified by `id`.
    pub fn finish_load(&mut self, id: LoadId, result: Result<(), LoadError>) {
        self.dispatch(CacheEvent::LoadFinished {
            id,
            error: result.err(),
        });
    }

    /// Checks every structural invariant; returns all violations found.
    ///
    /// Duplicate timestamps are impossible by construction (the table is a
    /// map keyed by timestamp).
    pub fn check_invariants(&self) -> Vec<InvariantViolation> {
        let mut out = Vec::new();
        let window = self.resolver.window();
        let capacity = self.allocator.capacity();
        let mut owners: BTreeMap<SlotIndex, Timestamp> = BTreeMap::new();

        for (timestamp, entry) in &self.slots {
            let timestamp = *timestamp;
            if !window.contains(timestamp) {
                out.push(InvariantViolation::OutsideWindow { timestamp });
            }
            if let Some(first) = owners.insert(entry.slot, timestamp) {
                out.push(InvariantViolation::SharedSlot {
                    slot: entry.slot,
                    first,
                    second: timestamp,
                });
            }
            if self.allocator.is_free(entry.slot) {
                out.push(InvariantViolation::FreedWhileResident {
                    slot: entry.slot,
                    timestamp,
                });
            }
            let in_flight = self.in_flight.as_ref().is_some_and(|t| t.covers(timestamp));
            if !entry.loaded && !in_flight {
                out.push(InvariantViolation::OrphanedLoad { timestamp });
            }
        }

        if self.slots.len() > capacity {
            out.push(InvariantViolation::OverCapacity {
                resident: self.slots.len(),
                capacity,
            });
        }
        if self.allocator.free_count() + self.slots.len() != capacity {
            out.push(InvariantViolation::SlotLeak {
                free: self.allocator.free_count(),
                resident: self.slots.len(),
                capacity,
            });
        }
        if let Some(pair) = self.active {
            for timestamp in [pair.t0, pair.t1] {
                if !self.is_loaded(timestamp) {
                    out.push(InvariantViolation::ActivePairNotLoaded { timestamp });
                }
            }
        }
        out
    }

    fn next_load_id(&mut self) -> LoadId {
        let id = LoadId(self.next_load_id);
        self.next_load_id += 1;
        id
    }

    fn enqueue(&mut self, event: CacheEvent) {
        let priority = event.priority();
        if event == CacheEvent::Reconcile {
            self.events.push_if_absent(priority, event);
        } else {
            self.events.push(priority, event);
        }
    }

    fn dispatch(&mut self, event: CacheEvent) {
        self.enqueue(event);
        while let Some((_, event)) = self.events.pop_next() {
            self.handle(event);
        }
    }

    fn handle(&mut self, event: CacheEvent) {
        match event {
            CacheEvent::TimeChanged(t) => {
                self.current = t;
                if !self.parked.is_empty() {
                    debug!("re-arming {} failed timestep(s)", self.parked.len());
                    self.parked.clear();
                }
                self.enqueue(CacheEvent::Reconcile);
            }
            CacheEvent::StrategyChanged(strategy) => {
                debug!("loading strategy {} -> {strategy}", self.strategy);
                self.strategy = strategy;
                self.enqueue(CacheEvent::Reconcile);
            }
            CacheEvent::WindowChanged(window) => {
                info!("data window now {} .. {}", window.start, window.end);
                self.resolver.set_window(window);
                self.enqueue(CacheEvent::Reconcile);
            }
            CacheEvent::LatestRunChanged(run) => {
                info!("latest run now {run}");
                self.resolver.set_latest_run(run);
                self.enqueue(CacheEvent::Reconcile);
            }
            CacheEvent::LoadFinished { id, error } => {
                self.apply_completion(id, error);
                self.enqueue(CacheEvent::Reconcile);
            }
            CacheEvent::Reconcile => {
                if self.initialized {
                    self.reconcile_pass();
                }
            }
        }
    }

    fn apply_completion(&mut self, id: LoadId, error: Option<LoadError>) {
        let ticket = match self.in_flight.take() {
            Some(ticket) if ticket.id == id => ticket,
            other => {
                warn!("ignoring completion of unknown load {id:?}");
                self.in_flight = other;
                return;
            }
        };
        if self.ready.as_ref().is_some_and(|r| r.id == id) {
            self.ready = None;
        }
        let bootstrap = !self.initialized;

        for target in &ticket.targets {
            let timestamp = target.timestamp;
            let live = self
                .slots
                .get(&timestamp)
                .is_some_and(|s| s.slot == target.slot && !s.loaded);
            if !live {
                self.stats.discarded_completions += 1;
                debug!(
                    "discarding finished load of {timestamp} into {}: evicted while in flight",
                    target.slot
                );
                continue;
            }

            match &error {
                None => {
                    if let Some(entry) = self.slots.get_mut(&timestamp) {
                        entry.loaded = true;
                        self.stats.loads_completed += 1;
                        self.stats.points_loaded += entry.loaded_points as u64;
                        debug!("{timestamp} resident in {}", entry.slot);
                    }
                }
                Some(err) => {
                    self.stats.loads_failed += 1;
                    self.drop_entry(timestamp);
                    if bootstrap {
                        warn!("bootstrap load of {timestamp} failed: {err}");
                    } else {
                        warn!("load of {timestamp} failed: {err}; retrying after the next time change");
                        self.parked.insert(timestamp);
                    }
                }
            }
        }

        if bootstrap {
            info!("slot cache initialized at {}", self.current);
            self.initialized = true;
        }
    }

    fn reconcile_pass(&mut self) {
        self.stats.reconcile_passes += 1;

        let plan = self.planned_window();
        let ideal: BTreeSet<Timestamp> = plan.iter().copied().collect();

        let to_evict: Vec<Timestamp> = self
            .slots
            .keys()
            .filter(|t| !ideal.contains(t))
            .copied()
            .collect();
        for timestamp in to_evict {
            self.evict(timestamp);
        }

        if self.in_flight.is_none() && self.allocator.has_free() {
            let next = plan
                .iter()
                .copied()
                .find(|t| !self.slots.contains_key(t) && !self.parked.contains(t));
            if let Some(timestamp) = next {
                self.start_load(timestamp);
            }
        }

        self.recompute_active_pair();
        self.verify();
    }

    fn start_load(&mut self, timestamp: Timestamp) {
        let slot = match self.allocator.acquire() {
            Ok(slot) => slot,
            Err(err) => {
                debug!("deferring load of {timestamp}: {err}");
                return;
            }
        };
        self.slots
            .insert(timestamp, TimestepSlot::loading(timestamp, slot));
        let ticket = LoadTicket {
            id: self.next_load_id(),
            targets: vec![LoadTarget { timestamp, slot }],
        };
        debug!("loading {timestamp} into {slot} ({:?})", ticket.id);
        self.stats.loads_started += 1;
        self.in_flight = Some(ticket.clone());
        self.ready = Some(ticket);
    }

    fn evict(&mut self, timestamp: Timestamp) {
        let in_flight = self.in_flight.as_ref().is_some_and(|t| t.covers(timestamp));
        if let Some(entry) = self.drop_entry(timestamp) {
            self.stats.evictions += 1;
            if in_flight {
                debug!(
                    "evicted {timestamp} from {} while loading; its completion will be discarded",
                    entry.slot
                );
            } else {
                debug!("evicted {timestamp} from {}", entry.slot);
            }
        }
    }

    fn drop_entry(&mut self, timestamp: Timestamp) -> Option<TimestepSlot> {
        let entry = self.slots.remove(&timestamp)?;
        if let Err(err) = self.allocator.release(entry.slot) {
            error!("releasing {} for {timestamp}: {err}", entry.slot);
            self.stats.invariant_violations += 1;
        }
        Some(entry)
    }

    /// Decides the active pair and interpolation factor; the only place
    /// either changes after bootstrap.
    fn recompute_active_pair(&mut self) {
        let bracket = self.resolver.adjacent_pair(self.current);
        let loaded_slot = |t: Timestamp| self.slots.get(&t).filter(|s| s.loaded).map(|s| s.slot);
        let next = bracket.and_then(|pair| Some((pair, loaded_slot(pair.t0)?, loaded_slot(pair.t1)?)));

        match next {
            Some((pair, slot0, slot1)) => {
                if self.active != Some(pair) {
                    debug!("active pair {} / {}", pair.t0, pair.t1);
                }
                self.active = Some(pair);
                if self.sent_slots != Some((slot0, slot1)) {
                    self.renderer.set_active_slots(slot0, slot1);
                    self.sent_slots = Some((slot0, slot1));
                }
                self.lerp = pair.lerp(self.current).unwrap_or(INTERPOLATION_SUPPRESSED);
            }
            None => {
                if let Some(old) = self.active.take() {
                    debug!("active pair {} / {} no longer renderable", old.t0, old.t1);
                }
                self.lerp = INTERPOLATION_SUPPRESSED;
            }
        }

        if self.sent_lerp != Some(self.lerp) {
            self.renderer.set_interpolation(self.lerp);
            self.sent_lerp = Some(self.lerp);
        }
    }

    fn verify(&mut self) {
        let violations = self.check_invariants();
        if violations.is_empty() {
            return;
        }
        for v in &violations {
            error!("slot cache invariant violated: {v}");
        }
        self.stats.invariant_violations += violations.len() as u64;
        debug_assert!(
            violations.is_empty(),
            "slot cache invariants violated: {violations:?}"
        );
        self.repair();
    }

    /// Release-build recovery: suppress rendering, drop every entry that
    /// cannot be trusted, rebuild the free pool from what is left, and plan
    /// again from scratch.
    fn repair(&mut self) {
        self.active = None;
        self.lerp = INTERPOLATION_SUPPRESSED;
        self.renderer.set_interpolation(INTERPOLATION_SUPPRESSED);
        self.sent_lerp = Some(INTERPOLATION_SUPPRESSED);

        let window = self.resolver.window();
        let capacity = self.allocator.capacity();
        let in_flight = self.in_flight.clone();
        let mut owned = BTreeSet::new();
        self.slots.retain(|t, s| {
            let tracked = s.loaded || in_flight.as_ref().is_some_and(|f| f.covers(*t));
            window.contains(*t)
                && tracked
                && (s.slot.0 as usize) < capacity
                && owned.insert(s.slot)
        });
        self.allocator =
            SlotAllocator::with_acquired(capacity, self.slots.values().map(|s| s.slot));
        warn!(
            "slot cache repaired: {} entries kept, {} slots free",
            self.slots.len(),
            self.allocator.free_count()
        );
        self.enqueue(CacheEvent::Reconcile);
    }
}
