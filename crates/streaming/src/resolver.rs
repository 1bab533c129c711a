use foundation::time::{DataWindow, MILLIS_PER_HOUR, Timestamp};

/// Last forecast hour (inclusive) published at hourly resolution.
pub const HOURLY_UNTIL_HOURS: i64 = 90;
/// Last forecast hour (inclusive) published at 3-hourly resolution; 6-hourly after.
pub const THREE_HOURLY_UNTIL_HOURS: i64 = 144;

/// The two valid timesteps bracketing a query time, `t0 < t1`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TimestepPair {
    pub t0: Timestamp,
    pub t1: Timestamp,
}

impl TimestepPair {
    pub fn contains(&self, t: Timestamp) -> bool {
        self.t0 == t || self.t1 == t
    }

    /// Interpolation factor of `t` between `t0` and `t1`.
    ///
    /// Returns `None` when `t` lies outside `[t0, t1]`; callers must not
    /// extrapolate.
    pub fn lerp(&self, t: Timestamp) -> Option<f32> {
        if t < self.t0 || t > self.t1 || self.t1 <= self.t0 {
            return None;
        }
        let span = (self.t1.0 - self.t0.0) as f64;
        Some(((t.0 - self.t0.0) as f64 / span) as f32)
    }
}

/// Maps arbitrary times onto the archive's non-uniform timestep grid.
///
/// Resolution depends on the offset from the latest model run: hourly up to
/// +90h, 3-hourly up to +144h, 6-hourly beyond. Offsets before the latest run
/// are hourly. Tier boundaries sit on both grids (90 and 144 are multiples of
/// 3 and 6), so stepping across a boundary always lands on a valid timestep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestepResolver {
    latest_run: Timestamp,
    window: DataWindow,
}

fn tier_hours(offset_hours: i64) -> i64 {
    if offset_hours <= HOURLY_UNTIL_HOURS {
        1
    } else if offset_hours <= THREE_HOURLY_UNTIL_HOURS {
        3
    } else {
        6
    }
}

fn is_valid_offset(offset_hours: i64) -> bool {
    offset_hours.rem_euclid(tier_hours(offset_hours)) == 0
}

impl TimestepResolver {
    pub fn new(latest_run: Timestamp, window: DataWindow) -> Self {
        Self { latest_run, window }
    }

    pub fn latest_run(&self) -> Timestamp {
        self.latest_run
    }

    pub fn window(&self) -> DataWindow {
        self.window
    }

    pub fn set_latest_run(&mut self, latest_run: Timestamp) {
        self.latest_run = latest_run;
    }

    pub fn set_window(&mut self, window: DataWindow) {
        self.window = window;
    }

    /// Resolution tier (hours) applicable at `t`.
    pub fn resolution(&self, t: Timestamp) -> i64 {
        let offset = t.0 - self.latest_run.0;
        if offset <= HOURLY_UNTIL_HOURS * MILLIS_PER_HOUR {
            1
        } else if offset <= THREE_HOURLY_UNTIL_HOURS * MILLIS_PER_HOUR {
            3
        } else {
            6
        }
    }

    /// Whether `t` sits on the timestep grid (ignores the data window).
    pub fn is_valid(&self, t: Timestamp) -> bool {
        let offset = t.0 - self.latest_run.0;
        offset.rem_euclid(MILLIS_PER_HOUR) == 0 && is_valid_offset(offset / MILLIS_PER_HOUR)
    }

    fn at_offset(&self, offset_hours: i64) -> Timestamp {
        self.latest_run.plus_hours(offset_hours)
    }

    fn valid_after(&self, t: Timestamp) -> Timestamp {
        let mut h = (t.0 - self.latest_run.0).div_euclid(MILLIS_PER_HOUR) + 1;
        while !is_valid_offset(h) {
            h += 1;
        }
        self.at_offset(h)
    }

    fn valid_before(&self, t: Timestamp) -> Timestamp {
        let offset = t.0 - self.latest_run.0;
        let mut h = -(-offset).div_euclid(MILLIS_PER_HOUR) - 1;
        while !is_valid_offset(h) {
            h -= 1;
        }
        self.at_offset(h)
    }

    fn valid_at_or_after(&self, t: Timestamp) -> Timestamp {
        if self.is_valid(t) {
            t
        } else {
            self.valid_after(t)
        }
    }

    fn valid_at_or_before(&self, t: Timestamp) -> Timestamp {
        if self.is_valid(t) {
            t
        } else {
            self.valid_before(t)
        }
    }

    fn in_window(&self, t: Timestamp) -> Option<Timestamp> {
        self.window.contains(t).then_some(t)
    }

    /// Nearest valid timestep strictly before `t`, if it lies in the window.
    pub fn previous(&self, t: Timestamp) -> Option<Timestamp> {
        self.in_window(self.valid_before(t))
    }

    /// Nearest valid timestep strictly after `t`, if it lies in the window.
    pub fn next(&self, t: Timestamp) -> Option<Timestamp> {
        self.in_window(self.valid_after(t))
    }

    pub fn first_in_window(&self) -> Option<Timestamp> {
        self.in_window(self.valid_at_or_after(self.window.start))
    }

    pub fn last_in_window(&self) -> Option<Timestamp> {
        self.in_window(self.valid_at_or_before(self.window.end))
    }

    /// The canonical pair with `t0 < query <= t1`.
    ///
    /// The rule is left-open, right-closed: a query exactly on a valid
    /// timestep `t` yields `(previous(t), t)`. Queries outside the bracketable
    /// part of the window are clamped to the edge pair, so the caller's
    /// interpolation factor falls outside `[0, 1]` and rendering is
    /// suppressed. Returns `None` if the window holds fewer than two
    /// timesteps.
    pub fn adjacent_pair(&self, query: Timestamp) -> Option<TimestepPair> {
        let first = self.first_in_window()?;
        let last = self.last_in_window()?;
        if first >= last {
            return None;
        }
        let second = self.valid_after(first);
        let q = query.clamp(second, last);
        let t1 = self.valid_at_or_after(q);
        let t0 = self.valid_before(t1);
        Some(TimestepPair { t0, t1 })
    }

    /// Every valid timestep in the window, ascending.
    pub fn timesteps_in_window(&self) -> Vec<Timestamp> {
        let mut out = Vec::new();
        let mut cursor = self.first_in_window();
        while let Some(t) = cursor {
            out.push(t);
            cursor = self.next(t);
        }
        out
    }
}
