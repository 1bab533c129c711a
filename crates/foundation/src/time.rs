//! Time primitives shared by the streaming engine.
//!
//! Timestamps are UTC epoch milliseconds. Weather archives are keyed on whole
//! hours, so most helpers here work in hour units.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};

pub const MILLIS_PER_HOUR: i64 = 3_600_000;
pub const HOURS_PER_DAY: i64 = 24;

/// Archive file key layout, e.g. `2025-12-13T0600`.
const TIMESTEP_KEY_FORMAT: &str = "%Y-%m-%dT%H%M";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeError {
    #[error("timestamp out of representable range: {millis}ms")]
    OutOfRange { millis: i64 },
    #[error("invalid timestep key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },
    #[error("invalid RFC 3339 time {input:?}: {reason}")]
    InvalidRfc3339 { input: String, reason: String },
}

/// Milliseconds since the Unix epoch (UTC).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub fn from_hours(hours: i64) -> Self {
        Self(hours * MILLIS_PER_HOUR)
    }

    pub fn millis(self) -> i64 {
        self.0
    }

    pub fn plus_hours(self, hours: i64) -> Self {
        Self(self.0 + hours * MILLIS_PER_HOUR)
    }

    pub fn plus_millis(self, millis: i64) -> Self {
        Self(self.0 + millis)
    }

    /// Signed offset from `reference` in (fractional) hours.
    pub fn offset_hours_from(self, reference: Timestamp) -> f64 {
        (self.0 - reference.0) as f64 / MILLIS_PER_HOUR as f64
    }

    pub fn is_hour_aligned(self) -> bool {
        self.0.rem_euclid(MILLIS_PER_HOUR) == 0
    }

    pub fn floor_to_hour(self) -> Self {
        Self(self.0.div_euclid(MILLIS_PER_HOUR) * MILLIS_PER_HOUR)
    }

    pub fn ceil_to_hour(self) -> Self {
        Self(-(-self.0).div_euclid(MILLIS_PER_HOUR) * MILLIS_PER_HOUR)
    }

    pub fn to_datetime(self) -> Result<DateTime<Utc>, TimeError> {
        DateTime::<Utc>::from_timestamp_millis(self.0)
            .ok_or(TimeError::OutOfRange { millis: self.0 })
    }

    /// Archive key for this timestep (`YYYY-MM-DDTHHMM`).
    pub fn timestep_key(self) -> Result<String, TimeError> {
        Ok(self.to_datetime()?.format(TIMESTEP_KEY_FORMAT).to_string())
    }

    pub fn parse_timestep_key(key: &str) -> Result<Self, TimeError> {
        let naive = NaiveDateTime::parse_from_str(key, TIMESTEP_KEY_FORMAT).map_err(|e| {
            TimeError::InvalidKey {
                key: key.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self(naive.and_utc().timestamp_millis()))
    }

    pub fn parse_rfc3339(input: &str) -> Result<Self, TimeError> {
        let dt = DateTime::parse_from_rfc3339(input).map_err(|e| TimeError::InvalidRfc3339 {
            input: input.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self(dt.timestamp_millis()))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Ok(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%MZ")),
            Err(_) => write!(f, "{}ms", self.0),
        }
    }
}

/// The fixed range of timestamps the engine will ever consider loadable.
///
/// Both ends are inclusive. Computed once at startup from "now" and a
/// configured half width.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DataWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl DataWindow {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Window of `half_width_days` either side of `now` (floored to the hour).
    pub fn around(now: Timestamp, half_width_days: u32) -> Self {
        let center = now.floor_to_hour();
        let half = i64::from(half_width_days) * HOURS_PER_DAY;
        Self {
            start: center.plus_hours(-half),
            end: center.plus_hours(half),
        }
    }

    pub fn contains(&self, t: Timestamp) -> bool {
        self.start <= t && t <= self.end
    }

    pub fn clamp(&self, t: Timestamp) -> Timestamp {
        t.clamp(self.start, self.end)
    }

    pub fn duration_hours(&self) -> f64 {
        self.end.offset_hours_from(self.start).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{DataWindow, Timestamp, MILLIS_PER_HOUR};

    #[test]
    fn hour_rounding_handles_negative_offsets() {
        let t = Timestamp(-1);
        assert_eq!(t.floor_to_hour(), Timestamp(-MILLIS_PER_HOUR));
        assert_eq!(t.ceil_to_hour(), Timestamp(0));

        let aligned = Timestamp::from_hours(5);
        assert_eq!(aligned.floor_to_hour(), aligned);
        assert_eq!(aligned.ceil_to_hour(), aligned);
        assert!(aligned.is_hour_aligned());
        assert!(!aligned.plus_millis(1).is_hour_aligned());
    }

    #[test]
    fn timestep_key_matches_archive_layout() {
        let t = Timestamp::parse_rfc3339("2025-12-13T06:00:00Z").unwrap();
        assert_eq!(t.timestep_key().unwrap(), "2025-12-13T0600");
        assert_eq!(Timestamp::parse_timestep_key("2025-12-13T0600").unwrap(), t);
        assert!(Timestamp::parse_timestep_key("2025-12-13").is_err());
    }

    #[test]
    fn display_is_iso_utc() {
        let t = Timestamp::parse_rfc3339("2024-03-01T18:30:00+02:00").unwrap();
        assert_eq!(t.to_string(), "2024-03-01T16:30Z");
    }

    #[test]
    fn window_around_now_is_symmetric_and_inclusive() {
        let now = Timestamp::from_hours(1000).plus_millis(1234);
        let w = DataWindow::around(now, 5);
        assert_eq!(w.start, Timestamp::from_hours(1000 - 120));
        assert_eq!(w.end, Timestamp::from_hours(1000 + 120));
        assert!(w.contains(w.start));
        assert!(w.contains(w.end));
        assert!(!w.contains(w.end.plus_millis(1)));
        assert_eq!(w.duration_hours(), 240.0);
        assert_eq!(w.clamp(Timestamp::from_hours(0)), w.start);
    }
}
