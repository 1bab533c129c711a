use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Points on the O1280 reduced Gaussian grid used by the archive.
pub const O1280_POINTS: u64 = 6_599_680;
/// Fields are decoded to `f32`.
pub const BYTES_PER_POINT: u64 = 4;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Order in which the load window grows around the query time.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadingStrategy {
    /// Keep the window roughly symmetric; ties go to the future.
    #[default]
    Alternate,
    FutureFirst,
    PastFirst,
}

impl LoadingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alternate => "alternate",
            Self::FutureFirst => "future-first",
            Self::PastFirst => "past-first",
        }
    }
}

impl std::fmt::Display for LoadingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadingStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "alternate" => Ok(Self::Alternate),
            "future-first" | "future" => Ok(Self::FutureFirst),
            "past-first" | "past" => Ok(Self::PastFirst),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown loading strategy {0:?} (expected alternate, future-first or past-first)")]
    UnknownStrategy(String),
    #[error("{what} must be non-zero")]
    Zero { what: &'static str },
    #[error(
        "GPU budget of {budget_bytes} bytes holds {capacity} timesteps of {bytes_per_timestep} bytes; at least 2 are required"
    )]
    BudgetTooSmall {
        budget_bytes: u64,
        bytes_per_timestep: u64,
        capacity: u64,
    },
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Construction-time configuration for a slot cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotCacheConfig {
    /// GPU memory set aside for weather timesteps.
    pub gpu_budget_mb: u64,
    /// Grid points per timestep; bytes per timestep derive from this.
    pub points_per_timestep: u64,
    pub strategy: LoadingStrategy,
    /// Data window extends this many days either side of "now".
    pub data_window_half_width_days: u32,
    /// Sequential slices per progressive load.
    pub slices_per_load: u32,
}

impl Default for SlotCacheConfig {
    fn default() -> Self {
        Self {
            gpu_budget_mb: 512,
            points_per_timestep: O1280_POINTS,
            strategy: LoadingStrategy::Alternate,
            data_window_half_width_days: 5,
            slices_per_load: 10,
        }
    }
}

impl SlotCacheConfig {
    pub fn from_json_str(path: &str, json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        Self::from_json_str(&display, &json)
    }

    pub fn budget_bytes(&self) -> u64 {
        self.gpu_budget_mb.saturating_mul(BYTES_PER_MB)
    }

    pub fn bytes_per_timestep(&self) -> u64 {
        self.points_per_timestep.saturating_mul(BYTES_PER_POINT)
    }

    /// Number of slots `N` the budget affords.
    pub fn slot_capacity(&self) -> u64 {
        self.budget_bytes()
            .checked_div(self.bytes_per_timestep())
            .unwrap_or(0)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gpu_budget_mb == 0 {
            return Err(ConfigError::Zero {
                what: "gpu_budget_mb",
            });
        }
        if self.points_per_timestep == 0 {
            return Err(ConfigError::Zero {
                what: "points_per_timestep",
            });
        }
        if self.slices_per_load == 0 {
            return Err(ConfigError::Zero {
                what: "slices_per_load",
            });
        }
        let capacity = self.slot_capacity();
        if capacity < 2 {
            return Err(ConfigError::BudgetTooSmall {
                budget_bytes: self.budget_bytes(),
                bytes_per_timestep: self.bytes_per_timestep(),
                capacity,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{ConfigError, LoadingStrategy, SlotCacheConfig};

    #[test]
    fn default_budget_fits_o1280_timesteps() {
        let config = SlotCacheConfig::default();
        assert_eq!(config.bytes_per_timestep(), 26_398_720);
        assert_eq!(config.slot_capacity(), 20);
        config.validate().unwrap();
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = SlotCacheConfig::from_json_str(
            "inline",
            r#"{ "gpu_budget_mb": 64, "strategy": "future-first" }"#,
        )
        .unwrap();
        assert_eq!(config.strategy, LoadingStrategy::FutureFirst);
        assert_eq!(config.slices_per_load, 10);
        assert_eq!(config.slot_capacity(), 2);
    }

    #[test]
    fn rejects_budget_below_one_pair() {
        let config = SlotCacheConfig {
            gpu_budget_mb: 32,
            ..SlotCacheConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BudgetTooSmall { capacity: 1, .. })
        ));
    }

    #[test]
    fn rejects_bad_json_and_unknown_strategy() {
        assert!(matches!(
            SlotCacheConfig::from_json_str("inline", "{ nope"),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            SlotCacheConfig::from_json_str("inline", r#"{ "strategy": "sideways" }"#),
            Err(ConfigError::Parse { .. })
        ));
        assert!("sideways".parse::<LoadingStrategy>().is_err());
        assert_eq!("Past-First".parse::<LoadingStrategy>().unwrap(), LoadingStrategy::PastFirst);
    }
}
