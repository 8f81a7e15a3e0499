//! drivergrid.toml configuration parser.
//!
//! The file form keeps every field optional and durations as strings
//! (`"500ms"`, `"5s"`, `"2m"`); `PoolConfig` is the resolved, validated form
//! the pool runs with.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolFile {
    pub pool: Option<PoolSection>,
    pub scaling: Option<ScalingSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolSection {
    pub min_instances: Option<usize>,
    pub max_instances: Option<usize>,
    pub acquire_timeout: Option<String>,
    pub health_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScalingSection {
    pub interval: Option<String>,
    pub window: Option<usize>,
    pub increment: Option<usize>,
    pub decay: Option<f64>,
}

/// Parameters of the default scaling policy and its control loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingConfig {
    /// How often the control loop samples demand.
    pub interval: Duration,
    /// Number of demand samples averaged before a decision.
    pub window: usize,
    /// Instances added per tick under positive demand.
    pub increment: usize,
    /// Multiplier applied to the instance count under negative demand.
    pub decay: f64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            window: 5,
            increment: 1,
            decay: 0.5,
        }
    }
}

/// Resolved pool configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Floor kept warm by the scaling policy and by eviction repair.
    pub min_instances: usize,
    /// Ceiling for on-demand creation and for the scaling policy.
    pub max_instances: usize,
    /// How long `execute` may wait for a free instance. `None` waits forever.
    pub acquire_timeout: Option<Duration>,
    /// Upper bound on a single driver status query.
    pub health_timeout: Duration,
    pub scaling: ScalingConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_instances: 1,
            max_instances: host_parallelism(),
            acquire_timeout: None,
            health_timeout: Duration::from_secs(2),
            scaling: ScalingConfig::default(),
        }
    }
}

impl PoolConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let file: PoolFile = toml::from_str(s)?;
        Self::from_file_config(file)
    }

    /// Resolve a parsed file, filling unset fields with defaults.
    pub fn from_file_config(file: PoolFile) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(pool) = file.pool {
            if let Some(min) = pool.min_instances {
                config.min_instances = min;
            }
            if let Some(max) = pool.max_instances {
                config.max_instances = max;
            }
            if let Some(timeout) = pool.acquire_timeout {
                config.acquire_timeout = Some(duration_field("acquire_timeout", &timeout)?);
            }
            if let Some(timeout) = pool.health_timeout {
                config.health_timeout = duration_field("health_timeout", &timeout)?;
            }
        }

        if let Some(scaling) = file.scaling {
            if let Some(interval) = scaling.interval {
                config.scaling.interval = duration_field("interval", &interval)?;
            }
            if let Some(window) = scaling.window {
                config.scaling.window = window;
            }
            if let Some(increment) = scaling.increment {
                config.scaling.increment = increment;
            }
            if let Some(decay) = scaling.decay {
                config.scaling.decay = decay;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_instances == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.min_instances > self.max_instances {
            return Err(ConfigError::Bounds {
                min: self.min_instances,
                max: self.max_instances,
            });
        }
        if self.scaling.interval.is_zero() {
            return Err(ConfigError::ZeroDuration("interval"));
        }
        if self.health_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("health_timeout"));
        }
        if self.scaling.window == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if !(self.scaling.decay > 0.0 && self.scaling.decay < 1.0) {
            return Err(ConfigError::Decay(self.scaling.decay));
        }
        Ok(())
    }
}

/// Number of CPUs the host reports, falling back to one.
pub fn host_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn duration_field(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::Duration {
        field,
        value: value.to_string(),
    })
}

/// Parse a duration string like "500ms", "5s", "2m". A bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
