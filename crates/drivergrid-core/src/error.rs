//! Configuration error types.

use thiserror::Error;

/// Errors produced while loading or validating a `PoolConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for `{field}`: {value}")]
    Duration { field: &'static str, value: String },

    #[error("min_instances ({min}) exceeds max_instances ({max})")]
    Bounds { min: usize, max: usize },

    #[error("`{0}` must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("max_instances must be at least 1")]
    ZeroCapacity,

    #[error("scaling window must be at least 1")]
    ZeroWindow,

    #[error("scaling decay must be in (0, 1), got {0}")]
    Decay(f64),
}
