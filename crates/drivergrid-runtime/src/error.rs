//! Pool error types.

use std::time::Duration;

use thiserror::Error;

use drivergrid_autoscale::ScalingError;
use drivergrid_core::ConfigError;

/// Errors surfaced by `DriverPool` operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("driver pool is closed")]
    Closed,

    #[error("driver pool is already running")]
    AlreadyRunning,

    #[error("driver pool has not been started")]
    NotStarted,

    #[error("timed out after {0:?} waiting for a driver instance")]
    AcquireTimeout(Duration),

    /// The factory (or the new driver's `start`) failed. Displays the
    /// underlying error verbatim.
    #[error(transparent)]
    Factory(anyhow::Error),

    #[error("failed to stop {} driver instance(s)", .0.len())]
    Shutdown(Vec<anyhow::Error>),

    #[error("invalid pool config: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid scaling policy: {0}")]
    Policy(#[from] ScalingError),
}

impl PoolError {
    /// Whether the operation was refused because the pool is stopped.
    pub fn is_closed(&self) -> bool {
        matches!(self, PoolError::Closed)
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
