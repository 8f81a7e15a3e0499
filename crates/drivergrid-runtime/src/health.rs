//! Post-task health probe.
//!
//! The pool only distinguishes "running" from everything else. A status
//! query that errors or exceeds the configured timeout counts as unhealthy.

use std::time::Duration;

use tracing::{debug, warn};

use drivergrid_core::{Driver, DriverStatus};

/// Result of a single status probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The driver reported `Running`.
    Healthy,
    /// The driver reported some other status.
    Unhealthy(DriverStatus),
    /// The status query returned an error.
    Failed,
    /// The status query did not answer in time.
    TimedOut,
}

impl ProbeResult {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeResult::Healthy)
    }
}

/// Query a driver's status, bounded by `timeout`.
pub async fn probe<D: Driver>(driver: &D, timeout: Duration) -> ProbeResult {
    match tokio::time::timeout(timeout, driver.status()).await {
        Ok(Ok(status)) if status.is_running() => ProbeResult::Healthy,
        Ok(Ok(status)) => {
            debug!(?status, "driver no longer running");
            ProbeResult::Unhealthy(status)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "driver status query failed");
            ProbeResult::Failed
        }
        Err(_) => {
            warn!(?timeout, "driver status query timed out");
            ProbeResult::TimedOut
        }
    }
}
