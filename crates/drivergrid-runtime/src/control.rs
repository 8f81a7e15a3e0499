//! Background scaling loop.
//!
//! Runs once per `scaling.interval` while the pool is running, feeding the
//! demand signal (callers waiting minus idle instances) into the pool's
//! `ScalingPolicy` and growing or retiring idle instances to match.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use drivergrid_autoscale::ScalingPolicy;
use drivergrid_core::Driver;

use crate::registry::Shared;

/// Handle to a running control loop.
pub(crate) struct ControlLoop {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ControlLoop {
    pub(crate) fn spawn<D: Driver>(
        shared: Arc<Shared<D>>,
        policy: Box<dyn ScalingPolicy>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let interval = shared.config.scaling.interval;
        let handle = tokio::spawn(run(shared, policy, interval, shutdown_rx));
        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Signal the loop and wait for it to exit.
    pub(crate) async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "scaling loop terminated abnormally");
        }
    }
}

async fn run<D: Driver>(
    shared: Arc<Shared<D>>,
    mut policy: Box<dyn ScalingPolicy>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_ms = interval.as_millis() as u64, "scaling loop started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                shared.rebalance(policy.as_mut()).await;
            }
            _ = shutdown.changed() => {
                debug!("scaling loop shutting down");
                break;
            }
        }
    }
}
