//! Driver pool: leases driver instances to concurrent callers.
//!
//! Instances are created on demand up to `max_instances`, reused while they
//! stay healthy, evicted as soon as a post-task status probe says they are
//! not running, and resized in the background by a `ScalingPolicy`.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};

use drivergrid_autoscale::{ScalingPolicy, default_policy};
use drivergrid_core::{Driver, DriverFactory, PoolConfig};

use crate::control::ControlLoop;
use crate::error::{PoolError, PoolResult};
use crate::instance::{stop_driver, stop_unadmitted};
use crate::registry::Shared;

/// Lifecycle of a pool. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    Created,
    Running,
    Stopped,
}

/// Point-in-time view of the pool, taken under the admission lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub state: PoolState,
    /// Live instances (idle + busy).
    pub instances: usize,
    pub idle: usize,
    pub busy: usize,
    /// Callers parked waiting for an instance.
    pub waiting: usize,
    /// Creations in flight.
    pub pending: usize,
}

/// An elastic pool of driver instances.
///
/// Dropping a running pool without calling `stop` ends the scaling loop but
/// does not stop the pooled drivers.
pub struct DriverPool<D: Driver> {
    shared: Arc<Shared<D>>,
    policy: Mutex<Option<Box<dyn ScalingPolicy>>>,
    control: Mutex<Option<ControlLoop>>,
}

impl<D: Driver> DriverPool<D> {
    /// Create a pool with the default configuration.
    pub fn new(factory: DriverFactory<D>) -> Self {
        Self::with_config(factory, PoolConfig::default())
    }

    /// Create a pool. Nothing is spawned until `start`.
    pub fn with_config(factory: DriverFactory<D>, config: PoolConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(factory, config)),
            policy: Mutex::new(None),
            control: Mutex::new(None),
        }
    }

    /// Replace the default `MinMax(MovingAverage(Aimd))` composition.
    pub fn with_policy(self, policy: Box<dyn ScalingPolicy>) -> Self {
        *self.policy.lock().unwrap_or_else(PoisonError::into_inner) = Some(policy);
        self
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Live instance count. Never blocks.
    pub fn instance_count(&self) -> usize {
        self.shared.instance_count()
    }

    pub fn state(&self) -> PoolState {
        self.shared.lock().state
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.stats()
    }

    /// Create the first instance and start the scaling loop.
    ///
    /// A factory failure is returned as-is and leaves the pool in `Created`,
    /// so `start` may be retried.
    pub async fn start(&self) -> PoolResult<()> {
        match self.state() {
            PoolState::Created => {}
            PoolState::Running => return Err(PoolError::AlreadyRunning),
            PoolState::Stopped => return Err(PoolError::Closed),
        }

        self.shared.config.validate()?;
        let policy = match self.policy.lock().unwrap_or_else(PoisonError::into_inner).take() {
            Some(policy) => policy,
            None => default_policy(&self.shared.config)?,
        };

        let driver = match self.shared.spawn_driver().await {
            Ok(driver) => driver,
            Err(e) => {
                self.restore_policy(policy);
                return Err(PoolError::Factory(e));
            }
        };

        let id = match self.shared.install_first(driver) {
            Ok(id) => id,
            Err((driver, err)) => {
                self.restore_policy(policy);
                stop_unadmitted(driver).await;
                return Err(err);
            }
        };

        let control = ControlLoop::spawn(self.shared.clone(), policy);
        *self.control.lock().unwrap_or_else(PoisonError::into_inner) = Some(control);

        // A concurrent `stop` may have closed the pool before the loop handle
        // was stored; it would never have seen the handle.
        if self.state() == PoolState::Stopped {
            let control = self.control.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(control) = control {
                control.shutdown().await;
            }
            return Err(PoolError::Closed);
        }

        info!(
            %id,
            min = self.shared.config.min_instances,
            max = self.shared.config.max_instances,
            "driver pool started"
        );
        Ok(())
    }

    fn restore_policy(&self, policy: Box<dyn ScalingPolicy>) {
        let mut slot = self.policy.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(policy);
        }
    }

    /// Run `task` against one instance's service handle.
    ///
    /// The task's own error is returned unchanged and never evicts the
    /// instance; only the status probe that follows the task does.
    pub async fn execute<F, Fut, T, E>(&self, task: F) -> Result<T, E>
    where
        F: FnOnce(D::Service) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<PoolError>,
    {
        let lease = self.shared.acquire().await?;
        let result = task(lease.service()).await;

        let probe = lease.probe(self.shared.config.health_timeout).await;
        debug!(id = %lease.id(), ?probe, "task finished");
        lease.release(probe).await;

        result
    }

    /// Close the pool and stop every idle instance.
    ///
    /// Not idempotent: stopping a stopped pool fails with `Closed`. Instances
    /// leased to in-flight tasks leave the pool immediately and are stopped
    /// by their caller once the task returns.
    pub async fn stop(&self) -> PoolResult<()> {
        let parked = self.shared.close()?;

        let control = self.control.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(control) = control {
            control.shutdown().await;
        }

        let mut errors = Vec::new();
        for (id, driver) in parked {
            if let Err(e) = stop_driver(id, driver).await {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            info!("driver pool stopped");
            Ok(())
        } else {
            warn!(failures = errors.len(), "driver pool stopped with errors");
            Err(PoolError::Shutdown(errors))
        }
    }
}
