//! Pooled driver instances and the lease that binds one to a caller.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use drivergrid_core::Driver;

use crate::health::{self, ProbeResult};
use crate::registry::Shared;

/// Internal handle of a live instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub(crate) u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "driver-{}", self.0)
    }
}

/// A live instance as tracked by the registry.
///
/// The driver is parked here while idle and moves into a `Lease` while a
/// caller holds it, so `driver.is_none()` is the busy flag.
pub(crate) struct Slot<D> {
    pub(crate) driver: Option<D>,
    pub(crate) created_at: Instant,
}

impl<D> Slot<D> {
    pub(crate) fn leased() -> Self {
        Self {
            driver: None,
            created_at: Instant::now(),
        }
    }

    pub(crate) fn parked(driver: D) -> Self {
        Self {
            driver: Some(driver),
            created_at: Instant::now(),
        }
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.driver.is_none()
    }
}

/// Exclusive binding of one caller to one instance.
///
/// Dropping a lease without `release` (the caller's future was cancelled or
/// its task panicked) evicts the instance: the pool cannot tell what state
/// the worker was left in.
pub(crate) struct Lease<D: Driver> {
    shared: Arc<Shared<D>>,
    id: InstanceId,
    service: D::Service,
    driver: Option<D>,
}

impl<D: Driver> Lease<D> {
    pub(crate) fn new(shared: Arc<Shared<D>>, id: InstanceId, driver: D) -> Self {
        Self {
            shared,
            id,
            service: driver.service(),
            driver: Some(driver),
        }
    }

    pub(crate) fn id(&self) -> InstanceId {
        self.id
    }

    pub(crate) fn service(&self) -> D::Service {
        self.service.clone()
    }

    pub(crate) async fn probe(&self, timeout: Duration) -> ProbeResult {
        match &self.driver {
            Some(driver) => health::probe(driver, timeout).await,
            None => ProbeResult::Failed,
        }
    }

    /// Hand the instance back: idle again if healthy, evicted otherwise.
    pub(crate) async fn release(mut self, probe: ProbeResult) {
        let Some(driver) = self.driver.take() else {
            return;
        };

        if probe.is_healthy() {
            if let Err(driver) = self.shared.checkin(self.id, driver) {
                debug!(id = %self.id, "pool closed while leased, stopping driver");
                let _ = stop_driver(self.id, driver).await;
            }
            return;
        }

        warn!(id = %self.id, ?probe, "evicting unhealthy driver");
        self.shared.evict(self.id, driver).await;
        self.shared.repair_floor().await;
    }
}

impl<D: Driver> Drop for Lease<D> {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            warn!(id = %self.id, "lease dropped mid-task, discarding driver");
            self.shared.discard(self.id, driver);
        }
    }
}

/// Stop a driver that has already left the registry, logging failures.
pub(crate) async fn stop_driver<D: Driver>(id: InstanceId, mut driver: D) -> anyhow::Result<()> {
    match driver.stop().await {
        Ok(()) => {
            debug!(%id, "driver stopped");
            Ok(())
        }
        Err(e) => {
            warn!(%id, error = %e, "failed to stop driver");
            Err(e)
        }
    }
}

/// Stop a driver that started but never made it into the registry.
pub(crate) async fn stop_unadmitted<D: Driver>(mut driver: D) {
    if let Err(e) = driver.stop().await {
        warn!(error = %e, "failed to stop unadmitted driver");
    }
}
