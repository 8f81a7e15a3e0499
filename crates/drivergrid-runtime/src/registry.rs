//! Shared pool bookkeeping.
//!
//! `Registry` is guarded by a plain mutex (the admission lock) that is only
//! ever held for bookkeeping, never across an `.await`. The live count is
//! mirrored into an atomic inside the same critical section so readers never
//! need the lock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use drivergrid_autoscale::{ScaleDecision, ScalingPolicy};
use drivergrid_core::{Driver, DriverFactory, PoolConfig};

use crate::error::{PoolError, PoolResult};
use crate::instance::{InstanceId, Lease, Slot, stop_driver, stop_unadmitted};
use crate::pool::{PoolState, PoolStats};

pub(crate) struct Registry<D> {
    pub(crate) state: PoolState,
    next_id: u64,
    slots: HashMap<InstanceId, Slot<D>>,
    /// Idle instances; the back was released most recently.
    idle: VecDeque<InstanceId>,
    /// Creations reserved against capacity whose factory call is in flight.
    pending: usize,
}

impl<D> Registry<D> {
    fn new() -> Self {
        Self {
            state: PoolState::Created,
            next_id: 0,
            slots: HashMap::new(),
            idle: VecDeque::new(),
            pending: 0,
        }
    }

    fn committed(&self) -> usize {
        self.slots.len() + self.pending
    }

    /// Pop the most recently released idle instance.
    fn take_idle(&mut self) -> Option<(InstanceId, D)> {
        while let Some(id) = self.idle.pop_back() {
            if let Some(driver) = self.slots.get_mut(&id).and_then(|slot| slot.driver.take()) {
                return Some((id, driver));
            }
        }
        None
    }

    /// Remove up to `n` idle instances, oldest creation first.
    fn take_oldest_idle(&mut self, n: usize) -> Vec<(InstanceId, D)> {
        let mut candidates: Vec<(InstanceId, std::time::Instant)> = self
            .idle
            .iter()
            .filter_map(|id| self.slots.get(id).map(|slot| (*id, slot.created_at)))
            .collect();
        candidates.sort_by_key(|(_, created_at)| *created_at);
        candidates.truncate(n);

        let mut retired = Vec::with_capacity(candidates.len());
        for (id, _) in candidates {
            self.idle.retain(|idle| *idle != id);
            if let Some(driver) = self.slots.remove(&id).and_then(|slot| slot.driver) {
                retired.push((id, driver));
            }
        }
        retired
    }
}

enum Admission<'a, D: Driver> {
    Idle(InstanceId, D),
    Create(Reservation<'a, D>),
    Wait,
}

/// Capacity held for creations in flight.
///
/// Dropping it (factory error, closed pool, cancelled caller) returns the
/// unused capacity and wakes a waiter who may now create instead.
pub(crate) struct Reservation<'a, D: Driver> {
    shared: &'a Shared<D>,
    remaining: usize,
}

impl<D: Driver> Reservation<'_, D> {
    fn remaining(&self) -> usize {
        self.remaining
    }
}

impl<D: Driver> Drop for Reservation<'_, D> {
    fn drop(&mut self) {
        if self.remaining == 0 {
            return;
        }
        let mut reg = self.shared.lock();
        reg.pending -= self.remaining;
        drop(reg);
        self.remaining = 0;
        self.shared.released.notify_one();
    }
}

/// Counts a caller as waiting for as long as it is parked in `acquire`.
struct WaitGuard<'a>(&'a AtomicUsize);

impl<'a> WaitGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// State shared by the pool handle, leases and the control loop.
pub(crate) struct Shared<D: Driver> {
    factory: DriverFactory<D>,
    pub(crate) config: PoolConfig,
    registry: Mutex<Registry<D>>,
    instances: AtomicUsize,
    waiting: AtomicUsize,
    released: Notify,
}

impl<D: Driver> Shared<D> {
    pub(crate) fn new(factory: DriverFactory<D>, config: PoolConfig) -> Self {
        Self {
            factory,
            config,
            registry: Mutex::new(Registry::new()),
            instances: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            released: Notify::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Registry<D>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn instance_count(&self) -> usize {
        self.instances.load(Ordering::SeqCst)
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let reg = self.lock();
        let busy = reg.slots.values().filter(|slot| slot.is_busy()).count();
        PoolStats {
            state: reg.state,
            instances: reg.slots.len(),
            idle: reg.slots.len() - busy,
            busy,
            waiting: self.waiting.load(Ordering::SeqCst),
            pending: reg.pending,
        }
    }

    fn insert(&self, reg: &mut Registry<D>, slot: Slot<D>) -> InstanceId {
        let id = InstanceId(reg.next_id);
        reg.next_id += 1;
        reg.slots.insert(id, slot);
        self.instances.store(reg.slots.len(), Ordering::SeqCst);
        id
    }

    fn sync_count(&self, reg: &Registry<D>) {
        self.instances.store(reg.slots.len(), Ordering::SeqCst);
    }

    /// Run the factory and start the new driver.
    pub(crate) async fn spawn_driver(&self) -> anyhow::Result<D> {
        let mut driver = (self.factory)().await?;
        driver.start().await?;
        Ok(driver)
    }

    /// Install the first instance and mark the pool running.
    ///
    /// Hands the driver back if another `start` won the race or the pool was
    /// stopped meanwhile.
    pub(crate) fn install_first(&self, driver: D) -> Result<InstanceId, (D, PoolError)> {
        let mut reg = self.lock();
        match reg.state {
            PoolState::Created => {}
            PoolState::Running => return Err((driver, PoolError::AlreadyRunning)),
            PoolState::Stopped => return Err((driver, PoolError::Closed)),
        }
        let id = self.insert(&mut reg, Slot::parked(driver));
        reg.idle.push_back(id);
        reg.state = PoolState::Running;
        Ok(id)
    }

    /// Bind the caller to an instance, creating or waiting as needed.
    pub(crate) async fn acquire(self: &Arc<Self>) -> PoolResult<Lease<D>> {
        let deadline = self
            .config
            .acquire_timeout
            .map(|timeout| (timeout, tokio::time::Instant::now() + timeout));
        let mut wait_guard = None;

        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);

            let admission = {
                let mut reg = self.lock();
                if reg.state != PoolState::Running {
                    return Err(PoolError::Closed);
                }
                if let Some((id, driver)) = reg.take_idle() {
                    Admission::Idle(id, driver)
                } else if reg.committed() < self.config.max_instances {
                    reg.pending += 1;
                    Admission::Create(Reservation {
                        shared: self,
                        remaining: 1,
                    })
                } else {
                    notified.as_mut().enable();
                    Admission::Wait
                }
            };

            match admission {
                Admission::Idle(id, driver) => {
                    debug!(%id, "leased idle driver");
                    return Ok(Lease::new(self.clone(), id, driver));
                }
                Admission::Create(mut reservation) => {
                    let driver = self.spawn_driver().await.map_err(PoolError::Factory)?;
                    let Some(id) = self.admit(&mut reservation) else {
                        stop_unadmitted(driver).await;
                        return Err(PoolError::Closed);
                    };
                    debug!(%id, "created driver on demand");
                    return Ok(Lease::new(self.clone(), id, driver));
                }
                Admission::Wait => {
                    if wait_guard.is_none() {
                        wait_guard = Some(WaitGuard::enter(&self.waiting));
                        debug!(max = self.config.max_instances, "pool at capacity, waiting");
                    }
                    match deadline {
                        Some((timeout, at)) => {
                            if tokio::time::timeout_at(at, notified).await.is_err() {
                                return Err(PoolError::AcquireTimeout(timeout));
                            }
                        }
                        None => notified.await,
                    }
                }
            }
        }
    }

    /// Turn one reserved unit into a busy slot. `None` if the pool stopped.
    fn admit(&self, reservation: &mut Reservation<'_, D>) -> Option<InstanceId> {
        let mut reg = self.lock();
        reg.pending -= 1;
        reservation.remaining -= 1;
        if reg.state != PoolState::Running {
            return None;
        }
        Some(self.insert(&mut reg, Slot::leased()))
    }

    /// Return a healthy driver to the idle list. Hands it back if its slot is
    /// gone because the pool stopped.
    pub(crate) fn checkin(&self, id: InstanceId, driver: D) -> Result<(), D> {
        let mut reg = self.lock();
        let Some(slot) = reg.slots.get_mut(&id) else {
            return Err(driver);
        };
        slot.driver = Some(driver);
        reg.idle.push_back(id);
        drop(reg);
        self.released.notify_one();
        Ok(())
    }

    fn forget(&self, id: InstanceId) {
        let mut reg = self.lock();
        if reg.slots.remove(&id).is_some() {
            self.sync_count(&reg);
        }
        drop(reg);
        self.released.notify_one();
    }

    /// Drop an instance from the live set and stop it.
    pub(crate) async fn evict(&self, id: InstanceId, driver: D) {
        self.forget(id);
        let _ = stop_driver(id, driver).await;
    }

    /// Synchronous eviction for a lease dropped mid-task. Stopping happens on
    /// the runtime if there is one.
    pub(crate) fn discard(&self, id: InstanceId, driver: D) {
        self.forget(id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = stop_driver(id, driver).await;
                });
            }
            Err(_) => warn!(%id, "no runtime available, dropping driver without stop"),
        }
    }

    /// Bring the live set back up to `min_instances` after an eviction.
    pub(crate) async fn repair_floor(&self) {
        let created = self.grow_to(self.config.min_instances).await;
        if created > 0 {
            debug!(created, min = self.config.min_instances, "restored instance floor");
        }
    }

    /// Create idle instances until `target` live-or-pending instances exist,
    /// capped at `max_instances`. Stops at the first factory failure.
    pub(crate) async fn grow_to(&self, target: usize) -> usize {
        let mut reservation = {
            let mut reg = self.lock();
            if reg.state != PoolState::Running {
                return 0;
            }
            let target = target.min(self.config.max_instances);
            let deficit = target.saturating_sub(reg.committed());
            if deficit == 0 {
                return 0;
            }
            reg.pending += deficit;
            Reservation {
                shared: self,
                remaining: deficit,
            }
        };

        let mut created = 0;
        while reservation.remaining() > 0 {
            let driver = match self.spawn_driver().await {
                Ok(driver) => driver,
                Err(e) => {
                    warn!(error = %e, "failed to create driver, aborting scale-up");
                    break;
                }
            };
            let Some(id) = self.admit(&mut reservation) else {
                stop_unadmitted(driver).await;
                break;
            };
            if let Err(driver) = self.checkin(id, driver) {
                let _ = stop_driver(id, driver).await;
                break;
            }
            created += 1;
        }
        created
    }

    /// Stop up to `n` idle instances, never one that is leased.
    pub(crate) async fn shrink_by(&self, n: usize) -> usize {
        let retired = {
            let mut reg = self.lock();
            if reg.state != PoolState::Running {
                return 0;
            }
            let retired = reg.take_oldest_idle(n);
            self.sync_count(&reg);
            retired
        };

        let count = retired.len();
        for (id, driver) in retired {
            let _ = stop_driver(id, driver).await;
        }
        count
    }

    /// One control-loop step: sample demand, consult the policy, converge.
    pub(crate) async fn rebalance(&self, policy: &mut dyn ScalingPolicy) -> ScaleDecision {
        let (total, load) = {
            let reg = self.lock();
            if reg.state != PoolState::Running {
                return ScaleDecision::NoChange;
            }
            let waiting = self.waiting.load(Ordering::SeqCst) as i64;
            (reg.slots.len(), waiting - reg.idle.len() as i64)
        };

        let target = policy.scale(total, load);
        let decision = ScaleDecision::between(total, target);
        match decision {
            ScaleDecision::Grow(n) => {
                debug!(total, load, target, n, "scaling up");
                self.grow_to(target).await;
            }
            ScaleDecision::Shrink(n) => {
                debug!(total, load, target, n, "scaling down");
                self.shrink_by(n).await;
            }
            ScaleDecision::NoChange => {}
        }
        decision
    }

    /// Close the pool and take every parked driver out of the registry.
    ///
    /// Leased instances are dropped from the registry too; their callers stop
    /// them when the task returns.
    pub(crate) fn close(&self) -> PoolResult<Vec<(InstanceId, D)>> {
        let mut reg = self.lock();
        match reg.state {
            PoolState::Running => {}
            PoolState::Created => return Err(PoolError::NotStarted),
            PoolState::Stopped => return Err(PoolError::Closed),
        }
        reg.state = PoolState::Stopped;
        reg.idle.clear();

        let mut parked = Vec::new();
        let mut leased = 0;
        for (id, slot) in reg.slots.drain() {
            match slot.driver {
                Some(driver) => parked.push((id, driver)),
                None => leased += 1,
            }
        }
        self.sync_count(&reg);
        drop(reg);

        self.released.notify_waiters();
        info!(idle = parked.len(), leased, "driver pool closing");
        Ok(parked)
    }
}
