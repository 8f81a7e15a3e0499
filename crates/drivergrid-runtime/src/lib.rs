//! drivergrid-runtime: the elastic driver pool.
//!
//! Hands sandboxed driver instances to concurrent callers, one caller per
//! instance at a time, and keeps the live set sized to demand:
//!
//! - **Leasing**: `execute` reuses an idle instance, creates one on demand
//!   up to `max_instances`, or parks the caller until one is released
//! - **Health eviction**: after every task the instance's status is
//!   queried; anything not running is stopped and dropped from the pool
//! - **Elastic scaling**: a background loop feeds demand into a
//!   `ScalingPolicy` and grows or retires idle instances to match
//!
//! # Architecture
//!
//! ```text
//! DriverPool
//!   ├── Shared (Arc)
//!   │   ├── DriverFactory
//!   │   ├── Mutex<Registry>       admission lock: slots, idle list, pending
//!   │   ├── AtomicUsize           live instance count (lock-free reads)
//!   │   └── Notify                wakes callers waiting for an instance
//!   └── ControlLoop (tokio task)
//!       └── Box<dyn ScalingPolicy>
//! ```

mod control;
pub mod error;
pub mod health;
pub mod instance;
pub mod pool;
mod registry;

pub use error::{PoolError, PoolResult};
pub use health::ProbeResult;
pub use instance::InstanceId;
pub use pool::{DriverPool, PoolState, PoolStats};
