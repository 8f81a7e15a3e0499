//! drivergrid-core: shared types for the DriverGrid driver pool.
//!
//! Defines the contract between the pool and the sandbox runtime that
//! actually spawns workers:
//!
//! - **`Driver`**: a started worker that can be stopped, health-queried and
//!   handed to callers through an opaque service handle
//! - **`DriverFactory`**: the injected constructor invoked whenever the pool
//!   needs a new instance
//! - **`PoolConfig`**: instance bounds, timeouts and scaling parameters,
//!   loadable from a `drivergrid.toml`

pub mod config;
pub mod driver;
pub mod error;

pub use config::{PoolConfig, ScalingConfig};
pub use driver::{BoxFuture, Driver, DriverFactory, DriverStatus, driver_factory};
pub use error::ConfigError;
