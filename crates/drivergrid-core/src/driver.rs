//! The driver capability consumed by the pool.
//!
//! A driver is one sandboxed worker process. The pool never looks at how a
//! driver does its work; it only starts it, stops it, asks whether it is
//! still running and hands its service handle to callers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;

/// Boxed, sendable future used at the factory boundary.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Injected constructor for new driver instances.
///
/// Invoked by the pool on start, on demand inside `execute`, and by the
/// scaling loop. It may be slow and may fail; every failure is attributed to
/// exactly one caller or one growth step.
pub type DriverFactory<D> = Arc<dyn Fn() -> BoxFuture<anyhow::Result<D>> + Send + Sync>;

/// Wrap an async closure into a `DriverFactory`.
pub fn driver_factory<D, F, Fut>(f: F) -> DriverFactory<D>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<D>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Coarse lifecycle status reported by a driver's container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Created,
    Running,
    Pausing,
    Paused,
    Stopped,
}

impl DriverStatus {
    /// Only a running driver may keep serving callers.
    pub fn is_running(&self) -> bool {
        matches!(self, DriverStatus::Running)
    }
}

/// A sandboxed worker that the pool can manage.
pub trait Driver: Send + Sync + 'static {
    /// Opaque communication handle passed to the caller's task.
    type Service: Clone + Send + Sync + 'static;

    /// Start the worker. Called exactly once, before the instance is pooled.
    fn start(&mut self) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Stop the worker. Called at most once, on eviction or shutdown.
    fn stop(&mut self) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Query the worker's current status.
    fn status(&self) -> impl Future<Output = anyhow::Result<DriverStatus>> + Send;

    /// The handle callers use to talk to the worker.
    fn service(&self) -> Self::Service;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoDriver(u32);

    impl Driver for EchoDriver {
        type Service = u32;

        async fn start(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn status(&self) -> anyhow::Result<DriverStatus> {
            Ok(DriverStatus::Running)
        }

        fn service(&self) -> u32 {
            self.0
        }
    }

    #[test]
    fn only_running_is_running() {
        assert!(DriverStatus::Running.is_running());
        assert!(!DriverStatus::Created.is_running());
        assert!(!DriverStatus::Pausing.is_running());
        assert!(!DriverStatus::Paused.is_running());
        assert!(!DriverStatus::Stopped.is_running());
    }

    #[test]
    fn status_serializes_snake_case() {
        let value = toml::Value::try_from(DriverStatus::Stopped).unwrap();
        assert_eq!(value.as_str(), Some("stopped"));
    }

    #[tokio::test]
    async fn factory_invokes_closure_each_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let factory = driver_factory(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) as u32;
            async move { Ok(EchoDriver(n)) }
        });

        let first = factory().await.unwrap();
        let second = factory().await.unwrap();
        assert_eq!(first.service(), 0);
        assert_eq!(second.service(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn factory_propagates_errors() {
        let factory: DriverFactory<EchoDriver> =
            driver_factory(|| async { Err(anyhow::anyhow!("sandbox unavailable")) });
        let err = factory().await.err().unwrap();
        assert_eq!(err.to_string(), "sandbox unavailable");
    }
}
