//! bb8 pool of async Diesel connections to the item-store database.

use std::fmt;
use std::time::Duration;

use diesel_async::AsyncPgConnection;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use tracing::debug;

/// Where acquiring a connection went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStage {
    /// Opening the pool at startup.
    Startup,
    /// Borrowing a connection for one store call.
    Checkout,
}

impl fmt::Display for PoolStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Startup => "open item-store pool",
            Self::Checkout => "borrow item-store connection",
        })
    }
}

/// The pool could not hand out a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to {stage}: {message}")]
pub struct PoolError {
    /// Step that failed.
    pub stage: PoolStage,
    /// Driver or timeout detail.
    pub message: String,
}

/// Pool sizing.
///
/// Store calls are short single statements, so a small pool with one warm
/// connection and a bounded wait is enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    /// Open connections at most.
    pub max_size: u32,
    /// Connections kept warm while idle.
    pub min_idle: Option<u32>,
    /// Longest wait for a free connection.
    pub checkout_timeout: Duration,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_idle: Some(1),
            checkout_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolLimits {
    /// Default limits capped at `max_size` connections, at least one.
    ///
    /// The warm connection count never exceeds the cap.
    pub fn with_max_size(max_size: u32) -> Self {
        let max_size = max_size.max(1);
        let defaults = Self::default();
        Self {
            max_size,
            min_idle: defaults.min_idle.map(|idle| idle.min(max_size)),
            ..defaults
        }
    }
}

/// Shared handle to the item-store pool; clones share connections.
#[derive(Clone)]
pub struct DbPool {
    inner: Pool<AsyncPgConnection>,
}

impl DbPool {
    /// Open a pool against `database_url`.
    ///
    /// # Errors
    /// [`PoolStage::Startup`] when the URL is invalid or the server refuses
    /// the warm connections.
    pub async fn connect(database_url: &str, limits: PoolLimits) -> Result<Self, PoolError> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let inner = Pool::builder()
            .max_size(limits.max_size)
            .min_idle(limits.min_idle)
            .connection_timeout(limits.checkout_timeout)
            .build(manager)
            .await
            .map_err(|err| PoolError {
                stage: PoolStage::Startup,
                message: err.to_string(),
            })?;
        debug!(max_size = limits.max_size, "item-store pool ready");
        Ok(Self { inner })
    }

    /// Borrow one connection for a single store call.
    ///
    /// # Errors
    /// [`PoolStage::Checkout`] when the wait exceeds the checkout timeout.
    pub async fn get(&self) -> Result<PooledConnection<'_, AsyncPgConnection>, PoolError> {
        self.inner.get().await.map_err(|err| PoolError {
            stage: PoolStage::Checkout,
            message: err.to_string(),
        })
    }
}
