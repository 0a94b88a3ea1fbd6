//! Transport abstraction.
//!
//! The [`Bus`] trait is the boundary to whatever carries discovery results,
//! signals and remote calls: the BlueZ system bus on Linux
//! ([`crate::bluez::BluezBus`]) or the in-memory [`crate::mock::MockBus`] in
//! tests.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::attributes::AttributeStore;
use crate::error::{Error, Result};
use crate::signal::{MatchRule, RawSignal};
use crate::value::Value;

/// Long-lived stream of raw signals.
pub type SignalStream = BoxStream<'static, RawSignal>;

/// Default deadline for a single remote call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Operations the pipeline needs from the bus.
///
/// # Example
///
/// ```ignore
/// use bbq_core::{Bus, Result};
///
/// async fn count_objects<B: Bus>(bus: &B) -> Result<usize> {
///     Ok(bus.discover().await?.len())
/// }
/// ```
#[async_trait]
pub trait Bus: Send + Sync {
    /// Take a snapshot of every object on the bus.
    async fn discover(&self) -> Result<AttributeStore>;

    /// Start receiving signals selected by `rule`.
    ///
    /// The stream may also carry signals the rule does not select; the
    /// router filters again.
    async fn subscribe(&self, rule: &MatchRule) -> Result<SignalStream>;

    /// Call `interface.method` on the object at `path`.
    async fn invoke(
        &self,
        path: &str,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>>;
}

/// Deadline and cancellation applied to remote calls.
#[derive(Debug, Clone)]
pub struct CallContext {
    timeout: Duration,
    token: CancellationToken,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new(DEFAULT_CALL_TIMEOUT)
    }
}

impl CallContext {
    /// Create a context with the given per-call deadline.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            token: CancellationToken::new(),
        }
    }

    /// Cancel calls made through this context when `token` fires.
    #[must_use]
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Per-call deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Invoke a method, failing with [`Error::Timeout`] after the deadline or
    /// [`Error::Cancelled`] once the token fires.
    pub async fn call<B: Bus + ?Sized>(
        &self,
        bus: &B,
        path: &str,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>> {
        debug!(path, interface, method, "Invoking remote method");
        tokio::select! {
            _ = self.token.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(self.timeout, bus.invoke(path, interface, method, args)) => {
                match result {
                    Ok(reply) => reply,
                    Err(_) => Err(Error::timeout(format!("{interface}.{method}"), self.timeout)),
                }
            }
        }
    }
}
