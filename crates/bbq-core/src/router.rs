//! Signal routing.
//!
//! The [`SignalRouter`] receives every raw notification from the bus and
//! forwards it to each registered [`Subscription`] whose [`MatchRule`]
//! matches. Each subscription owns a bounded queue drained by its own task,
//! so a handler never runs concurrently with itself and sees signals in
//! arrival order, while a slow handler only delays its own queue.
//!
//! A full queue is waited on, never skipped: a missed notification is a
//! correctness bug for most subscribers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::join_all;
use futures::stream::{Stream, StreamExt};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::metrics::PipelineMetrics;
use crate::signal::{MatchRule, RawSignal};

/// Capacity of each subscription's delivery queue.
pub const SUBSCRIPTION_QUEUE_CAPACITY: usize = 16;

/// Processes signals delivered to a subscription.
///
/// Implementations must tolerate signals whose body does not have the shape
/// they expect and simply ignore them: the same member name can carry
/// different payloads from different senders.
///
/// `handle` runs synchronously on a Tokio worker thread, so it must not
/// block. Hand slow work off through a channel (as the mailbox does) instead.
pub trait SignalHandler: Send + 'static {
    /// Handle one signal.
    fn handle(&mut self, signal: &RawSignal);
}

impl<F> SignalHandler for F
where
    F: FnMut(&RawSignal) + Send + 'static,
{
    fn handle(&mut self, signal: &RawSignal) {
        self(signal)
    }
}

struct Route {
    id: u64,
    rule: MatchRule,
    tx: mpsc::Sender<Arc<RawSignal>>,
}

struct RouterInner {
    routes: RwLock<Vec<Route>>,
    next_id: AtomicU64,
    metrics: Option<Arc<PipelineMetrics>>,
}

/// Dispatches raw signals to matching subscriptions.
///
/// Cloning is cheap; clones share the same set of subscriptions.
#[derive(Clone)]
pub struct SignalRouter {
    inner: Arc<RouterInner>,
}

impl Default for SignalRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalRouter {
    /// Create a router with no subscriptions.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a router that counts dispatched signals.
    pub fn with_metrics(metrics: Arc<PipelineMetrics>) -> Self {
        Self::build(Some(metrics))
    }

    fn build(metrics: Option<Arc<PipelineMetrics>>) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                routes: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                metrics,
            }),
        }
    }

    /// Register `handler` for signals matching `rule`.
    ///
    /// Spawns the subscription's processing task; must be called from within
    /// a Tokio runtime.
    pub async fn register<H: SignalHandler>(&self, rule: MatchRule, mut handler: H) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::channel::<Arc<RawSignal>>(SUBSCRIPTION_QUEUE_CAPACITY);
        let token = CancellationToken::new();
        let task_token = token.clone();
        let task_rule = rule.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => {
                        debug!(id, rule = %task_rule, pending = rx.len(), "Subscription closed, discarding queue");
                        break;
                    }
                    signal = rx.recv() => {
                        match signal {
                            Some(signal) => handler.handle(&signal),
                            None => break,
                        }
                    }
                }
            }
        });

        self.inner.routes.write().await.push(Route {
            id,
            rule: rule.clone(),
            tx,
        });
        debug!(id, rule = %rule, "Subscription registered");

        Subscription {
            id,
            rule,
            router: self.clone(),
            token,
            handle: Some(handle),
        }
    }

    /// Deliver `signal` to every live subscription whose rule matches.
    ///
    /// Deliveries to different subscriptions proceed concurrently. If a
    /// subscription's queue is full this waits for room in that queue only.
    /// Returns once every matching subscription has accepted the signal (or
    /// turned out to be closed), yielding the number of deliveries.
    pub async fn dispatch(&self, signal: RawSignal) -> usize {
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_dispatch();
        }

        let targets: Vec<mpsc::Sender<Arc<RawSignal>>> = {
            let routes = self.inner.routes.read().await;
            routes
                .iter()
                .filter(|r| r.rule.matches(&signal))
                .map(|r| r.tx.clone())
                .collect()
        };

        if targets.is_empty() {
            trace!(path = %signal.path, member = %signal.member, "No subscription for signal");
            return 0;
        }

        let signal = Arc::new(signal);
        let results = join_all(targets.iter().map(|tx| {
            let signal = Arc::clone(&signal);
            async move { tx.send(signal).await.is_ok() }
        }))
        .await;

        let delivered = results.iter().filter(|ok| **ok).count();
        if delivered < results.len() {
            self.prune().await;
        }
        delivered
    }

    /// Dispatch every signal from `stream` until it ends or `token` is cancelled.
    ///
    /// Returns the number of signals read from the stream.
    pub async fn pump<S>(&self, stream: S, token: CancellationToken) -> u64
    where
        S: Stream<Item = RawSignal> + Send,
    {
        let mut stream = std::pin::pin!(stream);
        let mut count = 0u64;
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(count, "Signal pump cancelled");
                    break;
                }
                next = stream.next() => {
                    match next {
                        Some(signal) => {
                            count += 1;
                            self.dispatch(signal).await;
                        }
                        None => {
                            warn!(count, "Signal stream ended");
                            break;
                        }
                    }
                }
            }
        }
        count
    }

    /// Number of live subscriptions.
    pub async fn subscription_count(&self) -> usize {
        self.inner
            .routes
            .read()
            .await
            .iter()
            .filter(|r| !r.tx.is_closed())
            .count()
    }

    async fn prune(&self) {
        let mut routes = self.inner.routes.write().await;
        let before = routes.len();
        routes.retain(|r| !r.tx.is_closed());
        if routes.len() < before {
            debug!(removed = before - routes.len(), "Pruned closed subscriptions");
        }
    }

    async fn remove(&self, id: u64) {
        self.inner.routes.write().await.retain(|r| r.id != id);
    }
}

/// A registered handler and its processing task.
///
/// Dropping the handle cancels the task; [`close`](Self::close) also waits
/// for it to exit and unregisters the route immediately. Signals still
/// queued when the subscription closes are discarded.
pub struct Subscription {
    id: u64,
    rule: MatchRule,
    router: SignalRouter,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    /// The rule this subscription was registered with.
    pub fn rule(&self) -> &MatchRule {
        &self.rule
    }

    /// Whether the processing task is still running.
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop delivery and wait for the processing task to exit.
    ///
    /// Consumes the handle, so a subscription cannot be closed twice.
    pub async fn close(mut self) {
        self.token.cancel();
        self.router.remove(self.id).await;
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            warn!(id = self.id, error = %e, "Subscription task ended abnormally");
        }
        debug!(id = self.id, rule = %self.rule, "Subscription removed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("rule", &self.rule)
            .field("active", &self.is_active())
            .finish()
    }
}
