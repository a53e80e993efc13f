//! Reconcile loop driving [`Reconciler`]s from a [`WorkQueue`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Span;
use zonewall_common::config::ControllerConfig;
use zonewall_common::meta::ObjectKey;

use crate::error::{Error, Result};
use crate::queue::WorkQueue;
use crate::retry::backoff_delay;
use crate::store::{Change, ResourceStore};

pub mod firewall;
pub mod host;

pub use firewall::FirewallReconciler;
pub use host::HostReconciler;

/// What to do with a key after a successful reconcile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Action {
    requeue_after: Option<Duration>,
}

impl Action {
    /// Wait for the next change notification.
    pub fn await_change() -> Self {
        Self {
            requeue_after: None,
        }
    }

    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
        }
    }

    pub fn requeue_after(&self) -> Option<Duration> {
        self.requeue_after
    }
}

#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action>;
}

pub struct Controller<R> {
    reconciler: Arc<R>,
    queue: WorkQueue<ObjectKey>,
    config: ControllerConfig,
    failures: Mutex<HashMap<ObjectKey, u32>>,
    span: Span,
}

impl<R: Reconciler> Controller<R> {
    pub fn new(reconciler: R, queue: WorkQueue<ObjectKey>, config: ControllerConfig, span: Span) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            queue,
            config,
            failures: Mutex::new(HashMap::new()),
            span,
        }
    }

    pub fn queue(&self) -> &WorkQueue<ObjectKey> {
        &self.queue
    }

    pub fn reconciler(&self) -> &R {
        &self.reconciler
    }

    fn forget(&self, key: &ObjectKey) {
        match self.failures.lock() {
            Ok(mut failures) => failures.remove(key),
            Err(poisoned) => poisoned.into_inner().remove(key),
        };
    }

    fn record_failure(&self, key: &ObjectKey) -> u32 {
        let mut failures = match self.failures.lock() {
            Ok(failures) => failures,
            Err(poisoned) => poisoned.into_inner(),
        };
        let attempts = failures.entry(key.clone()).or_insert(0);
        *attempts += 1;
        *attempts
    }

    fn error_policy(&self, key: &ObjectKey, err: &Error) {
        if !err.is_retryable() {
            tracing::warn!(
                parent: &self.span,
                controller = self.reconciler.name(),
                object = %key,
                error = %err,
                "reconcile failed permanently, waiting for a change"
            );
            self.forget(key);
            return;
        }

        let attempt = self.record_failure(key);
        if self.config.retry.exhausted(attempt) {
            tracing::error!(
                parent: &self.span,
                controller = self.reconciler.name(),
                object = %key,
                attempt,
                error = %err,
                "reconcile failed after max retries"
            );
            self.forget(key);
            return;
        }

        let delay = backoff_delay(&self.config.retry, attempt);
        tracing::warn!(
            parent: &self.span,
            controller = self.reconciler.name(),
            object = %key,
            attempt,
            error = %err,
            delay_ms = delay.as_millis() as u64,
            "reconcile failed, retrying"
        );
        self.queue.add_after(key.clone(), delay);
    }

    /// Reconciles the next key. Returns `false` once the queue shut down.
    pub async fn process_next(&self) -> bool {
        let Some(key) = self.queue.next().await else {
            return false;
        };

        tracing::debug!(parent: &self.span, controller = self.reconciler.name(), object = %key, "reconciling");
        match self.reconciler.reconcile(&key).await {
            Ok(action) => {
                self.forget(&key);
                if let Some(after) = action.requeue_after() {
                    self.queue.add_after(key.clone(), after);
                }
            }
            Err(err) => self.error_policy(&key, &err),
        }
        self.queue.done(&key);
        true
    }

    /// Runs the configured number of workers until the queue shuts down.
    pub async fn run(self: Arc<Self>) {
        let workers = self.config.workers.max(1);
        tracing::info!(parent: &self.span, controller = self.reconciler.name(), workers, "controller started");

        let mut set = JoinSet::new();
        for _ in 0..workers {
            let controller = Arc::clone(&self);
            set.spawn(async move { while controller.process_next().await {} });
        }
        while let Some(joined) = set.join_next().await {
            if let Err(err) = joined {
                tracing::error!(parent: &self.span, controller = self.reconciler.name(), error = %err, "worker panicked");
            }
        }
        tracing::info!(parent: &self.span, controller = self.reconciler.name(), "controller stopped");
    }
}

/// Routes store changes to the queues of the reconcilers they trigger.
///
/// Host changes trigger the host, secret changes trigger every host that
/// references the secret, and firewall changes trigger the firewall.
pub async fn dispatch_changes<S: ResourceStore>(
    mut changes: mpsc::UnboundedReceiver<Change>,
    store: Arc<S>,
    hosts: WorkQueue<ObjectKey>,
    firewalls: WorkQueue<ObjectKey>,
    cancel: CancellationToken,
    span: Span,
) {
    loop {
        let change = tokio::select! {
            change = changes.recv() => change,
            _ = cancel.cancelled() => None,
        };
        let Some(change) = change else {
            break;
        };

        tracing::trace!(parent: &span, ?change, "dispatching change");
        match change {
            Change::Host(key) => hosts.add(key),
            Change::Firewall(key) => firewalls.add(key),
            Change::Secret(key) => {
                for host in store.hosts_for_secret(&key).await {
                    hosts.add(host);
                }
            }
        }
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use zonewall_common::config::RetryConfig;
    use zonewall_common::zone::ValidationError;
    use zonewall_remote::RemoteError;

    struct Flaky {
        calls: AtomicU32,
        failures: u32,
        permanent: bool,
    }

    #[async_trait]
    impl Reconciler for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn reconcile(&self, _key: &ObjectKey) -> Result<Action> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                if self.permanent {
                    return Err(ValidationError::ZeroAsn.into());
                }
                return Err(RemoteError::Closed("h".into()).into());
            }
            Ok(Action::await_change())
        }
    }

    fn controller(failures: u32, permanent: bool, retry: RetryConfig) -> Controller<Flaky> {
        Controller::new(
            Flaky {
                calls: AtomicU32::new(0),
                failures,
                permanent,
            },
            WorkQueue::new(CancellationToken::new()),
            ControllerConfig {
                workers: 1,
                resync: None,
                retry,
            },
            Span::none(),
        )
    }

    fn key() -> ObjectKey {
        ObjectKey::new("default", "a")
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let c = controller(2, false, RetryConfig::default());
        c.queue().add(key());

        for _ in 0..3 {
            assert!(c.process_next().await);
        }
        assert_eq!(c.reconciler().calls.load(Ordering::SeqCst), 3);
        c.queue().wait_idle().await;
        assert!(c.queue().is_idle());
    }

    #[tokio::test]
    async fn permanent_failures_are_not_requeued() {
        let c = controller(1, true, RetryConfig::default());
        c.queue().add(key());

        assert!(c.process_next().await);
        assert!(c.queue().is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_when_exhausted() {
        let c = controller(10, false, RetryConfig::with_max_attempts(2));
        c.queue().add(key());

        assert!(c.process_next().await);
        assert!(!c.queue().is_idle());
        assert!(c.process_next().await);
        assert!(c.queue().is_idle());
        assert_eq!(c.reconciler().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn process_next_stops_after_shutdown() {
        let c = controller(0, false, RetryConfig::default());
        c.queue().shutdown();
        assert!(!c.process_next().await);
    }
}
