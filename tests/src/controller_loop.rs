use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Span;
use zonewall_common::config::{ControllerConfig, RetryConfig};
use zonewall_common::meta::ObjectKey;
use zonewall_core::controller::{self, Controller, FirewallReconciler, HostReconciler};
use zonewall_core::events::{EventRecorder, MemoryRecorder, reasons};
use zonewall_core::queue::WorkQueue;
use zonewall_core::store::{InMemoryStore, ResourceStore};

use crate::fixtures::{InventoryFactory, NAMESPACE, eventually, firewall, host, secret, ubuntu};

fn fast_config() -> ControllerConfig {
    ControllerConfig {
        workers: 2,
        resync: None,
        retry: RetryConfig {
            max_attempts: 0,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(40),
            backoff_multiplier: 2.0,
        },
    }
}

struct Running {
    store: Arc<InMemoryStore>,
    recorder: MemoryRecorder,
    connects: Arc<std::sync::Mutex<Vec<String>>>,
    hosts: WorkQueue<ObjectKey>,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl Running {
    async fn stop(mut self) {
        self.cancel.cancel();
        while self.tasks.join_next().await.is_some() {}
    }

    fn connects_to(&self, address: &str) -> usize {
        self.connects.lock().unwrap().iter().filter(|a| *a == address).count()
    }

    async fn host_count(&self, name: &str) -> usize {
        self.store
            .get_firewall(&ObjectKey::new(NAMESPACE, name))
            .await
            .map(|f| f.status.host_count)
            .unwrap_or_default()
    }
}

/// Wires the store, both controllers and the change dispatcher together
/// the way the binary does, then queues everything already declared.
async fn start(store: Arc<InMemoryStore>, factory: InventoryFactory) -> Running {
    let changes = store.subscribe();
    let recorder = MemoryRecorder::new();
    let events: Arc<dyn EventRecorder> = Arc::new(recorder.clone());
    let connects = Arc::clone(&factory.connects);

    let cancel = CancellationToken::new();
    let hosts = WorkQueue::new(cancel.child_token());
    let firewalls = WorkQueue::new(cancel.child_token());

    let host_controller = Arc::new(Controller::new(
        HostReconciler::new(Arc::clone(&store), factory, Arc::clone(&events), Span::none()),
        hosts.clone(),
        fast_config(),
        Span::none(),
    ));
    let firewall_controller = Arc::new(Controller::new(
        FirewallReconciler::new(Arc::clone(&store), events, Span::none()),
        firewalls.clone(),
        fast_config(),
        Span::none(),
    ));

    let mut tasks = JoinSet::new();
    tasks.spawn(controller::dispatch_changes(
        changes,
        Arc::clone(&store),
        hosts.clone(),
        firewalls.clone(),
        cancel.clone(),
        Span::none(),
    ));
    tasks.spawn(host_controller.run());
    tasks.spawn(firewall_controller.run());

    for key in store.host_keys().await {
        hosts.add(key);
    }
    for key in store.firewall_keys().await {
        firewalls.add(key);
    }

    Running {
        store,
        recorder,
        connects,
        hosts,
        cancel,
        tasks,
    }
}

#[tokio::test]
async fn fleet_converges_through_retries() {
    let store = Arc::new(InMemoryStore::new());
    store.apply_secret(secret("fleet")).await;
    store.apply_host(host("web-1", "192.0.2.11", "fleet")).await;
    store.apply_host(host("web-2", "192.0.2.12", "fleet")).await;
    store.apply_firewall(firewall("web", "web-.*")).await;
    let factory = InventoryFactory::new(
        Arc::clone(&store),
        &[("192.0.2.11", ubuntu("22.04")), ("192.0.2.12", ubuntu("24.04"))],
    );
    let running = start(Arc::clone(&store), factory).await;

    // The firewall fails closed until both hosts are probed, then retries.
    let r = &running;
    eventually("two selected hosts", || async move { r.host_count("web").await == 2 }).await;

    running.hosts.wait_idle().await;
    assert_eq!(running.connects_to("192.0.2.11"), 1);
    assert_eq!(running.connects_to("192.0.2.12"), 1);
    assert!(running.recorder.reasons().contains(&reasons::OS_PROBED));
    running.stop().await;
}

#[tokio::test]
async fn secret_change_retriggers_only_dependent_hosts() {
    let store = Arc::new(InMemoryStore::new());
    store.apply_secret(secret("db")).await;
    store.apply_host(host("web-1", "192.0.2.11", "web")).await;
    store.apply_host(host("db-1", "192.0.2.21", "db")).await;
    let factory = InventoryFactory::new(
        Arc::clone(&store),
        &[("192.0.2.11", ubuntu("22.04")), ("192.0.2.21", ubuntu("22.04"))],
    );
    let running = start(Arc::clone(&store), factory).await;

    let db = ObjectKey::new(NAMESPACE, "db-1");
    let web = ObjectKey::new(NAMESPACE, "web-1");
    let s = &store;
    eventually("db-1 probed", || {
        let db = db.clone();
        async move { s.get_host(&db).await.is_some_and(|h| h.status.os == ubuntu("22.04")) }
    })
    .await;
    assert_eq!(store.get_host(&web).await.unwrap().status.os.name, "");
    assert_eq!(running.connects_to("192.0.2.11"), 0);

    // The missing credentials arrive; only web-1 references them.
    store.apply_secret(secret("web")).await;
    eventually("web-1 probed", || {
        let web = web.clone();
        async move { s.get_host(&web).await.is_some_and(|h| h.status.os == ubuntu("22.04")) }
    })
    .await;

    running.hosts.wait_idle().await;
    assert_eq!(running.connects_to("192.0.2.21"), 1);
    assert!(running.connects_to("192.0.2.11") >= 1);
    running.stop().await;
}

#[tokio::test]
async fn unchanged_reapply_does_not_reconcile_again() {
    let store = Arc::new(InMemoryStore::new());
    store.apply_secret(secret("fleet")).await;
    store.apply_host(host("web-1", "192.0.2.11", "fleet")).await;
    let factory = InventoryFactory::new(Arc::clone(&store), &[("192.0.2.11", ubuntu("22.04"))]);
    let running = start(Arc::clone(&store), factory).await;

    let r = &running;
    eventually("web-1 connected", || async move { r.connects_to("192.0.2.11") == 1 }).await;
    running.hosts.wait_idle().await;

    assert!(!store.apply_host(host("web-1", "192.0.2.11", "fleet")).await);
    assert!(!store.apply_secret(secret("fleet")).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    running.hosts.wait_idle().await;

    assert_eq!(running.connects_to("192.0.2.11"), 1);
    running.stop().await;
}
