use std::sync::Arc;

use tracing::Span;
use zonewall_common::meta::ObjectKey;
use zonewall_core::controller::{FirewallReconciler, HostReconciler, Reconciler};
use zonewall_core::error::Error;
use zonewall_core::events::{EventType, MemoryRecorder, reasons};
use zonewall_core::manifest::Manifest;
use zonewall_core::store::{InMemoryStore, ResourceStore};

use crate::fixtures::{InventoryFactory, NAMESPACE, ubuntu};

const FLEET: &str = r#"
hosts:
  - metadata: { name: web-1, namespace: edge }
    spec: { host: 192.0.2.11, secretRef: { name: fleet } }
  - metadata: { name: web-2, namespace: edge }
    spec: { host: 192.0.2.12, secretRef: { name: fleet } }
  - metadata: { name: db-1, namespace: edge }
    spec: { host: 192.0.2.21, secretRef: { name: fleet } }
firewalls:
  - metadata: { name: web, namespace: edge }
    spec: { hostSelector: { matchMetadata: { name: "web-.*" } } }
secrets:
  - metadata: { name: fleet, namespace: edge }
    data: { passwordInsecure: hunter2 }
"#;

struct Fleet {
    store: Arc<InMemoryStore>,
    recorder: MemoryRecorder,
    hosts: HostReconciler<InMemoryStore, InventoryFactory>,
    firewalls: FirewallReconciler<InMemoryStore>,
}

async fn fleet() -> Fleet {
    let store = Arc::new(InMemoryStore::new());
    Manifest::from_yaml(FLEET).unwrap().sync(&store).await.unwrap();

    let factory = InventoryFactory::new(
        Arc::clone(&store),
        &[
            ("192.0.2.11", ubuntu("22.04")),
            ("192.0.2.12", ubuntu("24.04")),
            ("192.0.2.21", ubuntu("20.04")),
        ],
    );
    let recorder = MemoryRecorder::new();
    let hosts = HostReconciler::new(Arc::clone(&store), factory, Arc::new(recorder.clone()), Span::none());
    let firewalls = FirewallReconciler::new(Arc::clone(&store), Arc::new(recorder.clone()), Span::none());
    Fleet {
        store,
        recorder,
        hosts,
        firewalls,
    }
}

fn key(name: &str) -> ObjectKey {
    ObjectKey::new(NAMESPACE, name)
}

#[tokio::test]
async fn firewall_counts_probed_matching_hosts() {
    let fleet = fleet().await;
    for name in ["web-1", "web-2", "db-1"] {
        fleet.hosts.reconcile(&key(name)).await.unwrap();
    }

    fleet.firewalls.reconcile(&key("web")).await.unwrap();

    let firewall = fleet.store.get_firewall(&key("web")).await.unwrap();
    assert_eq!(firewall.status.host_count, 2);
    assert_eq!(
        fleet.recorder.latest(&key("web")).unwrap().reason,
        reasons::HOST_COUNT_UPDATED
    );
    // db-1 runs an unsupported release but is not selected.
    assert_eq!(
        fleet.store.get_host(&key("db-1")).await.unwrap().status.os,
        ubuntu("20.04")
    );
}

#[tokio::test]
async fn unprobed_selected_host_blocks_the_count() {
    let fleet = fleet().await;
    fleet.hosts.reconcile(&key("web-1")).await.unwrap();

    let err = fleet.firewalls.reconcile(&key("web")).await.unwrap_err();

    assert!(matches!(err, Error::Compatibility(_)));
    assert!(err.is_retryable());
    assert_eq!(fleet.store.get_firewall(&key("web")).await.unwrap().status.host_count, 0);
}

#[tokio::test]
async fn downgraded_host_keeps_previous_count() {
    let fleet = fleet().await;
    for name in ["web-1", "web-2"] {
        fleet.hosts.reconcile(&key(name)).await.unwrap();
    }
    fleet.firewalls.reconcile(&key("web")).await.unwrap();

    // web-2 was reinstalled with an older release.
    let mut status = fleet.store.get_host(&key("web-2")).await.unwrap().status;
    status.os = ubuntu("18.04");
    fleet.store.update_host_status(&key("web-2"), status).await.unwrap();

    let err = fleet.firewalls.reconcile(&key("web")).await.unwrap_err();

    assert!(err.to_string().contains("edge/web-2"));
    assert_eq!(fleet.store.get_firewall(&key("web")).await.unwrap().status.host_count, 2);
    let event = fleet.recorder.latest(&key("web")).unwrap();
    assert_eq!(event.reason, reasons::HOST_INCOMPATIBLE);
    assert_eq!(event.type_, EventType::Warning);
}

#[tokio::test]
async fn namespace_scoped_selector_ignores_other_namespaces() {
    let fleet = fleet().await;
    for name in ["web-1", "web-2"] {
        fleet.hosts.reconcile(&key(name)).await.unwrap();
    }
    fleet.firewalls.reconcile(&key("web")).await.unwrap();
    assert_eq!(fleet.store.get_firewall(&key("web")).await.unwrap().status.host_count, 2);

    let scoped = Manifest::from_yaml(&FLEET.replace(
        r#"matchMetadata: { name: "web-.*" }"#,
        r#"matchMetadata: { name: "web-.*", namespace: "core" }"#,
    ))
    .unwrap();
    scoped.sync(&fleet.store).await.unwrap();

    fleet.firewalls.reconcile(&key("web")).await.unwrap();

    assert_eq!(fleet.store.get_firewall(&key("web")).await.unwrap().status.host_count, 0);
}
