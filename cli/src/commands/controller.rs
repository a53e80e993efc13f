use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use colored::*;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Span, info_span};
use zonewall_common::config::{ControllerConfig, RetryConfig};
use zonewall_common::firewall::Firewall;
use zonewall_common::host::Host;
use zonewall_common::meta::{ObjectKey, Resource};
use zonewall_core::controller::{self, Controller, FirewallReconciler, HostReconciler};
use zonewall_core::events::{EventRecorder, EventType, FanoutRecorder, LatestEvents, TracingRecorder};
use zonewall_core::management::Registry;
use zonewall_core::manifest::Manifest;
use zonewall_core::queue::WorkQueue;
use zonewall_core::store::{InMemoryStore, ResourceStore};

use crate::commands::ControllerArgs;
use crate::terminal::{colors, print};
use crate::zprint;

/// Attempts per key when running with `--once`, so failing keys are
/// eventually dropped and the queues drain.
const ONCE_MAX_ATTEMPTS: u32 = 3;

fn controller_config(args: &ControllerArgs) -> ControllerConfig {
    ControllerConfig {
        workers: args.workers.max(1),
        resync: (args.resync > 0).then(|| Duration::from_secs(args.resync)),
        retry: if args.once {
            RetryConfig::with_max_attempts(ONCE_MAX_ATTEMPTS)
        } else {
            RetryConfig::default()
        },
    }
}

async fn enqueue_all(store: &InMemoryStore, hosts: &WorkQueue<ObjectKey>, firewalls: &WorkQueue<ObjectKey>) {
    for key in store.host_keys().await {
        hosts.add(key);
    }
    for key in store.firewall_keys().await {
        firewalls.add(key);
    }
}

async fn sync_manifest(path: &Path, store: &InMemoryStore, span: &Span) -> anyhow::Result<()> {
    let manifest = Manifest::load(path)
        .await
        .with_context(|| format!("failed to load manifest {}", path.display()))?;
    let report = manifest.sync(store).await?;
    tracing::info!(
        parent: span,
        manifest = %path.display(),
        changed = report.changed,
        deleted = report.deleted,
        "manifest synced"
    );
    Ok(())
}

async fn wait_drained(hosts: &WorkQueue<ObjectKey>, firewalls: &WorkQueue<ObjectKey>) {
    loop {
        hosts.wait_idle().await;
        firewalls.wait_idle().await;
        if hosts.is_idle() && firewalls.is_idle() {
            return;
        }
    }
}

fn event_cell(recorder: &LatestEvents, kind: &'static str, key: &ObjectKey) -> ColoredString {
    match recorder.get(kind, key) {
        Some(event) if event.type_ == EventType::Warning => event.reason.color(colors::WARN),
        Some(event) => event.reason.color(colors::GOOD),
        None => "-".color(colors::SEPARATOR),
    }
}

async fn print_status(store: &InMemoryStore, recorder: &LatestEvents) {
    print::header("hosts");
    let mut hosts = store.list_hosts().await;
    hosts.sort_by_key(|h| h.key());
    let rows: Vec<Vec<ColoredString>> = hosts
        .iter()
        .map(|host| {
            let os = &host.status.os;
            vec![
                host.key().to_string().normal(),
                host.spec.address.as_str().normal(),
                os.name.as_str().normal(),
                os.version.as_str().normal(),
                os.kernel_version.as_str().normal(),
                event_cell(recorder, Host::KIND, &host.key()),
            ]
        })
        .collect();
    print::table(&["HOST", "ADDRESS", "OS", "VERSION", "KERNEL", "LAST EVENT"], &rows);

    zprint!();
    print::header("firewalls");
    let mut firewalls = store.list_firewalls().await;
    firewalls.sort_by_key(|f| f.key());
    let rows: Vec<Vec<ColoredString>> = firewalls
        .iter()
        .map(|firewall| {
            vec![
                firewall.key().to_string().normal(),
                firewall.selector().name.as_str().normal(),
                firewall.status.host_count.to_string().normal(),
                event_cell(recorder, Firewall::KIND, &firewall.key()),
            ]
        })
        .collect();
    print::table(&["FIREWALL", "SELECTOR", "HOSTS", "LAST EVENT"], &rows);
}

pub async fn run(args: ControllerArgs) -> anyhow::Result<()> {
    let span = info_span!("controller");
    let config = controller_config(&args);

    let store = Arc::new(InMemoryStore::new());
    let changes = store.subscribe();
    sync_manifest(&args.manifest, &store, &span).await?;

    let memory = Arc::new(LatestEvents::new());
    let log: Arc<dyn EventRecorder> = Arc::new(TracingRecorder::new(span.clone()));
    let table: Arc<dyn EventRecorder> = memory.clone();
    let recorder: Arc<dyn EventRecorder> = Arc::new(FanoutRecorder::new(vec![log, table]));

    let cancel = CancellationToken::new();
    let host_queue = WorkQueue::new(cancel.child_token());
    let firewall_queue = WorkQueue::new(cancel.child_token());

    let hosts = Arc::new(Controller::new(
        HostReconciler::new(
            store.clone(),
            Registry::new(store.clone(), span.clone()),
            recorder.clone(),
            span.clone(),
        ),
        host_queue.clone(),
        config.clone(),
        span.clone(),
    ));
    let firewalls = Arc::new(Controller::new(
        FirewallReconciler::new(store.clone(), recorder.clone(), span.clone()),
        firewall_queue.clone(),
        config.clone(),
        span.clone(),
    ));

    let mut tasks = JoinSet::new();
    tasks.spawn(controller::dispatch_changes(
        changes,
        store.clone(),
        host_queue.clone(),
        firewall_queue.clone(),
        cancel.clone(),
        span.clone(),
    ));
    tasks.spawn(hosts.run());
    tasks.spawn(firewalls.run());

    enqueue_all(&store, &host_queue, &firewall_queue).await;

    if args.once {
        wait_drained(&host_queue, &firewall_queue).await;
    } else {
        let mut resync = config.resync.map(tokio::time::interval);
        if let Some(interval) = resync.as_mut() {
            // The first tick completes immediately.
            interval.tick().await;
        }
        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal.context("failed to listen for ctrl-c")?;
                    tracing::info!(parent: &span, "shutting down");
                    break;
                }
                _ = async {
                    match resync.as_mut() {
                        Some(interval) => { interval.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    if let Err(err) = sync_manifest(&args.manifest, &store, &span).await {
                        tracing::warn!(parent: &span, error = %format!("{err:#}"), "resync failed");
                        continue;
                    }
                    enqueue_all(&store, &host_queue, &firewall_queue).await;
                }
            }
        }
    }

    cancel.cancel();
    while tasks.join_next().await.is_some() {}

    print_status(&store, &memory).await;
    Ok(())
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
