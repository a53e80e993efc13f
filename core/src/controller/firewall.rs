use std::sync::Arc;

use async_trait::async_trait;
use tracing::Span;
use zonewall_common::compat::{self, Compatibility};
use zonewall_common::firewall::{Firewall, FirewallStatus};
use zonewall_common::meta::{ObjectKey, Resource};

use super::{Action, Reconciler};
use crate::error::{Error, Result};
use crate::events::{Event, EventRecorder, reasons};
use crate::store::ResourceStore;

/// Maps a firewall's selector onto the compatible hosts it covers.
///
/// Evaluation is fail closed: one invalid pattern or one incompatible
/// selected host aborts the pass and nothing is written.
pub struct FirewallReconciler<S> {
    store: Arc<S>,
    recorder: Arc<dyn EventRecorder>,
    span: Span,
}

impl<S: ResourceStore> FirewallReconciler<S> {
    pub fn new(store: Arc<S>, recorder: Arc<dyn EventRecorder>, span: Span) -> Self {
        Self {
            store,
            recorder,
            span,
        }
    }

    fn warn(&self, key: &ObjectKey, reason: &'static str, err: &Error) {
        self.recorder
            .record(Event::warning(Firewall::KIND, key.clone(), reason, err.to_string()));
    }
}

#[async_trait]
impl<S: ResourceStore + 'static> Reconciler for FirewallReconciler<S> {
    fn name(&self) -> &'static str {
        "firewall"
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let Some(firewall) = self.store.get_firewall(key).await else {
            return Ok(Action::await_change());
        };

        let mut selected = 0usize;
        for host in self.store.list_hosts().await {
            let matched = match firewall.selector().matches(&host.metadata) {
                Ok(matched) => matched,
                Err(err) => {
                    let err = Error::from(err);
                    self.warn(key, reasons::INVALID_HOST_SELECTOR, &err);
                    return Err(err);
                }
            };
            if !matched {
                continue;
            }

            if let Compatibility::Incompatible(reason) = compat::check(&host.status.os) {
                let err = Error::Compatibility(format!("{reason}: {}", host.key()));
                self.warn(key, reasons::HOST_INCOMPATIBLE, &err);
                return Err(err);
            }
            selected += 1;
        }

        if firewall.status.host_count != selected {
            tracing::info!(
                parent: &self.span,
                firewall = %key,
                previous = firewall.status.host_count,
                host_count = selected,
                "host count changed"
            );
            self.store
                .update_firewall_status(key, FirewallStatus { host_count: selected })
                .await?;
            self.recorder.record(Event::normal(
                Firewall::KIND,
                key.clone(),
                reasons::HOST_COUNT_UPDATED,
                format!("selecting {selected} host(s)"),
            ));
        }

        Ok(Action::await_change())
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
