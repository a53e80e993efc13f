use std::sync::Arc;

use async_trait::async_trait;
use tracing::Span;
use zonewall_common::host::{Host, HostStatus};
use zonewall_common::meta::{ObjectKey, Resource};

use super::{Action, Reconciler};
use crate::error::{Error, Result};
use crate::events::{Event, EventRecorder, reasons};
use crate::management::{ClientFactory, ManagementClient};
use crate::store::ResourceStore;

/// Observes the operating system of hosts.
pub struct HostReconciler<S, F> {
    store: Arc<S>,
    factory: F,
    recorder: Arc<dyn EventRecorder>,
    span: Span,
}

impl<S, F> HostReconciler<S, F>
where
    S: ResourceStore,
    F: ClientFactory,
{
    pub fn new(store: Arc<S>, factory: F, recorder: Arc<dyn EventRecorder>, span: Span) -> Self {
        Self {
            store,
            factory,
            recorder,
            span,
        }
    }

    fn connection_failed(&self, key: &ObjectKey, err: &Error) {
        self.recorder.record(Event::warning(
            Host::KIND,
            key.clone(),
            reasons::CONNECTION_FAILED,
            format!("failed to connect to host: {err}"),
        ));
    }

    /// Connects, reads the observed OS and always disconnects.
    async fn observe(&self, host: &Host, client: &mut F::Client) -> Result<HostStatus> {
        let result = match client.connect().await {
            Ok(()) => client
                .current_os()
                .cloned()
                .map(|os| HostStatus { os })
                .ok_or(Error::NotConnected),
            Err(err) => Err(err),
        };

        if let Err(err) = client.disconnect().await {
            tracing::warn!(
                parent: &self.span,
                host = %host.key(),
                error = %err,
                "failed to disconnect from host"
            );
        }
        result
    }
}

#[async_trait]
impl<S, F> Reconciler for HostReconciler<S, F>
where
    S: ResourceStore + 'static,
    F: ClientFactory + 'static,
{
    fn name(&self) -> &'static str {
        "host"
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let Some(host) = self.store.get_host(key).await else {
            tracing::debug!(parent: &self.span, host = %key, "host no longer exists");
            return Ok(Action::await_change());
        };

        let mut client = match self.factory.build(&host).await {
            Ok(client) => client,
            Err(err) => {
                self.connection_failed(key, &err);
                return Err(err);
            }
        };

        let status = match self.observe(&host, &mut client).await {
            Ok(status) => status,
            Err(err) => {
                self.connection_failed(key, &err);
                return Err(err);
            }
        };

        let note = format!("observed {}", status.os);
        match self.store.update_host_status(key, status).await {
            Ok(()) => {}
            Err(Error::HostNotFound(_)) => {
                tracing::debug!(parent: &self.span, host = %key, "host deleted during reconcile");
                return Ok(Action::await_change());
            }
            Err(err) => return Err(err),
        }

        self.recorder.record(Event::normal(Host::KIND, key.clone(), reasons::OS_PROBED, note));
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
