//! In-process resource store with change notifications.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use zonewall_common::firewall::{Firewall, FirewallStatus};
use zonewall_common::host::{Host, HostStatus};
use zonewall_common::meta::{ObjectKey, Resource};
use zonewall_common::secret::Secret;

use crate::error::{Error, Result};

/// A declared resource was created, changed or removed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Change {
    Host(ObjectKey),
    Firewall(ObjectKey),
    Secret(ObjectKey),
}

/// Read access to declared state and write access to observed status.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_host(&self, key: &ObjectKey) -> Option<Host>;

    async fn list_hosts(&self) -> Vec<Host>;

    async fn update_host_status(&self, key: &ObjectKey, status: HostStatus) -> Result<()>;

    async fn get_firewall(&self, key: &ObjectKey) -> Option<Firewall>;

    async fn list_firewalls(&self) -> Vec<Firewall>;

    async fn update_firewall_status(&self, key: &ObjectKey, status: FirewallStatus) -> Result<()>;

    async fn get_secret(&self, key: &ObjectKey) -> Option<Secret>;

    /// Hosts whose secret reference resolves to `secret`.
    async fn hosts_for_secret(&self, secret: &ObjectKey) -> Vec<ObjectKey>;
}

#[derive(Default)]
struct State {
    hosts: BTreeMap<ObjectKey, Host>,
    firewalls: BTreeMap<ObjectKey, Firewall>,
    secrets: BTreeMap<ObjectKey, Secret>,
    // secret key -> hosts referencing it
    secret_index: BTreeMap<ObjectKey, BTreeSet<ObjectKey>>,
}

impl State {
    fn unindex(&mut self, host: &Host) {
        let secret = host.secret_key();
        if let Some(hosts) = self.secret_index.get_mut(&secret) {
            hosts.remove(&host.key());
            if hosts.is_empty() {
                self.secret_index.remove(&secret);
            }
        }
    }

    fn index(&mut self, host: &Host) {
        self.secret_index
            .entry(host.secret_key())
            .or_default()
            .insert(host.key());
    }
}

/// Resource store kept in memory.
///
/// Applying declared state notifies subscribers only when the declaration
/// actually changed; status writes never notify.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Change>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Change> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.subscribers.lock() {
            Ok(mut subs) => subs.push(tx),
            Err(poisoned) => poisoned.into_inner().push(tx),
        }
        rx
    }

    fn notify(&self, change: Change) {
        let mut subs = match self.subscribers.lock() {
            Ok(subs) => subs,
            Err(poisoned) => poisoned.into_inner(),
        };
        subs.retain(|tx| tx.send(change.clone()).is_ok());
    }

    /// Creates or replaces a host declaration. Observed status survives.
    pub async fn apply_host(&self, mut host: Host) -> bool {
        let key = host.key();
        let changed = {
            let mut state = self.state.write().await;
            let previous = state.hosts.get(&key).cloned();
            match previous {
                Some(prev) if prev.metadata == host.metadata && prev.spec == host.spec => false,
                prev => {
                    if let Some(prev) = &prev {
                        state.unindex(prev);
                        host.status = prev.status.clone();
                    }
                    state.index(&host);
                    state.hosts.insert(key.clone(), host);
                    true
                }
            }
        };
        if changed {
            self.notify(Change::Host(key));
        }
        changed
    }

    pub async fn delete_host(&self, key: &ObjectKey) -> bool {
        let removed = {
            let mut state = self.state.write().await;
            match state.hosts.remove(key) {
                Some(host) => {
                    state.unindex(&host);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.notify(Change::Host(key.clone()));
        }
        removed
    }

    pub async fn apply_firewall(&self, mut firewall: Firewall) -> bool {
        let key = firewall.key();
        let changed = {
            let mut state = self.state.write().await;
            let previous = state.firewalls.get(&key).cloned();
            match previous {
                Some(prev) if prev.metadata == firewall.metadata && prev.spec == firewall.spec => false,
                prev => {
                    if let Some(prev) = prev {
                        firewall.status = prev.status;
                    }
                    state.firewalls.insert(key.clone(), firewall);
                    true
                }
            }
        };
        if changed {
            self.notify(Change::Firewall(key));
        }
        changed
    }

    pub async fn delete_firewall(&self, key: &ObjectKey) -> bool {
        let removed = self.state.write().await.firewalls.remove(key).is_some();
        if removed {
            self.notify(Change::Firewall(key.clone()));
        }
        removed
    }

    pub async fn apply_secret(&self, secret: Secret) -> bool {
        let key = secret.key();
        let changed = {
            let mut state = self.state.write().await;
            match state.secrets.get(&key) {
                Some(prev) if prev == &secret => false,
                _ => {
                    state.secrets.insert(key.clone(), secret);
                    true
                }
            }
        };
        if changed {
            self.notify(Change::Secret(key));
        }
        changed
    }

    pub async fn delete_secret(&self, key: &ObjectKey) -> bool {
        let removed = self.state.write().await.secrets.remove(key).is_some();
        if removed {
            self.notify(Change::Secret(key.clone()));
        }
        removed
    }

    pub async fn host_keys(&self) -> Vec<ObjectKey> {
        self.state.read().await.hosts.keys().cloned().collect()
    }

    pub async fn firewall_keys(&self) -> Vec<ObjectKey> {
        self.state.read().await.firewalls.keys().cloned().collect()
    }

    pub async fn secret_keys(&self) -> Vec<ObjectKey> {
        self.state.read().await.secrets.keys().cloned().collect()
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get_host(&self, key: &ObjectKey) -> Option<Host> {
        self.state.read().await.hosts.get(key).cloned()
    }

    async fn list_hosts(&self) -> Vec<Host> {
        self.state.read().await.hosts.values().cloned().collect()
    }

    async fn update_host_status(&self, key: &ObjectKey, status: HostStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let host = state
            .hosts
            .get_mut(key)
            .ok_or_else(|| Error::HostNotFound(key.clone()))?;
        host.status = status;
        Ok(())
    }

    async fn get_firewall(&self, key: &ObjectKey) -> Option<Firewall> {
        self.state.read().await.firewalls.get(key).cloned()
    }

    async fn list_firewalls(&self) -> Vec<Firewall> {
        self.state.read().await.firewalls.values().cloned().collect()
    }

    async fn update_firewall_status(&self, key: &ObjectKey, status: FirewallStatus) -> Result<()> {
        let mut state = self.state.write().await;
        match state.firewalls.get_mut(key) {
            Some(firewall) => {
                firewall.status = status;
                Ok(())
            }
            // Deleted while its reconcile was running.
            None => Ok(()),
        }
    }

    async fn get_secret(&self, key: &ObjectKey) -> Option<Secret> {
        self.state.read().await.secrets.get(key).cloned()
    }

    async fn hosts_for_secret(&self, secret: &ObjectKey) -> Vec<ObjectKey> {
        self.state
            .read()
            .await
            .secret_index
            .get(secret)
            .map(|hosts| hosts.iter().cloned().collect())
            .unwrap_or_default()
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
