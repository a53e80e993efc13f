//! Declarative fleet manifest seeding the resource store.
//!
//! ```yaml
//! hosts:
//!   - metadata: { name: web-1, namespace: edge }
//!     spec: { host: 192.0.2.10, secretRef: { name: web-credentials } }
//! firewalls:
//!   - metadata: { name: edge }
//!     spec: { hostSelector: { matchMetadata: { name: "web-.*" } } }
//! secrets:
//!   - metadata: { name: web-credentials, namespace: edge }
//!     data: { passwordInsecure: hunter2 }
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;
use zonewall_common::firewall::Firewall;
use zonewall_common::host::Host;
use zonewall_common::meta::{ObjectKey, Resource};
use zonewall_common::secret::Secret;

use crate::error::{Error, Result};
use crate::store::InMemoryStore;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub hosts: Vec<Host>,
    #[serde(default)]
    pub firewalls: Vec<Firewall>,
    #[serde(default)]
    pub secrets: Vec<Secret>,
}

/// Outcome of applying a manifest to a store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub changed: usize,
    pub deleted: usize,
}

fn unique_keys<R: Resource>(items: &[R]) -> Result<BTreeSet<ObjectKey>> {
    let mut keys = BTreeSet::new();
    for item in items {
        if !keys.insert(item.key()) {
            return Err(Error::Manifest(format!("duplicate {} {}", R::KIND, item.key())));
        }
    }
    Ok(keys)
}

impl Manifest {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let manifest: Manifest = serde_yaml::from_str(raw).map_err(|e| Error::Manifest(e.to_string()))?;
        unique_keys(&manifest.hosts)?;
        unique_keys(&manifest.firewalls)?;
        unique_keys(&manifest.secrets)?;
        Ok(manifest)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Manifest(format!("{}: {e}", path.display())))?;
        Self::from_yaml(&raw)
    }

    /// Makes the store's declared state equal to this manifest.
    ///
    /// Secrets are applied first so that hosts triggered by their own change
    /// find their credentials. Observed status of surviving resources is
    /// kept.
    pub async fn sync(&self, store: &InMemoryStore) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        let secrets = unique_keys(&self.secrets)?;
        let hosts = unique_keys(&self.hosts)?;
        let firewalls = unique_keys(&self.firewalls)?;

        for secret in &self.secrets {
            report.changed += usize::from(store.apply_secret(secret.clone()).await);
        }
        for host in &self.hosts {
            report.changed += usize::from(store.apply_host(host.clone()).await);
        }
        for firewall in &self.firewalls {
            report.changed += usize::from(store.apply_firewall(firewall.clone()).await);
        }

        for key in store.firewall_keys().await {
            if !firewalls.contains(&key) {
                report.deleted += usize::from(store.delete_firewall(&key).await);
            }
        }
        for key in store.host_keys().await {
            if !hosts.contains(&key) {
                report.deleted += usize::from(store.delete_host(&key).await);
            }
        }
        for key in store.secret_keys().await {
            if !secrets.contains(&key) {
                report.deleted += usize::from(store.delete_secret(&key).await);
            }
        }

        Ok(report)
    }
}
