use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use zonewall_common::firewall::{Firewall, MetadataMatcher};
use zonewall_common::host::{Host, HostSpec, SecretRef, SshOptions};
use zonewall_common::meta::ObjectMeta;
use zonewall_common::os::{OS_UBUNTU, OsInfo};
use zonewall_common::secret::{Secret, keys};
use zonewall_core::error::{Error, Result};
use zonewall_core::management::{ClientFactory, ManagementClient, Protocol};
use zonewall_core::store::{InMemoryStore, ResourceStore};
use zonewall_core::zone::PortProber;
use zonewall_remote::probe::ProbeStatus;
use zonewall_remote::testing::ScriptedShell;
use zonewall_remote::{CommandOutput, RemoteError, RemoteShell};

pub const NAMESPACE: &str = "edge";

pub fn ubuntu(version: &str) -> OsInfo {
    OsInfo::new(OS_UBUNTU, version, "6.8.0-31-generic")
}

pub fn host(name: &str, address: &str, secret: &str) -> Host {
    Host::new(
        ObjectMeta::new(NAMESPACE, name),
        HostSpec {
            address: address.into(),
            port: 22,
            protocol: "SSH".into(),
            ssh: SshOptions::default(),
            secret_ref: SecretRef {
                namespace: None,
                name: secret.into(),
            },
        },
    )
}

pub fn firewall(name: &str, pattern: &str) -> Firewall {
    Firewall::new(ObjectMeta::new(NAMESPACE, name), MetadataMatcher::new(pattern, None))
}

pub fn secret(name: &str) -> Secret {
    Secret::new(ObjectMeta::new(NAMESPACE, name)).with(keys::PASSWORD, "hunter2")
}

/// Builds clients that report the OS registered for the host's address.
///
/// Like the real registry it refuses to build a client while the host's
/// credential bundle is missing.
pub struct InventoryFactory {
    store: Arc<InMemoryStore>,
    pub inventory: Arc<Mutex<HashMap<String, OsInfo>>>,
    pub connects: Arc<Mutex<Vec<String>>>,
    pub disconnects: Arc<Mutex<u32>>,
}

impl InventoryFactory {
    pub fn new(store: Arc<InMemoryStore>, inventory: &[(&str, OsInfo)]) -> Self {
        Self {
            store,
            inventory: Arc::new(Mutex::new(
                inventory.iter().map(|(a, os)| (a.to_string(), os.clone())).collect(),
            )),
            connects: Arc::default(),
            disconnects: Arc::default(),
        }
    }
}

pub struct InventoryClient {
    address: String,
    inventory: Arc<Mutex<HashMap<String, OsInfo>>>,
    connects: Arc<Mutex<Vec<String>>>,
    disconnects: Arc<Mutex<u32>>,
    os: Option<OsInfo>,
}

#[async_trait]
impl ManagementClient for InventoryClient {
    async fn connect(&mut self) -> Result<()> {
        self.connects.lock().unwrap().push(self.address.clone());
        let os = self.inventory.lock().unwrap().get(&self.address).cloned();
        match os {
            Some(os) => {
                self.os = Some(os);
                Ok(())
            }
            None => Err(RemoteError::Connect {
                target: self.address.clone(),
                stderr: "No route to host".into(),
            }
            .into()),
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        *self.disconnects.lock().unwrap() += 1;
        Ok(())
    }

    fn current_os(&self) -> Option<&OsInfo> {
        self.os.as_ref()
    }
}

#[async_trait]
impl ClientFactory for InventoryFactory {
    type Client = InventoryClient;

    async fn build(&self, host: &Host) -> Result<InventoryClient> {
        host.spec.protocol.parse::<Protocol>()?;
        let secret_key = host.secret_key();
        if self.store.get_secret(&secret_key).await.is_none() {
            return Err(Error::SecretNotFound(secret_key));
        }
        Ok(InventoryClient {
            address: host.spec.address.clone(),
            inventory: Arc::clone(&self.inventory),
            connects: Arc::clone(&self.connects),
            disconnects: Arc::clone(&self.disconnects),
            os: None,
        })
    }
}

/// Fixed port table; ports not listed are filtered.
pub struct TableProber(pub HashMap<u16, ProbeStatus>);

impl TableProber {
    pub fn new(entries: &[(u16, ProbeStatus)]) -> Self {
        Self(entries.iter().copied().collect())
    }
}

#[async_trait]
impl PortProber for TableProber {
    async fn probe(&self, _host: &str, port: u16) -> ProbeStatus {
        self.0.get(&port).copied().unwrap_or(ProbeStatus::Filtered)
    }
}

/// A scripted shell that stays inspectable after being handed out.
#[derive(Clone, Default)]
pub struct SharedShell(pub Arc<tokio::sync::Mutex<ScriptedShell>>);

impl SharedShell {
    pub fn new(shell: ScriptedShell) -> Self {
        Self(Arc::new(tokio::sync::Mutex::new(shell)))
    }
}

#[async_trait]
impl RemoteShell for SharedShell {
    async fn run(&mut self, command: &str) -> std::result::Result<CommandOutput, RemoteError> {
        self.0.lock().await.run(command).await
    }

    async fn close(&mut self) -> std::result::Result<(), RemoteError> {
        self.0.lock().await.close().await
    }
}

/// Polls `check` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
