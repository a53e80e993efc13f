use async_trait::async_trait;
use zonewall_common::host::{DEFAULT_SSH_PORT, Host};
use zonewall_common::os::{OsInfo, OsRelease};
use zonewall_common::secret::Secret;
use zonewall_remote::RemoteShell;
use zonewall_remote::ssh::{SshConfig, SshSession, SshTarget};

use super::ManagementClient;
use crate::error::Result;

const OS_RELEASE: &str = "cat /etc/os-release";
const KERNEL_RELEASE: &str = "uname -r";

/// Manages a host over SSH.
pub struct SshManagementClient {
    config: SshConfig,
    session: Option<SshSession>,
    os: Option<OsInfo>,
}

impl SshManagementClient {
    pub fn new(config: SshConfig) -> Self {
        Self {
            config,
            session: None,
            os: None,
        }
    }

    pub fn from_host(host: &Host, secret: &Secret) -> Self {
        let ssh = &host.spec.ssh;

        let proxy = ssh.proxy_host.as_ref().filter(|h| !h.is_empty()).map(|proxy_host| SshTarget {
            host: proxy_host.clone(),
            port: ssh.proxy_port.unwrap_or(DEFAULT_SSH_PORT),
            user: ssh.proxy_user.clone(),
            fingerprint: ssh.proxy_fingerprint.clone(),
            credentials: secret.proxy_credentials(),
            identity_file: None,
        });

        let target = SshTarget {
            host: host.spec.address.clone(),
            port: host.spec.port,
            user: ssh.user.clone(),
            fingerprint: ssh.fingerprint.clone(),
            credentials: secret.primary_credentials(),
            identity_file: None,
        };

        Self::new(SshConfig { target, proxy })
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }
}

/// Reads the operating system of the host behind `shell`.
///
/// os-release and the kernel release are fetched by two separate commands;
/// if either fails nothing is returned.
pub async fn probe_os<S: RemoteShell + ?Sized>(shell: &mut S) -> Result<OsInfo> {
    let release = shell.run(OS_RELEASE).await?;
    let parsed = OsRelease::parse(&release.stdout);

    let kernel = shell.run(KERNEL_RELEASE).await?;

    Ok(OsInfo::new(parsed.name, parsed.version_id, kernel.trimmed()))
}

#[async_trait]
impl ManagementClient for SshManagementClient {
    async fn connect(&mut self) -> Result<()> {
        let mut session = SshSession::connect(&self.config).await?;
        match probe_os(&mut session).await {
            Ok(os) => {
                self.os = Some(os);
                self.session = Some(session);
                Ok(())
            }
            Err(err) => {
                // Keep the session so disconnect still tears it down.
                self.session = Some(session);
                Err(err)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        match self.session.take() {
            Some(mut session) => Ok(session.close().await?),
            None => Ok(()),
        }
    }

    fn current_os(&self) -> Option<&OsInfo> {
        self.os.as_ref()
    }
}
