use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::Span;
use zonewall_common::config::RetryConfig;
use zonewall_common::zone::{DnsProvider, ENV_DNS_PROVIDER, ENV_DNS_PROVIDER_CREDENTIAL, RouterConfig, ZoneConfig};
use zonewall_core::error::Error;
use zonewall_core::zone::hostname::{CLEAR_MARKER, READ_MARKER, record_previous_command};
use zonewall_core::zone::{ShellConnector, WanStatus, ZonePipeline};
use zonewall_remote::RemoteError;
use zonewall_remote::probe::{PORT_KUBE_API, PORT_SSH, ProbeStatus};
use zonewall_remote::testing::ScriptedShell;

use crate::fixtures::{SharedShell, TableProber};

const LINKS: &str = r#"[
 {"ifindex":1,"ifname":"lo","flags":["LOOPBACK","UP","LOWER_UP"],"link_type":"loopback","address":"00:00:00:00:00:00"},
 {"ifindex":2,"ifname":"ens3","flags":["BROADCAST","MULTICAST","UP","LOWER_UP"],"link_type":"ether","address":"52:54:00:12:34:56"},
 {"ifindex":3,"ifname":"ens4","flags":["BROADCAST","MULTICAST"],"link_type":"ether","address":"52:54:00:ab:cd:ef"}
]"#;

/// ens3 holds the DHCP lease carrying the default route; ens4 is bare.
const ADDRS: &str = r#"[
 {"ifindex":1,"ifname":"lo","flags":["LOOPBACK","UP","LOWER_UP"],"link_type":"loopback","address":"00:00:00:00:00:00","addr_info":[{"family":"inet","local":"127.0.0.1","prefixlen":8}]},
 {"ifindex":2,"ifname":"ens3","flags":["BROADCAST","MULTICAST","UP","LOWER_UP"],"link_type":"ether","address":"52:54:00:12:34:56","addr_info":[{"family":"inet","local":"192.0.2.1","prefixlen":24,"dynamic":true}]},
 {"ifindex":3,"ifname":"ens4","flags":["BROADCAST","MULTICAST"],"link_type":"ether","address":"52:54:00:ab:cd:ef","addr_info":[]}
]"#;

const ROUTE: &str = r#"[{"dst":"default","gateway":"192.0.2.1","dev":"ens3","protocol":"dhcp","flags":[]}]"#;

/// Hands out the given shells in order and remembers every one it opened.
#[derive(Clone)]
struct QueuedConnector {
    pending: Arc<Mutex<VecDeque<SharedShell>>>,
    opened: Arc<Mutex<Vec<SharedShell>>>,
}

impl QueuedConnector {
    fn new(shells: Vec<ScriptedShell>) -> Self {
        Self {
            pending: Arc::new(Mutex::new(shells.into_iter().map(SharedShell::new).collect())),
            opened: Arc::default(),
        }
    }

    fn opened(&self) -> Vec<SharedShell> {
        self.opened.lock().unwrap().clone()
    }

    /// Commands starting with `prefix` across every opened shell.
    async fn count(&self, prefix: &str) -> usize {
        let mut total = 0;
        for shell in self.opened() {
            total += shell.0.lock().await.count(prefix);
        }
        total
    }
}

#[async_trait]
impl ShellConnector for QueuedConnector {
    type Shell = SharedShell;

    async fn open(&self, host: &str) -> Result<SharedShell, RemoteError> {
        let shell = self.pending.lock().unwrap().pop_front().ok_or_else(|| RemoteError::Connect {
            target: host.to_string(),
            stderr: "Connection refused".to_string(),
        })?;
        self.opened.lock().unwrap().push(shell.clone());
        Ok(shell)
    }

    async fn host_fingerprint(&self, _host: &str) -> Result<String, RemoteError> {
        Ok("SHA256:uU0nbY3H0lzVXqUYhGRYZsKVEUUp5RA0ZzrA1pPQYE8".to_string())
    }
}

fn zone() -> ZoneConfig {
    ZoneConfig {
        name: Some("aar1".into()),
        domain: Some("example.net".into()),
        router: RouterConfig {
            hostname: Some("alfa.example.net".into()),
            id: Some("172.31.255.0".into()),
            asn: Some(65000),
            gateway_subnet: Some("198.51.100.0/24".into()),
        },
    }
}

fn dns() -> DnsProvider {
    DnsProvider::from_lookup(|key| match key {
        ENV_DNS_PROVIDER => Some("cloudflare".into()),
        ENV_DNS_PROVIDER_CREDENTIAL => Some("token".into()),
        _ => None,
    })
    .unwrap()
}

fn reachable() -> TableProber {
    TableProber::new(&[(PORT_SSH, ProbeStatus::Open), (PORT_KUBE_API, ProbeStatus::Filtered)])
}

fn fast_retry(attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts: attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
    }
}

/// Network state of a freshly installed host, minus the hostname.
fn fresh_network(shell: ScriptedShell) -> ScriptedShell {
    shell
        .always("ip -j link show", LINKS)
        .always("ip -j addr show", ADDRS)
        .always("sudo cat", "")
        .always("printf", "")
        .always("sudo netplan apply", "")
        .on("ip -j route show default", ROUTE)
        .always(CLEAR_MARKER, "")
}

#[tokio::test]
async fn fresh_host_is_fully_converged() {
    let shell = fresh_network(
        ScriptedShell::new()
            .on("hostnamectl hostname", "ubuntu\n")
            .on("sudo mkdir", "")
            .on("sudo hostnamectl hostname", "")
            .on("sudo sed -i", ""),
    );
    let connector = QueuedConnector::new(vec![shell]);
    let pipeline = ZonePipeline::new(reachable(), connector, Span::none());

    let report = pipeline
        .up_with_retries("192.0.2.1", &zone(), &dns(), &fast_retry(1))
        .await
        .unwrap();

    assert!(report.hostname_changed && report.loopback_changed && report.dhcp_changed);
    assert_eq!(
        report.wan,
        WanStatus::PendingReboot {
            interface: "ens3".into()
        }
    );
    assert!(report.fingerprint.starts_with("SHA256:"));
    assert_eq!(report.zone.router.asn, 65000);
}

#[tokio::test]
async fn fresh_host_sees_expected_commands() {
    let shell = fresh_network(
        ScriptedShell::new()
            .on("hostnamectl hostname", "ubuntu\n")
            .on("sudo mkdir", "")
            .on("sudo hostnamectl hostname", "")
            .on("sudo sed -i", ""),
    );
    let connector = QueuedConnector::new(vec![shell]);
    let pipeline = ZonePipeline::new(reachable(), connector.clone(), Span::none());
    pipeline
        .up_with_retries("192.0.2.1", &zone(), &dns(), &fast_retry(1))
        .await
        .unwrap();

    let opened = connector.opened();
    assert_eq!(opened.len(), 1);
    let shell = opened[0].0.lock().await;
    assert!(shell.closed);
    let mutations = shell.mutations();
    assert_eq!(mutations[0], record_previous_command("ubuntu"));
    assert_eq!(
        &mutations[1..4],
        &[
            "sudo hostnamectl hostname 'alfa.example.net'",
            "sudo sed -i 's/ubuntu/alfa.example.net/g' /etc/hosts",
            CLEAR_MARKER,
        ]
    );
    // DHCP only covers the bare ens4.
    let dhcp = shell
        .commands
        .iter()
        .find(|c| c.starts_with("printf") && c.contains("61-zonewall-dhcp"))
        .unwrap();
    assert!(dhcp.contains("nic-525400abcdef") && !dhcp.contains("nic-525400123456"));
    // Loopback, DHCP and the WAN rename are written; only the first two are applied live.
    assert_eq!(shell.count("printf"), 3);
    assert_eq!(shell.count("sudo netplan apply"), 2);
}

#[tokio::test]
async fn hosts_file_failure_resumes_without_second_rename() {
    let first = ScriptedShell::new()
        .on("hostnamectl hostname", "ubuntu\n")
        .on("sudo mkdir", "")
        .on("sudo hostnamectl hostname", "")
        .fail("sudo sed -i", "sed: couldn't open temporary file /etc/sedX1b2c3: Read-only file system");
    let second = fresh_network(
        ScriptedShell::new()
            .on("hostnamectl hostname", "alfa.example.net\n")
            .on("sudo sed -i", ""),
    );
    let connector = QueuedConnector::new(vec![first, second]);
    let pipeline = ZonePipeline::new(reachable(), connector.clone(), Span::none());

    let report = pipeline
        .up_with_retries("192.0.2.1", &zone(), &dns(), &fast_retry(3))
        .await
        .unwrap();

    assert!(report.hostname_changed);
    assert_eq!(connector.opened().len(), 2);
    assert_eq!(connector.count("sudo hostnamectl hostname").await, 1);
    assert_eq!(connector.count("sudo sed -i").await, 2);
}

#[tokio::test]
async fn rerun_after_partial_rename_finishes_hosts_file() {
    let interrupted = ScriptedShell::new()
        .on("hostnamectl hostname", "ubuntu\n")
        .on("sudo mkdir", "")
        .on("sudo hostnamectl hostname", "")
        .fail("sudo sed -i", "sed: couldn't open temporary file /etc/sedX1b2c3: Read-only file system");
    let first = QueuedConnector::new(vec![interrupted]);
    let err = ZonePipeline::new(reachable(), first.clone(), Span::none())
        .up_with_retries("192.0.2.1", &zone(), &dns(), &fast_retry(1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Stage { stage: "hostname", .. }));
    assert_eq!(first.count(&record_previous_command("ubuntu")).await, 1);

    // A second invocation starts from scratch; only the host remembers.
    let resumed = fresh_network(
        ScriptedShell::new()
            .on("hostnamectl hostname", "alfa.example.net\n")
            .on(READ_MARKER, "ubuntu\n")
            .on("sudo sed -i", ""),
    );
    let second = QueuedConnector::new(vec![resumed]);
    let report = ZonePipeline::new(reachable(), second.clone(), Span::none())
        .up_with_retries("192.0.2.1", &zone(), &dns(), &fast_retry(1))
        .await
        .unwrap();

    assert!(report.hostname_changed);
    assert_eq!(second.count("sudo hostnamectl hostname").await, 0);
    assert_eq!(
        second.count("sudo sed -i 's/ubuntu/alfa.example.net/g' /etc/hosts").await,
        1
    );
    assert_eq!(second.count(CLEAR_MARKER).await, 1);
}

#[tokio::test]
async fn dropped_kube_api_port_stops_before_connecting() {
    let prober = TableProber::new(&[(PORT_SSH, ProbeStatus::Open), (PORT_KUBE_API, ProbeStatus::Closed)]);
    let connector = QueuedConnector::new(vec![ScriptedShell::new()]);
    let pipeline = ZonePipeline::new(prober, connector.clone(), Span::none());

    let err = pipeline
        .up_with_retries("192.0.2.1", &zone(), &dns(), &fast_retry(2))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Stage { stage: "preflight-kube-api", .. }));
    assert_eq!(err.to_string(), "stage preflight-kube-api failed: preflight failed: port 7443 is closed");
    assert!(connector.opened().is_empty());
}

#[tokio::test]
async fn invalid_zone_is_not_retried() {
    let mut bad = zone();
    bad.router.id = Some("not-an-address".into());
    let connector = QueuedConnector::new(vec![]);
    let pipeline = ZonePipeline::new(reachable(), connector, Span::none());

    let err = pipeline
        .up_with_retries("192.0.2.1", &bad, &dns(), &fast_retry(5))
        .await
        .unwrap_err();

    assert!(!err.is_retryable());
    assert!(matches!(err, Error::Stage { stage: "validate", .. }));
}
