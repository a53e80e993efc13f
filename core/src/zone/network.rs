//! Interface discovery and netplan drop-ins.
//!
//! Every stage renders one drop-in under `/etc/netplan`, compares it with
//! what is on disk and only writes (and applies) when it differs. DHCP and
//! WAN entries are keyed by MAC address so netplan merges them into one
//! definition per NIC.
//!
//! DHCP is only declared for NICs without an IPv4 address, plus those the
//! DHCP drop-in already lists.

use std::collections::{BTreeMap, BTreeSet};

use pnet::util::MacAddr;
use serde::{Deserialize, Serialize};
use tracing::Span;
use zonewall_common::zone::ZoneRouter;
use zonewall_remote::shell::quote;
use zonewall_remote::{RemoteError, RemoteShell};

use crate::error::Result;

pub const LOOPBACK_FILE: &str = "/etc/netplan/60-zonewall-loopback.yaml";
pub const DHCP_FILE: &str = "/etc/netplan/61-zonewall-dhcp.yaml";
pub const WAN_FILE: &str = "/etc/netplan/62-zonewall-wan.yaml";

pub const WAN_NAME: &str = "wan";

const LIST_LINKS: &str = "ip -j link show";
const LIST_ADDRESSES: &str = "ip -j addr show";
const DEFAULT_ROUTE: &str = "ip -j route show default";
const NETPLAN_APPLY: &str = "sudo netplan apply";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub mac: Option<MacAddr>,
    pub loopback: bool,
    pub ethernet: bool,
    /// IPv4 addresses in CIDR form; only filled from `ip -j addr show`.
    pub ipv4: Vec<String>,
}

#[derive(Deserialize)]
struct IpLink {
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    link_type: String,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    addr_info: Vec<IpAddrInfo>,
}

#[derive(Deserialize)]
struct IpAddrInfo {
    #[serde(default)]
    family: String,
    #[serde(default)]
    local: String,
    #[serde(default)]
    prefixlen: u8,
}

#[derive(Deserialize)]
struct IpRoute {
    #[serde(default)]
    dev: Option<String>,
}

/// Parses the JSON of `ip -j link show` or `ip -j addr show`.
pub fn parse_links(raw: &str) -> std::result::Result<Vec<Interface>, RemoteError> {
    let links: Vec<IpLink> =
        serde_json::from_str(raw).map_err(|e| RemoteError::unexpected(LIST_LINKS, e.to_string()))?;

    Ok(links
        .into_iter()
        .map(|link| {
            let loopback = link.link_type == "loopback" || link.flags.iter().any(|f| f == "LOOPBACK");
            Interface {
                mac: link.address.as_deref().and_then(|a| a.parse().ok()),
                ethernet: !loopback && link.link_type == "ether",
                loopback,
                ipv4: link
                    .addr_info
                    .iter()
                    .filter(|a| a.family == "inet")
                    .map(|a| format!("{}/{}", a.local, a.prefixlen))
                    .collect(),
                name: link.ifname,
            }
        })
        .collect())
}

pub fn parse_default_route(raw: &str) -> std::result::Result<Option<String>, RemoteError> {
    let routes: Vec<IpRoute> =
        serde_json::from_str(raw).map_err(|e| RemoteError::unexpected(DEFAULT_ROUTE, e.to_string()))?;
    Ok(routes.into_iter().find_map(|r| r.dev))
}

pub async fn interfaces<S: RemoteShell + ?Sized>(shell: &mut S) -> Result<Vec<Interface>> {
    let output = shell.run(LIST_LINKS).await?;
    Ok(parse_links(&output.stdout)?)
}

#[derive(Default, Deserialize)]
struct DeclaredDoc {
    #[serde(default)]
    network: DeclaredNetwork,
}

#[derive(Default, Deserialize)]
struct DeclaredNetwork {
    #[serde(default)]
    ethernets: BTreeMap<String, serde_yaml::Value>,
}

/// Keys of the NICs declared in a drop-in. Unreadable content declares none.
fn declared_nics(content: &str) -> BTreeSet<String> {
    serde_yaml::from_str::<Option<DeclaredDoc>>(content)
        .ok()
        .flatten()
        .map(|doc| doc.network.ethernets.into_keys().collect())
        .unwrap_or_default()
}

#[derive(Serialize)]
struct NetplanDoc {
    network: NetplanNetwork,
}

#[derive(Serialize)]
struct NetplanNetwork {
    version: u8,
    ethernets: BTreeMap<String, EthernetConfig>,
}

#[derive(Default, Serialize)]
struct EthernetConfig {
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    match_: Option<MatchConfig>,
    #[serde(rename = "set-name", skip_serializing_if = "Option::is_none")]
    set_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dhcp4: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    addresses: Vec<String>,
}

#[derive(Serialize)]
struct MatchConfig {
    macaddress: String,
}

fn render(ethernets: BTreeMap<String, EthernetConfig>) -> std::result::Result<String, RemoteError> {
    let doc = NetplanDoc {
        network: NetplanNetwork { version: 2, ethernets },
    };
    serde_yaml::to_string(&doc).map_err(|e| RemoteError::unexpected("render netplan", e.to_string()))
}

/// Netplan key of a NIC identified by MAC address.
fn nic_key(mac: &MacAddr) -> String {
    format!("nic-{}", mac.to_string().replace(':', ""))
}

fn by_mac(mac: &MacAddr) -> Option<MatchConfig> {
    Some(MatchConfig {
        macaddress: mac.to_string(),
    })
}

pub fn loopback_addresses(router: &ZoneRouter) -> Vec<String> {
    let mut addresses = vec![format!("{}/32", router.id)];
    if let Some((address, prefix)) = router.gateway_address() {
        addresses.push(format!("{address}/{prefix}"));
    }
    addresses
}

pub fn render_loopback(loopback: &str, router: &ZoneRouter) -> std::result::Result<String, RemoteError> {
    let mut ethernets = BTreeMap::new();
    ethernets.insert(
        loopback.to_string(),
        EthernetConfig {
            addresses: loopback_addresses(router),
            ..Default::default()
        },
    );
    render(ethernets)
}

/// Ethernet NICs that get DHCP: unaddressed ones and those in `managed`.
pub fn dhcp_candidates<'a>(interfaces: &'a [Interface], managed: &BTreeSet<String>) -> Vec<&'a MacAddr> {
    interfaces
        .iter()
        .filter(|i| i.ethernet)
        .filter_map(|i| i.mac.as_ref().map(|mac| (i, mac)))
        .filter(|(i, mac)| i.ipv4.is_empty() || managed.contains(&nic_key(mac)))
        .map(|(_, mac)| mac)
        .collect()
}

pub fn render_dhcp(interfaces: &[Interface], managed: &BTreeSet<String>) -> std::result::Result<String, RemoteError> {
    let ethernets = dhcp_candidates(interfaces, managed)
        .into_iter()
        .map(|mac| {
            (
                nic_key(mac),
                EthernetConfig {
                    match_: by_mac(mac),
                    dhcp4: Some(true),
                    ..Default::default()
                },
            )
        })
        .collect();
    render(ethernets)
}

pub fn render_wan(mac: &MacAddr) -> std::result::Result<String, RemoteError> {
    let mut ethernets = BTreeMap::new();
    ethernets.insert(
        nic_key(mac),
        EthernetConfig {
            match_: by_mac(mac),
            set_name: Some(WAN_NAME.to_string()),
            ..Default::default()
        },
    );
    render(ethernets)
}

/// Contents of `path`, empty when it does not exist.
async fn read_file<S: RemoteShell + ?Sized>(shell: &mut S, path: &str) -> Result<String> {
    let output = shell
        .run(&format!("sudo cat {} 2>/dev/null || true", quote(path)))
        .await?;
    Ok(output.stdout)
}

async fn write_file<S: RemoteShell + ?Sized>(shell: &mut S, path: &str, content: &str) -> Result<()> {
    let path = quote(path);
    shell
        .run(&format!(
            "printf '%s' {} | sudo tee {path} > /dev/null && sudo chmod 600 {path}",
            quote(content)
        ))
        .await?;
    Ok(())
}

/// Writes `content` to `path` unless it is already there.
pub async fn ensure_file<S: RemoteShell + ?Sized>(shell: &mut S, path: &str, content: &str) -> Result<bool> {
    if read_file(shell, path).await? == content {
        return Ok(false);
    }
    write_file(shell, path, content).await?;
    Ok(true)
}

fn single_loopback(interfaces: &[Interface]) -> std::result::Result<&Interface, RemoteError> {
    let loopbacks: Vec<&Interface> = interfaces.iter().filter(|i| i.loopback).collect();
    match loopbacks.as_slice() {
        [only] => Ok(only),
        other => Err(RemoteError::unexpected(
            LIST_LINKS,
            format!("expected exactly one loopback interface, found {}", other.len()),
        )),
    }
}

/// Declares the router id (and the gateway address, if any) on loopback.
pub async fn converge_loopback<S: RemoteShell + ?Sized>(shell: &mut S, router: &ZoneRouter, span: &Span) -> Result<bool> {
    let interfaces = interfaces(shell).await?;
    let loopback = single_loopback(&interfaces)?;

    let content = render_loopback(&loopback.name, router)?;
    if !ensure_file(shell, LOOPBACK_FILE, &content).await? {
        tracing::info!(parent: span, interface = %loopback.name, "loopback addressing up to date");
        return Ok(false);
    }
    shell.run(NETPLAN_APPLY).await?;
    tracing::info!(parent: span, interface = %loopback.name, addresses = ?loopback_addresses(router), "loopback addressing configured");
    Ok(true)
}

/// Enables DHCPv4 on ethernet interfaces that have no IPv4 configuration.
pub async fn converge_dhcp<S: RemoteShell + ?Sized>(shell: &mut S, span: &Span) -> Result<bool> {
    let output = shell.run(LIST_ADDRESSES).await?;
    let interfaces = parse_links(&output.stdout)?;
    let current = read_file(shell, DHCP_FILE).await?;
    let managed = declared_nics(&current);

    for skipped in interfaces
        .iter()
        .filter(|i| i.ethernet && !i.ipv4.is_empty())
        .filter(|i| i.mac.as_ref().is_none_or(|mac| !managed.contains(&nic_key(mac))))
    {
        tracing::debug!(parent: span, interface = %skipped.name, addresses = ?skipped.ipv4, "already configured, leaving alone");
    }

    let candidates = dhcp_candidates(&interfaces, &managed).len();
    if candidates == 0 && current.is_empty() {
        tracing::info!(parent: span, "no unconfigured interfaces");
        return Ok(false);
    }
    let content = render_dhcp(&interfaces, &managed)?;
    if current == content {
        tracing::info!(parent: span, "dhcp client configuration up to date");
        return Ok(false);
    }
    write_file(shell, DHCP_FILE, &content).await?;
    shell.run(NETPLAN_APPLY).await?;
    tracing::info!(parent: span, interfaces = candidates, "dhcp client enabled");
    Ok(true)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WanStatus {
    /// The default route already leaves through `wan`.
    Named,
    /// `interface` is renamed to `wan` on the next boot.
    PendingReboot { interface: String },
}

/// Names the interface carrying the default route `wan`.
///
/// The rename is only declared, never applied live, so the session in use
/// survives.
pub async fn converge_wan<S: RemoteShell + ?Sized>(shell: &mut S, span: &Span) -> Result<WanStatus> {
    let route = shell.run(DEFAULT_ROUTE).await?;
    let Some(device) = parse_default_route(&route.stdout)? else {
        return Err(RemoteError::unexpected(DEFAULT_ROUTE, "no default route").into());
    };
    if device == WAN_NAME {
        tracing::info!(parent: span, "wan interface already named");
        return Ok(WanStatus::Named);
    }

    let interfaces = interfaces(shell).await?;
    let Some(mac) = interfaces.iter().find(|i| i.name == device).and_then(|i| i.mac) else {
        return Err(RemoteError::unexpected(
            LIST_LINKS,
            format!("default route device {device} has no hardware address"),
        )
        .into());
    };

    let written = ensure_file(shell, WAN_FILE, &render_wan(&mac)?).await?;
    tracing::info!(parent: span, interface = %device, %mac, written, "wan rename declared, effective after reboot");
    Ok(WanStatus::PendingReboot { interface: device })
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
