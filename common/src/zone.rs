//! # Zone Model
//!
//! A zone is a site-level bootstrap unit: one router host, the DNS domain
//! holding the zone's records and the routing identity of the site.
//!
//! [`ZoneConfig`] is the loosely typed input (flags, config file). It is
//! turned into a [`Zone`] by [`ZoneConfig::validate`], which is the only way
//! to obtain one.

use std::fmt;
use std::net::Ipv4Addr;

use pnet::ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid router id {0:?}: expected an IPv4 address")]
    InvalidRouterId(String),
    #[error("invalid autonomous system number: must not be zero")]
    ZeroAsn,
    #[error("invalid hostname {0:?}: expected letters, digits, '-' and '.' only")]
    InvalidHostname(String),
    #[error("invalid gateway subnet {0:?}: {1}")]
    InvalidSubnet(String, String),
}

/// Unvalidated zone settings as collected from flags and files.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ZoneConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default)]
    pub router: RouterConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RouterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asn: Option<u32>,
    #[serde(default, alias = "gateway_subnet", skip_serializing_if = "Option::is_none")]
    pub gateway_subnet: Option<String>,
}

/// Validated zone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Zone {
    pub name: String,
    pub domain: String,
    pub router: ZoneRouter,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZoneRouter {
    pub hostname: String,
    pub id: Ipv4Addr,
    pub asn: u32,
    pub gateway_subnet: Option<Ipv4Network>,
}

impl ZoneRouter {
    /// First usable address of the gateway subnet, announced on loopback.
    pub fn gateway_address(&self) -> Option<(Ipv4Addr, u8)> {
        let subnet = self.gateway_subnet?;
        let first = match subnet.prefix() {
            31 | 32 => subnet.network(),
            _ => Ipv4Addr::from(u32::from(subnet.network()).saturating_add(1)),
        };
        Some((first, subnet.prefix()))
    }
}

fn required(value: &Option<String>, field: &'static str) -> Result<String, ValidationError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ValidationError::MissingField(field)),
    }
}

fn is_valid_hostname(hostname: &str) -> bool {
    hostname.len() <= 253
        && hostname.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

impl ZoneConfig {
    /// Structural validation. Never touches the network.
    pub fn validate(&self) -> Result<Zone, ValidationError> {
        let name = required(&self.name, "name")?;
        let domain = required(&self.domain, "domain")?;
        let hostname = required(&self.router.hostname, "router hostname")?;
        if !is_valid_hostname(&hostname) {
            return Err(ValidationError::InvalidHostname(hostname));
        }

        let raw_id = required(&self.router.id, "router id")?;
        let id: Ipv4Addr = raw_id
            .parse()
            .map_err(|_| ValidationError::InvalidRouterId(raw_id.clone()))?;

        let asn = match self.router.asn {
            None => return Err(ValidationError::MissingField("asn")),
            Some(0) => return Err(ValidationError::ZeroAsn),
            Some(asn) => asn,
        };

        let gateway_subnet = match self.router.gateway_subnet.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                raw.parse::<Ipv4Network>()
                    .map_err(|e| ValidationError::InvalidSubnet(raw.to_string(), e.to_string()))?,
            ),
        };

        Ok(Zone {
            name,
            domain,
            router: ZoneRouter {
                hostname,
                id,
                asn,
                gateway_subnet,
            },
        })
    }
}

pub const ENV_DNS_PROVIDER: &str = "DNS_PROVIDER";
pub const ENV_DNS_PROVIDER_CREDENTIAL: &str = "DNS_PROVIDER_CREDENTIAL";

/// DNS provider holding the zone's records.
///
/// Only ever read from the process environment, never from arguments.
#[derive(Clone, PartialEq, Eq)]
pub struct DnsProvider {
    pub name: String,
    pub credential: String,
}

impl DnsProvider {
    /// Builds the provider from a variable lookup such as `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let name = required(&lookup(ENV_DNS_PROVIDER), ENV_DNS_PROVIDER)?;
        let credential = required(&lookup(ENV_DNS_PROVIDER_CREDENTIAL), ENV_DNS_PROVIDER_CREDENTIAL)?;
        Ok(Self { name, credential })
    }
}

impl fmt::Debug for DnsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsProvider")
            .field("name", &self.name)
            .field("credential", &"<redacted>")
            .finish()
    }
}
