//! Firewall resources and the metadata selector that picks their hosts.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::meta::{ObjectMeta, Resource};

/// A selector pattern failed to compile.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("invalid matcher: name: {0}")]
    Name(#[source] regex::Error),
    #[error("invalid matcher: namespace: {0}")]
    Namespace(#[source] regex::Error),
}

/// Regular expressions matched against a resource's name and namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataMatcher {
    pub name: String,
    /// Defaults to the namespace of the candidate being matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl MetadataMatcher {
    pub fn new(name: impl Into<String>, namespace: Option<&str>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.map(str::to_string),
        }
    }

    /// Tests `candidate` against both patterns.
    ///
    /// An unset or empty namespace pattern is replaced by the candidate's
    /// own namespace and compiled as a regular expression, so an
    /// unspecified pattern selects the candidate's namespace only.
    pub fn matches(&self, candidate: &ObjectMeta) -> Result<bool, PatternError> {
        let name_regex = Regex::new(&self.name).map_err(PatternError::Name)?;

        let namespace_expression = match self.namespace.as_deref() {
            Some(pattern) if !pattern.is_empty() => pattern,
            _ => candidate.namespace.as_str(),
        };
        let namespace_regex = Regex::new(namespace_expression).map_err(PatternError::Namespace)?;

        Ok(name_regex.is_match(&candidate.name) && namespace_regex.is_match(&candidate.namespace))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSelector {
    pub match_metadata: MetadataMatcher,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallSpec {
    pub host_selector: HostSelector,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallStatus {
    /// Hosts currently matched by the selector and eligible for enforcement.
    #[serde(default)]
    pub host_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Firewall {
    pub metadata: ObjectMeta,
    pub spec: FirewallSpec,
    #[serde(default)]
    pub status: FirewallStatus,
}

impl Firewall {
    pub fn new(metadata: ObjectMeta, selector: MetadataMatcher) -> Self {
        Self {
            metadata,
            spec: FirewallSpec {
                host_selector: HostSelector {
                    match_metadata: selector,
                },
            },
            status: FirewallStatus::default(),
        }
    }

    pub fn selector(&self) -> &MetadataMatcher {
        &self.spec.host_selector.match_metadata
    }
}

impl Resource for Firewall {
    const KIND: &'static str = "Firewall";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
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
