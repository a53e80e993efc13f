//! Remotely administered hosts.

use serde::{Deserialize, Serialize};

use crate::meta::{ObjectKey, ObjectMeta, Resource};
use crate::os::OsInfo;

/// Protocol tag of the SSH transport.
pub const PROTOCOL_SSH: &str = "SSH";

pub const DEFAULT_SSH_PORT: u16 = 22;

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_protocol() -> String {
    PROTOCOL_SSH.to_string()
}

/// Options of the SSH transport.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshOptions {
    /// Host key fingerprint in the format `{algorithm}:{hash}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Jump host the connection is tunnelled through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_user: Option<String>,
}

/// Reference to the credential bundle of a host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    /// Defaults to the namespace of the referencing host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl SecretRef {
    pub fn resolve(&self, owner_namespace: &str) -> ObjectKey {
        let namespace = match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => owner_namespace,
        };
        ObjectKey::new(namespace, &self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSpec {
    #[serde(alias = "host")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Declared protocol tag. Resolved to a transport when a management
    /// client is built, so unknown tags surface as construction errors.
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub ssh: SshOptions,
    pub secret_ref: SecretRef,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStatus {
    #[serde(default)]
    pub os: OsInfo,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub metadata: ObjectMeta,
    pub spec: HostSpec,
    #[serde(default)]
    pub status: HostStatus,
}

impl Host {
    pub fn new(metadata: ObjectMeta, spec: HostSpec) -> Self {
        Self {
            metadata,
            spec,
            status: HostStatus::default(),
        }
    }

    /// Key of the credential bundle this host depends on.
    pub fn secret_key(&self) -> ObjectKey {
        self.spec.secret_ref.resolve(&self.metadata.namespace)
    }
}

impl Resource for Host {
    const KIND: &'static str = "Host";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let host: Host = serde_yaml::from_str(
            r#"
metadata:
  name: web-1
  namespace: edge
spec:
  host: 192.0.2.10
  secretRef:
    name: web-credentials
"#,
        )
        .unwrap();

        assert_eq!(host.spec.address, "192.0.2.10");
        assert_eq!(host.spec.port, DEFAULT_SSH_PORT);
        assert_eq!(host.spec.protocol, PROTOCOL_SSH);
        assert_eq!(host.secret_key(), ObjectKey::new("edge", "web-credentials"));
        assert_eq!(host.status, HostStatus::default());
    }

    #[test]
    fn secret_ref_namespace_overrides_owner() {
        let secret_ref = SecretRef {
            namespace: Some("vault".into()),
            name: "shared".into(),
        };
        assert_eq!(secret_ref.resolve("edge"), ObjectKey::new("vault", "shared"));

        let empty = SecretRef {
            namespace: Some(String::new()),
            name: "shared".into(),
        };
        assert_eq!(empty.resolve("edge"), ObjectKey::new("edge", "shared"));
    }
}
