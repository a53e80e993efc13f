//! Operating system snapshots reported by a management probe.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const OS_UBUNTU: &str = "Ubuntu";
pub const OS_NXOS: &str = "NX-OS";

/// Placeholder for fields the probe could not read.
pub const UNKNOWN: &str = "Unknown";

/// Version string of an operating system, e.g. `22.04`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OsVersion(pub String);

impl OsVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    /// Major version, or `-1` if the first segment is not an integer.
    ///
    /// A leading `v` is ignored, so `v21.04` yields `21`.
    pub fn major(&self) -> i64 {
        let trimmed = self.0.strip_prefix('v').unwrap_or(&self.0);
        trimmed
            .split('.')
            .next()
            .and_then(|segment| segment.parse().ok())
            .unwrap_or(-1)
    }

    /// Minor version, or `-1` if there is no integer second segment.
    pub fn minor(&self) -> i64 {
        self.0
            .split('.')
            .nth(1)
            .and_then(|segment| segment.parse().ok())
            .unwrap_or(-1)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OsVersion {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Immutable snapshot of a host's operating system.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: OsVersion,
    #[serde(default)]
    pub kernel_version: String,
}

impl OsInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>, kernel: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: OsVersion::new(version),
            kernel_version: kernel.into(),
        }
    }
}

impl fmt::Display for OsInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} (kernel {})", self.name, self.version, self.kernel_version)
    }
}

/// The two fields of `/etc/os-release` that identify a distribution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OsRelease {
    pub name: String,
    pub version_id: String,
}

impl OsRelease {
    /// Parses the `KEY=value` format of `os-release(5)`.
    ///
    /// Values may be wrapped in single or double quotes. Missing keys fall
    /// back to [`UNKNOWN`] instead of failing, comments and blank lines are
    /// skipped.
    pub fn parse(raw: &str) -> Self {
        let mut name = None;
        let mut version_id = None;

        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = unquote(value.trim());
            match key.trim() {
                "NAME" => name = Some(value.to_string()),
                "VERSION_ID" => version_id = Some(value.to_string()),
                _ => {}
            }
        }

        Self {
            name: name.filter(|v| !v.is_empty()).unwrap_or_else(|| UNKNOWN.to_string()),
            version_id: version_id
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| UNKNOWN.to_string()),
        }
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value.strip_prefix(quote).and_then(|v| v.strip_suffix(quote)) {
            return inner;
        }
    }
    value
}
