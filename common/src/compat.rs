//! Compatibility gate for firewall enforcement.
//!
//! Only hosts whose packet filter can be driven by zonewall are eligible.
//! Today that is Ubuntu from 21.04 onwards, the first release shipping
//! nftables as the default backend.

use crate::os::{OS_UBUNTU, OsInfo};

const MIN_UBUNTU_MAJOR: i64 = 21;
const MIN_UBUNTU_MINOR: i64 = 4;

/// Outcome of [`check`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Compatibility {
    Compatible,
    Incompatible(String),
}

impl Compatibility {
    pub fn is_compatible(&self) -> bool {
        matches!(self, Compatibility::Compatible)
    }

    pub fn reason(&self) -> &str {
        match self {
            Compatibility::Compatible => "",
            Compatibility::Incompatible(reason) => reason,
        }
    }
}

/// Evaluates an observed OS against the supported platform matrix.
///
/// Versions compare as `(major, minor)`. An unparsable version yields
/// `-1` segments and therefore never passes.
pub fn check(os: &OsInfo) -> Compatibility {
    if os.name != OS_UBUNTU {
        let name = if os.name.is_empty() { "<none>" } else { &os.name };
        return Compatibility::Incompatible(format!("unsupported OS: {name}"));
    }

    let major = os.version.major();
    let minor = os.version.minor();

    if major < MIN_UBUNTU_MAJOR || (major == MIN_UBUNTU_MAJOR && minor < MIN_UBUNTU_MINOR) {
        return Compatibility::Incompatible(format!(
            "unsupported OS version: Ubuntu 21.04 or later is required, found {}",
            os.version
        ));
    }

    Compatibility::Compatible
}

/// Tuple form of [`check`]: `(ok, reason)`.
pub fn is_compatible(os: &OsInfo) -> (bool, String) {
    let verdict = check(os);
    (verdict.is_compatible(), verdict.reason().to_string())
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
