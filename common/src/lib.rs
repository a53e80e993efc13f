//! # zonewall common models
//!
//! Declarative resources (hosts, firewalls, credential bundles), the zone
//! bootstrap model and the pure policy functions evaluated against them.
//!
//! Nothing in this crate performs I/O. The reconcilers in `zonewall-core`
//! and the transport in `zonewall-remote` build on these types.

pub mod compat;
pub mod config;
pub mod firewall;
pub mod host;
pub mod meta;
pub mod os;
pub mod secret;
pub mod zone;
