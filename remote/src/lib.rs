//! Everything that crosses the network: reachability probes, remote shell
//! sessions and host key fingerprints.
//!
//! The SSH transport drives the system `ssh` binary. A session is a
//! control master process; every command runs through its control socket,
//! one at a time.

mod error;
pub mod fingerprint;
pub mod probe;
pub mod shell;
pub mod ssh;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::RemoteError;
pub use shell::{CommandOutput, RemoteShell};
