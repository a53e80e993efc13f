//! Error taxonomy of the reconcilers and the zone bootstrap pipeline.

use thiserror::Error;
use zonewall_common::firewall::PatternError;
use zonewall_common::meta::ObjectKey;
use zonewall_common::zone::ValidationError;
use zonewall_remote::RemoteError;
use zonewall_remote::probe::ProbeStatus;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    /// Connectivity, authentication or a remote command exiting non-zero.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("unknown protocol: {0:?}")]
    UnknownProtocol(String),

    #[error("secret {0} not found")]
    SecretNotFound(ObjectKey),

    #[error("host {0} not found")]
    HostNotFound(ObjectKey),

    #[error("client is not connected")]
    NotConnected,

    #[error("{0}")]
    Compatibility(String),

    #[error("preflight failed: port {port} is {status}")]
    Preflight { port: u16, status: ProbeStatus },

    /// A multi-step mutation stopped half way; `completed` steps are in
    /// effect on the remote host.
    #[error("partially applied: {completed} done, {pending} pending: {source}")]
    PartialMutation {
        completed: String,
        pending: String,
        #[source]
        source: RemoteError,
    },

    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("invalid manifest: {0}")]
    Manifest(String),
}

impl Error {
    pub fn stage(stage: &'static str, source: impl Into<Error>) -> Self {
        Self::Stage {
            stage,
            source: Box::new(source.into()),
        }
    }

    /// Whether retrying without a configuration change can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Validation(_) | Error::Pattern(_) | Error::UnknownProtocol(_) => false,
            Error::Manifest(_) => false,
            Error::Stage { source, .. } => source.is_retryable(),
            Error::Remote(_)
            | Error::SecretNotFound(_)
            | Error::HostNotFound(_)
            | Error::NotConnected
            | Error::Compatibility(_)
            | Error::Preflight { .. }
            | Error::PartialMutation { .. } => true,
        }
    }

    /// Innermost error, looking through stage wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_permanent() {
        assert!(!Error::UnknownProtocol("SNMP".into()).is_retryable());
        assert!(!Error::from(ValidationError::ZeroAsn).is_retryable());
        assert!(!Error::stage("validate", ValidationError::ZeroAsn).is_retryable());
    }

    #[test]
    fn remote_and_lookup_errors_are_transient() {
        assert!(Error::SecretNotFound(ObjectKey::new("default", "creds")).is_retryable());
        assert!(Error::Remote(RemoteError::Closed("h".into())).is_retryable());
        assert!(
            Error::Preflight {
                port: 22,
                status: ProbeStatus::Closed
            }
            .is_retryable()
        );
    }

    #[test]
    fn stage_errors_name_the_stage() {
        let err = Error::stage(
            "preflight-ssh",
            Error::Preflight {
                port: 22,
                status: ProbeStatus::Filtered,
            },
        );
        assert_eq!(
            err.to_string(),
            "stage preflight-ssh failed: preflight failed: port 22 is filtered"
        );
        assert!(matches!(err.root(), Error::Preflight { port: 22, .. }));
    }
}
