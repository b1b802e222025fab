//! Error types for resource orchestration.
//!
//! Two layers of errors exist:
//!
//! - [`Error`] aborts an apply before any provider is called (cycles,
//!   invalid declarations) or when the state store cannot be read or written.
//! - [`NodeError`] is attached to a single node in the apply report. Root
//!   causes sit on the originating node; cancelled dependents carry
//!   [`NodeError::UpstreamFailure`] pointing at the root.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::types::Urn;

/// Errors that abort an apply
#[derive(Debug, Error)]
pub enum Error {
    /// The dependency graph cannot be ordered
    #[error("dependency cycle between: {}", join_urns(urns))]
    Cycle {
        /// URNs participating in the cycle(s)
        urns: Vec<Urn>,
    },

    /// Two declarations derive the same URN
    #[error("resource declared more than once: {0}")]
    DuplicateResource(Urn),

    /// A logical or stack name cannot be turned into a URN
    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// A declaration does not match its resource schema
    #[error("invalid declaration {urn}: {message}")]
    Schema { urn: Urn, message: String },

    /// An output cell was written twice
    #[error("output {owner}.{property} was already written")]
    CellAlreadyWritten { owner: Urn, property: String },

    /// State file could not be read or written
    #[error("state file {path}: {source}")]
    StateIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// State file content is not a valid snapshot
    #[error("invalid state file {path}: {source}")]
    StateFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// State file was written by an incompatible version
    #[error("state file {path} has format version {found}, expected {expected}")]
    StateVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    /// The apply worker pool could not be started
    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),
}

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;

fn join_urns(urns: &[Urn]) -> String {
    urns.iter()
        .map(Urn::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors reported by a provider for a single remote operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Timeout, connection reset and similar
    #[error("transient error: {message}")]
    Transient { message: String },

    /// The remote API throttled the request
    #[error("rate limited: {message}")]
    RateLimited { message: String },

    /// The remote object does not exist
    #[error("remote object not found: {id}")]
    NotFound { id: String },

    /// The remote API rejected the inputs
    #[error("invalid inputs: {message}")]
    InvalidInputs { message: String },

    /// A load balancer was expected to publish an ingress entry but has none
    #[error("load balancer for {service} has no ingress entry")]
    NoIngress { service: String },

    /// No provider handles this resource type
    #[error("no provider registered for resource type {type_name}")]
    Unsupported { type_name: String },

    /// Any other failure
    #[error("{message}")]
    Failed { message: String },
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn invalid_inputs(message: impl Into<String>) -> Self {
        Self::InvalidInputs {
            message: message.into(),
        }
    }

    /// Whether the error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::RateLimited { .. })
    }
}

/// Why a reference cannot be satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DanglingReason {
    /// Target exists in prior state but is no longer declared
    BeingDeleted,
    /// Target is neither declared nor known to prior state
    Unknown,
}

impl fmt::Display for DanglingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeingDeleted => f.write_str("target is being deleted"),
            Self::Unknown => f.write_str("target is not declared"),
        }
    }
}

/// Error kinds surfaced in the apply report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DanglingReference,
    Provider,
    MissingOutput,
    UpstreamFailure,
}

/// Per-node failure recorded in the apply report
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// An input or explicit dependency points at a node that will not exist
    #[error("dangling reference to {target}: {reason}")]
    DanglingReference { target: Urn, reason: DanglingReason },

    /// The provider operation failed (after retries, if retryable)
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A dependency succeeded but did not produce a referenced output
    #[error("output '{property}' of {owner} was not produced")]
    MissingOutput { owner: Urn, property: String },

    /// Cancelled because a dependency failed
    #[error("cancelled: upstream resource {root} failed")]
    UpstreamFailure { root: Urn },
}

impl NodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DanglingReference { .. } => ErrorKind::DanglingReference,
            Self::Provider(_) => ErrorKind::Provider,
            Self::MissingOutput { .. } => ErrorKind::MissingOutput,
            Self::UpstreamFailure { .. } => ErrorKind::UpstreamFailure,
        }
    }

    /// Whether this error is a root cause rather than a propagated cancellation
    pub fn is_root_cause(&self) -> bool {
        !matches!(self, Self::UpstreamFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_retryable() {
        assert!(ProviderError::transient("timeout").is_retryable());
        assert!(
            ProviderError::RateLimited {
                message: "slow down".into()
            }
            .is_retryable()
        );
        assert!(!ProviderError::failed("boom").is_retryable());
        assert!(
            !ProviderError::NoIngress {
                service: "nginx".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_cycle_error_names_urns() {
        let err = Error::Cycle {
            urns: vec![Urn::new("s", "t", "a"), Urn::new("s", "t", "b")],
        };
        let message = err.to_string();
        assert!(message.contains("urn:strata:s::t::a"));
        assert!(message.contains("urn:strata:s::t::b"));
    }

    #[test]
    fn test_node_error_kind() {
        let root = Urn::new("s", "t", "root");
        let upstream = NodeError::UpstreamFailure { root: root.clone() };
        assert_eq!(upstream.kind(), ErrorKind::UpstreamFailure);
        assert!(!upstream.is_root_cause());

        let provider = NodeError::from(ProviderError::failed("boom"));
        assert_eq!(provider.kind(), ErrorKind::Provider);
        assert!(provider.is_root_cause());
    }
}
