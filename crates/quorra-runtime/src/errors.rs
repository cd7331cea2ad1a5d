//! Controller-side errors.

use std::io;

use quorra_core::{AgentIdentity, RunnerError};
use quorra_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised by the agency while accepting and registering workers.
#[derive(Debug, Error)]
pub enum AgencyError {
    /// The listening socket could not be bound.
    #[error("failed to bind agency on {address}: {source}")]
    Bind {
        /// Requested address.
        address: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// A worker did not connect and register in time.
    #[error("agent {identity} did not register within {timeout_ms}ms")]
    RegistrationTimeout {
        /// The identity that was expected.
        identity: AgentIdentity,
        /// Configured limit.
        timeout_ms: u64,
    },

    /// The agency shut down before the worker registered.
    #[error("agency closed")]
    Closed,

    /// Protocol failure on a worker connection.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<AgencyError> for RunnerError {
    fn from(error: AgencyError) -> Self {
        match error {
            AgencyError::Protocol(e) => RunnerError::Disconnected(e.to_string()),
            other => RunnerError::Launch(other.to_string()),
        }
    }
}
