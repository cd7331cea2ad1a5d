//! Runner error taxonomy.
//!
//! [`RunnerError`] covers everything a [`TestEngineRunner`](crate::runner::TestEngineRunner)
//! call can report, whether the runner is local or a proxy for a remote
//! worker. [`ErrorKind`] is the wire-stable discriminant used when an error
//! crosses the control channel.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire-stable error category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// A runner command arrived before `CreateRunner`.
    NoRunner,
    /// The command name is outside the protocol vocabulary.
    UnknownCommand,
    /// The command argument could not be interpreted.
    InvalidArgument,
    /// The runner adapter raised a fault.
    RunnerFault,
    /// A worker process could not be launched or never registered.
    Launch,
    /// The control connection dropped.
    Disconnected,
    /// Some sub-packages of an aggregate failed.
    PartialFailure,
    /// The operation was stopped before it ran.
    Cancelled,
}

impl ErrorKind {
    /// Stable string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoRunner => "noRunner",
            Self::UnknownCommand => "unknownCommand",
            Self::InvalidArgument => "invalidArgument",
            Self::RunnerFault => "runnerFault",
            Self::Launch => "launch",
            Self::Disconnected => "disconnected",
            Self::PartialFailure => "partialFailure",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sub-package that failed inside an aggregate operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildFailure {
    /// Id of the failed sub-package.
    pub package_id: String,
    /// Display name of the failed sub-package.
    pub package_name: String,
    /// Category of the failure.
    pub kind: ErrorKind,
    /// Human-readable cause.
    pub message: String,
}

impl fmt::Display for ChildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.package_name, self.kind, self.message)
    }
}

/// Errors reported by test runners.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunnerError {
    /// No runner has been created on this worker yet.
    #[error("no runner has been created; send CreateRunner first")]
    NoRunner,

    /// Command name outside the vocabulary.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Unusable command argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The runner adapter failed.
    #[error("runner fault: {0}")]
    Fault(String),

    /// Worker launch or registration failed.
    #[error("worker launch failed: {0}")]
    Launch(String),

    /// The worker connection dropped mid-operation.
    #[error("worker disconnected: {0}")]
    Disconnected(String),

    /// Some children of an aggregate operation failed.
    #[error("{} sub-package(s) failed", failures.len())]
    PartialFailure {
        /// Combined count over the children that succeeded.
        partial_count: usize,
        /// Every child that failed and why.
        failures: Vec<ChildFailure>,
    },

    /// Stopped before it ran.
    #[error("operation cancelled")]
    Cancelled,

    /// Error reported by a remote worker.
    #[error("remote {kind} error: {message}")]
    Remote {
        /// Category reported by the worker.
        kind: ErrorKind,
        /// Message reported by the worker.
        message: String,
    },
}

impl RunnerError {
    /// Create a [`RunnerError::Fault`] from anything displayable.
    pub fn fault(message: impl fmt::Display) -> Self {
        Self::Fault(message.to_string())
    }

    /// Wire category for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoRunner => ErrorKind::NoRunner,
            Self::UnknownCommand(_) => ErrorKind::UnknownCommand,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Fault(_) => ErrorKind::RunnerFault,
            Self::Launch(_) => ErrorKind::Launch,
            Self::Disconnected(_) => ErrorKind::Disconnected,
            Self::PartialFailure { .. } => ErrorKind::PartialFailure,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Remote { kind, .. } => *kind,
        }
    }

    /// Message without the category prefix, as sent over the wire.
    pub fn detail(&self) -> String {
        match self {
            Self::UnknownCommand(m)
            | Self::InvalidArgument(m)
            | Self::Fault(m)
            | Self::Launch(m)
            | Self::Disconnected(m)
            | Self::Remote { message: m, .. } => m.clone(),
            other => other.to_string(),
        }
    }
}
