//! Protocol-layer errors.
//!
//! Everything here is fatal to the connection it happened on: the process
//! supervising the worker is expected to notice the dropped socket.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors raised by the control channel.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The `host:port` text could not be parsed.
    #[error("invalid server address '{address}': {reason}")]
    InvalidAddress {
        /// Text as given.
        address: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The TCP connect failed.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// Target endpoint.
        endpoint: SocketAddr,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The TCP connect did not complete in time.
    #[error("connect to {endpoint} timed out after {timeout_ms}ms")]
    ConnectTimeout {
        /// Target endpoint.
        endpoint: SocketAddr,
        /// Configured limit.
        timeout_ms: u64,
    },

    /// Socket read or write failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A frame body was not a valid message.
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    /// A message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// A frame exceeded the configured limit.
    #[error("frame exceeds maximum length of {max} bytes")]
    FrameTooLarge {
        /// Configured limit.
        max: usize,
    },

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// A message arrived that is not valid at this point of the exchange.
    #[error("unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        /// What the reader was waiting for.
        expected: &'static str,
        /// What it got.
        actual: String,
    },
}

impl ProtocolError {
    pub(crate) fn invalid_address(address: &str, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.to_string(),
            reason: reason.into(),
        }
    }
}
