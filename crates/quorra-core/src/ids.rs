//! Agent identity.
//!
//! Every worker process generates one [`AgentIdentity`] at launch (or is
//! handed one by the controller that spawned it). The raw 16 bytes are the
//! first thing written on a fresh control connection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of the identity handshake in bytes.
pub const IDENTITY_LEN: usize = 16;

/// 128-bit identity of one worker process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentIdentity(Uuid);

impl AgentIdentity {
    /// Generate a fresh random identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Rebuild an identity from its handshake bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; IDENTITY_LEN]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Handshake bytes, in the order they go on the wire.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; IDENTITY_LEN] {
        self.0.as_bytes()
    }

    /// The underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AgentIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AgentIdentity {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for AgentIdentity {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}
