//! # quorra-protocol
//!
//! The control channel between a controller and its agents.
//!
//! - **Handshake**: [`handshake`] writes/reads the raw 16-byte agent identity
//! - **Messages**: [`messages::WireMessage`] and the command vocabulary
//! - **Codec**: [`codec::MessageCodec`] contract and the length-prefixed JSON
//!   implementation [`codec::JsonFrameCodec`]
//! - **Endpoints**: [`endpoint::parse_endpoint`] for `host:port` text
//!
//! ## Crate Position
//!
//! Depends on: quorra-core. Depended on by: quorra-agent, quorra-runtime.

#![deny(unsafe_code)]

pub mod codec;
pub mod endpoint;
pub mod errors;
pub mod handshake;
pub mod messages;

pub use codec::{DEFAULT_MAX_FRAME_LENGTH, JsonFrameCodec, MessageCodec};
pub use endpoint::parse_endpoint;
pub use errors::ProtocolError;
pub use messages::{
    Command, CommandMessage, CommandName, CommandOutcome, CommandReturnMessage, ProgressMessage,
    RemoteError, ReturnValue, WireMessage,
};
