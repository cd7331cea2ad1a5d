//! # quorra-agent
//!
//! Worker side of the control channel.
//!
//! - **Command channel**: [`channel::CommandChannel`] connects to the
//!   controller, sends the identity handshake, and serves commands until
//!   `Stop` or a fatal protocol error
//! - **Program runner**: [`program_runner::ProgramRunner`], a runner adapter
//!   that executes each leaf package as an external test program
//!
//! ## Crate Position
//!
//! Depends on: quorra-core, quorra-protocol, quorra-settings.
//! Depended on by: quorra (binary), quorra-runtime tests.

#![deny(unsafe_code)]

pub mod channel;
mod outbound;
pub mod program_runner;

pub use channel::{AgentSession, ChannelConfig, CommandChannel};
pub use program_runner::{ProgramRunner, ProgramRunnerFactory, TEST_FILTER_ENV_VAR};
