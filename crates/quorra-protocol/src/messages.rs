//! Control-channel messages.
//!
//! Four kinds of traffic share one socket:
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | [`CommandMessage`] | controller → agent | one command from the vocabulary |
//! | [`CommandReturnMessage`] | agent → controller | result or error for a command |
//! | [`ProgressMessage`] | agent → controller | one opaque progress report |
//! | `RunAccepted` | agent → controller | acknowledgment that `RunAsync` started |
//!
//! Command arguments are opaque text on the wire. [`Command`] is the typed
//! view both ends work with; [`CommandMessage::parse`] turns wire text back
//! into it and reports unknown names and bad arguments as [`RunnerError`]s so
//! they can be answered instead of dropped.

use std::fmt;

use quorra_core::{ErrorKind, RunnerError, TestFilter, TestNode, TestPackage};
use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;

// ─────────────────────────────────────────────────────────────────────────────
// Command vocabulary
// ─────────────────────────────────────────────────────────────────────────────

/// The fixed command vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandName {
    /// Build the local runner from a serialized package.
    CreateRunner,
    /// Load the package.
    Load,
    /// Reload the package.
    Reload,
    /// Unload the package.
    Unload,
    /// Describe the selected tests.
    Explore,
    /// Count the selected tests.
    CountTestCases,
    /// Execute on a background task; the result follows later.
    Run,
    /// Start execution inside the runner and acknowledge immediately.
    RunAsync,
    /// Cooperative stop.
    RequestStop,
    /// Immediate stop.
    ForcedStop,
    /// End the command loop.
    Stop,
}

impl CommandName {
    /// Every command, in protocol order.
    pub const ALL: [CommandName; 11] = [
        Self::CreateRunner,
        Self::Load,
        Self::Reload,
        Self::Unload,
        Self::Explore,
        Self::CountTestCases,
        Self::Run,
        Self::RunAsync,
        Self::RequestStop,
        Self::ForcedStop,
        Self::Stop,
    ];

    /// Wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateRunner => "CreateRunner",
            Self::Load => "Load",
            Self::Reload => "Reload",
            Self::Unload => "Unload",
            Self::Explore => "Explore",
            Self::CountTestCases => "CountTestCases",
            Self::Run => "Run",
            Self::RunAsync => "RunAsync",
            Self::RequestStop => "RequestStop",
            Self::ForcedStop => "ForcedStop",
            Self::Stop => "Stop",
        }
    }

    /// Look up a wire spelling. Matching is exact.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed command.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Build the runner for this package.
    CreateRunner(TestPackage),
    /// Load.
    Load,
    /// Reload.
    Reload,
    /// Unload.
    Unload,
    /// Explore with a filter.
    Explore(TestFilter),
    /// Count with a filter.
    CountTestCases(TestFilter),
    /// Run with a filter.
    Run(TestFilter),
    /// Run asynchronously with a filter.
    RunAsync(TestFilter),
    /// Cooperative stop.
    RequestStop,
    /// Immediate stop.
    ForcedStop,
    /// End the loop.
    Stop,
}

impl Command {
    /// Vocabulary entry for this command.
    pub fn name(&self) -> CommandName {
        match self {
            Self::CreateRunner(_) => CommandName::CreateRunner,
            Self::Load => CommandName::Load,
            Self::Reload => CommandName::Reload,
            Self::Unload => CommandName::Unload,
            Self::Explore(_) => CommandName::Explore,
            Self::CountTestCases(_) => CommandName::CountTestCases,
            Self::Run(_) => CommandName::Run,
            Self::RunAsync(_) => CommandName::RunAsync,
            Self::RequestStop => CommandName::RequestStop,
            Self::ForcedStop => CommandName::ForcedStop,
            Self::Stop => CommandName::Stop,
        }
    }

    /// Serialize into wire form.
    pub fn to_message(&self) -> Result<CommandMessage, ProtocolError> {
        let argument = match self {
            Self::CreateRunner(package) => {
                Some(serde_json::to_string(package).map_err(ProtocolError::Encode)?)
            }
            Self::Explore(filter)
            | Self::CountTestCases(filter)
            | Self::Run(filter)
            | Self::RunAsync(filter) => Some(filter.text().to_string()),
            _ => None,
        };
        Ok(CommandMessage {
            command_name: self.name().as_str().to_string(),
            argument,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire messages
// ─────────────────────────────────────────────────────────────────────────────

/// Command as it travels on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMessage {
    /// Vocabulary name. Kept as text so unknown names survive decoding.
    pub command_name: String,
    /// Opaque argument: package JSON or filter text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argument: Option<String>,
}

impl CommandMessage {
    /// Interpret the wire text.
    pub fn parse(&self) -> Result<Command, RunnerError> {
        let Some(name) = CommandName::from_wire(&self.command_name) else {
            return Err(RunnerError::UnknownCommand(self.command_name.clone()));
        };
        let command = match name {
            CommandName::CreateRunner => {
                let text = self.require_argument(name)?;
                let package: TestPackage = serde_json::from_str(text).map_err(|e| {
                    RunnerError::InvalidArgument(format!("CreateRunner package: {e}"))
                })?;
                Command::CreateRunner(package)
            }
            CommandName::Load => Command::Load,
            CommandName::Reload => Command::Reload,
            CommandName::Unload => Command::Unload,
            CommandName::Explore => Command::Explore(self.filter(name)?),
            CommandName::CountTestCases => Command::CountTestCases(self.filter(name)?),
            CommandName::Run => Command::Run(self.filter(name)?),
            CommandName::RunAsync => Command::RunAsync(self.filter(name)?),
            CommandName::RequestStop => Command::RequestStop,
            CommandName::ForcedStop => Command::ForcedStop,
            CommandName::Stop => Command::Stop,
        };
        Ok(command)
    }

    fn require_argument(&self, name: CommandName) -> Result<&str, RunnerError> {
        self.argument
            .as_deref()
            .ok_or_else(|| RunnerError::InvalidArgument(format!("{name} requires an argument")))
    }

    fn filter(&self, name: CommandName) -> Result<TestFilter, RunnerError> {
        self.require_argument(name).map(TestFilter::new)
    }
}

/// Success value of a command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum ReturnValue {
    /// Exploration or result tree.
    Node(TestNode),
    /// Test case count.
    Count(usize),
}

/// Error as it travels on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Category.
    pub kind: ErrorKind,
    /// Message.
    pub message: String,
}

impl From<&RunnerError> for RemoteError {
    fn from(error: &RunnerError) -> Self {
        Self {
            kind: error.kind(),
            message: error.detail(),
        }
    }
}

impl From<RemoteError> for RunnerError {
    fn from(error: RemoteError) -> Self {
        RunnerError::Remote {
            kind: error.kind,
            message: error.message,
        }
    }
}

/// Outcome carried by a [`CommandReturnMessage`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CommandOutcome {
    /// The command succeeded.
    Ok {
        /// What it produced.
        value: ReturnValue,
    },
    /// The command failed.
    Error {
        /// Why.
        error: RemoteError,
    },
}

/// Answer to one command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandReturnMessage {
    /// Name of the command answered, as received.
    pub command: String,
    /// Result or error.
    pub outcome: CommandOutcome,
}

impl CommandReturnMessage {
    /// Successful answer.
    pub fn ok(command: CommandName, value: ReturnValue) -> Self {
        Self {
            command: command.as_str().to_string(),
            outcome: CommandOutcome::Ok { value },
        }
    }

    /// Failed answer.
    pub fn error(command: impl Into<String>, error: &RunnerError) -> Self {
        Self {
            command: command.into(),
            outcome: CommandOutcome::Error {
                error: RemoteError::from(error),
            },
        }
    }

    /// Unwrap into a runner result.
    pub fn into_result(self) -> Result<ReturnValue, RunnerError> {
        match self.outcome {
            CommandOutcome::Ok { value } => Ok(value),
            CommandOutcome::Error { error } => Err(error.into()),
        }
    }
}

/// One progress report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressMessage {
    /// Opaque report text.
    pub report: String,
}

/// Everything that can travel on the control channel after the handshake.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WireMessage {
    /// Controller → agent.
    Command(CommandMessage),
    /// Agent → controller.
    CommandReturn(CommandReturnMessage),
    /// Agent → controller.
    Progress(ProgressMessage),
    /// Agent → controller: `RunAsync` is under way.
    RunAccepted,
}

impl WireMessage {
    /// Short label for logs and errors.
    pub fn label(&self) -> String {
        match self {
            Self::Command(c) => format!("command {}", c.command_name),
            Self::CommandReturn(r) => format!("return for {}", r.command),
            Self::Progress(_) => "progress".to_string(),
            Self::RunAccepted => "run accepted".to_string(),
        }
    }
}

impl From<CommandMessage> for WireMessage {
    fn from(value: CommandMessage) -> Self {
        Self::Command(value)
    }
}

impl From<CommandReturnMessage> for WireMessage {
    fn from(value: CommandReturnMessage) -> Self {
        Self::CommandReturn(value)
    }
}
