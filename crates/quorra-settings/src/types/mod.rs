//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a settings file only needs the fields it changes.

use serde::{Deserialize, Serialize};

/// Smallest frame limit accepted; anything lower cannot carry a package.
pub const MIN_FRAME_LENGTH: usize = 1024;

/// Root settings type.
///
/// # JSON Format
///
/// ```json
/// {
///   "orchestrator": { "maxAgents": 4 },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuorraSettings {
    /// Settings schema version.
    pub version: String,
    /// Worker-side settings.
    pub agent: AgentSettings,
    /// Controller-side orchestration settings.
    pub orchestrator: OrchestratorSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for QuorraSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            agent: AgentSettings::default(),
            orchestrator: OrchestratorSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl QuorraSettings {
    /// Correct invalid values in place.
    ///
    /// Called automatically during loading. Bad values are replaced with a
    /// warning rather than rejected.
    pub fn validate(&mut self) {
        if self.orchestrator.max_agents == Some(0) {
            tracing::warn!("orchestrator.maxAgents is 0, using available parallelism instead");
            self.orchestrator.max_agents = None;
        }
        if self.agent.max_frame_length < MIN_FRAME_LENGTH {
            tracing::warn!(
                "agent.maxFrameLength ({}) below minimum, raised to {MIN_FRAME_LENGTH}",
                self.agent.max_frame_length
            );
            self.agent.max_frame_length = MIN_FRAME_LENGTH;
        }
        if self.orchestrator.launch_timeout_ms == 0 {
            let default = OrchestratorSettings::default().launch_timeout_ms;
            tracing::warn!("orchestrator.launchTimeoutMs is 0, using {default}");
            self.orchestrator.launch_timeout_ms = default;
        }
        if self.agent.connect_timeout_ms == 0 {
            let default = AgentSettings::default().connect_timeout_ms;
            tracing::warn!("agent.connectTimeoutMs is 0, using {default}");
            self.agent.connect_timeout_ms = default;
        }
    }
}

/// Worker-side settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// How long a worker waits for its connect to the controller.
    pub connect_timeout_ms: u64,
    /// Largest frame either end accepts, in bytes.
    pub max_frame_length: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            max_frame_length: 16 * 1024 * 1024,
        }
    }
}

/// Controller-side orchestration settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorSettings {
    /// Worker process cap when a package does not set `MaxAgents`.
    /// `None` means the host's available parallelism.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_agents: Option<usize>,
    /// How long to wait for a launched worker to register.
    pub launch_timeout_ms: u64,
    /// Grace period for a worker to exit after `Stop` before it is killed.
    pub shutdown_timeout_ms: u64,
    /// Agent executable; defaults to the running binary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_executable: Option<String>,
    /// Address the agency listens on. Port 0 picks a free port.
    pub bind_address: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_agents: None,
            launch_timeout_ms: 30_000,
            shutdown_timeout_ms: 5_000,
            agent_executable: None,
            bind_address: "127.0.0.1:0".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
