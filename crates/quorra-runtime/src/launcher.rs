//! Worker launching.
//!
//! A [`WorkerLauncher`] turns a sub-package into a connected [`Worker`]. The
//! shipped [`ProcessLauncher`] spawns `quorra agent` processes that dial back
//! into an [`Agency`]; tests substitute their own launchers.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use quorra_core::package_settings::{AGENT_LAUNCH_TIMEOUT, WORK_DIRECTORY};
use quorra_core::{AgentIdentity, RunnerError, TestEngineRunner, TestPackage};
use quorra_settings::OrchestratorSettings;
use tokio::process::{Child, Command};
use tracing::{debug, info, instrument, warn};

use crate::agency::{Agency, RemoteRunner};

/// One live worker.
#[async_trait]
pub trait Worker: Send + Sync {
    /// The worker's identity.
    fn identity(&self) -> AgentIdentity;

    /// Runner driving this worker.
    fn runner(&self) -> Arc<dyn TestEngineRunner>;

    /// Have the worker build its runner for `package`.
    async fn create_runner(&self, package: &TestPackage) -> Result<(), RunnerError>;

    /// Stop the worker and release everything it holds.
    async fn shutdown(self: Box<Self>) -> Result<(), RunnerError>;
}

/// Starts workers.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Start a worker for `package` and wait until it is connected.
    async fn launch(&self, package: &TestPackage) -> Result<Box<dyn Worker>, RunnerError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Remote worker
// ─────────────────────────────────────────────────────────────────────────────

/// A worker reached through a [`RemoteRunner`], optionally owning its process.
pub struct RemoteWorker {
    runner: Arc<RemoteRunner>,
    process: Mutex<Option<Child>>,
    shutdown_timeout: Duration,
}

impl RemoteWorker {
    /// Wrap a connected runner. `process` is waited for (and killed if it
    /// lingers) on shutdown.
    pub fn new(runner: RemoteRunner, process: Option<Child>, shutdown_timeout: Duration) -> Self {
        Self {
            runner: Arc::new(runner),
            process: Mutex::new(process),
            shutdown_timeout,
        }
    }
}

#[async_trait]
impl Worker for RemoteWorker {
    fn identity(&self) -> AgentIdentity {
        self.runner.identity()
    }

    fn runner(&self) -> Arc<dyn TestEngineRunner> {
        self.runner.clone()
    }

    async fn create_runner(&self, package: &TestPackage) -> Result<(), RunnerError> {
        self.runner.create_runner(package).await
    }

    async fn shutdown(self: Box<Self>) -> Result<(), RunnerError> {
        let Self {
            runner,
            process,
            shutdown_timeout,
        } = *self;
        let agent_id = runner.identity();
        let stopped = runner.stop(shutdown_timeout).await;

        if let Some(mut child) = process.into_inner() {
            match tokio::time::timeout(shutdown_timeout, child.wait()).await {
                Ok(Ok(status)) => debug!(%agent_id, %status, "agent process exited"),
                Ok(Err(e)) => warn!(%agent_id, error = %e, "failed to wait for agent process"),
                Err(_) => {
                    warn!(%agent_id, "agent process did not exit in time; killing");
                    if let Err(e) = child.kill().await {
                        warn!(%agent_id, error = %e, "failed to kill agent process");
                    }
                }
            }
        }
        stopped
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Process launcher
// ─────────────────────────────────────────────────────────────────────────────

/// Spawns one `quorra agent` process per worker.
pub struct ProcessLauncher {
    agency: Arc<Agency>,
    executable: PathBuf,
    launch_timeout: Duration,
    shutdown_timeout: Duration,
}

impl ProcessLauncher {
    /// Launcher for `executable`, which must accept
    /// `agent --agency <addr> --agent-id <uuid>`.
    pub fn new(agency: Arc<Agency>, executable: impl Into<PathBuf>) -> Self {
        let defaults = OrchestratorSettings::default();
        Self {
            agency,
            executable: executable.into(),
            launch_timeout: Duration::from_millis(defaults.launch_timeout_ms),
            shutdown_timeout: Duration::from_millis(defaults.shutdown_timeout_ms),
        }
    }

    /// Launcher configured from settings. Without an explicit agent
    /// executable the current binary is used.
    pub fn from_settings(agency: Arc<Agency>, settings: &OrchestratorSettings) -> std::io::Result<Self> {
        let executable = match &settings.agent_executable {
            Some(path) => PathBuf::from(path),
            None => std::env::current_exe()?,
        };
        Ok(Self {
            agency,
            executable,
            launch_timeout: Duration::from_millis(settings.launch_timeout_ms),
            shutdown_timeout: Duration::from_millis(settings.shutdown_timeout_ms),
        })
    }

    /// Override the registration timeout.
    #[must_use]
    pub fn with_launch_timeout(mut self, timeout: Duration) -> Self {
        self.launch_timeout = timeout;
        self
    }

    fn command(&self, identity: AgentIdentity, package: &TestPackage) -> Command {
        let mut cmd = Command::new(&self.executable);
        let _ = cmd
            .arg("agent")
            .arg("--agency")
            .arg(self.agency.local_addr().to_string())
            .arg("--agent-id")
            .arg(identity.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = package.get_setting::<Option<String>>(WORK_DIRECTORY, None) {
            let _ = cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    #[instrument(skip_all, fields(package = %package.display_name()))]
    async fn launch(&self, package: &TestPackage) -> Result<Box<dyn Worker>, RunnerError> {
        let identity = AgentIdentity::new();
        let registration = self.agency.expect(identity);
        let default_ms = u64::try_from(self.launch_timeout.as_millis()).unwrap_or(u64::MAX);
        let launch_timeout = Duration::from_millis(package.get_setting(AGENT_LAUNCH_TIMEOUT, default_ms));

        let mut child = self.command(identity, package).spawn().map_err(|e| {
            RunnerError::Launch(format!("failed to spawn {}: {e}", self.executable.display()))
        })?;
        info!(agent_id = %identity, pid = ?child.id(), "agent process started");

        let runner = tokio::select! {
            connected = registration.connected(launch_timeout) => connected?,
            status = child.wait() => {
                let detail = match status {
                    Ok(status) => format!("agent exited with {status} before registering"),
                    Err(e) => format!("failed to wait for agent: {e}"),
                };
                warn!(agent_id = %identity, %detail, "agent launch failed");
                return Err(RunnerError::Launch(detail));
            }
        };
        Ok(Box::new(RemoteWorker::new(runner, Some(child), self.shutdown_timeout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use quorra_protocol::DEFAULT_MAX_FRAME_LENGTH;

    async fn agency() -> Arc<Agency> {
        Arc::new(Agency::bind("127.0.0.1:0", DEFAULT_MAX_FRAME_LENGTH).await.unwrap())
    }

    #[tokio::test]
    async fn missing_executable_is_a_launch_error() {
        let launcher = ProcessLauncher::new(agency().await, "/definitely/not/quorra");
        let error = launcher.launch(&TestPackage::new("t")).await.err().unwrap();
        assert_matches!(error, RunnerError::Launch(m) if m.contains("/definitely/not/quorra"));
    }

    #[tokio::test]
    async fn early_exit_is_a_launch_error() {
        // `false` ignores its arguments and exits 1 without connecting.
        let exe = ["/bin/false", "/usr/bin/false"]
            .into_iter()
            .find(|p| std::path::Path::new(p).is_file())
            .unwrap();
        let agency = agency().await;
        let launcher = ProcessLauncher::new(agency.clone(), exe);
        let error = launcher.launch(&TestPackage::new("t")).await.err().unwrap();
        assert_matches!(error, RunnerError::Launch(m) if m.contains("before registering"));
        assert_eq!(agency.pending_count(), 0);
    }

    #[tokio::test]
    async fn settings_choose_the_executable() {
        let agency = agency().await;
        let settings = OrchestratorSettings {
            agent_executable: Some("/opt/quorra/bin/quorra".into()),
            launch_timeout_ms: 1234,
            ..OrchestratorSettings::default()
        };
        let launcher = ProcessLauncher::from_settings(agency, &settings).unwrap();
        assert_eq!(launcher.executable, PathBuf::from("/opt/quorra/bin/quorra"));
        assert_eq!(launcher.launch_timeout, Duration::from_millis(1234));
    }
}
