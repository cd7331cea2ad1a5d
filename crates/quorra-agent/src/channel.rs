//! Agent command channel.
//!
//! One [`CommandChannel`] owns one worker's control connection:
//!
//! 1. **Disconnected**: [`CommandChannel::new`] validates the `host:port`
//!    text up front; nothing touches the network yet.
//! 2. **Connected**: [`CommandChannel::start`] connects once. A failed connect
//!    is logged and returned; no handshake is attempted on a dead socket.
//!    On success the raw identity bytes go out immediately.
//! 3. **Serving**: [`AgentSession::serve`] reads one command at a time and
//!    dispatches it to the current runner. `Run` executes on a spawned task so
//!    the loop keeps reading and can still route `RequestStop`/`ForcedStop`.
//! 4. **Terminated**: `Stop` ends the loop cleanly; outstanding runs are
//!    joined and the writer drained. A read or decode failure ends the loop
//!    with an error that the caller is expected to treat as fatal.
//!
//! Runner faults never end the loop: they are answered with an error return.

use std::fmt;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use quorra_core::{
    AgentIdentity, RunnerError, RunnerFactory, TestEngineRunner, TestEventListener, TestFilter,
    TestPackage,
};
use quorra_protocol::handshake::write_identity;
use quorra_protocol::{
    Command, CommandMessage, CommandName, JsonFrameCodec, MessageCodec, ProtocolError,
    ReturnValue, WireMessage, parse_endpoint,
};
use quorra_settings::AgentSettings;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, instrument, warn};

use crate::outbound::{ChannelListener, OutboundQueue, write_loop};

/// Connection tunables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Upper bound on the initial connect.
    pub connect_timeout: Duration,
    /// Largest frame accepted or produced.
    pub max_frame_length: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::from(&AgentSettings::default())
    }
}

impl From<&AgentSettings> for ChannelConfig {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            max_frame_length: settings.max_frame_length,
        }
    }
}

/// A worker's not-yet-connected control channel.
pub struct CommandChannel<C: MessageCodec = JsonFrameCodec> {
    identity: AgentIdentity,
    endpoint: SocketAddr,
    factory: Arc<dyn RunnerFactory>,
    codec: C,
    connect_timeout: Duration,
}

impl<C: MessageCodec> fmt::Debug for CommandChannel<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandChannel")
            .field("identity", &self.identity)
            .field("endpoint", &self.endpoint)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl CommandChannel<JsonFrameCodec> {
    /// Validate `server_url` and prepare a channel using the JSON frame codec.
    pub fn new(
        identity: AgentIdentity,
        server_url: &str,
        factory: Arc<dyn RunnerFactory>,
        config: &ChannelConfig,
    ) -> Result<Self, ProtocolError> {
        let codec = JsonFrameCodec::with_max_frame_length(config.max_frame_length);
        Self::with_codec(identity, server_url, factory, codec, config.connect_timeout)
    }
}

impl<C: MessageCodec> CommandChannel<C> {
    /// Validate `server_url` and prepare a channel with a custom codec.
    pub fn with_codec(
        identity: AgentIdentity,
        server_url: &str,
        factory: Arc<dyn RunnerFactory>,
        codec: C,
        connect_timeout: Duration,
    ) -> Result<Self, ProtocolError> {
        let endpoint = parse_endpoint(server_url)?;
        debug!(%endpoint, "using server endpoint");
        Ok(Self {
            identity,
            endpoint,
            factory,
            codec,
            connect_timeout,
        })
    }

    /// The controller endpoint.
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// This worker's identity.
    pub fn identity(&self) -> AgentIdentity {
        self.identity
    }

    /// Connect, send the identity, and enter the serving state.
    #[instrument(skip(self), fields(agent_id = %self.identity, endpoint = %self.endpoint))]
    pub async fn start(self) -> Result<AgentSession<C>, ProtocolError> {
        debug!("connecting to agency");
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(self.endpoint)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                error!(error = %source, "failed to connect to agency");
                return Err(ProtocolError::Connect {
                    endpoint: self.endpoint,
                    source,
                });
            }
            Err(_) => {
                error!("connect to agency timed out");
                return Err(ProtocolError::ConnectTimeout {
                    endpoint: self.endpoint,
                    timeout_ms: u64::try_from(self.connect_timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "could not disable nagle");
        }
        info!(peer = ?stream.peer_addr().ok(), "connected to agency");

        let (read_half, mut write_half) = stream.into_split();
        write_identity(&mut write_half, &self.identity).await?;
        info!("sent agent id");

        let (outbound, rx) = OutboundQueue::new();
        let writer = tokio::spawn(write_loop(FramedWrite::new(write_half, self.codec.clone()), rx));

        Ok(AgentSession {
            identity: self.identity,
            reader: FramedRead::new(read_half, self.codec),
            outbound,
            writer,
            factory: self.factory,
            runner: None,
            runs: Vec::new(),
        })
    }

    /// [`start`](Self::start) then [`serve`](AgentSession::serve).
    pub async fn run(self) -> Result<(), ProtocolError> {
        self.start().await?.serve().await
    }
}

/// A connected channel in the serving state.
pub struct AgentSession<C: MessageCodec = JsonFrameCodec> {
    identity: AgentIdentity,
    reader: FramedRead<OwnedReadHalf, C>,
    outbound: OutboundQueue,
    writer: JoinHandle<Result<(), ProtocolError>>,
    factory: Arc<dyn RunnerFactory>,
    /// Set only by `CreateRunner`.
    runner: Option<Arc<dyn TestEngineRunner>>,
    /// `Run` tasks still in flight.
    runs: Vec<JoinHandle<()>>,
}

impl<C: MessageCodec> fmt::Debug for AgentSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentSession")
            .field("identity", &self.identity)
            .field("has_runner", &self.runner.is_some())
            .field("runs", &self.runs.len())
            .finish_non_exhaustive()
    }
}

impl<C: MessageCodec> AgentSession<C> {
    /// This worker's identity.
    pub fn identity(&self) -> AgentIdentity {
        self.identity
    }

    /// Run the command loop until `Stop` or a fatal error.
    #[instrument(skip(self), fields(agent_id = %self.identity))]
    pub async fn serve(mut self) -> Result<(), ProtocolError> {
        loop {
            debug!("waiting for a command");
            let message = match self.reader.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    error!(error = %e, "failed to read command");
                    self.abort().await;
                    return Err(e);
                }
                None => {
                    error!("agency closed the connection without sending Stop");
                    self.abort().await;
                    return Err(ProtocolError::ConnectionClosed);
                }
            };

            let WireMessage::Command(command) = message else {
                let e = ProtocolError::UnexpectedMessage {
                    expected: "command",
                    actual: message.label(),
                };
                error!(error = %e, "protocol violation");
                self.abort().await;
                return Err(e);
            };

            if self.dispatch(command).await.is_break() {
                break;
            }
            self.runs.retain(|handle| !handle.is_finished());
        }

        info!("terminating command loop");
        self.finish().await
    }

    async fn dispatch(&mut self, message: CommandMessage) -> ControlFlow<()> {
        let command = match message.parse() {
            Ok(command) => command,
            Err(e) => {
                metrics::counter!("agent_commands_total", "command" => "unknown").increment(1);
                self.outbound.reply_error(&message.command_name, &e);
                return ControlFlow::Continue(());
            }
        };
        let name = command.name();
        debug!(command = %name, has_argument = message.argument.is_some(), "received command");
        metrics::counter!("agent_commands_total", "command" => name.as_str()).increment(1);

        let command = match command {
            Command::Stop => return ControlFlow::Break(()),
            Command::CreateRunner(package) => {
                self.create_runner(package);
                return ControlFlow::Continue(());
            }
            other => other,
        };

        let Some(runner) = self.runner.clone() else {
            self.outbound.reply_error(name.as_str(), &RunnerError::NoRunner);
            return ControlFlow::Continue(());
        };

        match command {
            Command::Load => {
                let result = guarded(runner.load()).await;
                self.outbound.reply(name, result.map(ReturnValue::Node));
            }
            Command::Reload => {
                let result = guarded(runner.reload()).await;
                self.outbound.reply(name, result.map(ReturnValue::Node));
            }
            Command::Unload => {
                if let Err(e) = guarded(runner.unload()).await {
                    self.outbound.reply_error(name.as_str(), &e);
                }
            }
            Command::Explore(filter) => {
                debug!(filter = %filter, "explore");
                let result = guarded(runner.explore(&filter)).await;
                self.outbound.reply(name, result.map(ReturnValue::Node));
            }
            Command::CountTestCases(filter) => {
                debug!(filter = %filter, "count test cases");
                let result = guarded(runner.count_test_cases(&filter)).await;
                self.outbound.reply(name, result.map(ReturnValue::Count));
            }
            Command::Run(filter) => self.spawn_run(runner, filter),
            Command::RunAsync(filter) => {
                debug!(filter = %filter, "run async");
                match guarded(runner.run_async(self.listener(), &filter)).await {
                    Ok(()) => self.outbound.send(WireMessage::RunAccepted),
                    Err(e) => self.outbound.reply_error(name.as_str(), &e),
                }
            }
            Command::RequestStop => {
                if let Err(e) = guarded(runner.request_stop()).await {
                    self.outbound.reply_error(name.as_str(), &e);
                }
            }
            Command::ForcedStop => {
                if let Err(e) = guarded(runner.force_stop()).await {
                    self.outbound.reply_error(name.as_str(), &e);
                }
            }
            Command::Stop | Command::CreateRunner(_) => {}
        }
        ControlFlow::Continue(())
    }

    fn create_runner(&mut self, package: TestPackage) {
        debug!(
            id = %package.id,
            name = %package.name,
            full_name = %package.full_name,
            sub_packages = package.sub_packages.len(),
            "create runner for test package"
        );
        for (key, value) in &package.settings {
            debug!(%key, %value, "package setting");
        }
        if self.runner.is_some() {
            warn!("replacing existing runner");
        }
        match self.factory.create_runner(package) {
            Ok(runner) => self.runner = Some(runner),
            Err(e) => {
                self.runner = None;
                self.outbound.reply_error(CommandName::CreateRunner.as_str(), &e);
            }
        }
    }

    fn spawn_run(&mut self, runner: Arc<dyn TestEngineRunner>, filter: TestFilter) {
        debug!(filter = %filter, "starting run task");
        let listener = self.listener();
        let outbound = self.outbound.clone();
        self.runs.push(tokio::spawn(async move {
            let result = guarded(runner.run(listener, &filter)).await;
            debug!(ok = result.is_ok(), "run task finished");
            outbound.reply(CommandName::Run, result.map(ReturnValue::Node));
        }));
    }

    fn listener(&self) -> Arc<dyn TestEventListener> {
        Arc::new(ChannelListener::new(self.outbound.clone()))
    }

    /// Clean shutdown: join runs, flush, close.
    async fn finish(mut self) -> Result<(), ProtocolError> {
        for handle in self.runs.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "run task did not complete cleanly");
            }
        }
        self.outbound.close();
        match self.writer.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "writer task failed");
                Err(ProtocolError::ConnectionClosed)
            }
        }
    }

    /// Failure shutdown: cancel runs, close without waiting on them.
    async fn abort(&mut self) {
        for handle in self.runs.drain(..) {
            handle.abort();
        }
        if let Some(runner) = self.runner.take() {
            if let Err(e) = guarded(runner.force_stop()).await {
                debug!(error = %e, "force stop during abort failed");
            }
        }
        self.outbound.close();
        match (&mut self.writer).await {
            Ok(Ok(())) => debug!("writer drained during abort"),
            Ok(Err(e)) => debug!(error = %e, "writer failed during abort"),
            Err(e) => debug!(error = %e, "writer task failed during abort"),
        }
    }
}

/// Run an adapter call, turning a panic into a runner fault.
async fn guarded<T, F>(call: F) -> Result<T, RunnerError>
where
    F: Future<Output = Result<T, RunnerError>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "runner panicked".to_string());
            error!(%message, "runner adapter panicked");
            Err(RunnerError::Fault(format!("runner panicked: {message}")))
        }
    }
}
