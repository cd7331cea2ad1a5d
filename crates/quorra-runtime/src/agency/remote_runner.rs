//! Controller-side proxy for one worker.
//!
//! Commands are written through a single locked sink. A reader task owns the
//! read half and routes what comes back:
//!
//! | Incoming | Routed to |
//! |----------|-----------|
//! | `CommandReturn` | oldest caller waiting on that command name |
//! | `RunAccepted` | oldest caller waiting on `RunAsync` |
//! | `Progress` | listener of the current run |
//!
//! Commands that normally get no answer (`CreateRunner`, `Unload`, stops) are
//! fire-and-forget here; an error return for one of them is logged. When the
//! connection drops, every waiter fails with [`RunnerError::Disconnected`].

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use quorra_core::{
    AgentIdentity, RunnerError, TestEngineRunner, TestEventListener, TestFilter, TestNode,
    TestPackage,
};
use quorra_protocol::{
    Command, CommandName, CommandReturnMessage, JsonFrameCodec, ReturnValue, WireMessage,
};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

enum Reply {
    Value(ReturnValue),
    Accepted,
}

type Waiter = oneshot::Sender<Result<Reply, RunnerError>>;

#[derive(Default)]
struct Routes {
    waiting: HashMap<CommandName, VecDeque<Waiter>>,
    /// Set once the connection is gone.
    closed: Option<String>,
}

struct Shared {
    identity: AgentIdentity,
    routes: Mutex<Routes>,
    listener: Mutex<Option<Arc<dyn TestEventListener>>>,
}

impl Shared {
    fn wait_for(&self, command: CommandName) -> Result<oneshot::Receiver<Result<Reply, RunnerError>>, RunnerError> {
        let mut routes = self.routes.lock();
        if let Some(reason) = &routes.closed {
            return Err(RunnerError::Disconnected(reason.clone()));
        }
        let (tx, rx) = oneshot::channel();
        routes.waiting.entry(command).or_default().push_back(tx);
        Ok(rx)
    }

    fn complete(&self, command: CommandName, result: Result<Reply, RunnerError>) {
        let waiter = self
            .routes
            .lock()
            .waiting
            .get_mut(&command)
            .and_then(VecDeque::pop_front);
        match (waiter, result) {
            (Some(tx), result) => {
                let _ = tx.send(result);
            }
            (None, Err(e)) => {
                warn!(agent_id = %self.identity, %command, error = %e, "agent reported an error");
            }
            (None, Ok(_)) => {
                warn!(agent_id = %self.identity, %command, "unsolicited reply from agent");
            }
        }
    }

    fn on_return(&self, ret: CommandReturnMessage) {
        let Some(command) = CommandName::from_wire(&ret.command) else {
            // The agent echoes unknown names; nothing here sends those.
            warn!(agent_id = %self.identity, command = %ret.command, "return for unknown command");
            return;
        };
        self.complete(command, ret.into_result().map(Reply::Value));
    }

    fn on_progress(&self, report: &str) {
        let listener = self.listener.lock().clone();
        match listener {
            Some(listener) => listener.on_test_event(report),
            None => debug!(agent_id = %self.identity, "progress with no listener"),
        }
    }

    fn disconnect(&self, reason: String) {
        let waiting = {
            let mut routes = self.routes.lock();
            routes.closed = Some(reason.clone());
            std::mem::take(&mut routes.waiting)
        };
        for tx in waiting.into_values().flatten() {
            let _ = tx.send(Err(RunnerError::Disconnected(reason.clone())));
        }
    }
}

/// [`TestEngineRunner`] that forwards every call to a worker.
pub struct RemoteRunner {
    identity: AgentIdentity,
    writer: tokio::sync::Mutex<FramedWrite<OwnedWriteHalf, JsonFrameCodec>>,
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for RemoteRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteRunner")
            .field("identity", &self.identity)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl RemoteRunner {
    /// Wrap a registered worker connection. Framed traffic starts here; the
    /// identity bytes have already been consumed.
    pub fn new(identity: AgentIdentity, stream: TcpStream, codec: JsonFrameCodec) -> Self {
        let (read_half, write_half) = stream.into_split();
        let shared = Arc::new(Shared {
            identity,
            routes: Mutex::new(Routes::default()),
            listener: Mutex::new(None),
        });
        let reader = tokio::spawn(read_loop(
            Arc::clone(&shared),
            FramedRead::new(read_half, codec.clone()),
        ));
        Self {
            identity,
            writer: tokio::sync::Mutex::new(FramedWrite::new(write_half, codec)),
            shared,
            reader: Mutex::new(Some(reader)),
        }
    }

    /// The worker's identity.
    pub fn identity(&self) -> AgentIdentity {
        self.identity
    }

    /// Whether the connection is still up.
    pub fn is_connected(&self) -> bool {
        self.shared.routes.lock().closed.is_none()
    }

    /// Ask the worker to build its runner for `package`.
    pub async fn create_runner(&self, package: &TestPackage) -> Result<(), RunnerError> {
        self.send(Command::CreateRunner(package.clone())).await
    }

    /// Send `Stop` and wait up to `timeout` for the worker to hang up.
    pub async fn stop(&self, timeout: Duration) -> Result<(), RunnerError> {
        let sent = self.send(Command::Stop).await;
        let reader = self.reader.lock().take();
        if let Some(mut reader) = reader {
            if tokio::time::timeout(timeout, &mut reader).await.is_err() {
                warn!(agent_id = %self.identity, "agent did not close after Stop");
                reader.abort();
            }
        }
        sent
    }

    async fn send(&self, command: Command) -> Result<(), RunnerError> {
        let name = command.name();
        let message = command
            .to_message()
            .map_err(|e| RunnerError::InvalidArgument(e.to_string()))?;
        debug!(agent_id = %self.identity, command = %name, "sending command");
        self.writer
            .lock()
            .await
            .send(WireMessage::Command(message))
            .await
            .map_err(|e| RunnerError::Disconnected(e.to_string()))
    }

    async fn request(&self, command: Command) -> Result<Reply, RunnerError> {
        let rx = self.shared.wait_for(command.name())?;
        self.send(command).await?;
        rx.await
            .unwrap_or_else(|_| Err(RunnerError::Disconnected("reply dropped".into())))
    }

    async fn request_node(&self, command: Command) -> Result<TestNode, RunnerError> {
        match self.request(command).await? {
            Reply::Value(ReturnValue::Node(node)) => Ok(node),
            Reply::Value(ReturnValue::Count(_)) | Reply::Accepted => {
                Err(RunnerError::fault("agent answered with the wrong kind of value"))
            }
        }
    }
}

impl Drop for RemoteRunner {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

#[async_trait]
impl TestEngineRunner for RemoteRunner {
    async fn load(&self) -> Result<TestNode, RunnerError> {
        self.request_node(Command::Load).await
    }

    async fn reload(&self) -> Result<TestNode, RunnerError> {
        self.request_node(Command::Reload).await
    }

    async fn unload(&self) -> Result<(), RunnerError> {
        self.send(Command::Unload).await
    }

    async fn explore(&self, filter: &TestFilter) -> Result<TestNode, RunnerError> {
        self.request_node(Command::Explore(filter.clone())).await
    }

    async fn count_test_cases(&self, filter: &TestFilter) -> Result<usize, RunnerError> {
        match self.request(Command::CountTestCases(filter.clone())).await? {
            Reply::Value(ReturnValue::Count(count)) => Ok(count),
            Reply::Value(ReturnValue::Node(_)) | Reply::Accepted => {
                Err(RunnerError::fault("agent answered with the wrong kind of value"))
            }
        }
    }

    async fn run(
        &self,
        listener: Arc<dyn TestEventListener>,
        filter: &TestFilter,
    ) -> Result<TestNode, RunnerError> {
        *self.shared.listener.lock() = Some(listener);
        let result = self.request_node(Command::Run(filter.clone())).await;
        *self.shared.listener.lock() = None;
        result
    }

    async fn run_async(
        &self,
        listener: Arc<dyn TestEventListener>,
        filter: &TestFilter,
    ) -> Result<(), RunnerError> {
        *self.shared.listener.lock() = Some(listener);
        match self.request(Command::RunAsync(filter.clone())).await? {
            Reply::Accepted => Ok(()),
            Reply::Value(_) => Err(RunnerError::fault("agent answered RunAsync with a value")),
        }
    }

    async fn request_stop(&self) -> Result<(), RunnerError> {
        self.send(Command::RequestStop).await
    }

    async fn force_stop(&self) -> Result<(), RunnerError> {
        self.send(Command::ForcedStop).await
    }
}

async fn read_loop(shared: Arc<Shared>, mut reader: FramedRead<OwnedReadHalf, JsonFrameCodec>) {
    let reason = loop {
        match reader.next().await {
            Some(Ok(WireMessage::CommandReturn(ret))) => shared.on_return(ret),
            Some(Ok(WireMessage::Progress(progress))) => shared.on_progress(&progress.report),
            Some(Ok(WireMessage::RunAccepted)) => {
                shared.complete(CommandName::RunAsync, Ok(Reply::Accepted));
            }
            Some(Ok(WireMessage::Command(command))) => {
                warn!(agent_id = %shared.identity, command = %command.command_name, "agent sent a command");
            }
            Some(Err(e)) => break e.to_string(),
            None => break "connection closed by agent".to_string(),
        }
    };
    info!(agent_id = %shared.identity, %reason, "agent connection ended");
    shared.disconnect(reason);
}
