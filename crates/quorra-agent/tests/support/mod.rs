#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use quorra_core::{
    AgentIdentity, RunnerError, RunnerFactory, TestEngineRunner, TestEventListener, TestFilter,
    TestNode, TestOutcome, TestPackage,
};
use quorra_protocol::handshake::read_identity;
use quorra_protocol::{Command, CommandMessage, CommandReturnMessage, JsonFrameCodec, WireMessage};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_util::codec::Framed;

pub const TIMEOUT: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Recording runner
// ─────────────────────────────────────────────────────────────────────────────

/// Runner that records every call. `run` blocks until a stop arrives.
#[derive(Default)]
pub struct RecordingRunner {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub stop: Arc<Notify>,
    pub fail_load: bool,
    pub panic_on_count: bool,
}

impl RecordingRunner {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn tree() -> TestNode {
        let mut root = TestNode::for_package(&TestPackage::new("fake").with_id("root"));
        root.push_child(TestNode::case("1", "a", "fake.a"));
        root.push_child(TestNode::case("2", "b", "fake.b"));
        root
    }
}

#[async_trait]
impl TestEngineRunner for RecordingRunner {
    async fn load(&self) -> Result<TestNode, RunnerError> {
        self.record("load");
        if self.fail_load {
            return Err(RunnerError::fault("cannot load"));
        }
        Ok(Self::tree())
    }

    async fn reload(&self) -> Result<TestNode, RunnerError> {
        self.record("reload");
        Ok(Self::tree())
    }

    async fn unload(&self) -> Result<(), RunnerError> {
        self.record("unload");
        Ok(())
    }

    async fn explore(&self, filter: &TestFilter) -> Result<TestNode, RunnerError> {
        self.record(format!("explore:{filter}"));
        Ok(Self::tree())
    }

    async fn count_test_cases(&self, filter: &TestFilter) -> Result<usize, RunnerError> {
        self.record(format!("count:{filter}"));
        assert!(!self.panic_on_count, "count exploded");
        Ok(2)
    }

    async fn run(
        &self,
        listener: Arc<dyn TestEventListener>,
        filter: &TestFilter,
    ) -> Result<TestNode, RunnerError> {
        self.record(format!("run:{filter}"));
        listener.on_test_event("run started");
        self.stop.notified().await;
        listener.on_test_event("run finished");
        Ok(Self::tree().with_outcome(TestOutcome::Passed))
    }

    async fn run_async(
        &self,
        listener: Arc<dyn TestEventListener>,
        filter: &TestFilter,
    ) -> Result<(), RunnerError> {
        self.record(format!("run_async:{filter}"));
        listener.on_test_event("async started");
        Ok(())
    }

    async fn request_stop(&self) -> Result<(), RunnerError> {
        self.record("request_stop");
        self.stop.notify_one();
        Ok(())
    }

    async fn force_stop(&self) -> Result<(), RunnerError> {
        self.record("force_stop");
        self.stop.notify_one();
        Ok(())
    }
}

/// Factory handing out one shared [`RecordingRunner`].
pub struct RecordingFactory {
    pub runner: Arc<RecordingRunner>,
    pub packages: Mutex<Vec<TestPackage>>,
}

impl RecordingFactory {
    pub fn new(runner: RecordingRunner) -> Arc<Self> {
        Arc::new(Self {
            runner: Arc::new(runner),
            packages: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.runner.calls.lock().unwrap().clone()
    }
}

impl RunnerFactory for RecordingFactory {
    fn create_runner(&self, package: TestPackage) -> Result<Arc<dyn TestEngineRunner>, RunnerError> {
        self.runner.record("create");
        self.packages.lock().unwrap().push(package);
        Ok(self.runner.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fake controller
// ─────────────────────────────────────────────────────────────────────────────

/// Controller end of one agent connection.
pub struct FakeController {
    pub identity: AgentIdentity,
    pub framed: Framed<TcpStream, JsonFrameCodec>,
}

pub async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

impl FakeController {
    /// Accept one agent and read its identity.
    pub async fn accept(listener: &TcpListener) -> Self {
        let (mut stream, _) = tokio::time::timeout(TIMEOUT, listener.accept())
            .await
            .unwrap()
            .unwrap();
        let identity = read_identity(&mut stream).await.unwrap();
        Self {
            identity,
            framed: Framed::new(stream, JsonFrameCodec::new()),
        }
    }

    pub async fn send(&mut self, command: Command) {
        self.send_raw(command.to_message().unwrap()).await;
    }

    pub async fn send_raw(&mut self, message: CommandMessage) {
        self.framed.send(WireMessage::Command(message)).await.unwrap();
    }

    /// Next message, `None` once the agent closed the socket.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        tokio::time::timeout(TIMEOUT, self.framed.next())
            .await
            .expect("agent did not answer in time")
            .map(Result::unwrap)
    }

    /// Next command return, collecting progress reports on the way.
    pub async fn recv_return(&mut self, progress: &mut Vec<String>) -> CommandReturnMessage {
        loop {
            match self.recv().await {
                Some(WireMessage::CommandReturn(ret)) => return ret,
                Some(WireMessage::Progress(p)) => progress.push(p.report),
                other => panic!("expected a command return, got {other:?}"),
            }
        }
    }
}
