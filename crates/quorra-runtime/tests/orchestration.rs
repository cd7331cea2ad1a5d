#![allow(missing_docs)]

//! End-to-end orchestration over real sockets with in-process agents.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use quorra_agent::{ChannelConfig, CommandChannel, ProgramRunnerFactory};
use quorra_core::package_settings::MAX_AGENTS;
use quorra_core::{
    AgentIdentity, ErrorKind, RunnerError, TestEngineRunner, TestEventListener, TestFilter,
    TestOutcome, TestPackage,
};
use quorra_protocol::DEFAULT_MAX_FRAME_LENGTH;
use quorra_runtime::{Agency, MultipleProcessRunner, RemoteWorker, Worker, WorkerLauncher};

const TIMEOUT: Duration = Duration::from_secs(10);

fn system_program(name: &str) -> String {
    ["/bin", "/usr/bin"]
        .iter()
        .map(|dir| format!("{dir}/{name}"))
        .find(|path| Path::new(path).is_file())
        .unwrap_or_else(|| panic!("{name} not found"))
}

/// Starts each worker as a command channel task in this process.
struct InProcessLauncher {
    agency: Arc<Agency>,
    launched: AtomicUsize,
}

impl InProcessLauncher {
    async fn new() -> Arc<Self> {
        let agency = Agency::bind("127.0.0.1:0", DEFAULT_MAX_FRAME_LENGTH)
            .await
            .unwrap();
        Arc::new(Self {
            agency: Arc::new(agency),
            launched: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl WorkerLauncher for InProcessLauncher {
    async fn launch(&self, _package: &TestPackage) -> Result<Box<dyn Worker>, RunnerError> {
        let identity = AgentIdentity::new();
        let registration = self.agency.expect(identity);
        let channel = CommandChannel::new(
            identity,
            &self.agency.local_addr().to_string(),
            Arc::new(ProgramRunnerFactory),
            &ChannelConfig::default(),
        )
        .map_err(|e| RunnerError::Launch(e.to_string()))?;
        let _ = tokio::spawn(channel.run());
        let _ = self.launched.fetch_add(1, Ordering::SeqCst);

        let runner = registration.connected(TIMEOUT).await?;
        Ok(Box::new(RemoteWorker::new(runner, None, TIMEOUT)))
    }
}

#[derive(Default)]
struct Collect(Mutex<Vec<String>>);

impl TestEventListener for Collect {
    fn on_test_event(&self, report: &str) {
        self.0.lock().unwrap().push(report.to_string());
    }
}

impl Collect {
    fn starting_with(&self, prefix: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.starts_with(prefix))
            .count()
    }
}

#[tokio::test]
async fn run_merges_results_from_every_worker() {
    let mut package = TestPackage::from_files([
        system_program("true"),
        system_program("false"),
        system_program("true"),
    ]);
    package.add_setting(MAX_AGENTS, 2);
    let launcher = InProcessLauncher::new().await;
    let runner = MultipleProcessRunner::new(package.clone(), launcher.clone());
    let events = Arc::new(Collect::default());

    let tree = tokio::time::timeout(TIMEOUT, runner.run(events.clone(), &TestFilter::empty()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(launcher.launched.load(Ordering::SeqCst), 3);
    assert_eq!(tree.id, package.id);
    assert_eq!(tree.children.len(), 3);
    assert_eq!(tree.test_case_count, 3);
    let summary = tree.summary();
    assert_eq!((summary.passed, summary.failed), (2, 1));
    assert_eq!(tree.outcome, Some(TestOutcome::Failed));
    assert_eq!(events.starting_with("<start-run"), 3);
    assert_eq!(events.starting_with("<test-run"), 3);
    assert_eq!(launcher.agency.pending_count(), 0);
}

#[tokio::test]
async fn explore_names_the_broken_sub_package() {
    let package = TestPackage::from_files([
        system_program("true"),
        "/definitely/not/a/test/program".to_string(),
    ]);
    let launcher = InProcessLauncher::new().await;
    let runner = MultipleProcessRunner::new(package, launcher);

    let tree = tokio::time::timeout(TIMEOUT, runner.explore(&TestFilter::empty()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(tree.test_case_count, 1);
    let broken = &tree.children[1];
    assert_eq!(broken.outcome, Some(TestOutcome::Error));
    assert!(broken.failure.as_deref().unwrap().contains("test program not found"));
}

#[tokio::test]
async fn count_reports_partial_totals() {
    let package = TestPackage::from_files([
        system_program("true"),
        system_program("true"),
        "/definitely/not/a/test/program".to_string(),
    ]);
    let launcher = InProcessLauncher::new().await;
    let runner = MultipleProcessRunner::new(package, launcher);

    let error = tokio::time::timeout(TIMEOUT, runner.count_test_cases(&TestFilter::empty()))
        .await
        .unwrap()
        .unwrap_err();

    assert_matches!(
        error,
        RunnerError::PartialFailure { partial_count: 2, ref failures }
            if failures.len() == 1 && failures[0].kind == ErrorKind::RunnerFault
    );
}

#[tokio::test]
async fn load_twice_gives_the_same_tree() {
    let package = TestPackage::from_files([system_program("true"), system_program("false")]);
    let launcher = InProcessLauncher::new().await;
    let runner = MultipleProcessRunner::new(package, launcher.clone());

    let first = tokio::time::timeout(TIMEOUT, runner.load()).await.unwrap().unwrap();
    let second = tokio::time::timeout(TIMEOUT, runner.load()).await.unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(first.test_case_count, 2);
    assert_eq!(launcher.launched.load(Ordering::SeqCst), 4);
    runner.unload().await.unwrap();
}

#[tokio::test]
async fn run_async_ends_with_the_combined_summary() {
    let package = TestPackage::from_files([system_program("true"), system_program("true")]);
    let launcher = InProcessLauncher::new().await;
    let runner = MultipleProcessRunner::new(package, launcher);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let listener: Arc<dyn TestEventListener> = Arc::new(move |report: &str| {
        let _ = tx.send(report.to_string());
    });

    runner.run_async(listener, &TestFilter::empty()).await.unwrap();

    let combined = tokio::time::timeout(TIMEOUT, async {
        loop {
            let report = rx.recv().await.unwrap();
            if report.starts_with("<test-run total=\"2\"") {
                return report;
            }
        }
    })
    .await
    .unwrap();
    assert!(combined.contains("result=\"Passed\""));
    runner.unload().await.unwrap();
    assert_eq!(runner.active_workers(), 0);
}
