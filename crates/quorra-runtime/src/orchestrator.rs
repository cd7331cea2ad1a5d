//! Process-parallel orchestration.
//!
//! [`MultipleProcessRunner`] executes a composite package by giving every
//! sub-package its own worker process. Each child runs inside a bounded slot:
//!
//! | Step | Notes |
//! |------|-------|
//! | acquire slot | at most [`level_of_parallelism`](MultipleProcessRunner::level_of_parallelism) slots exist |
//! | launch worker | through the configured [`WorkerLauncher`] |
//! | create runner | the worker gets its own copy of the sub-package |
//! | load | skipped when the operation is itself `load`/`reload` |
//! | operation | progress goes straight to the caller's listener |
//! | unload, shut down | always, even after a failed operation |
//! | release slot | the next queued sub-package starts |
//!
//! Results are combined in sub-package order. A child that fails becomes an
//! `Error` node naming the sub-package; counts report partial totals through
//! [`RunnerError::PartialFailure`].

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use quorra_core::package_settings::MAX_AGENTS;
use quorra_core::{
    ChildFailure, ErrorKind, NullListener, RunnerError, TestEngineRunner, TestEventListener, TestFilter,
    TestNode, TestOutcome, TestPackage,
};
use quorra_settings::OrchestratorSettings;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::launcher::{Worker, WorkerLauncher};

/// Number of workers to run at once: `min(max_agents, sub_packages)`.
///
/// A `max_agents` of zero is treated as one, so the result is zero only when
/// there is nothing to run.
pub fn level_of_parallelism(max_agents: usize, sub_packages: usize) -> usize {
    max_agents.max(1).min(sub_packages)
}

fn host_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

// ─────────────────────────────────────────────────────────────────────────────
// Operations
// ─────────────────────────────────────────────────────────────────────────────

enum Operation {
    Load,
    Reload,
    Explore(TestFilter),
    Count(TestFilter),
    Run(TestFilter),
}

enum ChildOutput {
    Node(TestNode),
    Count(usize),
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Reload => "reload",
            Self::Explore(_) => "explore",
            Self::Count(_) => "count",
            Self::Run(_) => "run",
        }
    }

    fn loads_itself(&self) -> bool {
        matches!(self, Self::Load | Self::Reload)
    }

    async fn apply(
        &self,
        runner: &dyn TestEngineRunner,
        listener: &Arc<dyn TestEventListener>,
    ) -> Result<ChildOutput, RunnerError> {
        Ok(match self {
            Self::Load => ChildOutput::Node(runner.load().await?),
            Self::Reload => ChildOutput::Node(runner.reload().await?),
            Self::Explore(filter) => ChildOutput::Node(runner.explore(filter).await?),
            Self::Count(filter) => ChildOutput::Count(runner.count_test_cases(filter).await?),
            Self::Run(filter) => ChildOutput::Node(runner.run(Arc::clone(listener), filter).await?),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runner
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RunState {
    /// Runners of children currently holding a slot, by sub-package id.
    active: Mutex<HashMap<String, Arc<dyn TestEngineRunner>>>,
    /// Cancelled by a stop request; replaced at the start of every operation.
    stop: Mutex<CancellationToken>,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl RunState {
    fn reset_stop(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.stop.lock() = token.clone();
        token
    }

    fn activate(&self, id: &str, runner: Arc<dyn TestEngineRunner>) {
        let mut active = self.active.lock();
        let _ = active.insert(id.to_string(), runner);
        gauge!("orchestrator_workers_active").set(active.len() as f64);
    }

    fn deactivate(&self, id: &str) {
        let mut active = self.active.lock();
        let _ = active.remove(id);
        gauge!("orchestrator_workers_active").set(active.len() as f64);
    }

    fn active_runners(&self) -> Vec<Arc<dyn TestEngineRunner>> {
        self.active.lock().values().cloned().collect()
    }
}

/// Runs each sub-package of a composite package in its own worker process.
#[derive(Clone)]
pub struct MultipleProcessRunner {
    package: TestPackage,
    launcher: Arc<dyn WorkerLauncher>,
    default_max_agents: Option<usize>,
    state: Arc<RunState>,
}

impl MultipleProcessRunner {
    /// Orchestrate `package` with workers from `launcher`.
    pub fn new(package: TestPackage, launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self {
            package,
            launcher,
            default_max_agents: None,
            state: Arc::default(),
        }
    }

    /// Orchestrator using `settings.max_agents` when the package has no
    /// `MaxAgents` setting.
    pub fn from_settings(
        package: TestPackage,
        launcher: Arc<dyn WorkerLauncher>,
        settings: &OrchestratorSettings,
    ) -> Self {
        Self {
            default_max_agents: settings.max_agents,
            ..Self::new(package, launcher)
        }
    }

    /// The package being orchestrated.
    pub fn package(&self) -> &TestPackage {
        &self.package
    }

    /// Workers allowed at once for this package.
    ///
    /// `MaxAgents` on the package wins, then the configured default, then the
    /// host's available parallelism. Recomputed on every call.
    pub fn level_of_parallelism(&self) -> usize {
        let max_agents = self
            .package
            .get_setting::<Option<usize>>(MAX_AGENTS, None)
            .or(self.default_max_agents)
            .unwrap_or_else(host_parallelism);
        level_of_parallelism(max_agents, self.package.sub_packages.len())
    }

    /// Number of children currently holding a slot.
    pub fn active_workers(&self) -> usize {
        self.state.active.lock().len()
    }

    #[instrument(skip_all, fields(package = %self.package.display_name(), operation = operation.name()))]
    async fn fan_out(
        &self,
        operation: &Operation,
        listener: &Arc<dyn TestEventListener>,
    ) -> Vec<Result<ChildOutput, RunnerError>> {
        let slots = self.level_of_parallelism();
        if slots == 0 {
            debug!("no sub-packages");
            return Vec::new();
        }
        let stop = self.state.reset_stop();
        let semaphore = Semaphore::new(slots);
        info!(slots, sub_packages = self.package.sub_packages.len(), "fanning out");

        join_all(
            self.package
                .sub_packages
                .iter()
                .map(|sub| self.run_child(sub, operation, &semaphore, &stop, listener)),
        )
        .await
    }

    async fn run_child(
        &self,
        sub: &TestPackage,
        operation: &Operation,
        semaphore: &Semaphore,
        stop: &CancellationToken,
        listener: &Arc<dyn TestEventListener>,
    ) -> Result<ChildOutput, RunnerError> {
        let _slot = tokio::select! {
            biased;
            () = stop.cancelled() => return Err(RunnerError::Cancelled),
            slot = semaphore.acquire() => slot.map_err(|_| RunnerError::Cancelled)?,
        };
        debug!(sub_package = %sub.display_name(), "slot acquired");

        let worker = self.launcher.launch(sub).await?;
        let runner = worker.runner();
        self.state.activate(&sub.id, Arc::clone(&runner));

        let result = drive(worker.as_ref(), runner.as_ref(), sub, operation, stop, listener).await;

        self.state.deactivate(&sub.id);
        if let Err(e) = worker.shutdown().await {
            warn!(sub_package = %sub.display_name(), error = %e, "worker shutdown failed");
        }
        debug!(sub_package = %sub.display_name(), ok = result.is_ok(), "slot released");
        result
    }

    fn combine_nodes(&self, results: Vec<Result<ChildOutput, RunnerError>>) -> TestNode {
        let children = self
            .package
            .sub_packages
            .iter()
            .zip(results)
            .map(|(sub, result)| match result {
                Ok(ChildOutput::Node(node)) => node,
                Ok(ChildOutput::Count(_)) => {
                    let error = RunnerError::fault("worker returned a count where a tree was expected");
                    child_failed(sub, &error);
                    TestNode::failed_package(sub, &error)
                }
                Err(error) if error.kind() == ErrorKind::Cancelled => TestNode::for_package(sub)
                    .with_outcome(TestOutcome::Skipped)
                    .with_failure("not run: stop requested"),
                Err(error) => {
                    child_failed(sub, &error);
                    TestNode::failed_package(sub, &error)
                }
            })
            .collect();
        TestNode::combine(&self.package, children)
    }

    async fn node_operation(
        &self,
        operation: Operation,
        listener: &Arc<dyn TestEventListener>,
    ) -> TestNode {
        let results = self.fan_out(&operation, listener).await;
        self.combine_nodes(results)
    }

    async fn stop_active(&self, forced: bool) {
        self.state.stop.lock().cancel();
        let runners = self.state.active_runners();
        info!(active = runners.len(), forced, "stopping active workers");
        let stops = runners.iter().map(|runner| async move {
            let result = if forced {
                runner.force_stop().await
            } else {
                runner.request_stop().await
            };
            if let Err(e) = result {
                warn!(error = %e, forced, "stop request failed");
            }
        });
        let _ = join_all(stops).await;
    }
}

async fn drive(
    worker: &dyn Worker,
    runner: &dyn TestEngineRunner,
    sub: &TestPackage,
    operation: &Operation,
    stop: &CancellationToken,
    listener: &Arc<dyn TestEventListener>,
) -> Result<ChildOutput, RunnerError> {
    worker.create_runner(sub).await?;
    if !operation.loads_itself() {
        let _ = runner.load().await?;
    }
    let output = if stop.is_cancelled() {
        Err(RunnerError::Cancelled)
    } else {
        operation.apply(runner, listener).await
    };
    if let Err(e) = runner.unload().await {
        warn!(sub_package = %sub.display_name(), error = %e, "unload failed");
    }
    output
}

fn child_failed(sub: &TestPackage, error: &RunnerError) {
    warn!(sub_package = %sub.display_name(), error = %error, "sub-package failed");
    counter!("orchestrator_children_failed_total", "kind" => error.kind().as_str()).increment(1);
}

fn null_listener() -> Arc<dyn TestEventListener> {
    Arc::new(NullListener)
}

#[async_trait]
impl TestEngineRunner for MultipleProcessRunner {
    async fn load(&self) -> Result<TestNode, RunnerError> {
        Ok(self.node_operation(Operation::Load, &null_listener()).await)
    }

    async fn reload(&self) -> Result<TestNode, RunnerError> {
        Ok(self.node_operation(Operation::Reload, &null_listener()).await)
    }

    async fn unload(&self) -> Result<(), RunnerError> {
        // Workers are unloaded and shut down at the end of every operation.
        let background = self.state.background.lock().take();
        if let Some(handle) = background {
            if !handle.is_finished() {
                debug!("unload while a background run is active; stopping it");
                self.stop_active(true).await;
            }
            if let Err(e) = handle.await {
                warn!(error = %e, "background run did not finish cleanly");
            }
        }
        Ok(())
    }

    async fn explore(&self, filter: &TestFilter) -> Result<TestNode, RunnerError> {
        Ok(self
            .node_operation(Operation::Explore(filter.clone()), &null_listener())
            .await)
    }

    async fn count_test_cases(&self, filter: &TestFilter) -> Result<usize, RunnerError> {
        let results = self
            .fan_out(&Operation::Count(filter.clone()), &null_listener())
            .await;
        let mut partial_count = 0;
        let mut failures = Vec::new();
        for (sub, result) in self.package.sub_packages.iter().zip(results) {
            match result {
                Ok(ChildOutput::Count(count)) => partial_count += count,
                Ok(ChildOutput::Node(node)) => partial_count += node.test_case_count,
                Err(error) => {
                    child_failed(sub, &error);
                    failures.push(ChildFailure {
                        package_id: sub.id.clone(),
                        package_name: sub.display_name().to_string(),
                        kind: error.kind(),
                        message: error.detail(),
                    });
                }
            }
        }
        if failures.is_empty() {
            Ok(partial_count)
        } else {
            Err(RunnerError::PartialFailure {
                partial_count,
                failures,
            })
        }
    }

    async fn run(
        &self,
        listener: Arc<dyn TestEventListener>,
        filter: &TestFilter,
    ) -> Result<TestNode, RunnerError> {
        let result = self
            .node_operation(Operation::Run(filter.clone()), &listener)
            .await;
        let summary = result.summary();
        info!(
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            errors = summary.errors,
            "run finished"
        );
        Ok(result)
    }

    async fn run_async(
        &self,
        listener: Arc<dyn TestEventListener>,
        filter: &TestFilter,
    ) -> Result<(), RunnerError> {
        let runner = self.clone();
        let filter = filter.clone();
        let handle = tokio::spawn(async move {
            match runner.run(Arc::clone(&listener), &filter).await {
                Ok(result) => listener.on_test_event(&result.summary().report()),
                Err(e) => {
                    warn!(error = %e, "background run failed");
                    listener.on_test_event(&format!("<test-run result=\"Error\" message=\"{e}\"/>"));
                }
            }
        });
        if self.state.background.lock().replace(handle).is_some() {
            debug!("previous background run detached");
        }
        Ok(())
    }

    async fn request_stop(&self) -> Result<(), RunnerError> {
        self.stop_active(false).await;
        Ok(())
    }

    async fn force_stop(&self) -> Result<(), RunnerError> {
        self.stop_active(true).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use quorra_core::AgentIdentity;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    // ── In-memory workers ───────────────────────────────────────────────────

    /// Counts live workers and remembers the peak.
    #[derive(Default)]
    struct Gauge {
        live: AtomicUsize,
        peak: AtomicUsize,
        launched: AtomicUsize,
    }

    struct FakeRunner {
        package: Mutex<Option<TestPackage>>,
        cases: usize,
        fail: bool,
        stop: tokio::sync::Notify,
        block_run: bool,
    }

    impl FakeRunner {
        fn node(&self) -> Result<TestNode, RunnerError> {
            if self.fail {
                return Err(RunnerError::fault("broken sub-package"));
            }
            let package = self.package.lock().clone().ok_or(RunnerError::NoRunner)?;
            let mut node = TestNode::for_package(&package);
            for i in 0..self.cases {
                node.push_child(
                    TestNode::case(format!("{}-{i}", package.id), format!("t{i}"), format!("{}.t{i}", package.name))
                        .with_outcome(TestOutcome::Passed),
                );
            }
            Ok(node)
        }
    }

    #[async_trait]
    impl TestEngineRunner for FakeRunner {
        async fn load(&self) -> Result<TestNode, RunnerError> {
            self.node()
        }
        async fn reload(&self) -> Result<TestNode, RunnerError> {
            self.node()
        }
        async fn unload(&self) -> Result<(), RunnerError> {
            Ok(())
        }
        async fn explore(&self, _: &TestFilter) -> Result<TestNode, RunnerError> {
            self.node()
        }
        async fn count_test_cases(&self, _: &TestFilter) -> Result<usize, RunnerError> {
            self.node().map(|n| n.test_case_count)
        }
        async fn run(
            &self,
            listener: Arc<dyn TestEventListener>,
            _: &TestFilter,
        ) -> Result<TestNode, RunnerError> {
            let node = self.node()?;
            listener.on_test_event(&format!("ran {}", node.name));
            if self.block_run {
                self.stop.notified().await;
            } else {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Ok(node)
        }
        async fn run_async(
            &self,
            _: Arc<dyn TestEventListener>,
            _: &TestFilter,
        ) -> Result<(), RunnerError> {
            Ok(())
        }
        async fn request_stop(&self) -> Result<(), RunnerError> {
            self.stop.notify_one();
            Ok(())
        }
        async fn force_stop(&self) -> Result<(), RunnerError> {
            self.stop.notify_one();
            Ok(())
        }
    }

    struct FakeWorker {
        runner: Arc<FakeRunner>,
        gauge: Arc<Gauge>,
    }

    #[async_trait]
    impl Worker for FakeWorker {
        fn identity(&self) -> AgentIdentity {
            AgentIdentity::from_bytes([7; 16])
        }
        fn runner(&self) -> Arc<dyn TestEngineRunner> {
            self.runner.clone()
        }
        async fn create_runner(&self, package: &TestPackage) -> Result<(), RunnerError> {
            *self.runner.package.lock() = Some(package.clone());
            Ok(())
        }
        async fn shutdown(self: Box<Self>) -> Result<(), RunnerError> {
            let _ = self.gauge.live.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeLauncher {
        gauge: Arc<Gauge>,
        /// Sub-package names whose runner fails.
        broken: Vec<String>,
        /// Sub-package names that cannot be launched at all.
        unlaunchable: Vec<String>,
        block_run: bool,
    }

    #[async_trait]
    impl WorkerLauncher for FakeLauncher {
        async fn launch(&self, package: &TestPackage) -> Result<Box<dyn Worker>, RunnerError> {
            if self.unlaunchable.contains(&package.name) {
                return Err(RunnerError::Launch(format!("cannot start {}", package.name)));
            }
            let _ = self.gauge.launched.fetch_add(1, Ordering::SeqCst);
            let live = self.gauge.live.fetch_add(1, Ordering::SeqCst) + 1;
            let _ = self.gauge.peak.fetch_max(live, Ordering::SeqCst);
            Ok(Box::new(FakeWorker {
                runner: Arc::new(FakeRunner {
                    package: Mutex::new(None),
                    cases: 2,
                    fail: self.broken.contains(&package.name),
                    stop: tokio::sync::Notify::new(),
                    block_run: self.block_run,
                }),
                gauge: Arc::clone(&self.gauge),
            }))
        }
    }

    fn composite(n: usize) -> TestPackage {
        TestPackage::from_files((0..n).map(|i| format!("/tests/p{i}")))
    }

    fn orchestrator(package: TestPackage, launcher: FakeLauncher) -> (MultipleProcessRunner, Arc<Gauge>) {
        let gauge = Arc::clone(&launcher.gauge);
        (MultipleProcessRunner::new(package, Arc::new(launcher)), gauge)
    }

    // ── Level of parallelism ────────────────────────────────────────────────

    proptest! {
        #[test]
        fn lop_is_bounded_by_both_inputs(max in 0usize..64, subs in 0usize..64) {
            let lop = level_of_parallelism(max, subs);
            prop_assert!(lop <= subs);
            prop_assert!(lop <= max.max(1));
            prop_assert_eq!(lop == 0, subs == 0);
        }
    }

    #[test]
    fn package_setting_wins_over_default() {
        let mut package = composite(10);
        package.add_setting(MAX_AGENTS, 3);
        let runner = MultipleProcessRunner::from_settings(
            package,
            Arc::new(FakeLauncher::default()),
            &OrchestratorSettings {
                max_agents: Some(5),
                ..OrchestratorSettings::default()
            },
        );
        assert_eq!(runner.level_of_parallelism(), 3);
    }

    #[test]
    fn settings_default_applies_without_package_setting() {
        let runner = MultipleProcessRunner::from_settings(
            composite(10),
            Arc::new(FakeLauncher::default()),
            &OrchestratorSettings {
                max_agents: Some(5),
                ..OrchestratorSettings::default()
            },
        );
        assert_eq!(runner.level_of_parallelism(), 5);
    }

    #[test]
    fn lop_never_exceeds_sub_packages() {
        let mut package = composite(2);
        package.add_setting(MAX_AGENTS, 8);
        let runner = MultipleProcessRunner::new(package, Arc::new(FakeLauncher::default()));
        assert_eq!(runner.level_of_parallelism(), 2);
        assert_eq!(runner.level_of_parallelism(), 2);

        let empty = MultipleProcessRunner::new(composite(0), Arc::new(FakeLauncher::default()));
        assert_eq!(empty.level_of_parallelism(), 0);
    }

    // ── Fan-out ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn slots_cap_concurrent_workers() {
        let mut package = composite(5);
        package.add_setting(MAX_AGENTS, 2);
        let (runner, gauge) = orchestrator(package, FakeLauncher::default());

        let result = runner
            .run(Arc::new(NullListener), &TestFilter::empty())
            .await
            .unwrap();

        assert_eq!(gauge.launched.load(Ordering::SeqCst), 5);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
        assert_eq!(gauge.live.load(Ordering::SeqCst), 0);
        assert_eq!(result.test_case_count, 10);
        assert_eq!(result.children.len(), 5);
        assert_eq!(runner.active_workers(), 0);
    }

    #[tokio::test]
    async fn results_keep_sub_package_order() {
        let package = composite(4);
        let names: Vec<_> = package.sub_packages.iter().map(|p| p.name.clone()).collect();
        let (runner, _) = orchestrator(package, FakeLauncher::default());

        let tree = runner.explore(&TestFilter::empty()).await.unwrap();
        let got: Vec<_> = tree.children.iter().map(|c| c.name.clone()).collect();
        assert_eq!(got, names);
    }

    #[tokio::test]
    async fn counts_are_summed() {
        let (runner, _) = orchestrator(composite(3), FakeLauncher::default());
        assert_eq!(runner.count_test_cases(&TestFilter::empty()).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn repeated_operations_agree() {
        let (runner, _) = orchestrator(composite(3), FakeLauncher::default());
        let first = runner.load().await.unwrap();
        let second = runner.reload().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(runner.level_of_parallelism(), runner.level_of_parallelism());
    }

    #[tokio::test]
    async fn failing_child_becomes_an_error_node() {
        let (runner, _) = orchestrator(
            composite(3),
            FakeLauncher {
                broken: vec!["p1".into()],
                ..FakeLauncher::default()
            },
        );
        let tree = runner.explore(&TestFilter::empty()).await.unwrap();
        assert_eq!(tree.children.len(), 3);
        assert_eq!(tree.children[1].outcome, Some(TestOutcome::Error));
        assert!(tree.children[1].failure.as_deref().unwrap().contains("broken sub-package"));
        assert_eq!(tree.test_case_count, 4);
        assert_eq!(tree.summary().errors, 1);
    }

    #[tokio::test]
    async fn partial_count_names_failed_children() {
        let (runner, gauge) = orchestrator(
            composite(3),
            FakeLauncher {
                unlaunchable: vec!["p2".into()],
                ..FakeLauncher::default()
            },
        );
        let error = runner.count_test_cases(&TestFilter::empty()).await.unwrap_err();
        assert_matches!(
            error,
            RunnerError::PartialFailure { partial_count: 4, ref failures }
                if failures.len() == 1
                    && failures[0].package_name == "/tests/p2"
                    && failures[0].kind == ErrorKind::Launch
        );
        assert_eq!(gauge.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn progress_is_forwarded() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Arc<dyn TestEventListener> = Arc::new(move |report: &str| {
            sink.lock().unwrap().push(report.to_string());
        });
        let (runner, _) = orchestrator(composite(2), FakeLauncher::default());
        let _ = runner.run(listener, &TestFilter::empty()).await.unwrap();

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["ran p0", "ran p1"]);
    }

    #[tokio::test]
    async fn stop_reaches_active_children_and_skips_queued_ones() {
        let mut package = composite(3);
        package.add_setting(MAX_AGENTS, 1);
        let (runner, gauge) = orchestrator(
            package,
            FakeLauncher {
                block_run: true,
                ..FakeLauncher::default()
            },
        );
        let task = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run(Arc::new(NullListener), &TestFilter::empty()).await })
        };
        while runner.active_workers() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        runner.request_stop().await.unwrap();

        let tree = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(gauge.launched.load(Ordering::SeqCst), 1);
        assert_eq!(tree.children[0].test_case_count, 2);
        assert_eq!(tree.children[1].outcome, Some(TestOutcome::Skipped));
        assert_eq!(tree.children[2].outcome, Some(TestOutcome::Skipped));
    }

    #[tokio::test]
    async fn run_async_reports_the_combined_summary() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let listener: Arc<dyn TestEventListener> = Arc::new(move |report: &str| {
            let _ = tx.send(report.to_string());
        });
        let (runner, _) = orchestrator(composite(2), FakeLauncher::default());
        runner.run_async(listener, &TestFilter::empty()).await.unwrap();

        let summary = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let report = rx.recv().await.unwrap();
                if report.starts_with("<test-run") {
                    return report;
                }
            }
        })
        .await
        .unwrap();
        assert!(summary.contains("total=\"4\""));
        assert!(summary.contains("result=\"Passed\""));
        runner.unload().await.unwrap();
    }

    #[tokio::test]
    async fn empty_package_runs_nothing() {
        let (runner, gauge) = orchestrator(composite(0), FakeLauncher::default());
        let tree = runner.run(Arc::new(NullListener), &TestFilter::empty()).await.unwrap();
        assert_eq!(tree.test_case_count, 0);
        assert_eq!(runner.count_test_cases(&TestFilter::empty()).await.unwrap(), 0);
        assert_eq!(gauge.launched.load(Ordering::SeqCst), 0);
    }
}
