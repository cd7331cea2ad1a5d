//! Runner adapter for external test programs.
//!
//! Every leaf of the package names an executable. Loading checks that each
//! one exists and reports it as a single test case. Running spawns the
//! programs one after another:
//!
//! | Program behaviour | Case outcome |
//! |---|---|
//! | exits 0 | `Passed` |
//! | exits non-zero or dies on a signal | `Failed` |
//! | cannot be spawned | `Error` |
//! | not reached because of `RequestStop` | `Skipped` |
//!
//! Each stdout line is forwarded as a progress report (bytes that are not
//! UTF-8 become U+FFFD), framed by
//! `<start-test>`/`<test-case>` reports, and a `<test-run>` summary closes the
//! run. The filter text is opaque here; it is handed to each program in
//! [`TEST_FILTER_ENV_VAR`].

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use quorra_core::package_settings::WORK_DIRECTORY;
use quorra_core::{
    RunnerError, RunnerFactory, TestEngineRunner, TestEventListener, TestFilter, TestNode,
    TestOutcome, TestPackage,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Environment variable carrying the filter text to each test program.
pub const TEST_FILTER_ENV_VAR: &str = "QUORRA_TEST_FILTER";

/// Builds a [`ProgramRunner`] per package.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProgramRunnerFactory;

impl RunnerFactory for ProgramRunnerFactory {
    fn create_runner(&self, package: TestPackage) -> Result<Arc<dyn TestEngineRunner>, RunnerError> {
        Ok(Arc::new(ProgramRunner::new(package)))
    }
}

/// Executes the leaves of a package as test programs.
#[derive(Clone)]
pub struct ProgramRunner {
    inner: Arc<Inner>,
}

struct Inner {
    package: TestPackage,
    loaded: Mutex<Option<TestNode>>,
    stop: Mutex<StopTokens>,
    background: Mutex<Option<JoinHandle<()>>>,
}

/// Cancelled by `RequestStop`/`ForcedStop`. One set lives until the run that
/// observes it finishes, so a stop sent before the run task starts is kept.
#[derive(Clone, Default)]
struct StopTokens {
    requested: CancellationToken,
    forced: CancellationToken,
}

impl ProgramRunner {
    /// Runner for `package`. Nothing is checked until the first load.
    pub fn new(package: TestPackage) -> Self {
        Self {
            inner: Arc::new(Inner {
                package,
                loaded: Mutex::new(None),
                stop: Mutex::new(StopTokens::default()),
                background: Mutex::new(None),
            }),
        }
    }

    async fn ensure_loaded(&self) -> Result<TestNode, RunnerError> {
        let cached = self.inner.loaded.lock().clone();
        if let Some(tree) = cached {
            return Ok(tree);
        }
        self.load().await
    }

    async fn execute(
        &self,
        listener: &dyn TestEventListener,
        filter: &TestFilter,
    ) -> Result<TestNode, RunnerError> {
        // A stop that lands before this point still applies to this run; the
        // tokens are only replaced once the run is over.
        let tokens = self.inner.stop.lock().clone();
        let result = self.execute_with(listener, filter, &tokens).await;
        self.reset_stop();
        result
    }

    async fn execute_with(
        &self,
        listener: &dyn TestEventListener,
        filter: &TestFilter,
        tokens: &StopTokens,
    ) -> Result<TestNode, RunnerError> {
        let _ = self.ensure_loaded().await?;
        let programs = leaves(&self.inner.package);
        listener.on_test_event(&format!("<start-run count=\"{}\"/>", programs.len()));

        let mut cases = Vec::with_capacity(programs.len());
        for program in &programs {
            if tokens.requested.is_cancelled() {
                cases.push(program_case(program).with_outcome(TestOutcome::Skipped));
                continue;
            }
            cases.push(run_program(program, listener, filter, tokens).await?);
        }

        let result = assemble(&self.inner.package, &mut cases.into_iter());
        listener.on_test_event(&result.summary().report());
        Ok(result)
    }

    /// Arm fresh tokens once a stop has been spent on a run.
    fn reset_stop(&self) {
        let mut stop = self.inner.stop.lock();
        if stop.requested.is_cancelled() || stop.forced.is_cancelled() {
            *stop = StopTokens::default();
        }
    }
}

#[async_trait]
impl TestEngineRunner for ProgramRunner {
    #[instrument(skip(self), fields(package = %self.inner.package.display_name()))]
    async fn load(&self) -> Result<TestNode, RunnerError> {
        let tree = describe(&self.inner.package).await?;
        debug!(test_cases = tree.test_case_count, "loaded test programs");
        *self.inner.loaded.lock() = Some(tree.clone());
        Ok(tree)
    }

    async fn reload(&self) -> Result<TestNode, RunnerError> {
        self.unload().await?;
        self.load().await
    }

    async fn unload(&self) -> Result<(), RunnerError> {
        self.inner.stop.lock().forced.cancel();
        let background = self.inner.background.lock().take();
        if let Some(handle) = background {
            if let Err(e) = handle.await {
                warn!(error = %e, "background run did not finish cleanly");
            }
        }
        *self.inner.stop.lock() = StopTokens::default();
        *self.inner.loaded.lock() = None;
        Ok(())
    }

    async fn explore(&self, _filter: &TestFilter) -> Result<TestNode, RunnerError> {
        self.ensure_loaded().await
    }

    async fn count_test_cases(&self, _filter: &TestFilter) -> Result<usize, RunnerError> {
        Ok(self.ensure_loaded().await?.test_case_count)
    }

    #[instrument(skip_all, fields(package = %self.inner.package.display_name()))]
    async fn run(
        &self,
        listener: Arc<dyn TestEventListener>,
        filter: &TestFilter,
    ) -> Result<TestNode, RunnerError> {
        self.execute(listener.as_ref(), filter).await
    }

    async fn run_async(
        &self,
        listener: Arc<dyn TestEventListener>,
        filter: &TestFilter,
    ) -> Result<(), RunnerError> {
        let _ = self.ensure_loaded().await?;
        let runner = self.clone();
        let filter = filter.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = runner.execute(listener.as_ref(), &filter).await {
                warn!(error = %e, "background run failed");
                listener.on_test_event(&format!(
                    "<test-run result=\"Error\" message=\"{}\"/>",
                    escape(&e.to_string())
                ));
            }
        });
        if let Some(previous) = self.inner.background.lock().replace(handle) {
            if !previous.is_finished() {
                debug!("detaching previous background run");
            }
        }
        Ok(())
    }

    async fn request_stop(&self) -> Result<(), RunnerError> {
        info!(package = %self.inner.package.display_name(), "stop requested");
        self.inner.stop.lock().requested.cancel();
        Ok(())
    }

    async fn force_stop(&self) -> Result<(), RunnerError> {
        info!(package = %self.inner.package.display_name(), "forced stop");
        let tokens = self.inner.stop.lock().clone();
        tokens.requested.cancel();
        tokens.forced.cancel();
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tree helpers
// ─────────────────────────────────────────────────────────────────────────────

fn leaves(package: &TestPackage) -> Vec<&TestPackage> {
    if package.is_leaf() {
        return vec![package];
    }
    package.sub_packages.iter().flat_map(leaves).collect()
}

/// Rebuild the package shape around executed cases, in leaf order.
fn assemble(package: &TestPackage, cases: &mut impl Iterator<Item = TestNode>) -> TestNode {
    let mut node = TestNode::for_package(package);
    if package.is_leaf() {
        if let Some(case) = cases.next() {
            node.push_child(case);
        }
    } else {
        for sub in &package.sub_packages {
            node.push_child(assemble(sub, cases));
        }
    }
    node
}

fn program_case(program: &TestPackage) -> TestNode {
    TestNode::case(
        format!("{}-1", program.id),
        program.name.clone(),
        program.full_name.clone(),
    )
}

async fn describe(package: &TestPackage) -> Result<TestNode, RunnerError> {
    let mut node = TestNode::for_package(package);
    if package.is_leaf() {
        let is_file = tokio::fs::metadata(&package.full_name)
            .await
            .is_ok_and(|meta| meta.is_file());
        if !is_file {
            return Err(RunnerError::fault(format_args!(
                "test program not found: {}",
                package.full_name
            )));
        }
        node.push_child(program_case(package));
        return Ok(node);
    }
    for sub in &package.sub_packages {
        node.push_child(Box::pin(describe(sub)).await?);
    }
    Ok(node)
}

// ─────────────────────────────────────────────────────────────────────────────
// Program execution
// ─────────────────────────────────────────────────────────────────────────────

async fn run_program(
    program: &TestPackage,
    listener: &dyn TestEventListener,
    filter: &TestFilter,
    tokens: &StopTokens,
) -> Result<TestNode, RunnerError> {
    let case = program_case(program);
    let full_name = escape(&program.full_name);
    listener.on_test_event(&format!("<start-test fullname=\"{full_name}\"/>"));

    let mut cmd = Command::new(&program.full_name);
    let _ = cmd
        .env(TEST_FILTER_ENV_VAR, filter.text())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    if let Some(dir) = program.get_setting::<Option<String>>(WORK_DIRECTORY, None) {
        let _ = cmd.current_dir(dir);
    }

    debug!(program = %program.full_name, "spawning test program");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(program = %program.full_name, error = %e, "failed to spawn test program");
            let message = format!("failed to spawn: {e}");
            listener.on_test_event(&format!(
                "<test-case fullname=\"{full_name}\" result=\"Error\"/>"
            ));
            return Ok(case.with_outcome(TestOutcome::Error).with_failure(message));
        }
    };

    let mut lines = child.stdout.take().map(|out| BufReader::new(out).split(b'\n'));
    let status = loop {
        tokio::select! {
            line = next_line(&mut lines) => match line {
                Some(line) => listener.on_test_event(&line),
                None => lines = None,
            },
            status = child.wait(), if lines.is_none() => {
                break status.map_err(RunnerError::fault)?;
            }
            () = tokens.forced.cancelled() => {
                let _ = child.kill().await;
                info!(program = %program.full_name, "test program killed");
                return Err(RunnerError::Cancelled);
            }
            () = tokens.requested.cancelled() => {
                let _ = child.kill().await;
                info!(program = %program.full_name, "test program stopped on request");
                listener.on_test_event(&format!(
                    "<test-case fullname=\"{full_name}\" result=\"Skipped\"/>"
                ));
                return Ok(case.with_outcome(TestOutcome::Skipped).with_failure("stopped on request"));
            }
        }
    };

    let (outcome, case) = if status.success() {
        (TestOutcome::Passed, case.with_outcome(TestOutcome::Passed))
    } else {
        (
            TestOutcome::Failed,
            case.with_outcome(TestOutcome::Failed)
                .with_failure(format!("test program exited with {status}")),
        )
    };
    debug!(program = %program.full_name, ?outcome, "test program finished");
    listener.on_test_event(&format!(
        "<test-case fullname=\"{full_name}\" result=\"{outcome:?}\"/>"
    ));
    Ok(case)
}

type StdoutLines = tokio::io::Split<BufReader<tokio::process::ChildStdout>>;

/// Next stdout line, or `None` at end of stream. Lines are read as bytes so
/// output that is not UTF-8 is forwarded lossily instead of ending the read.
/// Pends forever once the stream is gone so the `select!` falls through to
/// `wait`.
async fn next_line(lines: &mut Option<StdoutLines>) -> Option<String> {
    let Some(reader) = lines else {
        return std::future::pending().await;
    };
    match reader.next_segment().await {
        Ok(Some(mut line)) => {
            if line.last() == Some(&b'\r') {
                let _ = line.pop();
            }
            Some(String::from_utf8_lossy(&line).into_owned())
        }
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "failed to read test program output");
            None
        }
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
