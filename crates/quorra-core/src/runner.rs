//! Runner contracts.
//!
//! A [`TestEngineRunner`] is the executable surface a worker drives: it is
//! implemented by the local test adapter inside a worker, by the remote proxy
//! on the controller, and by the process-parallel orchestrator itself. All
//! methods take `&self` because a run may be in flight on one task while a
//! stop request arrives on another.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::RunnerError;
use crate::filter::TestFilter;
use crate::package::TestPackage;
use crate::results::TestNode;

/// Receiver of progress reports and other test events.
///
/// Reports are opaque text owned by the test framework. Implementations must
/// not block: they are called from execution tasks.
pub trait TestEventListener: Send + Sync {
    /// Handle one report.
    fn on_test_event(&self, report: &str);
}

impl<F> TestEventListener for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_test_event(&self, report: &str) {
        self(report);
    }
}

/// Listener that discards every report.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullListener;

impl TestEventListener for NullListener {
    fn on_test_event(&self, _report: &str) {}
}

/// Loads, explores and executes the tests of one package.
#[async_trait]
pub trait TestEngineRunner: Send + Sync {
    /// Load the package and describe what was found.
    async fn load(&self) -> Result<TestNode, RunnerError>;

    /// Unload and load again.
    async fn reload(&self) -> Result<TestNode, RunnerError>;

    /// Release everything `load` acquired.
    async fn unload(&self) -> Result<(), RunnerError>;

    /// Describe the tests selected by `filter`.
    async fn explore(&self, filter: &TestFilter) -> Result<TestNode, RunnerError>;

    /// Count the test cases selected by `filter`.
    async fn count_test_cases(&self, filter: &TestFilter) -> Result<usize, RunnerError>;

    /// Execute the selected tests, reporting progress to `listener`, and
    /// return the result tree.
    async fn run(
        &self,
        listener: Arc<dyn TestEventListener>,
        filter: &TestFilter,
    ) -> Result<TestNode, RunnerError>;

    /// Start executing the selected tests and return once execution is
    /// under way. Progress and the final outcome go to `listener`.
    async fn run_async(
        &self,
        listener: Arc<dyn TestEventListener>,
        filter: &TestFilter,
    ) -> Result<(), RunnerError>;

    /// Ask the current run to wind down and still produce a result.
    async fn request_stop(&self) -> Result<(), RunnerError>;

    /// Abandon the current run immediately.
    async fn force_stop(&self) -> Result<(), RunnerError>;
}

/// Builds the local runner for a package received over the control channel.
pub trait RunnerFactory: Send + Sync {
    /// Create a runner bound to `package`.
    fn create_runner(&self, package: TestPackage) -> Result<Arc<dyn TestEngineRunner>, RunnerError>;
}
