//! Exploration and result trees.
//!
//! Runners answer `Load`, `Explore` and `Run` with a [`TestNode`] tree. The
//! orchestrator combines per-worker trees under a synthetic package node with
//! [`TestNode::combine`]; a worker that failed is represented by an explicit
//! [`TestOutcome::Error`] node from [`TestNode::failed_package`].

use serde::{Deserialize, Serialize};

use crate::errors::RunnerError;
use crate::package::TestPackage;

/// What a node stands for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    /// A package (one per worker, plus the synthetic aggregate root).
    Package,
    /// A grouping of test cases.
    Suite,
    /// A single test case.
    Case,
}

/// Outcome of executed tests, ordered from best to worst.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TestOutcome {
    /// Everything passed.
    Passed,
    /// Not executed.
    Skipped,
    /// At least one assertion failed.
    Failed,
    /// The test (or its worker) could not run to completion.
    Error,
}

/// Node of an exploration or result tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestNode {
    /// Unique id within the tree.
    pub id: String,
    /// Short name.
    pub name: String,
    /// Fully qualified name.
    pub full_name: String,
    /// Node kind.
    pub kind: NodeKind,
    /// Number of test cases at or below this node.
    pub test_case_count: usize,
    /// Outcome, present once executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TestOutcome>,
    /// Failure or error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Child nodes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TestNode>,
}

impl TestNode {
    /// Childless package node for `package`.
    pub fn for_package(package: &TestPackage) -> Self {
        Self {
            id: package.id.clone(),
            name: package.name.clone(),
            full_name: package.full_name.clone(),
            kind: NodeKind::Package,
            test_case_count: 0,
            outcome: None,
            failure: None,
            children: Vec::new(),
        }
    }

    /// A single test case.
    pub fn case(
        id: impl Into<String>,
        name: impl Into<String>,
        full_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            full_name: full_name.into(),
            kind: NodeKind::Case,
            test_case_count: 1,
            outcome: None,
            failure: None,
            children: Vec::new(),
        }
    }

    /// Set the outcome.
    #[must_use]
    pub fn with_outcome(mut self, outcome: TestOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Set the failure message.
    #[must_use]
    pub fn with_failure(mut self, failure: impl Into<String>) -> Self {
        self.failure = Some(failure.into());
        self
    }

    /// Append a child and update the counts and outcome.
    pub fn push_child(&mut self, child: TestNode) {
        self.test_case_count += child.test_case_count;
        self.outcome = merge_outcome(self.outcome, child.outcome);
        self.children.push(child);
    }

    /// Union `children` under a synthetic node for `package`.
    ///
    /// Test-case counts are summed and the worst child outcome wins.
    pub fn combine(package: &TestPackage, children: Vec<TestNode>) -> Self {
        let mut root = Self::for_package(package);
        for child in children {
            root.push_child(child);
        }
        root
    }

    /// Error node standing in for a sub-package whose worker failed.
    pub fn failed_package(package: &TestPackage, error: &RunnerError) -> Self {
        Self::for_package(package)
            .with_outcome(TestOutcome::Error)
            .with_failure(error.to_string())
    }

    /// Count leaf outcomes in this tree.
    pub fn summary(&self) -> ResultSummary {
        let mut summary = ResultSummary::default();
        self.accumulate(&mut summary);
        summary
    }

    fn accumulate(&self, summary: &mut ResultSummary) {
        if !self.children.is_empty() {
            for child in &self.children {
                child.accumulate(summary);
            }
            return;
        }
        match (self.kind, self.outcome) {
            (NodeKind::Case, outcome) => {
                summary.total += 1;
                match outcome {
                    Some(TestOutcome::Passed) => summary.passed += 1,
                    Some(TestOutcome::Failed) => summary.failed += 1,
                    Some(TestOutcome::Error) => summary.errors += 1,
                    Some(TestOutcome::Skipped) | None => summary.skipped += 1,
                }
            }
            // A childless non-case node with an error is a worker that never
            // reported any tests.
            (_, Some(TestOutcome::Error)) => summary.errors += 1,
            _ => {}
        }
    }
}

fn merge_outcome(current: Option<TestOutcome>, next: Option<TestOutcome>) -> Option<TestOutcome> {
    match (current, next) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Leaf outcome counts for a result tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSummary {
    /// Test cases seen.
    pub total: usize,
    /// Cases that passed.
    pub passed: usize,
    /// Cases that failed.
    pub failed: usize,
    /// Cases skipped or never executed.
    pub skipped: usize,
    /// Errored cases plus failed workers.
    pub errors: usize,
}

impl ResultSummary {
    /// No failures and no errors.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }

    /// Closing `<test-run .../>` progress report for this summary.
    pub fn report(&self) -> String {
        format!(
            "<test-run total=\"{}\" passed=\"{}\" failed=\"{}\" skipped=\"{}\" errors=\"{}\" result=\"{}\"/>",
            self.total,
            self.passed,
            self.failed,
            self.skipped,
            self.errors,
            if self.is_success() { "Passed" } else { "Failed" },
        )
    }
}
