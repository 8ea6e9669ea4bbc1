//! The test case contract and its lifecycle states.

use crate::cleanup::CleanupReport;
use crate::context::TestContext;
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// Where a test case is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    NotStarted,
    Setup,
    Running,
    Passed,
    Failed,
    Skipped,
    TornDown,
}

impl TestStatus {
    pub fn can_transition_to(self, next: TestStatus) -> bool {
        use TestStatus::*;
        matches!(
            (self, next),
            (NotStarted, Setup)
                | (Setup, Running)
                | (Setup, Failed)
                | (Setup, Skipped)
                | (Running, Passed)
                | (Running, Failed)
                | (Running, Skipped)
                | (Passed, TornDown)
                | (Failed, TornDown)
                | (Skipped, TornDown)
        )
    }

    pub fn is_outcome(self) -> bool {
        matches!(self, TestStatus::Passed | TestStatus::Failed | TestStatus::Skipped)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TestStatus::NotStarted => "NOT_STARTED",
            TestStatus::Setup => "SETUP",
            TestStatus::Running => "RUNNING",
            TestStatus::Passed => "PASSED",
            TestStatus::Failed => "FAILED",
            TestStatus::Skipped => "SKIPPED",
            TestStatus::TornDown => "TORN_DOWN",
        };
        f.write_str(text)
    }
}

/// One automated check of a product workflow.
///
/// State created in `setup` should live in `Option` fields so `tear_down` can tell what exists; it
/// is called even when `setup` failed halfway.
#[async_trait]
pub trait TestCase: Send {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    /// Inputs that must be present (and non-null) before `setup` runs.
    fn required_inputs(&self) -> &[&str] {
        &[]
    }

    async fn setup(&mut self, ctx: &TestContext) -> Result<()>;

    /// The test body. Return `Error::Skipped` to skip.
    async fn run(&mut self, ctx: &TestContext) -> Result<()>;

    /// Remove whatever the test created. Failures are reported, never raised.
    async fn tear_down(&mut self, ctx: &TestContext) -> CleanupReport;
}
