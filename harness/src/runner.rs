//! Drives test cases through setup, run and teardown, and records what happened.

use crate::cleanup::CleanupReport;
use crate::config::HarnessConfig;
use crate::context::TestContext;
use crate::error::{Error, FailureKind, Result};
use crate::inputs::TcInputs;
use crate::machine::MachineRegistry;
use crate::poll::PollPolicy;
use crate::testcase::{TestCase, TestStatus};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

/// Outcome of one test case.
#[derive(Clone, Debug, Serialize)]
pub struct TestResult {
    pub id: String,
    pub name: String,
    /// `Passed`, `Failed` or `Skipped`.
    pub status: TestStatus,
    pub failure: Option<FailureKind>,
    pub result_string: String,
    pub cleanup: CleanupReport,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    /// Every lifecycle state the case went through, ending in `TornDown`.
    pub transitions: Vec<TestStatus>,
}

impl TestResult {
    pub fn passed(&self) -> bool {
        self.status == TestStatus::Passed
    }
}

fn as_millis<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Results of a batch of test cases.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunSummary {
    pub run_id: Option<Uuid>,
    pub results: Vec<TestResult>,
}

impl RunSummary {
    fn count(&self, status: TestStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn passed(&self) -> usize {
        self.count(TestStatus::Passed)
    }

    pub fn failed(&self) -> usize {
        self.count(TestStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(TestStatus::Skipped)
    }

    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            write!(f, "{:<8} {:<24} {}", result.status, result.id, result.name)?;
            if !result.result_string.is_empty() {
                write!(f, " -- {}", result.result_string)?;
            }
            if !result.cleanup.is_clean() {
                write!(f, " [{}]", result.cleanup)?;
            }
            writeln!(f)?;
        }
        write!(
            f,
            "{} passed, {} failed, {} skipped",
            self.passed(),
            self.failed(),
            self.skipped()
        )
    }
}

struct Lifecycle {
    status: TestStatus,
    transitions: Vec<TestStatus>,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            status: TestStatus::NotStarted,
            transitions: vec![TestStatus::NotStarted],
        }
    }

    fn advance(&mut self, next: TestStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal test transition {} -> {}",
            self.status,
            next
        );
        self.status = next;
        self.transitions.push(next);
    }
}

/// Runs test cases one at a time; a failure in one never affects the next.
pub struct Runner {
    run_id: Uuid,
    poll: PollPolicy,
    machines: Arc<MachineRegistry>,
    workspace: PathBuf,
    inputs: BTreeMap<String, TcInputs>,
}

impl Runner {
    pub fn new(poll: PollPolicy, machines: MachineRegistry, workspace: impl Into<PathBuf>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            poll,
            machines: Arc::new(machines),
            workspace: workspace.into(),
            inputs: BTreeMap::new(),
        }
    }

    /// Must be called from within a tokio runtime (local machines spawn their job coordinators).
    pub fn from_config(config: &HarnessConfig) -> Result<Self> {
        let poll = config.poll_policy()?;
        let machines = MachineRegistry::from_config(config, &poll);
        let mut runner = Self::new(poll, machines, config.workspace.clone());
        runner.inputs = config.testcases.clone();
        Ok(runner)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn machines(&self) -> &MachineRegistry {
        &self.machines
    }

    /// Run with the inputs configured for the case's id.
    pub async fn run(&self, case: &mut dyn TestCase) -> TestResult {
        let inputs = self.inputs.get(case.id()).cloned().unwrap_or_default();
        self.run_with_inputs(case, inputs).await
    }

    pub async fn run_with_inputs(&self, case: &mut dyn TestCase, inputs: TcInputs) -> TestResult {
        let span = tracing::info_span!("testcase", id = %case.id(), run_id = %self.run_id);
        let ctx = TestContext::new(
            self.run_id,
            inputs,
            self.poll.clone(),
            self.machines.clone(),
            self.workspace.clone(),
        );
        drive(case, &ctx).instrument(span).await
    }

    pub async fn run_all(&self, cases: Vec<Box<dyn TestCase>>) -> RunSummary {
        let mut summary = RunSummary {
            run_id: Some(self.run_id),
            results: Vec::with_capacity(cases.len()),
        };
        for mut case in cases {
            summary.results.push(self.run(case.as_mut()).await);
        }
        summary
    }

    /// Release machine connections. Errors are reported, not raised.
    pub async fn shutdown(&self) -> CleanupReport {
        self.machines.disconnect_all().await
    }
}

async fn drive(case: &mut dyn TestCase, ctx: &TestContext) -> TestResult {
    let started = Instant::now();
    let id = case.id().to_string();
    let name = case.name().to_string();
    let mut lifecycle = Lifecycle::new();
    let mut failure = None;
    let mut result_string = String::new();

    info!(%name, "starting test case");
    lifecycle.advance(TestStatus::Setup);
    let setup = match ctx.inputs().require(case.required_inputs()) {
        Ok(()) => guarded(case.setup(ctx)).await,
        Err(err) => Err(PhaseError::Failed(FailureKind::Setup, err.to_string())),
    };
    let outcome = match setup {
        Ok(()) => {
            lifecycle.advance(TestStatus::Running);
            guarded(case.run(ctx)).await
        }
        // Anything other than a panic that stops setup is a setup failure.
        Err(PhaseError::Failed(FailureKind::Panic, reason)) => {
            Err(PhaseError::Failed(FailureKind::Panic, reason))
        }
        Err(PhaseError::Failed(_, reason)) => Err(PhaseError::Failed(FailureKind::Setup, reason)),
        Err(skipped) => Err(skipped),
    };
    match outcome {
        Ok(()) => lifecycle.advance(TestStatus::Passed),
        Err(PhaseError::Skipped(reason)) => {
            info!(%reason, "test case skipped");
            result_string = reason;
            lifecycle.advance(TestStatus::Skipped);
        }
        Err(PhaseError::Failed(kind, reason)) => {
            error!(?kind, %reason, "test case failed");
            failure = Some(kind);
            result_string = reason;
            lifecycle.advance(TestStatus::Failed);
        }
    }
    let status = lifecycle.status;

    let cleanup = match AssertUnwindSafe(case.tear_down(ctx)).catch_unwind().await {
        Ok(report) => report,
        Err(panic) => {
            let mut report = CleanupReport::default();
            report.record_failure("tear_down", panic_message(panic.as_ref()));
            report
        }
    };
    if !cleanup.is_clean() {
        warn!(%cleanup, "tear down was not clean");
    }
    lifecycle.advance(TestStatus::TornDown);

    let duration = started.elapsed();
    info!(%status, ?duration, "finished test case");
    TestResult {
        id,
        name,
        status,
        failure,
        result_string,
        cleanup,
        duration,
        transitions: lifecycle.transitions,
    }
}

enum PhaseError {
    Skipped(String),
    Failed(FailureKind, String),
}

/// Await a phase, turning errors and panics into a `PhaseError`.
async fn guarded<F>(phase: F) -> std::result::Result<(), PhaseError>
where
    F: Future<Output = Result<()>>,
{
    match AssertUnwindSafe(phase).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(Error::Skipped(reason))) => Err(PhaseError::Skipped(reason)),
        Ok(Err(err)) => Err(PhaseError::Failed(err.kind(), err.to_string())),
        Err(panic) => Err(PhaseError::Failed(FailureKind::Panic, panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into());
    format!("panicked: {}", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::Cleanup;
    use crate::job::JobState;
    use crate::mock::MockJob;
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Clone, Copy, PartialEq)]
    enum Plan {
        Pass,
        FailJob,
        FailSetup,
        PanicRun,
        Skip,
        DirtyTearDown,
    }

    struct Scripted {
        plan: Plan,
        resource: Option<&'static str>,
        ran: bool,
        torn_down: bool,
    }

    impl Scripted {
        fn new(plan: Plan) -> Self {
            Self {
                plan,
                resource: None,
                ran: false,
                torn_down: false,
            }
        }
    }

    #[async_trait]
    impl TestCase for Scripted {
        fn id(&self) -> &str {
            "scripted"
        }

        fn name(&self) -> &str {
            "Scripted test case"
        }

        async fn setup(&mut self, _ctx: &TestContext) -> Result<()> {
            if self.plan == Plan::FailSetup {
                return Err(Error::Setup("no database".into()));
            }
            self.resource = Some("table");
            Ok(())
        }

        async fn run(&mut self, ctx: &TestContext) -> Result<()> {
            self.ran = true;
            match self.plan {
                Plan::FailJob => {
                    let job = MockJob::new("job-7")
                        .ends_after(2, JobState::Failed)
                        .with_delay_reason("disk full");
                    ctx.manage(job).wait_for_completion().await
                }
                Plan::PanicRun => panic!("index out of range"),
                Plan::Skip => Err(Error::Skipped("feature disabled".into())),
                _ => {
                    let job = MockJob::new("job-1").completes_after(2);
                    ctx.manage(job).wait_for_completion().await
                }
            }
        }

        async fn tear_down(&mut self, _ctx: &TestContext) -> CleanupReport {
            self.torn_down = true;
            let dirty = self.plan == Plan::DirtyTearDown;
            let mut cleanup = Cleanup::new();
            cleanup.attempt_sync("drop table", || {
                if dirty {
                    Err(Error::Failed("table locked".into()))
                } else {
                    Ok(())
                }
            });
            self.resource = None;
            cleanup.finish()
        }
    }

    struct NeedsInputs;

    #[async_trait]
    impl TestCase for NeedsInputs {
        fn id(&self) -> &str {
            "needs-inputs"
        }

        fn name(&self) -> &str {
            "Needs inputs"
        }

        fn required_inputs(&self) -> &[&str] {
            &["DB_NAME", "TABLE"]
        }

        async fn setup(&mut self, _ctx: &TestContext) -> Result<()> {
            panic!("setup must not run without inputs");
        }

        async fn run(&mut self, _ctx: &TestContext) -> Result<()> {
            Ok(())
        }

        async fn tear_down(&mut self, _ctx: &TestContext) -> CleanupReport {
            CleanupReport::default()
        }
    }

    fn runner() -> Runner {
        let poll = PollPolicy::fixed(Duration::from_secs(1)).with_max_attempts(10);
        Runner::new(poll, MachineRegistry::new(), ".")
    }

    #[tokio::test(start_paused = true)]
    async fn passing_case_walks_full_lifecycle() {
        let mut case = Scripted::new(Plan::Pass);
        let result = runner().run(&mut case).await;

        assert_eq!(result.status, TestStatus::Passed);
        assert!(result.passed());
        assert_eq!(result.failure, None);
        assert!(result.cleanup.is_clean());
        assert_eq!(
            result.transitions,
            vec![
                TestStatus::NotStarted,
                TestStatus::Setup,
                TestStatus::Running,
                TestStatus::Passed,
                TestStatus::TornDown
            ]
        );
        assert!(case.torn_down);
        assert_eq!(case.resource, None);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_reason_reaches_result() {
        let mut case = Scripted::new(Plan::FailJob);
        let result = runner().run(&mut case).await;

        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.failure, Some(FailureKind::Operational));
        assert!(result.result_string.contains("disk full"), "{}", result.result_string);
        assert!(case.torn_down);
    }

    #[tokio::test]
    async fn setup_failure_skips_run_but_tears_down() {
        let mut case = Scripted::new(Plan::FailSetup);
        let result = runner().run(&mut case).await;

        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.failure, Some(FailureKind::Setup));
        assert!(!case.ran);
        assert!(case.torn_down);
        assert_eq!(
            result.transitions,
            vec![
                TestStatus::NotStarted,
                TestStatus::Setup,
                TestStatus::Failed,
                TestStatus::TornDown
            ]
        );
    }

    #[tokio::test]
    async fn panic_in_run_is_a_failure() {
        let mut case = Scripted::new(Plan::PanicRun);
        let result = runner().run(&mut case).await;

        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.failure, Some(FailureKind::Panic));
        assert!(result.result_string.contains("index out of range"));
        assert!(case.torn_down);
    }

    #[tokio::test]
    async fn skipped_case_is_not_a_failure() {
        let mut case = Scripted::new(Plan::Skip);
        let result = runner().run(&mut case).await;

        assert_eq!(result.status, TestStatus::Skipped);
        assert_eq!(result.failure, None);
        assert_eq!(result.result_string, "feature disabled");
        assert!(case.torn_down);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_failure_does_not_change_outcome() {
        let mut case = Scripted::new(Plan::DirtyTearDown);
        let result = runner().run(&mut case).await;

        assert_eq!(result.status, TestStatus::Passed);
        assert!(!result.cleanup.is_clean());
        assert!(result.cleanup.to_string().contains("table locked"));
    }

    #[tokio::test]
    async fn missing_inputs_fail_before_setup() {
        let mut case = NeedsInputs;
        let inputs = TcInputs::new().with("DB_NAME", "sales");
        let result = runner().run_with_inputs(&mut case, inputs).await;

        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.failure, Some(FailureKind::Setup));
        assert!(result.result_string.contains("TABLE"), "{}", result.result_string);
    }

    #[tokio::test(start_paused = true)]
    async fn run_all_keeps_going_after_failures() {
        let cases: Vec<Box<dyn TestCase>> = vec![
            Box::new(Scripted::new(Plan::FailSetup)),
            Box::new(Scripted::new(Plan::Pass)),
            Box::new(Scripted::new(Plan::Skip)),
        ];
        let summary = runner().run_all(cases).await;

        assert_eq!(summary.results.len(), 3);
        assert_eq!((summary.passed(), summary.failed(), summary.skipped()), (1, 1, 1));
        assert!(!summary.all_passed());
        assert!(summary.to_string().ends_with("1 passed, 1 failed, 1 skipped"));
    }
}
