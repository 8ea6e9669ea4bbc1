//! Test cases shipped with the runner.

mod command_job;
mod controller_fanout;
mod file_integrity;
mod job_interruption;

pub use command_job::CommandJob;
pub use controller_fanout::ControllerFanout;
pub use file_integrity::FileIntegrity;
pub use job_interruption::JobInterruption;

use harness::machine::Machine;
use harness::{Error, Result, TestCase, TestContext};
use std::sync::Arc;

const DEFAULT_MACHINE: &str = "local";

/// Every built-in test case, in the order a full run executes them.
pub fn builtin() -> Vec<Box<dyn TestCase>> {
    vec![
        Box::new(CommandJob::default()),
        Box::new(FileIntegrity::default()),
        Box::new(JobInterruption::default()),
        Box::new(ControllerFanout::default()),
    ]
}

/// The named test cases in the order given, or all of them when `ids` is empty.
pub fn select(ids: &[String]) -> Result<Vec<Box<dyn TestCase>>> {
    if ids.is_empty() {
        return Ok(builtin());
    }
    ids.iter()
        .map(|id| {
            builtin()
                .into_iter()
                .find(|case| case.id() == id)
                .ok_or_else(|| Error::Config(format!("unknown test case `{}`", id)))
        })
        .collect()
}

/// The machine named by the `machine` input.
fn machine_input(ctx: &TestContext) -> Result<Arc<dyn Machine>> {
    let name = ctx
        .inputs()
        .get_or("machine", DEFAULT_MACHINE.to_string())?;
    ctx.machine(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness::machine::LocalMachine;
    use harness::{FailureKind, MachineRegistry, PollPolicy, Runner, TcInputs, TestStatus};
    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn runner(roots: &[(&str, &Path)]) -> Runner {
        let poll = PollPolicy::fixed(Duration::from_millis(20)).with_max_attempts(500);
        let mut machines = MachineRegistry::new();
        for (name, root) in roots {
            machines.insert(Arc::new(
                LocalMachine::new(*name, *root).with_policy(poll.clone()),
            ));
        }
        Runner::new(poll, machines, ".")
    }

    fn dir() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn select_by_id() {
        let ids: Vec<String> = vec!["job-interruption".into(), "command-job".into()];
        let cases = select(&ids).unwrap();
        let selected: Vec<_> = cases.iter().map(|c| c.id().to_string()).collect();
        assert_eq!(selected, ids);
        assert_eq!(select(&[]).unwrap().len(), 4);
        assert!(matches!(select(&["nope".into()]), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn command_job_checks_stdout_and_exit() {
        let root = dir();
        let runner = runner(&[("local", root.path())]);

        let inputs = TcInputs::new()
            .with("command", "printf 'alpha\\nbeta\\n'")
            .with("expected_stdout", json!(["alpha", "beta"]));
        let result = runner.run_with_inputs(&mut CommandJob::default(), inputs).await;
        assert_eq!(result.status, TestStatus::Passed, "{}", result.result_string);

        let inputs = TcInputs::new().with("command", "exit 2");
        let result = runner.run_with_inputs(&mut CommandJob::default(), inputs).await;
        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.failure, Some(FailureKind::Validation));
        assert!(result.result_string.contains("exit code"), "{}", result.result_string);
    }

    #[tokio::test]
    async fn command_job_requires_command() {
        let root = dir();
        let result = runner(&[("local", root.path())])
            .run_with_inputs(&mut CommandJob::default(), TcInputs::new())
            .await;
        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.failure, Some(FailureKind::Setup));
    }

    #[tokio::test]
    async fn file_integrity_copies_and_cleans_up() {
        let root = dir();
        let local = dir();
        let source = local.path().join("payload.bin");
        std::fs::write(&source, vec![7u8; 4096]).unwrap();

        let inputs = TcInputs::new()
            .with("source", source.to_string_lossy().into_owned())
            .with("destination", "incoming/payload.bin");
        let result = runner(&[("local", root.path())])
            .run_with_inputs(&mut FileIntegrity::default(), inputs)
            .await;

        assert_eq!(result.status, TestStatus::Passed, "{}", result.result_string);
        assert!(result.cleanup.is_clean(), "{}", result.cleanup);
        assert_eq!(result.cleanup.steps.len(), 1);
        assert!(!root.path().join("incoming/payload.bin").exists());
    }

    #[tokio::test]
    async fn file_integrity_missing_source_fails_setup() {
        let root = dir();
        let inputs = TcInputs::new().with("source", "/definitely/not/here.bin");
        let result = runner(&[("local", root.path())])
            .run_with_inputs(&mut FileIntegrity::default(), inputs)
            .await;
        assert_eq!(result.failure, Some(FailureKind::Setup));
        // nothing was copied, so there is nothing to clean
        assert!(result.cleanup.steps.is_empty());
    }

    #[tokio::test]
    async fn job_interruption_kills_job() {
        let root = dir();
        let result = runner(&[("local", root.path())])
            .run_with_inputs(
                &mut JobInterruption::default(),
                TcInputs::new().with("command", "sleep 30"),
            )
            .await;
        assert_eq!(result.status, TestStatus::Passed, "{}", result.result_string);
        assert!(result.cleanup.is_clean());
    }

    #[tokio::test]
    async fn controller_fanout_reaches_every_machine() {
        let (a, b) = (dir(), dir());
        let runner = runner(&[("ctrl-a", a.path()), ("ctrl-b", b.path())]);
        let inputs = TcInputs::new()
            .with("machines", "ctrl-a, ctrl-b")
            .with("remote_path", "trigger.json")
            .with("testcases", json!(["command-job"]))
            .with("command", "grep -q command-job \"$TESTBED_TRIGGER\"");

        let result = runner
            .run_with_inputs(&mut ControllerFanout::default(), inputs)
            .await;

        assert_eq!(result.status, TestStatus::Passed, "{}", result.result_string);
        assert_eq!(result.cleanup.steps.len(), 2);
        assert!(result.cleanup.is_clean(), "{}", result.cleanup);
        assert!(!a.path().join("trigger.json").exists());
        assert!(!b.path().join("trigger.json").exists());
    }

    #[tokio::test]
    async fn controller_fanout_reports_failed_controller() {
        let (a, b) = (dir(), dir());
        std::fs::write(b.path().join("broken"), b"").unwrap();
        let runner = runner(&[("ctrl-a", a.path()), ("ctrl-b", b.path())]);
        let inputs = TcInputs::new()
            .with("remote_path", "trigger.json")
            .with("command", "test ! -e broken");

        let result = runner
            .run_with_inputs(&mut ControllerFanout::default(), inputs)
            .await;

        assert_eq!(result.status, TestStatus::Failed);
        assert!(result.result_string.contains("1 of 2"), "{}", result.result_string);
        assert!(result.result_string.contains("ctrl-b"), "{}", result.result_string);
        assert!(!a.path().join("trigger.json").exists());
    }
}
