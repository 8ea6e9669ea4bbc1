use async_trait::async_trait;
use harness::machine::{CommandSpec, Machine};
use harness::trigger::{trigger_controllers, Trigger};
use harness::{Cleanup, CleanupReport, Result, TestCase, TestContext};
use std::sync::Arc;
use tracing::info;

/// Hand a trigger file to several controllers at once and run a command on each.
///
/// Inputs: `machines` (default: every configured machine), `command` (shell, default checks the
/// trigger arrived), `remote_path`, `testcases` (ids written into the trigger).
#[derive(Default)]
pub struct ControllerFanout {
    machines: Vec<Arc<dyn Machine>>,
    command: Option<CommandSpec>,
    remote_path: String,
    testcases: Vec<String>,
    staged: Vec<Arc<dyn Machine>>,
}

#[async_trait]
impl TestCase for ControllerFanout {
    fn id(&self) -> &str {
        "controller-fanout"
    }

    fn name(&self) -> &str {
        "Trigger every controller concurrently"
    }

    async fn setup(&mut self, ctx: &TestContext) -> Result<()> {
        let inputs = ctx.inputs();
        self.machines = if inputs.contains("machines") {
            inputs
                .get_list("machines")?
                .iter()
                .map(|name| ctx.machine(name))
                .collect::<Result<_>>()?
        } else {
            ctx.machines().all()
        };
        if self.machines.is_empty() {
            return Err(harness::Error::Setup("no controller machines configured".into()));
        }
        let command = inputs.get_or("command", "test -s \"$TESTBED_TRIGGER\"".to_string())?;
        self.command = Some(CommandSpec::shell(command));
        self.remote_path = inputs.get_or(
            "remote_path",
            format!("testbed/{}/trigger.json", ctx.run_id()),
        )?;
        self.testcases = if inputs.contains("testcases") {
            inputs.get_list("testcases")?
        } else {
            vec![]
        };
        Ok(())
    }

    async fn run(&mut self, ctx: &TestContext) -> Result<()> {
        let command = self
            .command
            .clone()
            .ok_or_else(|| harness::Error::Setup("command not prepared".into()))?;
        let trigger = Trigger {
            run_id: ctx.run_id(),
            testcases: self.testcases.clone(),
            inputs: ctx.inputs().clone(),
        };
        self.staged = self.machines.clone();
        let report =
            trigger_controllers(self.machines.clone(), &trigger, &self.remote_path, &command)
                .await?;
        info!(
            succeeded = report.succeeded().count(),
            failed = report.failed().count(),
            "controllers triggered"
        );
        report.into_result().map(|_| ())
    }

    async fn tear_down(&mut self, _ctx: &TestContext) -> CleanupReport {
        let mut cleanup = Cleanup::new();
        for machine in self.staged.drain(..) {
            let step = format!("remove trigger on {}", machine.name());
            cleanup
                .attempt(&step, machine.delete_file(&self.remote_path))
                .await;
        }
        cleanup.finish()
    }
}
