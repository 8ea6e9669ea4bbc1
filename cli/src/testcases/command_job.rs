use super::machine_input;
use async_trait::async_trait;
use harness::machine::{CommandSpec, Machine};
use harness::validate::{compare_lists, Mismatch};
use harness::{CleanupReport, Result, TestCase, TestContext};
use std::sync::Arc;
use tracing::info;

/// Run one command on a machine and check its exit code and, optionally, its stdout lines.
///
/// Inputs: `command` (shell), `machine` (default `local`), `expected_exit` (default 0),
/// `expected_stdout` (list of lines).
#[derive(Default)]
pub struct CommandJob {
    plan: Option<Plan>,
}

struct Plan {
    machine: Arc<dyn Machine>,
    command: CommandSpec,
    expected_exit: i32,
    expected_stdout: Option<Vec<String>>,
}

#[async_trait]
impl TestCase for CommandJob {
    fn id(&self) -> &str {
        "command-job"
    }

    fn name(&self) -> &str {
        "Run a command and validate its output"
    }

    fn required_inputs(&self) -> &[&str] {
        &["command"]
    }

    async fn setup(&mut self, ctx: &TestContext) -> Result<()> {
        let inputs = ctx.inputs();
        let expected_stdout = if inputs.contains("expected_stdout") {
            Some(inputs.get_list("expected_stdout")?)
        } else {
            None
        };
        self.plan = Some(Plan {
            machine: machine_input(ctx)?,
            command: CommandSpec::shell(inputs.get_str("command")?),
            expected_exit: inputs.get_or("expected_exit", 0)?,
            expected_stdout,
        });
        Ok(())
    }

    async fn run(&mut self, _ctx: &TestContext) -> Result<()> {
        let plan = match &self.plan {
            Some(plan) => plan,
            None => return Err(harness::Error::Setup("command not prepared".into())),
        };
        let output = plan.machine.execute_command(&plan.command).await?;
        info!(machine = plan.machine.name(), state = %output.state, "command finished");

        if output.exit_code != Some(plan.expected_exit) {
            let actual = match output.exit_code {
                Some(code) => code.to_string(),
                None => output.state.to_string(),
            };
            return Err(Mismatch {
                what: format!("exit code of `{}`", plan.command),
                missing: vec![plan.expected_exit.to_string()],
                unexpected: vec![actual],
            }
            .into());
        }
        if let Some(expected) = &plan.expected_stdout {
            let actual: Vec<String> = output.stdout.lines().map(str::to_string).collect();
            compare_lists(expected, &actual, false).into_result("stdout")?;
        }
        Ok(())
    }

    async fn tear_down(&mut self, _ctx: &TestContext) -> CleanupReport {
        self.plan = None;
        CleanupReport::default()
    }
}
