use super::machine_input;
use async_trait::async_trait;
use harness::machine::{CommandSpec, Machine};
use harness::{
    Cleanup, CleanupReport, Error, Job, JobManager, JobState, Result, TestCase, TestContext,
};
use std::sync::Arc;

/// Start a long-running job, kill it, and check it ends killed rather than completed.
///
/// Inputs: `machine` (default `local`), `command` (default `sleep 600`).
#[derive(Default)]
pub struct JobInterruption {
    machine: Option<Arc<dyn Machine>>,
    command: Option<CommandSpec>,
    job: Option<JobManager<Box<dyn Job>>>,
}

#[async_trait]
impl TestCase for JobInterruption {
    fn id(&self) -> &str {
        "job-interruption"
    }

    fn name(&self) -> &str {
        "Kill a running job"
    }

    async fn setup(&mut self, ctx: &TestContext) -> Result<()> {
        let command = ctx.inputs().get_or("command", "sleep 600".to_string())?;
        self.command = Some(CommandSpec::shell(command));
        self.machine = Some(machine_input(ctx)?);
        Ok(())
    }

    async fn run(&mut self, ctx: &TestContext) -> Result<()> {
        let (machine, command) = match (&self.machine, &self.command) {
            (Some(machine), Some(command)) => (machine, command),
            _ => return Err(Error::Setup("job not prepared".into())),
        };
        let job = machine.start_command(command).await?;
        let manager = self.job.insert(ctx.manage(job));

        manager.wait_for_state(&[JobState::Running], true).await?;
        manager.kill_and_wait().await?;
        manager.validate_state(&[JobState::Killed]).await
    }

    async fn tear_down(&mut self, _ctx: &TestContext) -> CleanupReport {
        let mut cleanup = Cleanup::new();
        cleanup
            .attempt_some("kill leftover job", self.job.take(), |manager| async move {
                let job = manager.job();
                if !job.status().await?.is_terminal() {
                    job.kill().await?;
                }
                Ok(())
            })
            .await;
        cleanup.finish()
    }
}
