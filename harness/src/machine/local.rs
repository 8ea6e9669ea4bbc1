use super::{confine, lossy, CommandOutput, CommandSpec, Machine};
use crate::error::{Error, Result};
use crate::job::{state_from_process, Job, JobState};
use crate::poll::PollPolicy;
use async_trait::async_trait;
use joblib::{JobCoordinator, JobId, JobSpec, JobStatus};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

const COORDINATOR_CAPACITY: usize = 32;

/// The host the harness itself runs on. Commands run through a job coordinator; file paths are
/// confined to `root`.
///
/// [`Machine::execute_command`] gives up once the poll policy's budget is spent and kills the
/// command.
pub struct LocalMachine {
    name: String,
    root: PathBuf,
    policy: PollPolicy,
    coordinator: JobCoordinator,
}

impl LocalMachine {
    /// Must be called from within a tokio runtime.
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            policy: PollPolicy::default(),
            coordinator: JobCoordinator::spawn(COORDINATOR_CAPACITY),
        }
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_spec(&self, command: &CommandSpec) -> Result<JobSpec> {
        let dir = confine(&self.root, &command.dir)?;
        Ok(JobSpec {
            program: command.program.clone(),
            args: command.args.clone(),
            dir: dir.to_string_lossy().into_owned(),
            envs: command.envs.clone(),
        })
    }

    async fn start(&self, command: &CommandSpec) -> Result<ProcessJob> {
        let spec = self.job_spec(command)?;
        let job_id = self
            .coordinator
            .start_job(spec)
            .await
            .map_err(|err| Error::machine(&self.name, format!("`{}`: {}", command, err)))?;
        info!(machine = %self.name, %job_id, %command, "started command");
        Ok(ProcessJob::new(self.coordinator.clone(), job_id))
    }

    async fn collect(&self, job: &ProcessJob) -> Result<CommandOutput> {
        let stdout = self.coordinator.stream_stdout(job.id).await?;
        let stderr = self.coordinator.stream_stderr(job.id).await?;
        let (stdout, stderr) = tokio::join!(drain(stdout), drain(stderr));
        let status = self.coordinator.wait_job(job.id).await?;
        debug!(machine = %self.name, job_id = %job.id, %status, "command finished");
        Ok(CommandOutput {
            state: state_from_process(&status),
            exit_code: match status {
                JobStatus::Exited { code } => Some(code),
                _ => None,
            },
            stdout,
            stderr,
        })
    }
}

#[async_trait]
impl Machine for LocalMachine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start_command(&self, command: &CommandSpec) -> Result<Box<dyn Job>> {
        Ok(Box::new(self.start(command).await?))
    }

    async fn execute_command(&self, command: &CommandSpec) -> Result<CommandOutput> {
        let budget = self.policy.budget().ok_or_else(|| {
            Error::Config(format!(
                "machine {} needs a poll timeout or attempt limit",
                self.name
            ))
        })?;
        let job = self.start(command).await?;
        match tokio::time::timeout(budget, self.collect(&job)).await {
            Ok(output) => output,
            Err(_) => {
                warn!(
                    machine = %self.name,
                    job_id = %job.id,
                    %command,
                    ?budget,
                    "command timed out"
                );
                if let Err(err) = job.kill().await {
                    warn!(machine = %self.name, job_id = %job.id, %err, "failed to kill command");
                }
                Err(Error::Timeout {
                    what: format!("`{}` on machine {}", command, self.name),
                    elapsed: budget,
                })
            }
        }
    }

    async fn write_file(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let target = confine(&self.root, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, data).await?;
        debug!(machine = %self.name, path = %target.display(), "wrote file");
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let target = confine(&self.root, path)?;
        Ok(tokio::fs::read(target).await?)
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let target = confine(&self.root, path)?;
        tokio::fs::remove_file(target).await?;
        Ok(())
    }

    async fn copy_from_local(&self, local_path: &Path, path: &str) -> Result<()> {
        let target = confine(&self.root, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local_path, &target).await?;
        Ok(())
    }
}

/// A child process started by a [`LocalMachine`].
pub struct ProcessJob {
    coordinator: JobCoordinator,
    id: JobId,
    job_id: String,
}

impl ProcessJob {
    fn new(coordinator: JobCoordinator, id: JobId) -> Self {
        Self {
            coordinator,
            id,
            job_id: id.to_string(),
        }
    }
}

#[async_trait]
impl Job for ProcessJob {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    async fn status(&self) -> Result<JobState> {
        let status = self.coordinator.get_job_status(self.id).await?;
        Ok(state_from_process(&status))
    }

    async fn delay_reason(&self) -> Result<String> {
        let status = self.coordinator.get_job_status(self.id).await?;
        if !status.is_finished() {
            return Ok(String::new());
        }
        let stderr = drain(self.coordinator.stream_stderr(self.id).await?).await;
        Ok(describe(&status, &stderr))
    }

    async fn kill(&self) -> Result<()> {
        Ok(self.coordinator.stop_job(self.id).await?)
    }
}

pub(super) async fn drain(mut output: UnboundedReceiver<joblib::types::OutputBlob>) -> String {
    let mut bytes = vec![];
    while let Some(blob) = output.recv().await {
        bytes.extend_from_slice(&blob);
    }
    lossy(&bytes)
}

/// Status plus the last line of stderr, if there is one.
pub(super) fn describe(status: &JobStatus, stderr: &str) -> String {
    match stderr.lines().rev().find(|line| !line.trim().is_empty()) {
        Some(line) => format!("{}: {}", status, line.trim()),
        None => status.to_string(),
    }
}
