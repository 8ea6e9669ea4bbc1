//! Job-level operations test cases reach for: waiting on states and phases, suspend/resume/kill.

use crate::error::{Error, Result};
use crate::job::{Job, JobState};
use crate::poll::{self, PollPolicy};
use tracing::{info, warn};

/// What [`JobManager::modify`] should do to a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobAction {
    Suspend,
    Resume,
    Kill,
}

impl JobAction {
    /// State the job should settle in once the action took effect.
    pub fn target_state(self) -> JobState {
        match self {
            JobAction::Suspend => JobState::Suspended,
            JobAction::Resume => JobState::Running,
            JobAction::Kill => JobState::Killed,
        }
    }
}

pub struct JobManager<J> {
    job: J,
    policy: PollPolicy,
}

impl<J: Job> JobManager<J> {
    pub fn new(job: J, policy: PollPolicy) -> Self {
        Self { job, policy }
    }

    pub fn job(&self) -> &J {
        &self.job
    }

    pub fn into_job(self) -> J {
        self.job
    }

    /// Blocks until the job finishes; fails with the job's delay reason unless it completed.
    pub async fn wait_for_completion(&self) -> Result<()> {
        poll::wait_for_completion(&self.job, &self.policy).await
    }

    /// Wait until the job enters one of `expected`.
    ///
    /// Stops early when the job reaches any terminal state. If the job never gets there, `hardcheck`
    /// decides between an error and `Ok(false)`.
    pub async fn wait_for_state(&self, expected: &[JobState], hardcheck: bool) -> Result<bool> {
        let job_id = self.job.job_id();
        info!(%job_id, ?expected, "waiting for job state");
        let what = format!("job {} to reach {:?}", job_id, expected);
        let job = &self.job;
        let reached = poll::poll_until(&self.policy, &what, |_| async move {
            let state = job.status().await?;
            let done = expected.contains(&state) || state.is_terminal();
            Ok(done.then(|| state))
        })
        .await;
        let state = match reached {
            Ok(state) => state,
            Err(err @ (Error::Timeout { .. } | Error::AttemptsExhausted { .. })) => {
                warn!(%job_id, %err, "job did not reach expected state");
                self.job.status().await?
            }
            Err(err) => return Err(err),
        };
        self.check_state(expected, state, hardcheck).await
    }

    /// Wait for the job to enter `phase`. It is an error for the job to finish first.
    pub async fn wait_for_phase(&self, phase: &str) -> Result<()> {
        let job = &self.job;
        let job_id = job.job_id();
        if job.status().await?.is_terminal() {
            info!(%job_id, phase, "job already finished before waiting for phase");
            return Ok(());
        }
        let what = format!("job {} to enter phase {}", job_id, phase);
        poll::poll_until(&self.policy, &what, |attempt| async move {
            let current = job.phase().await?;
            if matches!(&current, Some(p) if p.eq_ignore_ascii_case(phase)) {
                return Ok(Some(()));
            }
            if job.status().await?.is_terminal() {
                return Err(Error::Failed(format!(
                    "job {} finished while waiting for phase {}",
                    job_id, phase
                )));
            }
            info!(%job_id, phase, current = ?current, attempt, "waiting for job phase");
            Ok(None)
        })
        .await
    }

    /// Suspend, resume or kill the job, optionally waiting for it to settle.
    pub async fn modify(&self, action: JobAction, wait: bool) -> Result<()> {
        let job_id = self.job.job_id();
        info!(%job_id, ?action, "modifying job");
        match action {
            JobAction::Suspend => self.job.suspend().await?,
            JobAction::Resume => self.job.resume().await?,
            JobAction::Kill => self.job.kill().await?,
        }
        if wait {
            self.wait_for_state(&[action.target_state()], true).await?;
        }
        Ok(())
    }

    /// Kill the job and poll until it reports the killed state.
    pub async fn kill_and_wait(&self) -> Result<()> {
        self.modify(JobAction::Kill, true).await
    }

    /// Compare the job's current state with `expected`.
    pub async fn validate_state(&self, expected: &[JobState]) -> Result<()> {
        let state = self.job.status().await?;
        self.check_state(expected, state, true).await.map(|_| ())
    }

    async fn check_state(
        &self,
        expected: &[JobState],
        actual: JobState,
        hardcheck: bool,
    ) -> Result<bool> {
        if expected.contains(&actual) {
            info!(job_id = %self.job.job_id(), state = %actual, "job reached expected state");
            return Ok(true);
        }
        if !hardcheck {
            return Ok(false);
        }
        let job_id = self.job.job_id().to_string();
        if actual.is_terminal() {
            let reason = self.job.delay_reason().await.unwrap_or_default();
            warn!(%job_id, state = %actual, %reason, "job ended in unexpected state");
        }
        Err(Error::UnexpectedState {
            job_id,
            expected: expected.to_vec(),
            actual,
        })
    }
}
