//! The asynchronous-operation handle every test case waits on.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// State of a job as reported by whoever runs it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum JobState {
    Pending,
    Running,
    Suspended,
    Completed,
    CompletedWithErrors,
    Failed,
    Killed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed
                | JobState::CompletedWithErrors
                | JobState::Failed
                | JobState::Killed
        )
    }

    pub fn is_success(self) -> bool {
        self == JobState::Completed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Suspended => "suspended",
            JobState::Completed => "completed",
            JobState::CompletedWithErrors => "completed w/ one or more errors",
            JobState::Failed => "failed",
            JobState::Killed => "killed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let state = match s.trim().to_lowercase().as_str() {
            "pending" | "waiting" | "queued" => JobState::Pending,
            "running" => JobState::Running,
            "suspended" => JobState::Suspended,
            "completed" => JobState::Completed,
            "completed w/ one or more errors" => JobState::CompletedWithErrors,
            "failed" => JobState::Failed,
            "killed" => JobState::Killed,
            other => return Err(Error::Config(format!("unknown job state `{}`", other))),
        };
        Ok(state)
    }
}

impl TryFrom<String> for JobState {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<JobState> for String {
    fn from(state: JobState) -> Self {
        state.as_str().to_string()
    }
}

/// Proxy to an operation owned by someone else (a local process, a remote agent, the product).
///
/// Implementations only report what they are told; they never change state on their own.
#[async_trait]
pub trait Job: Send + Sync {
    fn job_id(&self) -> &str;

    async fn status(&self) -> Result<JobState>;

    /// Human-readable explanation of why the job is not (or did not end) completed.
    async fn delay_reason(&self) -> Result<String>;

    /// Current phase, for jobs that have them.
    async fn phase(&self) -> Result<Option<String>> {
        Ok(None)
    }

    async fn kill(&self) -> Result<()>;

    async fn suspend(&self) -> Result<()> {
        Err(Error::Unsupported(format!("suspending job {}", self.job_id())))
    }

    async fn resume(&self) -> Result<()> {
        Err(Error::Unsupported(format!("resuming job {}", self.job_id())))
    }
}

#[async_trait]
impl<J: Job + ?Sized> Job for Box<J> {
    fn job_id(&self) -> &str {
        (**self).job_id()
    }

    async fn status(&self) -> Result<JobState> {
        (**self).status().await
    }

    async fn delay_reason(&self) -> Result<String> {
        (**self).delay_reason().await
    }

    async fn phase(&self) -> Result<Option<String>> {
        (**self).phase().await
    }

    async fn kill(&self) -> Result<()> {
        (**self).kill().await
    }

    async fn suspend(&self) -> Result<()> {
        (**self).suspend().await
    }

    async fn resume(&self) -> Result<()> {
        (**self).resume().await
    }
}

/// Maps a process status onto the job vocabulary. Exit code zero is the only success.
pub(crate) fn state_from_process(status: &joblib::JobStatus) -> JobState {
    match status {
        joblib::JobStatus::Running => JobState::Running,
        joblib::JobStatus::Exited { code: 0 } => JobState::Completed,
        joblib::JobStatus::Exited { .. } | joblib::JobStatus::Lost { .. } => JobState::Failed,
        joblib::JobStatus::Killed { .. } => JobState::Killed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_product_vocabulary() {
        assert_eq!("Completed".parse::<JobState>().unwrap(), JobState::Completed);
        assert_eq!(
            "completed w/ one or more errors".parse::<JobState>().unwrap(),
            JobState::CompletedWithErrors
        );
        assert_eq!("waiting".parse::<JobState>().unwrap(), JobState::Pending);
        assert!("exploded".parse::<JobState>().is_err());
    }

    #[test]
    fn only_completed_is_success() {
        assert!(JobState::Completed.is_success());
        assert!(JobState::CompletedWithErrors.is_terminal());
        assert!(!JobState::CompletedWithErrors.is_success());
        assert!(!JobState::Suspended.is_terminal());
    }

    #[test]
    fn process_status_mapping() {
        use joblib::JobStatus::*;
        assert_eq!(state_from_process(&Exited { code: 0 }), JobState::Completed);
        assert_eq!(state_from_process(&Exited { code: 2 }), JobState::Failed);
        assert_eq!(state_from_process(&Killed { signal: 9 }), JobState::Killed);
        assert_eq!(state_from_process(&Running), JobState::Running);
    }

    #[test]
    fn serde_uses_display_names() {
        let json = serde_json::to_string(&JobState::Killed).unwrap();
        assert_eq!(json, "\"killed\"");
        let state: JobState = serde_json::from_str("\"running\"").unwrap();
        assert_eq!(state, JobState::Running);
    }
}
