use crate::types::OutputBlob;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Exited { code: i32 },
    Killed { signal: i32 },
    /// The child could not be waited on; its real outcome is unknown.
    Lost { reason: String },
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Exited { code } => write!(f, "exited with code {}", code),
            JobStatus::Killed { signal } => write!(f, "killed by signal {}", signal),
            JobStatus::Lost { reason } => write!(f, "lost: {}", reason),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Output {
    Stdout(OutputBlob),
    Stderr(OutputBlob),
}

/// Which of a job's output streams a subscriber wants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
    All,
}
