use crate::job::JobState;
use crate::validate::Mismatch;
use std::{io, result, time::Duration};
use thiserror;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("setup failed: {0}")]
    Setup(String),
    #[error("missing test case input `{0}`")]
    MissingInput(String),
    #[error("invalid test case input `{key}`: {reason}")]
    InvalidInput { key: String, reason: String },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("job {job_id} ended in state [{state}]: {reason}")]
    JobFailed {
        job_id: String,
        state: JobState,
        reason: String,
    },
    #[error("job {job_id} is in state [{actual}], expected one of {expected:?}")]
    UnexpectedState {
        job_id: String,
        expected: Vec<JobState>,
        actual: JobState,
    },
    #[error("timed out after {elapsed:?} waiting for {what}")]
    Timeout { what: String, elapsed: Duration },
    #[error("attempts exhausted ({attempts}) waiting for {what}")]
    AttemptsExhausted { what: String, attempts: u32 },
    #[error(transparent)]
    Validation(#[from] Mismatch),
    #[error("machine {machine}: {reason}")]
    Machine { machine: String, reason: String },
    #[error("{failed} of {total} fan-out tasks failed: {summary}")]
    FanOut {
        failed: usize,
        total: usize,
        summary: String,
    },
    #[error("operation not supported: {0}")]
    Unsupported(String),
    #[error("skipped: {0}")]
    Skipped(String),
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Job(#[from] joblib::error::Error),
    #[error("remote call failed: {0}")]
    Rpc(#[from] tonic::Status),
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

impl Error {
    pub fn machine(machine: impl Into<String>, reason: impl ToString) -> Self {
        Error::Machine {
            machine: machine.into(),
            reason: reason.to_string(),
        }
    }

    /// Which branch of the failure taxonomy this error belongs to.
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Setup(_)
            | Error::MissingInput(_)
            | Error::InvalidInput { .. }
            | Error::Config(_) => FailureKind::Setup,
            Error::Validation(_) => FailureKind::Validation,
            _ => FailureKind::Operational,
        }
    }
}

/// Why a test case did not pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A prerequisite could not be established; `run` never started.
    Setup,
    /// A job or machine operation failed.
    Operational,
    /// Expected and actual state disagreed.
    Validation,
    /// The test body panicked.
    Panic,
}

pub type Result<T> = result::Result<T, Error>;
