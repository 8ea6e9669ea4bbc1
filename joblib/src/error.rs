use std::{io, result};
use thiserror;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("No such job exists")]
    DoesNotExist,
    #[error("Job is not running")]
    AlreadyStopped,
    #[error("Failed to spawn job: {0}")]
    Spawn(#[from] io::Error),
    #[error("JobCoordinator exited")]
    CoordinatorExited,
}

pub type Result<T> = result::Result<T, Error>;
