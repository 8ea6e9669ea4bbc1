use std::io;
use thiserror;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid agent configuration: {0}")]
    Config(String),
    #[error("failed to read {path}: {source}")]
    ReadPem { path: String, source: io::Error },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
