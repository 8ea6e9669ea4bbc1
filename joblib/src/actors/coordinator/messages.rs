use crate::error;
use crate::events::{JobStatus, StreamKind};
use crate::types::{JobId, JobSpec, OutputBlob};
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Debug)]
pub enum CoordinatorMessage {
    StartJob {
        spec: JobSpec,
        response: oneshot::Sender<error::Result<JobId>>,
    },
    StopJob {
        job_id: JobId,
        response: oneshot::Sender<error::Result<()>>,
    },
    GetStatus {
        job_id: JobId,
        response: oneshot::Sender<error::Result<JobStatus>>,
    },
    WatchStatus {
        job_id: JobId,
        response: oneshot::Sender<error::Result<watch::Receiver<JobStatus>>>,
    },
    Stream {
        job_id: JobId,
        kind: StreamKind,
        response: oneshot::Sender<error::Result<mpsc::UnboundedReceiver<OutputBlob>>>,
    },
}
