mod actor;
mod messages;

use self::{
    actor::JobCoordinator,
    messages::CoordinatorMessage::{self, GetStatus, StartJob, StopJob, Stream, WatchStatus},
};
use crate::error::{self, Error};
use crate::events::{JobStatus, StreamKind};
use crate::types::{JobId, JobSpec, OutputBlob};
use tokio::sync::{mpsc, oneshot};

pub const DEFAULT_RETAINED_FINISHED_JOBS: usize = 1024;

/// A `JobCoordinator` which provides functionality for managing jobs and querying job state.
///
/// This struct is actually an actor handle, the real work is done in the actor spawned by `JobCoordinator::spawn`,
/// but from the user perspective all that matters is that this struct provides methods for managing jobs.
/// The actor-handle abstraction allows this struct to be cloned freely in a multi-thread async context,
/// without requiring an `Arc<Mutex>` or any other means of synchronization.
#[derive(Clone)]
pub struct JobCoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
}

impl JobCoordinatorHandle {
    /// Spawn a new coordinator.
    ///
    /// Specify the capacity for the coordinator's message queue. This limits the build-up of inbound messages.
    /// Up to [`DEFAULT_RETAINED_FINISHED_JOBS`] finished jobs stay queryable.
    pub fn spawn(message_capacity: usize) -> Self {
        Self::spawn_with_retention(message_capacity, DEFAULT_RETAINED_FINISHED_JOBS)
    }

    /// Spawn a coordinator that keeps at most `retain_finished` finished jobs. Starting a job
    /// evicts the oldest finished ones beyond that; evicted jobs report `DoesNotExist`.
    pub fn spawn_with_retention(message_capacity: usize, retain_finished: usize) -> Self {
        let (sender, receiver) = mpsc::channel(message_capacity);
        JobCoordinator::spawn(receiver, retain_finished);
        Self { sender }
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<error::Result<T>>) -> CoordinatorMessage,
    ) -> error::Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|_| Error::CoordinatorExited)?;
        rx.await.map_err(|_| Error::CoordinatorExited)?
    }

    /// Start a new job.
    pub async fn start_job(&self, spec: JobSpec) -> error::Result<JobId> {
        self.request(|response| StartJob { spec, response }).await
    }

    /// Stop a job. Fails with `AlreadyStopped` if the job has already finished.
    pub async fn stop_job(&self, job_id: JobId) -> error::Result<()> {
        self.request(|response| StopJob { job_id, response }).await
    }

    pub async fn get_job_status(&self, job_id: JobId) -> error::Result<JobStatus> {
        self.request(|response| GetStatus { job_id, response }).await
    }

    /// Wait until the job is no longer running and return its final status.
    pub async fn wait_job(&self, job_id: JobId) -> error::Result<JobStatus> {
        let mut status = self
            .request(|response| WatchStatus { job_id, response })
            .await?;
        loop {
            let current = status.borrow().clone();
            if current.is_finished() || status.changed().await.is_err() {
                return Ok(status.borrow().clone());
            }
        }
    }

    pub async fn stream_stdout(
        &self,
        job_id: JobId,
    ) -> error::Result<mpsc::UnboundedReceiver<OutputBlob>> {
        self.stream(job_id, StreamKind::Stdout).await
    }

    pub async fn stream_stderr(
        &self,
        job_id: JobId,
    ) -> error::Result<mpsc::UnboundedReceiver<OutputBlob>> {
        self.stream(job_id, StreamKind::Stderr).await
    }

    pub async fn stream_all(
        &self,
        job_id: JobId,
    ) -> error::Result<mpsc::UnboundedReceiver<OutputBlob>> {
        self.stream(job_id, StreamKind::All).await
    }

    pub async fn stream(
        &self,
        job_id: JobId,
        kind: StreamKind,
    ) -> error::Result<mpsc::UnboundedReceiver<OutputBlob>> {
        self.request(|response| Stream {
            job_id,
            kind,
            response,
        })
        .await
    }
}
