mod staging;
pub use self::staging::Staging;

use futures::Stream;
use joblib::error::Error as JobError;
use joblib::{JobCoordinator, JobId, JobSpec, StreamKind};
use protobuf::output_request::OutputType;
use protobuf::remote_jobs_server::RemoteJobs;
use protobuf::status_response::JobStatus::{Exited, Killed, Lost, Running};
use protobuf::status_response::{ExitedType, KilledType, LostType, RunningType};
use protobuf::{
    DeleteFileRequest, DeleteFileResponse, GetFileRequest, GetFileResponse, OutputRequest,
    OutputResponse, PutFileRequest, PutFileResponse, StartRequest, StartResponse, StatusRequest,
    StatusResponse, StopRequest, StopResponse,
};
use std::pin::Pin;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};
use uuid::Uuid;

// tonic wraps this in Arc anyway internally, so we don't need Arc
pub struct RemoteJobsService {
    coordinator: JobCoordinator,
    staging: Staging,
}

impl RemoteJobsService {
    /// Must be called from within a tokio runtime.
    pub fn new(channel_capacity: usize, staging: Staging) -> Self {
        Self {
            coordinator: JobCoordinator::spawn(channel_capacity),
            staging,
        }
    }
}

fn parse_job_id(job_id: &[u8]) -> Result<JobId, Status> {
    Uuid::from_slice(job_id).map_err(|err| Status::invalid_argument(err.to_string()))
}

fn job_status(err: JobError) -> Status {
    match err {
        JobError::DoesNotExist => Status::not_found(err.to_string()),
        JobError::AlreadyStopped => Status::failed_precondition(err.to_string()),
        JobError::Spawn(ref io) if io.kind() == std::io::ErrorKind::NotFound => {
            Status::invalid_argument(err.to_string())
        }
        JobError::Spawn(_) | JobError::CoordinatorExited => Status::internal(err.to_string()),
    }
}

#[tonic::async_trait]
impl RemoteJobs for RemoteJobsService {
    type StreamOutputStream = Pin<Box<dyn Stream<Item = Result<OutputResponse, Status>> + Send>>;

    async fn start_job(
        &self,
        req: Request<StartRequest>,
    ) -> Result<Response<StartResponse>, Status> {
        let StartRequest {
            cmd,
            args,
            dir,
            envs,
        } = req.into_inner();
        if cmd.is_empty() {
            return Err(Status::invalid_argument("command must not be empty"));
        }
        let dir = self.staging.resolve(&dir)?;

        let spec = JobSpec {
            program: cmd,
            args,
            dir: dir.to_string_lossy().into_owned(),
            envs: Vec::from_iter(envs),
        };
        let program = spec.program.clone();
        let job_id = self.coordinator.start_job(spec).await.map_err(|err| {
            warn!(%program, %err, "failed to start job");
            job_status(err)
        })?;
        info!(%job_id, %program, "started job");

        Ok(Response::new(StartResponse {
            job_id: job_id.as_bytes().to_vec(),
        }))
    }

    async fn stop_job(&self, req: Request<StopRequest>) -> Result<Response<StopResponse>, Status> {
        let job_id = parse_job_id(&req.into_inner().job_id)?;
        self.coordinator
            .stop_job(job_id)
            .await
            .map_err(job_status)?;
        info!(%job_id, "stopped job");
        Ok(Response::new(StopResponse {})) // empty response on success
    }

    async fn query_status(
        &self,
        req: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let job_id = parse_job_id(&req.into_inner().job_id)?;
        let job_status = self
            .coordinator
            .get_job_status(job_id)
            .await
            .map_err(job_status)?;
        debug!(%job_id, status = %job_status, "queried status");
        let status = match job_status {
            joblib::JobStatus::Running => Running(RunningType {}),
            joblib::JobStatus::Exited { code } => Exited(ExitedType { code }),
            joblib::JobStatus::Killed { signal } => Killed(KilledType { signal }),
            joblib::JobStatus::Lost { reason } => Lost(LostType { reason }),
        };
        Ok(Response::new(StatusResponse {
            job_status: Some(status),
        }))
    }

    async fn stream_output(
        &self,
        req: Request<OutputRequest>,
    ) -> Result<Response<Self::StreamOutputStream>, Status> {
        let job_id = parse_job_id(&req.get_ref().job_id)?;
        let kind = match req.into_inner().output() {
            OutputType::Stdout => StreamKind::Stdout,
            OutputType::Stderr => StreamKind::Stderr,
            OutputType::All => StreamKind::All,
        };
        let receiver = self
            .coordinator
            .stream(job_id, kind)
            .await
            .map_err(job_status)?;

        let output_stream = UnboundedReceiverStream::new(receiver);
        let response_stream = output_stream.map(|blob| {
            Ok(OutputResponse {
                data: blob.to_vec(),
            })
        });
        Ok(Response::new(
            Box::pin(response_stream) as Self::StreamOutputStream
        ))
    }

    async fn put_file(
        &self,
        req: Request<PutFileRequest>,
    ) -> Result<Response<PutFileResponse>, Status> {
        let PutFileRequest { path, data } = req.into_inner();
        self.staging.put(&path, &data).await?;
        debug!(%path, bytes = data.len(), "stored file");
        Ok(Response::new(PutFileResponse {}))
    }

    async fn get_file(
        &self,
        req: Request<GetFileRequest>,
    ) -> Result<Response<GetFileResponse>, Status> {
        let data = self.staging.get(&req.get_ref().path).await?;
        Ok(Response::new(GetFileResponse { data }))
    }

    async fn delete_file(
        &self,
        req: Request<DeleteFileRequest>,
    ) -> Result<Response<DeleteFileResponse>, Status> {
        let path = req.into_inner().path;
        self.staging.delete(&path).await?;
        debug!(%path, "deleted file");
        Ok(Response::new(DeleteFileResponse {}))
    }
}
