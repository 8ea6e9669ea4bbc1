use std::collections::HashMap;

use protobuf::{
    output_request::OutputType, remote_jobs_client::RemoteJobsClient,
    status_response::JobStatus, OutputRequest, OutputResponse, StartRequest, StatusRequest,
};
use harness::config::TlsConfig;
use harness::machine::agent_endpoint;
use std::io::Write;
use tonic::{transport::Channel, Request, Status};
use uuid::Uuid;

pub struct ClientCli {
    inner: RemoteJobsClient<Channel>,
}

impl ClientCli {
    pub async fn connect(server_addr: &str, tls: Option<&TlsConfig>) -> harness::Result<Self> {
        let channel = agent_endpoint("agent", server_addr, tls)
            .await?
            .connect()
            .await?;
        Ok(Self {
            inner: RemoteJobsClient::new(channel),
        })
    }

    pub async fn start_job(
        &mut self,
        cmd: &str,
        args: &[String],
        dir: &str,
        envs: &[(String, String)],
    ) -> Result<Uuid, Status> {
        let request = tonic::Request::new(StartRequest {
            cmd: cmd.into(),
            args: args.into(),
            dir: dir.into(),
            envs: HashMap::from_iter(envs.iter().cloned()),
        });
        let response = self.inner.start_job(request).await?;
        let job_id = response.into_inner().job_id;
        let uuid = Uuid::from_slice(&job_id)
            .map_err(|_| Status::internal("server responded with invalid uuid"))?;
        println!("Started job id: {}", uuid);
        Ok(uuid)
    }

    pub async fn stop_job(&mut self, job_id: Uuid) -> Result<(), Status> {
        let request = Request::new(protobuf::StopRequest {
            job_id: job_id.as_bytes().to_vec(),
        });
        let _ = self.inner.stop_job(request).await?;
        println!("Stopped job id: {}", job_id);
        Ok(())
    }

    pub async fn query_status(&mut self, job_id: Uuid) -> Result<(), Status> {
        let response = self
            .inner
            .query_status(tonic::Request::new(StatusRequest {
                job_id: job_id.as_bytes().to_vec(),
            }))
            .await?;
        let status = response
            .into_inner()
            .job_status
            .ok_or_else(|| Status::internal("server responded with empty job status"))?;
        match status {
            JobStatus::Running(_) => println!("Running"),
            JobStatus::Exited(exited) => println!("Exited with code: {}", exited.code),
            JobStatus::Killed(killed) => println!("Killed by signal: {}", killed.signal),
            JobStatus::Lost(lost) => println!("Lost: {}", lost.reason),
        }
        Ok(())
    }

    /// Stream the requested output to stdout until the job's output ends.
    pub async fn stream_output(&mut self, job_id: Uuid, output: OutputType) -> Result<(), Status> {
        let request = Request::new(OutputRequest {
            job_id: job_id.as_bytes().to_vec(),
            output: output.into(),
        });
        let response = self.inner.stream_output(request).await?;
        let mut stream = response.into_inner();
        let stdout = std::io::stdout();
        while let Some(OutputResponse { data }) = stream.message().await? {
            let mut out = stdout.lock();
            out.write_all(&data)
                .and_then(|_| out.flush())
                .map_err(|err| Status::internal(err.to_string()))?;
        }
        Ok(())
    }
}
