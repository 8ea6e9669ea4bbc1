use super::{lossy, CommandOutput, CommandSpec, Machine};
use crate::config::TlsConfig;
use crate::error::{Error, Result};
use crate::job::{Job, JobState};
use crate::poll::{wait_for_terminal, PollPolicy};
use async_trait::async_trait;
use protobuf::output_request::OutputType;
use protobuf::remote_jobs_client::RemoteJobsClient;
use protobuf::status_response::JobStatus;
use protobuf::{
    DeleteFileRequest, GetFileRequest, OutputRequest, PutFileRequest, StartRequest, StatusRequest,
    StopRequest,
};
use tokio::sync::Mutex;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tracing::{debug, info};

/// A controller machine reached through its agent.
///
/// The connection is made on first use, so an unreachable machine only fails the test cases that
/// touch it. [`Machine::disconnect`] drops it; the next call connects again.
pub struct RemoteMachine {
    name: String,
    address: String,
    tls: Option<TlsConfig>,
    policy: PollPolicy,
    client: Mutex<Option<RemoteJobsClient<Channel>>>,
}

impl RemoteMachine {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        tls: Option<TlsConfig>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            tls,
            policy,
            client: Mutex::new(None),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.client.lock().await.is_some()
    }

    async fn client(&self) -> Result<RemoteJobsClient<Channel>> {
        let mut client = self.client.lock().await;
        if let Some(client) = client.as_ref() {
            return Ok(client.clone());
        }
        let channel = self.endpoint().await?.connect().await?;
        info!(machine = %self.name, address = %self.address, "connected to agent");
        Ok(client.insert(RemoteJobsClient::new(channel)).clone())
    }

    async fn endpoint(&self) -> Result<Endpoint> {
        agent_endpoint(&self.name, &self.address, self.tls.as_ref()).await
    }

    async fn start(&self, command: &CommandSpec) -> Result<RemoteJob> {
        let mut client = self.client().await?;
        let request = StartRequest {
            cmd: command.program.clone(),
            args: command.args.clone(),
            dir: command.dir.clone(),
            envs: command.envs.iter().cloned().collect(),
        };
        let job_id = client
            .start_job(request)
            .await
            .map_err(|status| {
                Error::machine(&self.name, format!("`{}`: {}", command, status.message()))
            })?
            .into_inner()
            .job_id;
        let job = RemoteJob::new(client, job_id);
        info!(machine = %self.name, job_id = %job.job_id(), %command, "started remote command");
        Ok(job)
    }
}

#[async_trait]
impl Machine for RemoteMachine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start_command(&self, command: &CommandSpec) -> Result<Box<dyn Job>> {
        Ok(Box::new(self.start(command).await?))
    }

    async fn execute_command(&self, command: &CommandSpec) -> Result<CommandOutput> {
        let job = self.start(command).await?;
        let state = wait_for_terminal(&job, &self.policy).await?;
        let stdout = job.output(OutputType::Stdout).await?;
        let stderr = job.output(OutputType::Stderr).await?;
        let exit_code = match job.query().await? {
            JobStatus::Exited(exited) => Some(exited.code),
            _ => None,
        };
        debug!(machine = %self.name, job_id = %job.job_id(), %state, "remote command finished");
        Ok(CommandOutput {
            state,
            exit_code,
            stdout,
            stderr,
        })
    }

    async fn write_file(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let mut client = self.client().await?;
        client
            .put_file(PutFileRequest {
                path: path.to_string(),
                data,
            })
            .await?;
        debug!(machine = %self.name, path, "uploaded file");
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let mut client = self.client().await?;
        let response = client
            .get_file(GetFileRequest {
                path: path.to_string(),
            })
            .await?;
        Ok(response.into_inner().data)
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let mut client = self.client().await?;
        client
            .delete_file(DeleteFileRequest {
                path: path.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Jobs started before this keep their own handle to the channel until they are dropped.
    async fn disconnect(&self) -> Result<()> {
        if self.client.lock().await.take().is_some() {
            info!(machine = %self.name, "disconnected from agent");
        }
        Ok(())
    }
}

/// Endpoint for the agent of machine `name` at `address`. A bare `host:port` gets `https` when
/// TLS material is given and `http` otherwise.
pub async fn agent_endpoint(
    name: &str,
    address: &str,
    tls: Option<&TlsConfig>,
) -> Result<Endpoint> {
    let scheme = if tls.is_some() { "https" } else { "http" };
    let uri = if address.contains("://") {
        address.to_string()
    } else {
        format!("{}://{}", scheme, address)
    };
    let endpoint = Channel::from_shared(uri)
        .map_err(|err| Error::machine(name, format!("bad address: {}", err)))?;
    match tls {
        None => Ok(endpoint),
        Some(tls) => {
            let ca = tokio::fs::read(&tls.ca_cert).await?;
            let cert = tokio::fs::read(&tls.cert).await?;
            let key = tokio::fs::read(&tls.key).await?;
            let config = ClientTlsConfig::new()
                .domain_name(tls.domain.clone())
                .ca_certificate(Certificate::from_pem(ca))
                .identity(Identity::from_pem(cert, key));
            Ok(endpoint.tls_config(config)?)
        }
    }
}

/// A job running on a remote agent.
pub struct RemoteJob {
    client: RemoteJobsClient<Channel>,
    raw_id: Vec<u8>,
    job_id: String,
}

impl RemoteJob {
    fn new(client: RemoteJobsClient<Channel>, raw_id: Vec<u8>) -> Self {
        let job_id = uuid::Uuid::from_slice(&raw_id)
            .map(|id| id.to_string())
            .unwrap_or_else(|_| hex::encode(&raw_id));
        Self {
            client,
            raw_id,
            job_id,
        }
    }

    async fn query(&self) -> Result<JobStatus> {
        let response = self
            .client
            .clone()
            .query_status(StatusRequest {
                job_id: self.raw_id.clone(),
            })
            .await?;
        response
            .into_inner()
            .job_status
            .ok_or_else(|| {
                Error::Failed(format!("agent sent empty status for job {}", self.job_id))
            })
    }

    async fn output(&self, output_type: OutputType) -> Result<String> {
        let request = OutputRequest {
            job_id: self.raw_id.clone(),
            output: output_type.into(),
        };
        let mut stream = self.client.clone().stream_output(request).await?.into_inner();
        let mut bytes = vec![];
        while let Some(chunk) = stream.message().await? {
            bytes.extend_from_slice(&chunk.data);
        }
        Ok(lossy(&bytes))
    }
}

fn state_from_remote(status: &JobStatus) -> JobState {
    match status {
        JobStatus::Running(_) => JobState::Running,
        JobStatus::Exited(exited) if exited.code == 0 => JobState::Completed,
        JobStatus::Exited(_) | JobStatus::Lost(_) => JobState::Failed,
        JobStatus::Killed(_) => JobState::Killed,
    }
}

#[async_trait]
impl Job for RemoteJob {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    async fn status(&self) -> Result<JobState> {
        Ok(state_from_remote(&self.query().await?))
    }

    async fn delay_reason(&self) -> Result<String> {
        let status = self.query().await?;
        let summary = match &status {
            JobStatus::Running(_) => return Ok(String::new()),
            JobStatus::Exited(exited) => format!("exited with code {}", exited.code),
            JobStatus::Killed(killed) => format!("killed by signal {}", killed.signal),
            JobStatus::Lost(lost) => format!("lost: {}", lost.reason),
        };
        let stderr = self.output(OutputType::Stderr).await?;
        Ok(match stderr.lines().rev().find(|line| !line.trim().is_empty()) {
            Some(line) => format!("{}: {}", summary, line.trim()),
            None => summary,
        })
    }

    async fn kill(&self) -> Result<()> {
        self.client
            .clone()
            .stop_job(StopRequest {
                job_id: self.raw_id.clone(),
            })
            .await?;
        Ok(())
    }
}
