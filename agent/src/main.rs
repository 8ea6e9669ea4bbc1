mod error;
mod services;

use clap::Parser;
use error::{Error, Result};
use protobuf::remote_jobs_server::RemoteJobsServer;
use services::jobservice::{RemoteJobsService, Staging};
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Certificate, Identity, Server, ServerTlsConfig};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const CHANNEL_CAPACITY: usize = 64;

/// Run jobs and stage files on this machine for a remote test harness
#[derive(Debug, Parser)]
pub struct Args {
    /// Address to listen on
    #[clap(long, env = "TESTBED_AGENT_LISTEN", default_value = "127.0.0.1:50051")]
    pub listen: SocketAddr,
    /// Directory that job working directories and staged files are confined to
    #[clap(long, env = "TESTBED_AGENT_ROOT", default_value = ".")]
    pub root: PathBuf,
    /// PEM server certificate; enables TLS together with --tls-key
    #[clap(long, env = "TESTBED_AGENT_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,
    /// PEM server private key
    #[clap(long, env = "TESTBED_AGENT_TLS_KEY")]
    pub tls_key: Option<PathBuf>,
    /// PEM CA bundle; when set, clients must present a certificate signed by it
    #[clap(long, env = "TESTBED_AGENT_CLIENT_CA")]
    pub client_ca: Option<PathBuf>,
}

impl Args {
    async fn tls_config(&self) -> Result<Option<ServerTlsConfig>> {
        let (cert, key) = match (&self.tls_cert, &self.tls_key) {
            (None, None) if self.client_ca.is_some() => {
                return Err(Error::Config("--client-ca requires --tls-cert and --tls-key".into()))
            }
            (None, None) => return Ok(None),
            (Some(cert), Some(key)) => (read_pem(cert).await?, read_pem(key).await?),
            _ => {
                return Err(Error::Config(
                    "--tls-cert and --tls-key must be given together".into(),
                ))
            }
        };
        let mut config = ServerTlsConfig::new().identity(Identity::from_pem(cert, key));
        if let Some(ca) = &self.client_ca {
            config = config.client_ca_root(Certificate::from_pem(read_pem(ca).await?));
        }
        Ok(Some(config))
    }
}

async fn read_pem(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|source| Error::ReadPem {
        path: path.display().to_string(),
        source,
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let verbose = std::env::var("RUST_LOG")
        .map(|level| level.contains("debug") || level.contains("trace"))
        .unwrap_or(false);
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_file(verbose)
                .with_line_number(verbose),
        )
        .with(filter)
        .init();
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let tls = args.tls_config().await?;
    tokio::fs::create_dir_all(&args.root).await?;
    let listener = TcpListener::bind(args.listen).await?;
    info!(
        address = %listener.local_addr()?,
        root = %args.root.display(),
        tls = tls.is_some(),
        "agent listening"
    );

    let service = RemoteJobsService::new(CHANNEL_CAPACITY, Staging::new(args.root.clone()));
    serve(listener, service, tls, shutdown_signal()).await?;
    Ok(())
}

async fn serve(
    listener: TcpListener,
    service: RemoteJobsService,
    tls: Option<ServerTlsConfig>,
    signal: impl Future<Output = ()>,
) -> Result<()> {
    let mut builder = Server::builder();
    if let Some(tls) = tls {
        builder = builder.tls_config(tls)?;
    }
    builder
        .add_service(RemoteJobsServer::new(service))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness::machine::{CommandSpec, Machine, RemoteMachine};
    use harness::mock::write_pki;
    use harness::{JobState, PollPolicy};
    use protobuf::output_request::OutputType;
    use protobuf::remote_jobs_client::RemoteJobsClient;
    use protobuf::status_response::JobStatus;
    use protobuf::{
        GetFileRequest, OutputRequest, OutputResponse, PutFileRequest, StartRequest,
        StatusRequest, StopRequest,
    };
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;
    use tonic::transport::Channel;
    use tonic::Code;

    // start the server on an ephemeral port; the listener is bound before this returns
    async fn start_server() -> (SocketAddr, TempDir) {
        let root = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = RemoteJobsService::new(CHANNEL_CAPACITY, Staging::new(root.path()));
        tokio::spawn(async move {
            let _ = serve(listener, service, None, futures::future::pending()).await;
        });
        (addr, root)
    }

    fn args(root: &Path) -> Args {
        Args {
            listen: "127.0.0.1:0".parse().unwrap(),
            root: root.to_path_buf(),
            tls_cert: None,
            tls_key: None,
            client_ca: None,
        }
    }

    #[tokio::test]
    async fn tls_flags_must_pair() {
        let dir = tempfile::tempdir().unwrap();
        let pki = write_pki(dir.path());

        assert!(args(dir.path()).tls_config().await.unwrap().is_none());

        let mut ca_only = args(dir.path());
        ca_only.client_ca = Some(pki.ca_cert.clone());
        let err = ca_only.tls_config().await.unwrap_err();
        assert!(err.to_string().contains("--client-ca requires"), "{}", err);

        let mut cert_only = args(dir.path());
        cert_only.tls_cert = Some(pki.server_cert.clone());
        assert!(matches!(cert_only.tls_config().await, Err(Error::Config(_))));

        let mut key_only = args(dir.path());
        key_only.tls_key = Some(pki.server_key.clone());
        assert!(matches!(key_only.tls_config().await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn unreadable_pem_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let pki = write_pki(dir.path());
        let mut args = args(dir.path());
        args.tls_cert = Some(pki.server_cert.clone());
        args.tls_key = Some(dir.path().join("missing.key"));
        match args.tls_config().await {
            Err(Error::ReadPem { path, .. }) => assert!(path.ends_with("missing.key"), "{}", path),
            other => panic!("unexpected {:?}", other.map(|c| c.is_some())),
        }
    }

    #[tokio::test]
    async fn mutual_tls_round_trip() {
        let pki_dir = tempfile::tempdir().unwrap();
        let pki = write_pki(pki_dir.path());
        let root = tempfile::tempdir().unwrap();
        let mut args = args(root.path());
        args.tls_cert = Some(pki.server_cert.clone());
        args.tls_key = Some(pki.server_key.clone());
        args.client_ca = Some(pki.ca_cert.clone());
        let tls = args.tls_config().await.unwrap();
        assert!(tls.is_some());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = RemoteJobsService::new(CHANNEL_CAPACITY, Staging::new(root.path()));
        tokio::spawn(async move {
            let _ = serve(listener, service, tls, futures::future::pending()).await;
        });

        let policy = PollPolicy::fixed(Duration::from_millis(20)).with_max_attempts(500);
        let tls = Some(pki.client_tls());
        let machine = RemoteMachine::new("secure", addr.to_string(), tls, policy);
        let output = machine
            .execute_command(&CommandSpec::shell("printf secure"))
            .await
            .unwrap();
        assert_eq!(output.stdout, "secure");
    }

    async fn build_client(addr: SocketAddr) -> RemoteJobsClient<Channel> {
        RemoteJobsClient::connect(format!("http://{}", addr))
            .await
            .expect("channel connect")
    }

    fn shell(script: &str) -> StartRequest {
        StartRequest {
            cmd: "sh".into(),
            args: vec!["-c".into(), script.into()],
            dir: String::new(),
            envs: HashMap::new(),
        }
    }

    async fn wait_finished(client: &mut RemoteJobsClient<Channel>, job_id: &[u8]) -> JobStatus {
        loop {
            let status = client
                .query_status(StatusRequest {
                    job_id: job_id.to_vec(),
                })
                .await
                .unwrap()
                .into_inner()
                .job_status
                .unwrap();
            if !matches!(status, JobStatus::Running(_)) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn job_output_and_status() {
        let (addr, _root) = start_server().await;
        let mut client = build_client(addr).await;

        let job_id = client
            .start_job(shell("printf 'hello agent'; exit 4"))
            .await
            .expect("Bad start job response")
            .into_inner()
            .job_id;

        let mut stream = client
            .stream_output(OutputRequest {
                job_id: job_id.clone(),
                output: OutputType::All.into(),
            })
            .await
            .expect("no stream response")
            .into_inner();
        let mut received = vec![];
        while let Some(OutputResponse { data }) = stream.message().await.unwrap() {
            received.extend_from_slice(&data);
        }
        assert_eq!("hello agent", String::from_utf8_lossy(&received));

        match wait_finished(&mut client, &job_id).await {
            JobStatus::Exited(exited) => assert_eq!(exited.code, 4),
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[tokio::test]
    async fn stop_errors_map_to_status_codes() {
        let (addr, _root) = start_server().await;
        let mut client = build_client(addr).await;

        let unknown = client
            .stop_job(StopRequest {
                job_id: uuid::Uuid::new_v4().as_bytes().to_vec(),
            })
            .await
            .unwrap_err();
        assert_eq!(unknown.code(), Code::NotFound);

        let garbage = client
            .query_status(StatusRequest { job_id: vec![1, 2, 3] })
            .await
            .unwrap_err();
        assert_eq!(garbage.code(), Code::InvalidArgument);

        let job_id = client.start_job(shell("true")).await.unwrap().into_inner().job_id;
        wait_finished(&mut client, &job_id).await;
        let finished = client.stop_job(StopRequest { job_id }).await.unwrap_err();
        assert_eq!(finished.code(), Code::FailedPrecondition);
    }

    #[tokio::test]
    async fn stop_kills_running_job() {
        let (addr, _root) = start_server().await;
        let mut client = build_client(addr).await;

        let job_id = client.start_job(shell("sleep 30")).await.unwrap().into_inner().job_id;
        client
            .stop_job(StopRequest {
                job_id: job_id.clone(),
            })
            .await
            .unwrap();
        assert!(matches!(
            wait_finished(&mut client, &job_id).await,
            JobStatus::Killed(_)
        ));
    }

    #[tokio::test]
    async fn files_stay_under_root() {
        let (addr, root) = start_server().await;
        let mut client = build_client(addr).await;

        client
            .put_file(PutFileRequest {
                path: "inbox/trigger.json".into(),
                data: b"{}".to_vec(),
            })
            .await
            .unwrap();
        assert!(root.path().join("inbox/trigger.json").exists());
        let data = client
            .get_file(GetFileRequest {
                path: "inbox/trigger.json".into(),
            })
            .await
            .unwrap()
            .into_inner()
            .data;
        assert_eq!(data, b"{}");

        let escape = client
            .put_file(PutFileRequest {
                path: "../outside".into(),
                data: vec![],
            })
            .await
            .unwrap_err();
        assert_eq!(escape.code(), Code::InvalidArgument);

        let mut outside = shell("pwd");
        outside.dir = "/tmp".into();
        assert_eq!(client.start_job(outside).await.unwrap_err().code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn remote_machine_drives_agent() {
        let (addr, root) = start_server().await;
        let policy = PollPolicy::fixed(Duration::from_millis(20)).with_max_attempts(500);
        let machine = RemoteMachine::new("ctrl", addr.to_string(), None, policy);

        let output = machine
            .execute_command(&CommandSpec::shell("printf out; printf err 1>&2; exit 3"))
            .await
            .unwrap();
        assert_eq!(output.state, JobState::Failed);
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout, "out");
        assert_eq!(output.stderr, "err");

        machine.write_file("data/blob", b"abc".to_vec()).await.unwrap();
        assert!(root.path().join("data/blob").exists());
        assert_eq!(
            machine.file_hash("data/blob").await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        machine.delete_file("data/blob").await.unwrap();
        assert!(machine.read_file("data/blob").await.is_err());
    }

    #[tokio::test]
    async fn remote_machine_reconnects_after_disconnect() {
        let (addr, _root) = start_server().await;
        let policy = PollPolicy::fixed(Duration::from_millis(20)).with_max_attempts(500);
        let machine = RemoteMachine::new("ctrl", addr.to_string(), None, policy);

        machine.write_file("a.txt", b"one".to_vec()).await.unwrap();
        assert!(machine.is_connected().await);
        machine.disconnect().await.unwrap();
        assert!(!machine.is_connected().await);

        assert_eq!(machine.read_file("a.txt").await.unwrap(), b"one");
        assert!(machine.is_connected().await);
    }
}
