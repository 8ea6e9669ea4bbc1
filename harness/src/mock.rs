//! Test doubles: scripted in-memory jobs and throwaway TLS material.

use crate::config::TlsConfig;
use crate::error::{Error, Result};
use crate::job::{Job, JobState};
use async_trait::async_trait;
use rcgen::{BasicConstraints, Certificate, CertificateParams, DnType, IsCa};
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Mutex,
};

/// A job that reports `Running` for a fixed number of status polls and then a final state.
///
/// Without `ends_after`/`completes_after` it runs forever. `kill`, `suspend` and `resume` take effect
/// on the next poll.
pub struct MockJob {
    job_id: String,
    polls: AtomicU32,
    running_polls: Option<u32>,
    final_state: JobState,
    delay_reason: String,
    phases: Vec<String>,
    overridden: Mutex<Option<JobState>>,
}

impl MockJob {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            polls: AtomicU32::new(0),
            running_polls: None,
            final_state: JobState::Completed,
            delay_reason: String::new(),
            phases: Vec::new(),
            overridden: Mutex::new(None),
        }
    }

    pub fn completes_after(self, running_polls: u32) -> Self {
        self.ends_after(running_polls, JobState::Completed)
    }

    pub fn ends_after(mut self, running_polls: u32, state: JobState) -> Self {
        self.running_polls = Some(running_polls);
        self.final_state = state;
        self
    }

    pub fn with_delay_reason(mut self, reason: impl Into<String>) -> Self {
        self.delay_reason = reason.into();
        self
    }

    /// Phase reported on each poll while running; the last one sticks.
    pub fn with_phases<I, S>(mut self, phases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.phases = phases.into_iter().map(Into::into).collect();
        self
    }

    /// Number of status polls so far.
    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    fn current(&self, polls: u32) -> JobState {
        if let Some(state) = *self.overridden.lock().unwrap() {
            return state;
        }
        match self.running_polls {
            Some(running) if polls > running => self.final_state,
            _ => JobState::Running,
        }
    }

    fn set(&self, state: Option<JobState>) -> Result<()> {
        let polls = self.polls();
        let current = self.current(polls);
        if current.is_terminal() {
            return Err(Error::Failed(format!(
                "job {} already finished ({})",
                self.job_id, current
            )));
        }
        *self.overridden.lock().unwrap() = state;
        Ok(())
    }
}

#[async_trait]
impl Job for MockJob {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    async fn status(&self) -> Result<JobState> {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(self.current(polls))
    }

    async fn delay_reason(&self) -> Result<String> {
        Ok(self.delay_reason.clone())
    }

    async fn phase(&self) -> Result<Option<String>> {
        if self.phases.is_empty() {
            return Ok(None);
        }
        let idx = (self.polls() as usize).saturating_sub(1).min(self.phases.len() - 1);
        Ok(Some(self.phases[idx].clone()))
    }

    async fn kill(&self) -> Result<()> {
        self.set(Some(JobState::Killed))
    }

    async fn suspend(&self) -> Result<()> {
        self.set(Some(JobState::Suspended))
    }

    async fn resume(&self) -> Result<()> {
        // back to the scripted progression
        self.set(None)
    }
}

/// PEM files of a CA and a server and client certificate it signed, all for `localhost`.
pub struct PkiFiles {
    pub ca_cert: PathBuf,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

impl PkiFiles {
    /// What a harness needs to reach an agent using this PKI.
    pub fn client_tls(&self) -> TlsConfig {
        TlsConfig {
            ca_cert: self.ca_cert.clone(),
            cert: self.client_cert.clone(),
            key: self.client_key.clone(),
            domain: "localhost".into(),
        }
    }
}

/// Generate a fresh PKI into `dir`. Panics on failure; only meant for tests.
pub fn write_pki(dir: &Path) -> PkiFiles {
    let mut params = CertificateParams::new(Vec::<String>::new());
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
        .distinguished_name
        .push(DnType::CommonName, "testbed test ca");
    let ca = Certificate::from_params(params).unwrap();

    let write = |name: &str, pem: String| {
        let path = dir.join(name);
        std::fs::write(&path, pem).unwrap();
        path
    };
    let leaf = |common_name: &str| {
        let mut params = CertificateParams::new(vec!["localhost".to_string()]);
        params.distinguished_name.push(DnType::CommonName, common_name);
        Certificate::from_params(params).unwrap()
    };
    let server = leaf("testbed agent");
    let client = leaf("testbed harness");
    PkiFiles {
        ca_cert: write("ca.pem", ca.serialize_pem().unwrap()),
        server_cert: write("server.pem", server.serialize_pem_with_signer(&ca).unwrap()),
        server_key: write("server.key", server.serialize_private_key_pem()),
        client_cert: write("client.pem", client.serialize_pem_with_signer(&ca).unwrap()),
        client_key: write("client.key", client.serialize_private_key_pem()),
    }
}
