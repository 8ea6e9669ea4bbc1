mod actor;
mod messages;

use crate::error;
use crate::events::{JobStatus, Output};
use crate::types::JobSpec;
use actor::Actor;
use messages::WorkerMessage;
use std::process::Stdio;
use tokio::{
    process,
    sync::{mpsc, oneshot, watch},
};

/// Handle to the actor supervising one child process.
///
/// Dropping every clone of the handle kills the child if it is still running.
#[derive(Clone)]
pub struct WorkerHandle {
    sender: mpsc::UnboundedSender<WorkerMessage>,
    status: watch::Receiver<JobStatus>,
}

impl WorkerHandle {
    pub fn spawn(output_tx: mpsc::UnboundedSender<Output>, spec: JobSpec) -> error::Result<Self> {
        let JobSpec {
            program,
            args,
            dir,
            envs,
        } = spec;
        let child = process::Command::new(program)
            .args(args)
            .current_dir(dir)
            .envs(envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let (sender, inbox) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(JobStatus::Running);
        Actor::spawn(inbox, output_tx, status_tx, child);
        Ok(Self { sender, status })
    }

    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    /// A receiver that observes every status change of the job.
    pub fn watch_status(&self) -> watch::Receiver<JobStatus> {
        self.status.clone()
    }

    pub fn stop(&self, response: oneshot::Sender<error::Result<()>>) {
        let _ = self.sender.send(WorkerMessage::Stop { response });
    }
}
