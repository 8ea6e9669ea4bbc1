use super::messages::WorkerMessage;
use crate::error::Error as JobError;
use crate::events::{JobStatus, Output};
use crate::types::OutputBlob;

use bytes::BytesMut;
use futures::future::FutureExt;
use std::os::unix::process::ExitStatusExt;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Child,
    select,
    sync::{mpsc, oneshot, watch},
};
use tracing::{debug, warn};

pub struct Actor {
    inbox: mpsc::UnboundedReceiver<WorkerMessage>,
    kill_tx: Option<oneshot::Sender<()>>,
    status_tx: watch::Sender<JobStatus>,
}

impl Actor {
    pub fn spawn(
        inbox: mpsc::UnboundedReceiver<WorkerMessage>,
        output_tx: mpsc::UnboundedSender<Output>,
        status_tx: watch::Sender<JobStatus>,
        child: Child,
    ) {
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(async move {
            let actor = Self {
                inbox,
                kill_tx: Some(kill_tx),
                status_tx,
            };
            actor.run(output_tx, kill_rx, child).await;
        });
    }

    async fn run(
        mut self,
        output_tx: mpsc::UnboundedSender<Output>,
        kill_rx: oneshot::Receiver<()>,
        mut child: Child,
    ) {
        let (child_exit_tx, child_exit_rx) = oneshot::channel();
        // grab stdout and stderr, if they've been piped
        let maybe_stdout = child.stdout.take();
        let maybe_stderr = child.stderr.take();
        let pid = child.id();
        let mut kill_rx = kill_rx.fuse();

        tokio::spawn(async move {
            loop {
                select! {
                    // a kill request, or the actor going away
                    _ = &mut kill_rx => {
                        debug!(?pid, "killing child process");
                        if let Err(err) = child.kill().await {
                            warn!(?pid, %err, "failed to kill child process");
                        }
                    }
                    // wait for child pid to finish and cleanup its resources
                    exit_status = child.wait() => {
                        let status = match exit_status {
                            Ok(exit_status) => match (exit_status.code(), exit_status.signal()) {
                                (Some(code), _) => JobStatus::Exited { code },
                                (None, Some(signal)) => JobStatus::Killed { signal },
                                (None, None) => JobStatus::Lost {
                                    reason: "child exited without code or signal".into(),
                                },
                            },
                            Err(err) => JobStatus::Lost {
                                reason: err.to_string(),
                            },
                        };
                        let _ = child_exit_tx.send(status);
                        break;
                    }
                }
            }
        });

        if let Some(stdout) = maybe_stdout {
            tokio::spawn(pipe_output(stdout, output_tx.clone(), Output::Stdout));
        }
        if let Some(stderr) = maybe_stderr {
            tokio::spawn(pipe_output(stderr, output_tx, Output::Stderr));
        }
        self.handle_messages(child_exit_rx).await;
    }

    async fn handle_messages(&mut self, child_exit_rx: oneshot::Receiver<JobStatus>) {
        use WorkerMessage::*;
        let mut child_exit_rx = child_exit_rx.fuse();
        loop {
            select! {
                maybe_msg = self.inbox.recv() => {
                    match maybe_msg {
                        Some(Stop { response }) => {
                            let running = matches!(*self.status_tx.borrow(), JobStatus::Running);
                            match (running, self.kill_tx.take()) {
                                (true, Some(kill_tx)) => {
                                    let _ = kill_tx.send(());
                                    let _ = response.send(Ok(()));
                                }
                                _ => {
                                    let _ = response.send(Err(JobError::AlreadyStopped));
                                }
                            }
                        }
                        None => {
                            // every handle dropped, make sure the child dies with us
                            if let Some(kill_tx) = self.kill_tx.take() {
                                let _ = kill_tx.send(());
                            }
                            return;
                        }
                    }
                }
                exit_status = &mut child_exit_rx => {
                    if let Ok(status) = exit_status {
                        debug!(%status, "child process finished");
                        let _ = self.status_tx.send(status);
                    }
                }
            }
        }
    }
}

/// Forward everything read from `reader` as output messages until EOF.
async fn pipe_output<R>(
    mut reader: R,
    output_tx: mpsc::UnboundedSender<Output>,
    wrap: fn(OutputBlob) -> Output,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        match reader.read_buf(&mut buf).await {
            Ok(n) if n > 0 => {
                // move the bytes out of buf and into a message
                let _ = output_tx.send(wrap(buf.split().freeze()));
            }
            _ => break,
        }
    }
}
