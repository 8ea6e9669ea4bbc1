use super::messages::CoordinatorMessage;
use crate::actors::{broadcaster::BroadcasterHandle, worker::WorkerHandle};
use crate::error::{self, Error};
use crate::events::{JobStatus, StreamKind};
use crate::types::{JobId, JobSpec, OutputBlob};
use std::collections::{HashMap, VecDeque};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

struct Job {
    worker: WorkerHandle,
    broadcaster: BroadcasterHandle,
}

pub struct JobCoordinator {
    inbox: mpsc::Receiver<CoordinatorMessage>,
    jobs: HashMap<JobId, Job>,
    // job ids in start order
    started: VecDeque<JobId>,
    retain_finished: usize,
}

impl JobCoordinator {
    pub fn spawn(inbox: mpsc::Receiver<CoordinatorMessage>, retain_finished: usize) {
        let actor = Self {
            inbox,
            jobs: HashMap::new(),
            started: VecDeque::new(),
            retain_finished,
        };
        tokio::spawn(async move { actor.run().await });
    }

    async fn run(mut self) {
        use self::CoordinatorMessage::*;
        while let Some(msg) = self.inbox.recv().await {
            match msg {
                StartJob { spec, response } => {
                    let _ = response.send(self.start_job(spec));
                }
                StopJob { job_id, response } => {
                    self.stop_job(job_id, response);
                }
                GetStatus { job_id, response } => {
                    let _ = response.send(self.job(job_id).map(|job| job.worker.status()));
                }
                WatchStatus { job_id, response } => {
                    let _ = response.send(self.watch_status(job_id));
                }
                Stream {
                    job_id,
                    kind,
                    response,
                } => {
                    let _ = response.send(self.stream(job_id, kind));
                }
            }
        }
        debug!(jobs = self.jobs.len(), "job coordinator shutting down");
    }

    fn job(&self, job_id: JobId) -> error::Result<&Job> {
        self.jobs.get(&job_id).ok_or(Error::DoesNotExist)
    }

    fn start_job(&mut self, spec: JobSpec) -> error::Result<JobId> {
        // channel for piping child process output
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let program = spec.program.clone();
        let worker = WorkerHandle::spawn(output_tx, spec).map_err(|err| {
            warn!(%program, %err, "failed to start job");
            err
        })?;
        let broadcaster = BroadcasterHandle::spawn(output_rx);
        let job_id = uuid::Uuid::new_v4();
        info!(%job_id, %program, "job started");
        self.evict_finished();
        self.jobs.insert(
            job_id,
            Job {
                worker,
                broadcaster,
            },
        );
        self.started.push_back(job_id);
        Ok(job_id)
    }

    /// Forget the oldest finished jobs, along with their buffered output, beyond `retain_finished`.
    /// Running jobs are never evicted.
    fn evict_finished(&mut self) {
        let finished: Vec<JobId> = self
            .started
            .iter()
            .copied()
            .filter(|job_id| {
                self.jobs
                    .get(job_id)
                    .map_or(true, |job| job.worker.status().is_finished())
            })
            .collect();
        let excess = finished.len().saturating_sub(self.retain_finished);
        for job_id in finished.into_iter().take(excess) {
            self.jobs.remove(&job_id);
            debug!(%job_id, "evicted finished job");
        }
        let jobs = &self.jobs;
        self.started.retain(|job_id| jobs.contains_key(job_id));
    }

    fn stop_job(&mut self, job_id: JobId, response: oneshot::Sender<error::Result<()>>) {
        match self.job(job_id) {
            Ok(job) => {
                info!(%job_id, "stopping job");
                job.worker.stop(response);
            }
            Err(err) => {
                let _ = response.send(Err(err));
            }
        }
    }

    fn watch_status(&self, job_id: JobId) -> error::Result<watch::Receiver<JobStatus>> {
        self.job(job_id).map(|job| job.worker.watch_status())
    }

    fn stream(
        &self,
        job_id: JobId,
        kind: StreamKind,
    ) -> error::Result<mpsc::UnboundedReceiver<OutputBlob>> {
        self.job(job_id).map(|job| job.broadcaster.subscribe(kind))
    }
}
