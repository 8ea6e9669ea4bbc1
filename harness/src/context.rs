use crate::error::Result;
use crate::inputs::TcInputs;
use crate::job::Job;
use crate::machine::{Machine, MachineRegistry};
use crate::manager::JobManager;
use crate::poll::PollPolicy;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Everything a test case may use during one run. Built by the runner, dropped when the case ends.
pub struct TestContext {
    run_id: Uuid,
    inputs: TcInputs,
    poll: PollPolicy,
    machines: Arc<MachineRegistry>,
    workspace: PathBuf,
}

impl TestContext {
    pub fn new(
        run_id: Uuid,
        inputs: TcInputs,
        poll: PollPolicy,
        machines: Arc<MachineRegistry>,
        workspace: PathBuf,
    ) -> Self {
        Self {
            run_id,
            inputs,
            poll,
            machines,
            workspace,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn inputs(&self) -> &TcInputs {
        &self.inputs
    }

    pub fn poll(&self) -> &PollPolicy {
        &self.poll
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn machines(&self) -> &MachineRegistry {
        &self.machines
    }

    pub fn machine(&self, name: &str) -> Result<Arc<dyn Machine>> {
        self.machines.get(name)
    }

    /// A manager for `job` using the run's poll policy.
    pub fn manage<J: Job>(&self, job: J) -> JobManager<J> {
        JobManager::new(job, self.poll.clone())
    }
}
