//! Hand-off of a run to remote controllers: a JSON trigger file is copied to each controller and
//! a command is invoked there to pick it up.

use crate::error::Result;
use crate::fanout::{fan_out, FanOutReport};
use crate::inputs::TcInputs;
use crate::machine::{CommandOutput, CommandSpec, Machine};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Environment variable holding the trigger file path on the controller.
pub const TRIGGER_PATH_ENV: &str = "TESTBED_TRIGGER";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub run_id: Uuid,
    pub testcases: Vec<String>,
    #[serde(default)]
    pub inputs: TcInputs,
}

impl Trigger {
    pub fn new(testcases: Vec<String>, inputs: TcInputs) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            testcases,
            inputs,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Copy `trigger` to `remote_path` on every controller and run `command` there, all at once.
///
/// The command sees the trigger path in `TESTBED_TRIGGER`. A controller that fails to accept the
/// file or whose command does not complete is reported without affecting the others.
pub async fn trigger_controllers(
    machines: Vec<Arc<dyn Machine>>,
    trigger: &Trigger,
    remote_path: &str,
    command: &CommandSpec,
) -> Result<FanOutReport<CommandOutput>> {
    let payload = trigger.to_json()?;
    let command = command.clone().env(TRIGGER_PATH_ENV, remote_path);
    let remote_path = remote_path.to_string();
    info!(run_id = %trigger.run_id, controllers = machines.len(), "triggering controllers");

    let report = fan_out(machines, |machine| {
        let payload = payload.clone();
        let command = command.clone();
        let remote_path = remote_path.clone();
        async move {
            machine.write_file(&remote_path, payload).await?;
            let output = machine.execute_command(&command).await?;
            output.check(machine.name(), &command)
        }
    })
    .await;
    Ok(report)
}
