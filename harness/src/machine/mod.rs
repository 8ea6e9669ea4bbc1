//! Where commands run and files live: the local host or a remote controller agent.

mod local;
mod registry;
mod remote;

pub use local::{LocalMachine, ProcessJob};
pub use registry::MachineRegistry;
pub use remote::{agent_endpoint, RemoteJob, RemoteMachine};

use crate::error::{Error, Result};
use crate::job::{Job, JobState};
use crate::validate::sha256_hex;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// A command to run on a machine. `dir` is relative to the machine's root; empty means the root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub dir: String,
    #[serde(default)]
    pub envs: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn env(mut self, var: impl Into<String>, val: impl Into<String>) -> Self {
        self.envs.push((var.into(), val.into()));
        self
    }

    /// A shell one-liner.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Result of a command run to completion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub state: JobState,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.state.is_success()
    }

    /// The output if the command completed, otherwise an error naming the machine and stderr.
    pub fn check(self, machine: &str, command: &CommandSpec) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        let detail = match self.exit_code {
            Some(code) => format!("exited with code {}", code),
            None => self.state.to_string(),
        };
        Err(Error::machine(
            machine,
            format!("`{}` {}: {}", command, detail, self.stderr.trim()),
        ))
    }
}

#[async_trait]
pub trait Machine: Send + Sync {
    fn name(&self) -> &str;

    /// Start a command without waiting for it.
    async fn start_command(&self, command: &CommandSpec) -> Result<Box<dyn Job>>;

    /// Run a command to completion and capture its output.
    async fn execute_command(&self, command: &CommandSpec) -> Result<CommandOutput>;

    async fn write_file(&self, path: &str, data: Vec<u8>) -> Result<()>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    async fn delete_file(&self, path: &str) -> Result<()>;

    async fn copy_from_local(&self, local_path: &Path, path: &str) -> Result<()> {
        let data = tokio::fs::read(local_path).await?;
        self.write_file(path, data).await
    }

    async fn file_hash(&self, path: &str) -> Result<String> {
        Ok(sha256_hex(&self.read_file(path).await?))
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

impl fmt::Display for dyn Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolve `path` below `root`, refusing absolute paths and `..`.
pub(crate) fn confine(root: &Path, path: &str) -> Result<PathBuf> {
    let relative = Path::new(path);
    let mut resolved = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => {
                return Err(Error::Config(format!(
                    "path `{}` must stay inside the machine root",
                    path
                )))
            }
        }
    }
    Ok(resolved)
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confine_keeps_paths_under_root() {
        let root = Path::new("/srv/testbed");
        assert_eq!(
            confine(root, "./trigger/run.json").unwrap(),
            PathBuf::from("/srv/testbed/trigger/run.json")
        );
        assert_eq!(confine(root, "").unwrap(), root);
        assert!(confine(root, "../etc/passwd").is_err());
        assert!(confine(root, "/etc/passwd").is_err());
    }

    #[test]
    fn failed_output_names_machine_and_stderr() {
        let output = CommandOutput {
            state: JobState::Failed,
            exit_code: Some(2),
            stdout: String::new(),
            stderr: "no such table\n".into(),
        };
        let command = CommandSpec::new("sqlcmd").arg("-q");
        let err = output.check("db01", &command).unwrap_err();
        assert_eq!(
            err.to_string(),
            "machine db01: `sqlcmd -q` exited with code 2: no such table"
        );
    }
}
