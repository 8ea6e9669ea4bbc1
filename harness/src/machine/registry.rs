use super::{LocalMachine, Machine, RemoteMachine};
use crate::cleanup::{Cleanup, CleanupReport};
use crate::config::{HarnessConfig, MachineConfig};
use crate::error::{Error, Result};
use crate::poll::PollPolicy;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Named machines available to a test run.
#[derive(Default)]
pub struct MachineRegistry {
    machines: BTreeMap<String, Arc<dyn Machine>>,
}

impl MachineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured machine. Local roots are taken relative to the workspace.
    pub fn from_config(config: &HarnessConfig, policy: &PollPolicy) -> Self {
        let mut registry = Self::new();
        for (name, machine) in &config.machines {
            let machine: Arc<dyn Machine> = match machine {
                MachineConfig::Local { root } => Arc::new(
                    LocalMachine::new(name.clone(), config.workspace.join(root))
                        .with_policy(policy.clone()),
                ),
                MachineConfig::Remote { address, tls } => Arc::new(RemoteMachine::new(
                    name.clone(),
                    address.clone(),
                    tls.clone(),
                    policy.clone(),
                )),
            };
            registry.insert(machine);
        }
        registry
    }

    pub fn insert(&mut self, machine: Arc<dyn Machine>) {
        self.machines.insert(machine.name().to_string(), machine);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Machine>> {
        self.machines
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no machine named `{}` is configured", name)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.machines.keys().map(String::as_str)
    }

    pub fn all(&self) -> Vec<Arc<dyn Machine>> {
        self.machines.values().cloned().collect()
    }

    pub async fn disconnect_all(&self) -> CleanupReport {
        let mut cleanup = Cleanup::new();
        for (name, machine) in &self.machines {
            cleanup
                .attempt(&format!("disconnect {}", name), machine.disconnect())
                .await;
        }
        cleanup.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;
    use crate::machine::{CommandOutput, CommandSpec};
    use async_trait::async_trait;

    // a machine whose session refuses to close
    struct Stuck;

    #[async_trait]
    impl Machine for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn start_command(&self, _command: &CommandSpec) -> Result<Box<dyn Job>> {
            Err(Error::Unsupported("commands".into()))
        }

        async fn execute_command(&self, _command: &CommandSpec) -> Result<CommandOutput> {
            Err(Error::Unsupported("commands".into()))
        }

        async fn write_file(&self, _path: &str, _data: Vec<u8>) -> Result<()> {
            Err(Error::Unsupported("files".into()))
        }

        async fn read_file(&self, _path: &str) -> Result<Vec<u8>> {
            Err(Error::Unsupported("files".into()))
        }

        async fn delete_file(&self, _path: &str) -> Result<()> {
            Err(Error::Unsupported("files".into()))
        }

        async fn disconnect(&self) -> Result<()> {
            Err(Error::Failed("session busy".into()))
        }
    }

    #[tokio::test]
    async fn disconnect_failures_are_reported() {
        let root = tempfile::tempdir().unwrap();
        let mut registry = MachineRegistry::new();
        registry.insert(Arc::new(LocalMachine::new("local", root.path())));
        registry.insert(Arc::new(Stuck));

        let report = registry.disconnect_all().await;
        assert_eq!(report.steps.len(), 2);
        let failed: Vec<_> = report.failures().map(|step| step.name.as_str()).collect();
        assert_eq!(failed, vec!["disconnect stuck"]);
        assert!(registry.get("nowhere").is_err());
    }
}
