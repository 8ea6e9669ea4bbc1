//! Run configuration, loaded once per run and passed down explicitly.

use crate::error::{Error, Result};
use crate::inputs::TcInputs;
use crate::poll::{PollConfig, PollPolicy};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    /// Base directory for local machine roots and run artifacts.
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub machines: BTreeMap<String, MachineConfig>,
    /// Inputs per test case id.
    #[serde(default)]
    pub testcases: BTreeMap<String, TcInputs>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MachineConfig {
    Local {
        #[serde(default)]
        root: PathBuf,
    },
    Remote {
        address: String,
        #[serde(default)]
        tls: Option<TlsConfig>,
    },
}

/// Mutual TLS material for talking to an agent.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    pub ca_cert: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
    #[serde(default = "default_domain")]
    pub domain: String,
}

fn default_workspace() -> PathBuf {
    PathBuf::from(".")
}

fn default_domain() -> String {
    "localhost".into()
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            poll: PollConfig::default(),
            machines: BTreeMap::new(),
            testcases: BTreeMap::new(),
        }
    }
}

impl HarnessConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("reading {}: {}", path.display(), err)))?;
        let mut config = Self::parse(&text)?;
        if config.workspace.is_relative() {
            if let Some(dir) = path.parent() {
                config.workspace = dir.join(&config.workspace);
            }
        }
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.poll.policy()?;
        for (name, machine) in &self.machines {
            if let MachineConfig::Remote { address, .. } = machine {
                if address.trim().is_empty() {
                    return Err(Error::Config(format!("machine `{}` has an empty address", name)));
                }
            }
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> Result<PollPolicy> {
        self.poll.policy()
    }

    pub fn inputs_for(&self, testcase: &str) -> TcInputs {
        self.testcases.get(testcase).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parses_full_config() {
        let config = HarnessConfig::parse(
            r#"{
                "workspace": "/var/testbed",
                "poll": {
                    "interval_ms": 500,
                    "max_interval_ms": 4000,
                    "multiplier": 2.0,
                    "timeout_ms": 60000
                },
                "machines": {
                    "local": { "kind": "local", "root": "scratch" },
                    "ctrl1": { "kind": "remote", "address": "10.0.0.5:50051" },
                    "ctrl2": {
                        "kind": "remote",
                        "address": "ctrl2:50051",
                        "tls": { "ca_cert": "ca.pem", "cert": "me.pem", "key": "me.key" }
                    }
                },
                "testcases": { "command-job": { "MachineName": "local" } }
            }"#,
        )
        .unwrap();
        let policy = config.poll_policy().unwrap();
        assert_eq!(policy.interval, Duration::from_millis(500));
        assert_eq!(policy.timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.machines.len(), 3);
        match &config.machines["ctrl2"] {
            MachineConfig::Remote { tls: Some(tls), .. } => assert_eq!(tls.domain, "localhost"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            config.inputs_for("command-job").get_str("MachineName").unwrap(),
            "local"
        );
        assert!(config.inputs_for("other").as_value().as_object().unwrap().is_empty());
    }

    #[test]
    fn rejects_unbounded_polling_and_unknown_fields() {
        assert!(HarnessConfig::parse(r#"{ "poll": { "timeout_ms": null } }"#).is_err());
        assert!(HarnessConfig::parse(r#"{ "polling": {} }"#).is_err());
        assert!(HarnessConfig::parse(
            r#"{ "machines": { "x": { "kind": "remote", "address": " " } } }"#
        )
        .is_err());
    }

    #[test]
    fn defaults() {
        let config = HarnessConfig::parse("{}").unwrap();
        assert_eq!(config.workspace, PathBuf::from("."));
        assert_eq!(config.poll_policy().unwrap(), PollPolicy::default());
    }
}
