//! Best-effort teardown that records what went wrong instead of swallowing it.

use crate::error::Result;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use tracing::{info, warn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CleanupStep {
    pub name: String,
    pub error: Option<String>,
}

/// Outcome of a teardown: which steps ran and which of them failed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub steps: Vec<CleanupStep>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|step| step.error.is_none())
    }

    pub fn failures(&self) -> impl Iterator<Item = &CleanupStep> {
        self.steps.iter().filter(|step| step.error.is_some())
    }

    pub fn merge(&mut self, other: CleanupReport) {
        self.steps.extend(other.steps);
    }

    /// Record a step that could not even be attempted.
    pub fn record_failure(&mut self, name: impl Into<String>, error: impl ToString) {
        self.steps.push(CleanupStep {
            name: name.into(),
            error: Some(error.to_string()),
        });
    }
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return write!(f, "{} cleanup step(s) ok", self.steps.len());
        }
        let failures: Vec<String> = self
            .failures()
            .map(|step| format!("{}: {}", step.name, step.error.as_deref().unwrap_or_default()))
            .collect();
        write!(f, "cleanup failed: {}", failures.join("; "))
    }
}

/// Collects cleanup steps. Each failure is logged and kept; nothing is propagated.
#[derive(Debug, Default)]
pub struct Cleanup {
    report: CleanupReport,
}

impl Cleanup {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn attempt<F>(&mut self, name: &str, step: F) -> &mut Self
    where
        F: Future<Output = Result<()>>,
    {
        let outcome = step.await;
        self.record(name, outcome)
    }

    pub fn attempt_sync(&mut self, name: &str, step: impl FnOnce() -> Result<()>) -> &mut Self {
        let outcome = step();
        self.record(name, outcome)
    }

    /// Record a step only if there is something to clean; `None` means setup never created it.
    pub async fn attempt_some<T, F, Fut>(
        &mut self,
        name: &str,
        target: Option<T>,
        step: F,
    ) -> &mut Self
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        match target {
            Some(target) => self.attempt(name, step(target)).await,
            None => self,
        }
    }

    fn record(&mut self, name: &str, outcome: Result<()>) -> &mut Self {
        let error = match outcome {
            Ok(()) => {
                info!(step = name, "cleanup step done");
                None
            }
            Err(err) => {
                warn!(step = name, %err, "cleanup step failed");
                Some(err.to_string())
            }
        };
        self.report.steps.push(CleanupStep {
            name: name.to_string(),
            error,
        });
        self
    }

    pub fn finish(self) -> CleanupReport {
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn collects_failures_and_keeps_going() {
        let mut cleanup = Cleanup::new();
        cleanup
            .attempt("drop database", async { Err(Error::Failed("db busy".into())) })
            .await;
        cleanup.attempt("delete schedule", async { Ok(()) }).await;
        cleanup.attempt_sync("remove temp dir", || Ok(()));
        let report = cleanup.finish();
        assert_eq!(report.steps.len(), 3);
        assert!(!report.is_clean());
        let failed: Vec<_> = report.failures().map(|s| s.name.as_str()).collect();
        assert_eq!(failed, vec!["drop database"]);
        assert_eq!(report.to_string(), "cleanup failed: drop database: db busy");
    }

    #[tokio::test]
    async fn skips_targets_that_were_never_created() {
        let mut cleanup = Cleanup::new();
        let never_created: Option<String> = None;
        cleanup
            .attempt_some("delete client", never_created, |_| async { Ok(()) })
            .await;
        let report = cleanup.finish();
        assert!(report.is_clean());
        assert!(report.steps.is_empty());
    }
}
