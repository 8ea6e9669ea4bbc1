//! Run one task per target concurrently and wait for all of them.

use crate::error::{Error, Result};
use futures::future::join_all;
use std::fmt::Display;
use std::future::Future;
use tracing::{info, warn, Instrument};

/// What happened to the task started for one target.
#[derive(Debug)]
pub struct TaskOutcome<T> {
    pub target: String,
    pub result: Result<T>,
}

#[derive(Debug)]
pub struct FanOutReport<T> {
    pub outcomes: Vec<TaskOutcome<T>>,
}

impl<T> FanOutReport<T> {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &TaskOutcome<T>> {
        self.outcomes.iter().filter(|o| o.result.is_ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskOutcome<T>> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    /// All values in target order, or one error summarising every failed target.
    pub fn into_result(self) -> Result<Vec<T>> {
        let total = self.outcomes.len();
        let mut values = Vec::with_capacity(total);
        let mut failures = vec![];
        for TaskOutcome { target, result } in self.outcomes {
            match result {
                Ok(value) => values.push(value),
                Err(err) => failures.push(format!("{}: {}", target, err)),
            }
        }
        if failures.is_empty() {
            return Ok(values);
        }
        Err(Error::FanOut {
            failed: failures.len(),
            total,
            summary: failures.join("; "),
        })
    }
}

/// Spawn exactly one task per target and join all of them.
///
/// A failing or panicking task never stops the others; its outcome is recorded in the report, which
/// lists targets in input order.
pub async fn fan_out<I, T, O, F, Fut>(targets: I, task: F) -> FanOutReport<O>
where
    I: IntoIterator<Item = T>,
    T: Display,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<O>> + Send + 'static,
    O: Send + 'static,
{
    let mut names = vec![];
    let mut handles = vec![];
    for target in targets {
        let name = target.to_string();
        let span = tracing::info_span!("fan_out", target = %name);
        handles.push(tokio::spawn(task(target).instrument(span)));
        names.push(name);
    }
    info!(tasks = handles.len(), "fanned out");

    let outcomes = names
        .into_iter()
        .zip(join_all(handles).await)
        .map(|(target, joined)| {
            let result = joined.unwrap_or_else(|err| {
                Err(Error::Failed(format!("task for {} aborted: {}", target, err)))
            });
            if let Err(err) = &result {
                warn!(%target, %err, "fan-out task failed");
            }
            TaskOutcome { target, result }
        })
        .collect();
    FanOutReport { outcomes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use std::time::Duration;

    #[tokio::test]
    async fn every_target_gets_exactly_one_task() {
        let started = Arc::new(AtomicUsize::new(0));
        let counter = started.clone();
        let report = fan_out(1..=5, move |n: u32| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10 * (5 - n as u64))).await;
                Ok(n * 10)
            }
        })
        .await;
        assert_eq!(started.load(Ordering::SeqCst), 5);
        assert_eq!(report.len(), 5);
        // results come back in target order even though later targets finish first
        assert_eq!(report.into_result().unwrap(), vec![10, 20, 30, 40, 50]);
    }

    #[tokio::test]
    async fn failures_and_panics_do_not_stop_the_others() {
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = finished.clone();
        let report = fan_out(["ctrl-a", "ctrl-b", "ctrl-c"], move |name: &'static str| {
            let counter = counter.clone();
            async move {
                match name {
                    "ctrl-a" => Err(Error::Failed("copy failed".into())),
                    "ctrl-b" => panic!("controller exploded"),
                    _ => {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }
            }
        })
        .await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(report.succeeded().count(), 1);
        let failed: Vec<_> = report.failed().map(|o| o.target.as_str()).collect();
        assert_eq!(failed, vec!["ctrl-a", "ctrl-b"]);
        let err = report.into_result().unwrap_err();
        assert!(matches!(err, Error::FanOut { failed: 2, total: 3, .. }));
        assert!(err.to_string().contains("copy failed"));
    }

    #[tokio::test]
    async fn no_targets() {
        let report = fan_out(Vec::<String>::new(), |_| async { Ok(()) }).await;
        assert!(report.is_empty());
    }
}
