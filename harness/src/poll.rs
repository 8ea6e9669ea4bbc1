//! Bounded polling: the one primitive every "wait until" in the harness is built on.

use crate::error::{Error, Result};
use crate::job::{Job, JobState};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

/// How often to probe, how the interval grows, and when to give up.
#[derive(Clone, Debug, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub timeout: Option<Duration>,
    pub max_attempts: Option<u32>,
}

impl PollPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_interval: interval,
            multiplier: 1.0,
            timeout: None,
            max_attempts: None,
        }
    }

    pub fn exponential(initial: Duration, max_interval: Duration) -> Self {
        Self {
            interval: initial,
            max_interval: max_interval.max(initial),
            multiplier: 2.0,
            timeout: None,
            max_attempts: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn is_bounded(&self) -> bool {
        self.timeout.is_some() || self.max_attempts.is_some()
    }

    /// Longest a poll under this policy can take: the timeout, or the sum of the sleeps between
    /// `max_attempts` probes, whichever is shorter.
    pub fn budget(&self) -> Option<Duration> {
        let by_attempts = self.max_attempts.map(|max| {
            let mut delay = self.interval;
            let mut total = Duration::ZERO;
            for _ in 1..max {
                total += delay;
                delay = self.next_delay(delay);
            }
            total
        });
        match (self.timeout, by_attempts) {
            (Some(timeout), Some(attempts)) => Some(timeout.min(attempts)),
            (timeout, attempts) => timeout.or(attempts),
        }
    }

    /// Delay to use after `current`, capped at `max_interval`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let grown = current.as_secs_f64() * self.multiplier.max(1.0);
        Duration::from_secs_f64(grown.min(self.max_interval.as_secs_f64()))
    }
}

impl Default for PollPolicy {
    /// Ten seconds between checks, growing to a minute, for at most 75 minutes.
    fn default() -> Self {
        PollPolicy::exponential(Duration::from_secs(10), Duration::from_secs(60))
            .with_multiplier(1.5)
            .with_timeout(Duration::from_secs(75 * 60))
    }
}

/// Millisecond-based form of [`PollPolicy`] as it appears in configuration files.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub max_interval_ms: u64,
    pub multiplier: f64,
    pub timeout_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}

impl Default for PollConfig {
    fn default() -> Self {
        let policy = PollPolicy::default();
        Self {
            interval_ms: policy.interval.as_millis() as u64,
            max_interval_ms: policy.max_interval.as_millis() as u64,
            multiplier: policy.multiplier,
            timeout_ms: policy.timeout.map(|t| t.as_millis() as u64),
            max_attempts: policy.max_attempts,
        }
    }
}

impl PollConfig {
    pub fn policy(&self) -> Result<PollPolicy> {
        if self.interval_ms == 0 {
            return Err(Error::Config("poll interval must be positive".into()));
        }
        if self.timeout_ms.is_none() && self.max_attempts.is_none() {
            return Err(Error::Config(
                "poll policy needs a timeout or an attempt limit".into(),
            ));
        }
        let interval = Duration::from_millis(self.interval_ms);
        Ok(PollPolicy {
            interval,
            max_interval: Duration::from_millis(self.max_interval_ms).max(interval),
            multiplier: self.multiplier,
            timeout: self.timeout_ms.map(Duration::from_millis),
            max_attempts: self.max_attempts,
        })
    }
}

/// Probe until it yields a value.
///
/// `probe` gets the 1-based attempt number and returns `Ok(Some(_))` when done, `Ok(None)` to keep
/// waiting, or an error to abort immediately. Sleeps never run past the policy's deadline. A
/// policy with neither a timeout nor an attempt limit is refused.
pub async fn poll_until<T, F, Fut>(policy: &PollPolicy, what: &str, mut probe: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    if !policy.is_bounded() {
        return Err(Error::Config(format!(
            "waiting for {} needs a timeout or an attempt limit",
            what
        )));
    }
    let start = Instant::now();
    let mut delay = policy.interval;
    let mut attempt = 0;
    loop {
        attempt += 1;
        if let Some(value) = probe(attempt).await? {
            return Ok(value);
        }
        if matches!(policy.max_attempts, Some(max) if attempt >= max) {
            return Err(Error::AttemptsExhausted {
                what: what.to_string(),
                attempts: attempt,
            });
        }
        let mut sleep_for = delay;
        if let Some(timeout) = policy.timeout {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(Error::Timeout {
                    what: what.to_string(),
                    elapsed,
                });
            }
            sleep_for = sleep_for.min(timeout - elapsed);
        }
        debug!(what, attempt, ?sleep_for, "condition not met yet");
        sleep(sleep_for).await;
        delay = policy.next_delay(delay);
    }
}

/// Boolean form of [`poll_until`].
pub async fn await_condition<F, Fut>(
    policy: &PollPolicy,
    what: &str,
    mut condition: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    poll_until(policy, what, |_| {
        let check = condition();
        async move { Ok(check.await?.then(|| ())) }
    })
    .await
}

/// Poll a job until it reaches a terminal state; anything but `Completed` is an error carrying the
/// job's delay reason.
pub async fn wait_for_completion<J>(job: &J, policy: &PollPolicy) -> Result<()>
where
    J: Job + ?Sized,
{
    let job_id = job.job_id().to_string();
    info!(%job_id, "waiting for job to complete");
    let what = format!("job {} to finish", job_id);
    let state = poll_until(policy, &what, |_| async move {
        let state = job.status().await?;
        Ok(state.is_terminal().then(|| state))
    })
    .await?;
    if state.is_success() {
        info!(%job_id, "job completed");
        return Ok(());
    }
    let reason = job
        .delay_reason()
        .await
        .unwrap_or_else(|err| format!("<delay reason unavailable: {}>", err));
    Err(Error::JobFailed {
        job_id,
        state,
        reason,
    })
}

/// Terminal state the job ended in, without judging it.
pub async fn wait_for_terminal<J>(job: &J, policy: &PollPolicy) -> Result<JobState>
where
    J: Job + ?Sized,
{
    let what = format!("job {} to finish", job.job_id());
    poll_until(policy, &what, |_| async move {
        let state = job.status().await?;
        Ok(state.is_terminal().then(|| state))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockJob;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> PollPolicy {
        PollPolicy::fixed(Duration::from_millis(10)).with_timeout(Duration::from_secs(5))
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = PollPolicy::exponential(Duration::from_secs(1), Duration::from_secs(5));
        let mut delay = policy.interval;
        let mut seen = vec![];
        for _ in 0..5 {
            seen.push(delay.as_secs());
            delay = policy.next_delay(delay);
        }
        assert_eq!(seen, vec![1, 2, 4, 5, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn job_completes_after_n_polls() {
        let job = MockJob::new("17").completes_after(3);
        wait_for_completion(&job, &quick()).await.unwrap();
        assert_eq!(job.polls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_carries_delay_reason() {
        let job = MockJob::new("18")
            .ends_after(2, JobState::Failed)
            .with_delay_reason("disk full");
        let err = wait_for_completion(&job, &quick()).await.unwrap_err();
        match &err {
            Error::JobFailed { state, reason, .. } => {
                assert_eq!(*state, JobState::Failed);
                assert_eq!(reason, "disk full");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(err.to_string().contains("disk full"));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_job_times_out() {
        let job = MockJob::new("19");
        let policy =
            PollPolicy::fixed(Duration::from_secs(10)).with_timeout(Duration::from_secs(35));
        let started = Instant::now();
        let err = wait_for_completion(&job, &policy).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }), "{:?}", err);
        // polls at 0, 10, 20, 30 and a final clipped one at 35
        assert_eq!(job.polls(), 5);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(35) && elapsed < Duration::from_secs(36));
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_bounded() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = PollPolicy::fixed(Duration::from_secs(1)).with_max_attempts(4);
        let err = await_condition(&policy, "never", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::AttemptsExhausted { attempts: 4, .. }));
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_errors_abort_immediately() {
        let result: Result<()> = poll_until(&quick(), "broken", |attempt| async move {
            if attempt == 2 {
                Err(Error::Failed("probe broke".into()))
            } else {
                Ok(None)
            }
        })
        .await;
        assert!(matches!(result, Err(Error::Failed(msg)) if msg == "probe broke"));
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_policy_is_refused() {
        let job = MockJob::new("20");
        let policy = PollPolicy::fixed(Duration::from_secs(1));
        let err = wait_for_completion(&job, &policy).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{:?}", err);
        assert_eq!(job.polls(), 0);
    }

    #[test]
    fn budget_is_the_tighter_bound() {
        let policy = PollPolicy::exponential(Duration::from_secs(1), Duration::from_secs(5))
            .with_max_attempts(5);
        // sleeps of 1, 2, 4 and 5 seconds between five probes
        assert_eq!(policy.budget(), Some(Duration::from_secs(12)));
        let policy = policy.with_timeout(Duration::from_secs(3));
        assert_eq!(policy.budget(), Some(Duration::from_secs(3)));
        assert_eq!(PollPolicy::fixed(Duration::from_secs(1)).budget(), None);
    }

    #[test]
    fn config_requires_a_bound() {
        let config = PollConfig {
            timeout_ms: None,
            max_attempts: None,
            ..Default::default()
        };
        assert!(config.policy().is_err());
        let policy = PollConfig::default().policy().unwrap();
        assert_eq!(policy, PollPolicy::default());
    }
}
