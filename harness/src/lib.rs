//! Test case execution for controller-driven QA runs.
//!
//! A [`Runner`] drives each [`TestCase`] through setup, run and teardown. Test bodies start
//! [`Job`]s on [`Machine`]s, wait on them with bounded polling, compare before/after state, and
//! undo what they created through [`Cleanup`].

pub mod cleanup;
pub mod config;
pub mod context;
pub mod error;
pub mod fanout;
pub mod inputs;
pub mod job;
pub mod machine;
pub mod manager;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod poll;
pub mod runner;
pub mod testcase;
pub mod trigger;
pub mod validate;

pub use cleanup::{Cleanup, CleanupReport};
pub use config::HarnessConfig;
pub use context::TestContext;
pub use error::{Error, FailureKind, Result};
pub use fanout::{fan_out, FanOutReport};
pub use inputs::TcInputs;
pub use job::{Job, JobState};
pub use machine::{CommandOutput, CommandSpec, Machine, MachineRegistry};
pub use manager::{JobAction, JobManager};
pub use poll::PollPolicy;
pub use runner::{RunSummary, Runner, TestResult};
pub use testcase::{TestCase, TestStatus};
pub use trigger::Trigger;
