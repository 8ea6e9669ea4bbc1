//! Process-backed asynchronous jobs.
//!
//! A [`JobCoordinator`] starts child processes, tracks their status, lets callers stop them,
//! and fans their stdout/stderr out to any number of subscribers.

mod actors;
pub mod error;
pub mod events;
pub mod types;

// re-export the job coord handle as if it is the job coordinator itself.
pub use actors::coordinator::JobCoordinatorHandle as JobCoordinator;
pub use actors::coordinator::DEFAULT_RETAINED_FINISHED_JOBS;
pub use events::{JobStatus, StreamKind};
pub use types::{JobId, JobSpec};
