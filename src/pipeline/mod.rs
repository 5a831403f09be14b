//! Retrieval pipeline: partition the Target Set per adapter policy, run every
//! job on the worker pool, merge completions into one store.
//!
//! ```text
//!   TargetSet ──► partition ──► (adapter, chunk) jobs
//!                                     │
//!                          worker pool (W threads)
//!                                     │  Fragment | failure
//!                                     ▼
//!                       coordinator ──► merge ──► RunReport
//! ```

pub mod partition;
pub mod scheduler;

pub use partition::{ChunkingPolicy, partition, worker_budget};
pub use scheduler::{
    FailureReason, JobKey, JobRecord, JobState, RunReport, Scheduler, SchedulerConfig,
    SchedulerError,
};
