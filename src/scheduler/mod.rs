//! Batch verification: jobs, their dependency graph, the per-job pipeline,
//! and a parallel coordinator.
//!
//! # Architecture
//!
//! - A **graph** orders jobs so every override is proved before its users
//! - A **coordinator** hands ready jobs to idle workers and collects reports
//! - **Workers** run the pipeline for one job at a time against the shared
//!   proof cache
//!
//! # Example
//!
//! ```ignore
//! use symequiv::scheduler::{Scheduler, SchedulerConfig, VerificationJob, Workspace};
//!
//! let scheduler = Scheduler::new(workspace, cache, SchedulerConfig::default().with_workers(4));
//! let batch = scheduler.run(vec![
//!     VerificationJob::new("leaf", "leaf", "leaf_spec"),
//!     VerificationJob::new("top", "top", "top_spec").with_overrides(["leaf"]),
//! ])?;
//! ```

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod graph;
pub mod job;
pub mod pipeline;
pub mod report;

pub use config::SchedulerConfig;
pub use coordinator::{BatchResult, Scheduler};
pub use graph::JobGraph;
pub use job::{ProofMode, Tactic, VerificationJob, Workspace};
pub use pipeline::JobRunner;
pub use report::{InconclusiveReason, Status, VerificationReport};
