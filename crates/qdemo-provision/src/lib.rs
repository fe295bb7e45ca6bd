#![warn(missing_docs)]

//! Concurrent two-cluster provisioning with a replication barrier.
//!
//! A pool of workers creates directories on cluster 1, waits until the
//! initial replication to cluster 2 has settled, then creates SMB shares on
//! both clusters and writes a test file into every directory. Setup, cleanup
//! and failback workflows cover the rest of the demo lifecycle.

pub mod barrier;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod error;
pub mod failback;
pub mod orchestrator;
pub mod outcome;
pub mod queue;
pub mod setup;
pub mod status;
pub mod worker;

pub use barrier::{BarrierHandle, BarrierState, PollReport, ReplicationPoller};
pub use config::DemoConfig;
pub use error::ProvisionError;
pub use orchestrator::{Orchestrator, PoolPlan, RunResult};
pub use outcome::Outcome;
pub use queue::{Dequeued, TaskQueue};
pub use worker::{DirTask, FailureKind, Stage, WorkerResult};
