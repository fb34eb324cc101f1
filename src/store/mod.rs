//! Persisted job and worker state.
//!
//! The hub's single source of truth is one SQLite database. All mutation
//! goes through [`JobStore`] and [`WorkerRegistry`]; each operation runs
//! under one serialized transaction, which is what makes the claim protocol
//! safe against concurrent callers.

pub mod db;
pub mod job;
pub mod jobs;
pub mod workers;

pub use db::Db;
pub use job::{FailOutcome, HeartbeatOutcome, Job, JobStatus, NewJob, SubmitOutcome};
pub use jobs::{JobStore, ReapReport, StorePolicy};
pub use workers::{Registration, WorkerRecord, WorkerRegistry};
