//! forge-fleet: a persisted job queue with an HTTP coordination hub and a
//! pull-based worker agent.
//!
//! The hub owns all job and worker state in SQLite and exposes the claim,
//! heartbeat, result, and failure endpoints workers drive their lifecycle
//! through. Workers hold no authoritative state; anything a crashed worker
//! leaves behind is reclaimed by the hub's reaper.

pub mod agent;
pub mod config;
pub mod error;
pub mod events;
pub mod hub;
pub mod shutdown;
pub mod store;
