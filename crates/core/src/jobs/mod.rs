// crates/core/src/jobs/mod.rs
//! Job sessions keyed by client-supplied identity.
//!
//! Provides:
//! - `Job` — one running unit of work and its shared working state
//! - `SessionRegistry` — identity → live job, with join-don't-replace creation
//! - `JobFn` — the callable a job runs on its own thread

pub mod job;
pub mod registry;
pub mod types;

pub use job::Job;
pub use registry::SessionRegistry;
pub use types::{job_fn, ConnectionId, JobFn};
