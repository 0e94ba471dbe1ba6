// crates/core/src/jobs/types.rs
//! Types for the job session system.

use std::sync::Arc;

use crate::error::JobFailure;

use super::job::Job;

/// Identifies the connection that submitted a request.
pub type ConnectionId = u64;

/// A job callable. Reads and writes the job's working state through `&Job`.
pub type JobFn = Arc<dyn Fn(&Job) -> Result<(), JobFailure> + Send + Sync>;

/// Box a closure as a [`JobFn`].
pub fn job_fn<F>(f: F) -> JobFn
where
    F: Fn(&Job) -> Result<(), JobFailure> + Send + Sync + 'static,
{
    Arc::new(f)
}
