// crates/core/src/jobs/registry.rs
//! Live mapping from job identity to running job.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use serde_json::{Map, Value};
use tracing::{error, info, warn};

use super::job::Job;
use super::types::{ConnectionId, JobFn};
use crate::error::JobError;

/// Session registry shared by every connection handler and job runner.
///
/// Cloning yields another handle to the same map. All read-modify-write
/// sequences run under one lock, so at most one job per identity is live.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, Arc<Job>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live job for `ident`, or create and start one.
    ///
    /// When a job already exists, `data` and `worker` are discarded and the
    /// existing job is returned unchanged. A new job's runner thread is
    /// spawned before the lock is released and removes the job when the
    /// callable returns or fails.
    pub fn get_or_create(
        &self,
        ident: &str,
        creator: ConnectionId,
        data: Map<String, Value>,
        worker: JobFn,
    ) -> Result<Arc<Job>, JobError> {
        let mut sessions = self.lock();

        if let Some(existing) = sessions.get(ident) {
            info!(
                ident,
                conn = creator,
                created_by = existing.creator(),
                "job already exists, joining"
            );
            return Ok(Arc::clone(existing));
        }

        let job = Arc::new(Job::new(ident.to_string(), creator, data, worker));
        sessions.insert(ident.to_string(), Arc::clone(&job));
        info!(
            ident,
            conn = creator,
            jobs = sessions.len(),
            "inserted job into sessions"
        );

        let registry = self.clone();
        let runner_job = Arc::clone(&job);
        let spawned = thread::Builder::new()
            .name("wsjobd-job".into())
            .spawn(move || registry.run(runner_job));

        if let Err(e) = spawned {
            sessions.remove(ident);
            error!(ident, error = %e, "failed to spawn job runner thread");
            return Err(JobError::JobNotInSession(format!(
                "job not in sessions: {ident}: runner did not start: {e}"
            )));
        }

        Ok(job)
    }

    /// Number of live jobs.
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn contains(&self, ident: &str) -> bool {
        self.lock().contains_key(ident)
    }

    pub fn get(&self, ident: &str) -> Option<Arc<Job>> {
        self.lock().get(ident).cloned()
    }

    /// Body of a job's runner thread.
    fn run(&self, job: Arc<Job>) {
        info!(ident = job.ident(), "job started");

        if let Err(failure) = job.execute() {
            warn!(ident = job.ident(), error = %failure, "job failed");
        }

        info!(ident = job.ident(), "job ended");
        self.release(&job);
        job.mark_finished();
    }

    /// Remove `job`, but only if its identity still maps to this instance.
    fn release(&self, job: &Arc<Job>) -> bool {
        let mut sessions = self.lock();
        let same = sessions
            .get(job.ident())
            .is_some_and(|current| Arc::ptr_eq(current, job));

        if same {
            sessions.remove(job.ident());
            info!(
                ident = job.ident(),
                jobs = sessions.len(),
                "removed job from sessions"
            );
        } else {
            warn!(ident = job.ident(), "job was already replaced in sessions");
        }
        same
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Job>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("jobs", &self.count())
            .finish()
    }
}
