// crates/core/src/jobs/job.rs
//! State of a single job.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use serde_json::{Map, Value};
use tokio::sync::watch;

use super::types::{ConnectionId, JobFn};
use crate::error::JobFailure;

/// One accepted unit of work.
///
/// The working state is read and written by the callable and snapshotted by
/// progress reporters; each access takes a short lock, so a reporter sees
/// every field either before or after a write but may see a mix of fields.
pub struct Job {
    ident: String,
    creator: ConnectionId,
    data: RwLock<Map<String, Value>>,
    worker: JobFn,
    error: Mutex<Option<JobFailure>>,
    finished: AtomicBool,
    progress_tx: watch::Sender<u64>,
}

impl Job {
    pub(crate) fn new(
        ident: String,
        creator: ConnectionId,
        data: Map<String, Value>,
        worker: JobFn,
    ) -> Self {
        let (progress_tx, _) = watch::channel(0);
        Self {
            ident,
            creator,
            data: RwLock::new(data),
            worker,
            error: Mutex::new(None),
            finished: AtomicBool::new(false),
            progress_tx,
        }
    }

    pub fn ident(&self) -> &str {
        &self.ident
    }

    /// Connection that created the job. Informational only.
    pub fn creator(&self) -> ConnectionId {
        self.creator
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read_data().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.write_data().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.write_data().remove(key)
    }

    /// Copy of the whole working state.
    pub fn snapshot(&self) -> Value {
        Value::Object(self.read_data().clone())
    }

    /// The value a reporter sends: `data[key]` (or `null`), or the whole state.
    pub fn project(&self, key: Option<&str>) -> Value {
        match key {
            Some(key) => self.get(key).unwrap_or(Value::Null),
            None => self.snapshot(),
        }
    }

    /// Failure recorded when the callable returned an error or panicked.
    pub fn error(&self) -> Option<JobFailure> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// True once the runner has finished, including registry removal.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Wake every attached reporter now instead of at its next interval.
    pub fn notify_progress(&self) {
        self.progress_tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Receiver woken by [`Job::notify_progress`] and by job completion.
    ///
    /// Each receiver tracks what it has seen, so wake-ups reset per waiter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.progress_tx.subscribe()
    }

    /// Run the callable, capturing an error or panic as the job's failure.
    pub(crate) fn execute(&self) -> Result<(), JobFailure> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.worker)(self)))
            .unwrap_or_else(|payload| Err(JobFailure::from_panic(payload)));
        if let Err(failure) = &outcome {
            *self.error.lock().unwrap_or_else(PoisonError::into_inner) = Some(failure.clone());
        }
        outcome
    }

    pub(crate) fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
        self.notify_progress();
    }

    fn read_data(&self) -> std::sync::RwLockReadGuard<'_, Map<String, Value>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_data(&self) -> std::sync::RwLockWriteGuard<'_, Map<String, Value>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("ident", &self.ident)
            .field("creator", &self.creator)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}
