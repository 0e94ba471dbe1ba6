// crates/core/src/lib.rs
//! Transport-free engine of the WebSocket job daemon: request validation,
//! admission control, job resolution and the session registry.

pub mod admission;
pub mod catalog;
pub mod error;
pub mod jobs;
pub mod probe;
pub mod request;

pub use admission::{check_load, first_overload, LoadThresholds, Metric, Overload, SystemLoad};
pub use catalog::{JobCatalog, JobModule};
pub use error::{ErrorReply, JobError, JobFailure};
pub use jobs::{job_fn, ConnectionId, Job, JobFn, SessionRegistry};
pub use probe::{FixedProbe, LoadProbe, SysinfoProbe};
pub use request::{JobRequest, ProgressOptions};
