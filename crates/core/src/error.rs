// crates/core/src/error.rs
use std::any::Any;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that abort the handling of a single job request.
///
/// Every variant is reported back to the requesting connection as an
/// [`ErrorReply`]; only [`JobError::SystemOverload`] also closes it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobError {
    /// Malformed JSON, wrong shape, missing field or a non-numeric option.
    #[error("{0}")]
    InvalidMessage(String),

    /// `progress` was present but neither an object, `null` nor `false`.
    #[error("{0}")]
    InvalidProgress(String),

    /// An admission threshold failed against the live system load.
    #[error("{0}")]
    SystemOverload(String),

    /// The requested job module or function could not be resolved.
    #[error("{0}")]
    Loading(String),

    /// The registry had no job for the identity right after get-or-create.
    #[error("{0}")]
    JobNotInSession(String),

    /// Anything else that went wrong while validating a request.
    #[error("{0}")]
    Internal(String),
}

impl JobError {
    /// Name used in the `err` field of the reply.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::InvalidMessage(_) => "InvalidMessageError",
            JobError::InvalidProgress(_) => "InvalidProgressError",
            JobError::SystemOverload(_) => "SystemOverloadError",
            JobError::Loading(_) => "LoadingError",
            JobError::JobNotInSession(_) => "JobNotInSessionError",
            JobError::Internal(_) => "InternalError",
        }
    }

    /// `InvalidProgress` is a refinement of `InvalidMessage`.
    pub fn is_invalid_message(&self) -> bool {
        matches!(
            self,
            JobError::InvalidMessage(_) | JobError::InvalidProgress(_)
        )
    }

    /// Whether the connection is closed after the reply has been sent.
    pub fn closes_connection(&self) -> bool {
        matches!(self, JobError::SystemOverload(_))
    }

    pub fn to_reply(&self) -> ErrorReply {
        ErrorReply {
            err: self.kind().to_string(),
            val: vec![self.to_string()],
        }
    }
}

/// Outbound error message: `{"err": "<kind>", "val": ["<message>"]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub err: String,
    pub val: Vec<String>,
}

/// Failure raised by a job callable.
///
/// Recorded on the job and logged; it never travels back to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct JobFailure {
    message: String,
}

impl JobFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "job panicked".to_string()
        };
        Self::new(format!("panicked: {message}"))
    }
}

impl From<String> for JobFailure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for JobFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
