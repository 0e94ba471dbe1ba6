// crates/core/src/request.rs
//! Parsing and shape validation of inbound job requests.

use std::time::Duration;

use serde_json::{Map, Value};

use crate::admission::LoadThresholds;
use crate::error::JobError;

pub const DEFAULT_JOBS_DIR: &str = "jobs";
pub const DEFAULT_CPU_SAMPLE_INTERVAL: Duration = Duration::from_millis(20);
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// A validated job request.
///
/// `data` is the whole inbound object, control fields included; it becomes
/// the job's initial working state.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub ident: String,
    pub func: String,
    pub jobs_dir: String,
    pub report_system_load: bool,
    pub cpu_sample_interval: Duration,
    /// Present only when `check_load` is an object.
    pub check_load: Option<LoadThresholds>,
    pub data: Map<String, Value>,
}

/// How a reporter should stream progress for one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressOptions {
    pub interval: Duration,
    /// Report `data[key]` instead of the whole working state.
    pub key: Option<String>,
}

impl Default for ProgressOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_PROGRESS_INTERVAL,
            key: None,
        }
    }
}

impl JobRequest {
    pub fn parse(raw: &str) -> Result<Self, JobError> {
        let msg: Value = serde_json::from_str(raw).map_err(|_| {
            JobError::InvalidMessage(format!("message is not a valid json string: {raw}"))
        })?;
        let Value::Object(data) = msg else {
            return Err(JobError::InvalidMessage("message is not dictionary".into()));
        };

        let ident = required_string(&data, "ident")?;
        let func = required_string(&data, "func")?;

        let report_system_load = matches!(data.get("report_system_load"), Some(Value::Bool(true)));

        let cpu_sample_interval = match data.get("cpu_sample_interval") {
            None => DEFAULT_CPU_SAMPLE_INTERVAL,
            Some(value) => seconds(value, "cpu_sample_interval")?,
        };

        let check_load = match data.get("check_load") {
            Some(Value::Object(overrides)) => Some(LoadThresholds::from_overrides(overrides)),
            _ => None,
        };

        let jobs_dir = match data.get("jobs_dir") {
            None => DEFAULT_JOBS_DIR.to_string(),
            Some(Value::String(dir)) => dir.clone(),
            Some(_) => {
                return Err(JobError::InvalidMessage("jobs_dir is not a string".into()));
            }
        };

        Ok(Self {
            ident,
            func,
            jobs_dir,
            report_system_load,
            cpu_sample_interval,
            check_load,
            data,
        })
    }

    /// Progress settings, or `None` when reporting is disabled.
    ///
    /// An absent `progress` field reports with the defaults; `null` and
    /// `false` disable reporting.
    pub fn progress_options(&self) -> Result<Option<ProgressOptions>, JobError> {
        let progress = match self.data.get("progress") {
            None => return Ok(Some(ProgressOptions::default())),
            Some(Value::Null | Value::Bool(false)) => return Ok(None),
            Some(Value::Object(progress)) => progress,
            Some(_) => {
                return Err(JobError::InvalidProgress(
                    "the progress in message is not a dictionary".into(),
                ));
            }
        };

        let interval = match progress.get("interval") {
            None => DEFAULT_PROGRESS_INTERVAL,
            Some(value) => seconds(value, "progress interval")?,
        };
        let key = match progress.get("key") {
            None | Some(Value::Null) => None,
            Some(Value::String(key)) => Some(key.clone()),
            Some(_) => {
                return Err(JobError::InvalidMessage("progress key is not a string".into()));
            }
        };

        Ok(Some(ProgressOptions { interval, key }))
    }
}

fn required_string(data: &Map<String, Value>, field: &str) -> Result<String, JobError> {
    match data.get(field) {
        None => Err(JobError::InvalidMessage(format!("'{field}' is not in message"))),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(JobError::InvalidMessage(format!("'{field}' is not a string"))),
    }
}

fn seconds(value: &Value, field: &str) -> Result<Duration, JobError> {
    value
        .as_f64()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| JobError::InvalidMessage(format!("{field} is not a number")))
}
