// crates/core/src/admission.rs
//! Admission control: a pure decision over a system-load snapshot.
//!
//! Three independent checks, evaluated in a fixed order with the first
//! failure short-circuiting:
//! - `mem_available` must not drop below `mem_low_threshold` (default 500 MiB)
//! - `cpu_idle_percent` must not drop below `cpu_low_threshold` (default 3)
//! - `client_number` must not exceed `max_client_number` (default 1000)

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::JobError;

pub const DEFAULT_MEM_LOW_THRESHOLD: f64 = 500.0 * 1024.0 * 1024.0;
pub const DEFAULT_CPU_LOW_THRESHOLD: f64 = 3.0;
pub const DEFAULT_MAX_CLIENT_NUMBER: f64 = 1000.0;

/// Live metrics snapshot, also attached to progress reports as `system_load`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemLoad {
    pub mem_available: u64,
    pub cpu_idle_percent: f64,
    pub client_number: usize,
}

impl SystemLoad {
    fn observed(&self, metric: Metric) -> f64 {
        match metric {
            Metric::MemAvailable => self.mem_available as f64,
            Metric::CpuIdlePercent => self.cpu_idle_percent,
            Metric::ClientNumber => self.client_number as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    MemAvailable,
    CpuIdlePercent,
    ClientNumber,
}

impl Metric {
    /// Evaluation order of the checks.
    pub const ALL: [Metric; 3] = [
        Metric::MemAvailable,
        Metric::CpuIdlePercent,
        Metric::ClientNumber,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::MemAvailable => "mem_available",
            Metric::CpuIdlePercent => "cpu_idle_percent",
            Metric::ClientNumber => "client_number",
        }
    }

    /// Name of the `check_load` field that overrides this metric's threshold.
    pub fn threshold_param(self) -> &'static str {
        match self {
            Metric::MemAvailable => "mem_low_threshold",
            Metric::CpuIdlePercent => "cpu_low_threshold",
            Metric::ClientNumber => "max_client_number",
        }
    }

    pub fn default_threshold(self) -> f64 {
        match self {
            Metric::MemAvailable => DEFAULT_MEM_LOW_THRESHOLD,
            Metric::CpuIdlePercent => DEFAULT_CPU_LOW_THRESHOLD,
            Metric::ClientNumber => DEFAULT_MAX_CLIENT_NUMBER,
        }
    }

    /// Memory and CPU idle are floors; the client count is a ceiling.
    fn greater_is_better(self) -> bool {
        !matches!(self, Metric::ClientNumber)
    }
}

/// Caller-supplied threshold overrides, kept raw until evaluation.
///
/// An override is only validated when its metric is reached, so an earlier
/// failing check wins over a later malformed override.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadThresholds {
    overrides: Map<String, Value>,
}

impl LoadThresholds {
    /// Keep the overrides of a `check_load` object. Unknown fields are ignored.
    pub fn from_overrides(overrides: &Map<String, Value>) -> Self {
        let overrides = Metric::ALL
            .iter()
            .filter_map(|metric| {
                let param = metric.threshold_param();
                overrides.get(param).map(|v| (param.to_string(), v.clone()))
            })
            .collect();
        Self { overrides }
    }

    pub fn with(mut self, metric: Metric, value: impl Into<Value>) -> Self {
        self.overrides
            .insert(metric.threshold_param().to_string(), value.into());
        self
    }

    /// Effective threshold: the override, or the default when absent.
    ///
    /// Booleans count as 1 and 0. Any other non-number, `null` included, is
    /// an `InvalidMessage` error.
    pub fn threshold(&self, metric: Metric) -> Result<f64, JobError> {
        let param = metric.threshold_param();
        match self.overrides.get(param) {
            None => Ok(metric.default_threshold()),
            Some(Value::Bool(flag)) => Ok(f64::from(u8::from(*flag))),
            Some(value) => value
                .as_f64()
                .ok_or_else(|| JobError::InvalidMessage(format!("{param} is not a number"))),
        }
    }
}

/// The first failing admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overload {
    pub metric: Metric,
    pub observed: f64,
    pub threshold: f64,
}

impl fmt::Display for Overload {
    /// Values are shown as truncated integers.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let relation = if self.metric.greater_is_better() {
            "less"
        } else {
            "greater"
        };
        write!(
            f,
            "{}: {} is {} than: {}",
            self.metric.name(),
            self.observed.trunc() as i64,
            relation,
            self.threshold.trunc() as i64
        )
    }
}

impl From<Overload> for JobError {
    fn from(overload: Overload) -> Self {
        JobError::SystemOverload(overload.to_string())
    }
}

/// Find the first failing admission check against `load`.
///
/// Metrics are evaluated in [`Metric::ALL`] order. Each threshold is resolved
/// just before its check, and evaluation stops at the first overload or
/// malformed override.
pub fn first_overload(
    load: &SystemLoad,
    thresholds: &LoadThresholds,
) -> Result<Option<Overload>, JobError> {
    for metric in Metric::ALL {
        let threshold = thresholds.threshold(metric)?;
        let observed = load.observed(metric);
        let diff = if metric.greater_is_better() {
            observed - threshold
        } else {
            threshold - observed
        };
        if diff < 0.0 {
            return Ok(Some(Overload {
                metric,
                observed,
                threshold,
            }));
        }
    }
    Ok(None)
}

/// Admit or reject a request: `SystemOverload` for the first failing check.
pub fn check_load(load: &SystemLoad, thresholds: &LoadThresholds) -> Result<(), JobError> {
    match first_overload(load, thresholds)? {
        Some(overload) => Err(overload.into()),
        None => Ok(()),
    }
}
