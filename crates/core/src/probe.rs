// crates/core/src/probe.rs
//! System-load sampling.
//!
//! Sampling blocks for the CPU sample interval, so callers on an async
//! runtime must go through `tokio::task::spawn_blocking`.

use std::time::Duration;

use sysinfo::System;

use crate::admission::SystemLoad;

/// Source of [`SystemLoad`] snapshots.
///
/// The connection count is owned by the transport, so it is passed in.
pub trait LoadProbe: Send + Sync {
    fn sample(&self, cpu_sample_interval: Duration, client_number: usize) -> SystemLoad;
}

/// Reads memory and CPU figures from the host via `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProbe;

impl SysinfoProbe {
    pub fn new() -> Self {
        Self
    }
}

impl LoadProbe for SysinfoProbe {
    fn sample(&self, cpu_sample_interval: Duration, client_number: usize) -> SystemLoad {
        let mut sys = System::new();
        sys.refresh_memory();

        // CPU usage is the delta between two refreshes.
        sys.refresh_cpu_usage();
        std::thread::sleep(cpu_sample_interval);
        sys.refresh_cpu_usage();
        let usage = f64::from(sys.global_cpu_usage());

        SystemLoad {
            mem_available: sys.available_memory(),
            cpu_idle_percent: (100.0 - usage).clamp(0.0, 100.0),
            client_number,
        }
    }
}

/// Reports fixed memory and CPU figures. Useful for embedding and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedProbe {
    pub mem_available: u64,
    pub cpu_idle_percent: f64,
}

impl LoadProbe for FixedProbe {
    fn sample(&self, _cpu_sample_interval: Duration, client_number: usize) -> SystemLoad {
        SystemLoad {
            mem_available: self.mem_available,
            cpu_idle_percent: self.cpu_idle_percent,
            client_number,
        }
    }
}
