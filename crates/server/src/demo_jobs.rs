//! Built-in jobs registered under `jobs.demo`.
//!
//! `{"ident": "x", "func": "demo.echo", "echo": "hi"}` runs [`echo`].

use std::thread;
use std::time::Duration;

use serde_json::Value;
use wsjobd_core::{Job, JobFailure, JobModule};

pub const MODULE_PATH: &str = "jobs.demo";

pub fn module() -> JobModule {
    JobModule::new()
        .with_fn("echo", echo)
        .with_fn("normal", normal)
        .with_fn("loop_10", loop_10)
        .with_fn("progress_key", progress_key)
        .with_fn("worker_exception", worker_exception)
}

/// Copy `echo` into `result`, then stay alive for `sleep_time` seconds.
pub fn echo(job: &Job) -> Result<(), JobFailure> {
    let echo = job.get("echo").unwrap_or(Value::Null);
    job.set("result", echo);
    job.notify_progress();

    let secs = job.get("sleep_time").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let pause = Duration::try_from_secs_f64(secs)
        .map_err(|e| JobFailure::new(format!("invalid sleep_time: {e}")))?;
    thread::sleep(pause);
    Ok(())
}

pub fn normal(job: &Job) -> Result<(), JobFailure> {
    job.set("result", "foo");
    Ok(())
}

/// Count `n` from 0 to 9, one step per second.
pub fn loop_10(job: &Job) -> Result<(), JobFailure> {
    for n in 0..10 {
        job.set("n", n);
        thread::sleep(Duration::from_secs(1));
    }
    Ok(())
}

pub fn progress_key(job: &Job) -> Result<(), JobFailure> {
    job.set("foo", "80%");
    thread::sleep(Duration::from_secs(1));
    Ok(())
}

pub fn worker_exception(_job: &Job) -> Result<(), JobFailure> {
    Err(JobFailure::new("worker raised on purpose"))
}
