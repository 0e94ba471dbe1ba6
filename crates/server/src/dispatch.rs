//! Turns one inbound message into a running job or an error reply.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{error, info, warn};
use wsjobd_core::{check_load, JobError, JobRequest};

use crate::connection::Connection;
use crate::reporter::Reporter;
use crate::state::AppState;

/// Handle one raw message from `conn`.
///
/// Releases the connection's in-flight guard once the request has been set
/// up, then reports any failure back to the client.
pub async fn handle_message(state: AppState, conn: Arc<Connection>, raw: String) {
    let outcome = AssertUnwindSafe(setup_job(&state, &conn, &raw))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            Err(JobError::Internal(
                "unexpected failure while handling message".into(),
            ))
        });
    conn.finish_request();

    if let Err(err) = outcome {
        reply_error(&conn, &err).await;
    }
}

async fn setup_job(state: &AppState, conn: &Arc<Connection>, raw: &str) -> Result<(), JobError> {
    let request = JobRequest::parse(raw)?;

    if let Some(thresholds) = &request.check_load {
        let load = state.sampler.sample(request.cpu_sample_interval).await?;
        check_load(&load, thresholds)?;
    }

    let worker = state.catalog.resolve(&request.jobs_dir, &request.func)?;

    // Progress options are checked after creation, so a bad `progress`
    // field still leaves the job running.
    let progress = request.progress_options();
    let system_load = request
        .report_system_load
        .then_some(request.cpu_sample_interval);

    let JobRequest { ident, data, .. } = request;
    let job = state.registry.get_or_create(&ident, conn.id(), data, worker)?;

    let Some(options) = progress? else {
        return Ok(());
    };
    Reporter {
        job,
        conn: Arc::clone(conn),
        options,
        sampler: state.sampler.clone(),
        system_load,
    }
    .spawn();
    Ok(())
}

async fn reply_error(conn: &Connection, err: &JobError) {
    match err {
        JobError::SystemOverload(_) => {
            info!(conn = conn.id(), error = %err, "system overload");
        }
        JobError::Internal(_) | JobError::JobNotInSession(_) => {
            error!(conn = conn.id(), kind = err.kind(), error = %err, "failed to handle message");
        }
        _ if err.is_invalid_message() => {
            info!(conn = conn.id(), kind = err.kind(), error = %err, "rejected invalid message");
        }
        _ => {
            info!(conn = conn.id(), kind = err.kind(), error = %err, "rejected message");
        }
    }

    match serde_json::to_string(&err.to_reply()) {
        Ok(text) => {
            if conn.send(text).await.is_err() {
                warn!(conn = conn.id(), "connection closed before error reply was sent");
            }
        }
        Err(e) => error!(conn = conn.id(), error = %e, "failed to encode error reply"),
    }

    if err.closes_connection() {
        conn.close();
    }
}
