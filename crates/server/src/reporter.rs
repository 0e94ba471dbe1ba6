//! Periodic progress reports from one job to one connection.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use wsjobd_core::{Job, ProgressOptions};

use crate::connection::Connection;
use crate::state::LoadSampler;

/// Reports still sent once the job has ended, before the connection closes.
pub const FINAL_REPORTS: u32 = 10;

pub struct Reporter {
    pub job: Arc<Job>,
    pub conn: Arc<Connection>,
    pub options: ProgressOptions,
    pub sampler: LoadSampler,
    /// CPU sample interval when `system_load` should be attached.
    pub system_load: Option<Duration>,
}

impl Reporter {
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let ident = self.job.ident().to_string();
        let conn_id = self.conn.id();
        let mut signal = self.job.subscribe();
        let mut remaining = FINAL_REPORTS;

        loop {
            if self.job.is_finished() {
                if remaining == FINAL_REPORTS {
                    info!(
                        ident = %ident,
                        conn = conn_id,
                        error = ?self.job.error(),
                        "job ended, sending final reports"
                    );
                }
                if remaining == 0 {
                    debug!(ident = %ident, conn = conn_id, "final reports sent, closing");
                    self.conn.close();
                    break;
                }
                remaining -= 1;
            }

            let mut report = self.job.project(self.options.key.as_deref());
            if let (Some(interval), Value::Object(fields)) = (self.system_load, &mut report) {
                match self.sampler.sample(interval).await {
                    Ok(load) => {
                        fields.insert("system_load".into(), serde_json::json!(load));
                    }
                    Err(e) => {
                        error!(
                            ident = %ident,
                            conn = conn_id,
                            error = %e,
                            "failed to sample system load"
                        );
                        self.conn.close();
                        break;
                    }
                }
            }

            let text = match serde_json::to_string(&report) {
                Ok(text) => text,
                Err(e) => {
                    error!(ident = %ident, conn = conn_id, error = %e, "failed to encode progress");
                    self.conn.close();
                    break;
                }
            };
            debug!(ident = %ident, conn = conn_id, progress = %text, "sending progress");
            if self.conn.send(text).await.is_err() {
                info!(ident = %ident, conn = conn_id, "client has closed the connection");
                break;
            }

            // Woken early by job progress or completion; otherwise one interval.
            let _ = tokio::time::timeout(self.options.interval, signal.changed()).await;
        }
    }
}
