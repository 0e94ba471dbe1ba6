use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wsjobd_core::{ConnectionId, JobCatalog, JobError, LoadProbe, SessionRegistry, SystemLoad};

use crate::connection::ClientCounter;
use crate::pool::DispatchPool;

/// Samples system load off the async runtime.
#[derive(Clone)]
pub struct LoadSampler {
    probe: Arc<dyn LoadProbe>,
    clients: ClientCounter,
}

impl LoadSampler {
    pub fn new(probe: Arc<dyn LoadProbe>, clients: ClientCounter) -> Self {
        Self { probe, clients }
    }

    /// Client count is read when sampling starts, so it includes the caller.
    pub async fn sample(&self, cpu_sample_interval: Duration) -> Result<SystemLoad, JobError> {
        let probe = Arc::clone(&self.probe);
        let client_number = self.clients.current();
        tokio::task::spawn_blocking(move || probe.sample(cpu_sample_interval, client_number))
            .await
            .map_err(|e| JobError::Internal(format!("system load sampling failed: {e}")))
    }
}

/// Shared daemon state.
#[derive(Clone)]
pub struct AppState {
    /// Live jobs, keyed by ident.
    pub registry: SessionRegistry,
    /// Job modules requests can resolve `func` against.
    pub catalog: Arc<JobCatalog>,
    /// Open WebSocket connections.
    pub clients: ClientCounter,
    pub sampler: LoadSampler,
    pub pool: DispatchPool,
    next_connection_id: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(catalog: JobCatalog, probe: Arc<dyn LoadProbe>, dispatch_workers: usize) -> Self {
        let clients = ClientCounter::new();
        Self {
            registry: SessionRegistry::new(),
            catalog: Arc::new(catalog),
            sampler: LoadSampler::new(probe, clients.clone()),
            clients,
            pool: DispatchPool::new(dispatch_workers),
            next_connection_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }
}
