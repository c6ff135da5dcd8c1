use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fleet_core::{WorkerApi, WorkerConnector};

use crate::{WorkerClient, WorkerClientConfig};

/// Connects to workers whose addresses were registered per job.
#[derive(Debug, Default)]
pub struct StaticConnector {
    config: WorkerClientConfig,
    jobs: Mutex<HashMap<String, Vec<SocketAddr>>>,
}

impl StaticConnector {
    #[must_use]
    pub fn new(config: WorkerClientConfig) -> Self {
        Self {
            config,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Registers the workers of `job_id`, worker `i` listening on `addrs[i]`.
    pub fn insert(&self, job_id: &str, addrs: Vec<SocketAddr>) {
        self.lock().insert(job_id.to_string(), addrs);
    }

    pub fn remove(&self, job_id: &str) -> Option<Vec<SocketAddr>> {
        self.lock().remove(job_id)
    }

    #[must_use]
    pub fn addrs(&self, job_id: &str) -> Option<Vec<SocketAddr>> {
        self.lock().get(job_id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<SocketAddr>>> {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl WorkerConnector for StaticConnector {
    async fn connect(
        &self,
        job_id: &str,
        count: usize,
    ) -> fleet_core::Result<Vec<Arc<dyn WorkerApi>>> {
        let addrs = self
            .addrs(job_id)
            .ok_or_else(|| fleet_core::Error::not_found("job", job_id))?;
        if addrs.len() != count {
            return Err(fleet_core::Error::provisioning(format!(
                "job `{job_id}` has {} workers, expected {count}",
                addrs.len()
            )));
        }

        let mut workers: Vec<Arc<dyn WorkerApi>> = Vec::with_capacity(count);
        for addr in addrs {
            let client = WorkerClient::with_config(addr, self.config.clone());
            client.health().await?;
            tracing::debug!(job = job_id, url = client.base_url(), "connected to worker");
            workers.push(Arc::new(client));
        }
        Ok(workers)
    }
}
