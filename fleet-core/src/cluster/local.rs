use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{ClusterProvisioner, JobStatus, LogStream, WorkerConnector};
use crate::{Error, JobScope, Registry, Result, Worker, WorkerApi};

struct Deployment {
    workers: Vec<Arc<Worker>>,
    log: Vec<u8>,
}

/// Runs every worker of a job in the current process.
///
/// Useful for development runs and tests: no network, no child processes, the
/// control plane is a direct call into [`Worker`].
pub struct LocalCluster {
    registry: Arc<Registry>,
    jobs: Mutex<HashMap<String, Deployment>>,
}

impl LocalCluster {
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Jobs currently deployed.
    #[must_use]
    pub fn jobs(&self) -> Vec<String> {
        let mut jobs: Vec<_> = self.lock().keys().cloned().collect();
        jobs.sort();
        jobs
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Deployment>> {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn missing(job_id: &str) -> Error {
        Error::not_found("job", job_id)
    }
}

#[async_trait]
impl ClusterProvisioner for LocalCluster {
    async fn deploy_workers(
        &self,
        job_id: &str,
        image: &str,
        env: &BTreeMap<String, String>,
        count: usize,
    ) -> Result<()> {
        if count == 0 {
            return Err(Error::provisioning("worker count must be positive"));
        }
        let mut jobs = self.lock();
        if jobs.contains_key(job_id) {
            return Err(Error::provisioning(format!("job `{job_id}` is already deployed")));
        }

        let scope = JobScope::from_env(env)?;
        let mut log = Vec::new();
        let workers = (0..count)
            .map(|i| {
                log.extend_from_slice(
                    format!("worker {i} of {job_id} started from `{image}` with {} env vars\n", env.len())
                        .as_bytes(),
                );
                Worker::scoped(self.registry.clone(), i, scope.clone()).map(Arc::new)
            })
            .collect::<Result<_>>()?;
        jobs.insert(job_id.to_string(), Deployment { workers, log });
        Ok(())
    }

    async fn await_ready(&self, job_id: &str) -> Result<()> {
        if self.lock().contains_key(job_id) {
            Ok(())
        } else {
            Err(Self::missing(job_id))
        }
    }

    async fn stream_logs(&self, job_id: &str) -> Result<LogStream> {
        let jobs = self.lock();
        let deployment = jobs.get(job_id).ok_or_else(|| Self::missing(job_id))?;
        Ok(Box::new(Cursor::new(deployment.log.clone())))
    }

    async fn exit_status(&self, job_id: &str) -> Result<JobStatus> {
        if !self.lock().contains_key(job_id) {
            return Err(Self::missing(job_id));
        }
        Ok(JobStatus {
            message: "completed".to_string(),
            code: 0,
        })
    }

    async fn tear_down(&self, job_id: &str) -> Result<()> {
        self.lock()
            .remove(job_id)
            .map(|_| ())
            .ok_or_else(|| Self::missing(job_id))
    }
}

#[async_trait]
impl WorkerConnector for LocalCluster {
    async fn connect(&self, job_id: &str, count: usize) -> Result<Vec<Arc<dyn WorkerApi>>> {
        let jobs = self.lock();
        let deployment = jobs.get(job_id).ok_or_else(|| Self::missing(job_id))?;
        if deployment.workers.len() != count {
            return Err(Error::provisioning(format!(
                "job `{job_id}` has {} workers, expected {count}",
                deployment.workers.len()
            )));
        }
        Ok(deployment
            .workers
            .iter()
            .map(|w| w.clone() as Arc<dyn WorkerApi>)
            .collect())
    }
}
