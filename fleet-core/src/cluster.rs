mod local;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::{ExitCode, Result, WorkerApi};

pub use local::LocalCluster;

/// Raw log output of a job's worker processes.
pub type LogStream = Box<dyn AsyncRead + Send + Unpin>;

/// Final status of a job's worker processes as seen by the provisioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub message: String,
    pub code: i32,
}

impl JobStatus {
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from_status(self.code)
    }
}

/// Stands up and tears down the worker processes of a job.
#[async_trait]
pub trait ClusterProvisioner: Send + Sync {
    async fn deploy_workers(
        &self,
        job_id: &str,
        image: &str,
        env: &BTreeMap<String, String>,
        count: usize,
    ) -> Result<()>;

    async fn await_ready(&self, job_id: &str) -> Result<()>;

    async fn stream_logs(&self, job_id: &str) -> Result<LogStream>;

    async fn exit_status(&self, job_id: &str) -> Result<JobStatus>;

    async fn tear_down(&self, job_id: &str) -> Result<()>;
}

/// Opens control-plane handles to the workers of a deployed job, in worker order.
#[async_trait]
pub trait WorkerConnector: Send + Sync {
    async fn connect(&self, job_id: &str, count: usize) -> Result<Vec<Arc<dyn WorkerApi>>>;
}
