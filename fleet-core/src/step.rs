use std::future::Future;

use tokio::time::Instant;

use crate::Result;

/// A named lifecycle step of a job, logged when it starts and when it ends.
#[derive(Debug)]
pub struct Step {
    job: String,
    name: String,
    started: Instant,
}

impl Step {
    pub fn start(job: &str, name: impl Into<String>) -> Self {
        let name = name.into();
        tracing::info!(job, step = %name, "step started");
        Self {
            job: job.to_string(),
            name,
            started: Instant::now(),
        }
    }

    pub fn complete(self) {
        tracing::info!(
            job = %self.job,
            step = %self.name,
            elapsed = ?self.started.elapsed(),
            "step completed"
        );
    }

    pub fn fail(self, err: &dyn std::fmt::Display) {
        tracing::error!(
            job = %self.job,
            step = %self.name,
            elapsed = ?self.started.elapsed(),
            error = %err,
            "step failed"
        );
    }

    /// Runs `fut` as one step.
    pub async fn run<T, F>(job: &str, name: impl Into<String>, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let step = Self::start(job, name);
        let res = fut.await;
        match &res {
            Ok(_) => step.complete(),
            Err(err) => step.fail(err),
        }
        res
    }
}
