//! Provisions each worker as a `fleet worker` child process on a loopback port.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleet_core::{
    ClusterProvisioner, Error, ExitCode, JobStatus, LogStream, Result, Role, WorkerApi,
    WorkerConnector, env,
};
use fleet_rpc::{StaticConnector, WorkerClientConfig};
use tokio::io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader, DuplexStream};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::worker::READY_PREFIX;

const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);
const LOG_BUFFER: usize = 64 * 1024;

struct Spawned {
    index: usize,
    child: Child,
    stdout: Option<BufReader<ChildStdout>>,
}

/// Workers of one job. Each job has its own lock so a slow job never stalls another.
type Job = Arc<Mutex<Vec<Spawned>>>;

pub(crate) struct ProcessProvisioner {
    exe: PathBuf,
    ready_timeout: Duration,
    connector: StaticConnector,
    jobs: std::sync::Mutex<HashMap<String, Job>>,
}

impl ProcessProvisioner {
    pub(crate) fn new(exe: PathBuf) -> Self {
        Self {
            exe,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            connector: StaticConnector::new(WorkerClientConfig::default()),
            jobs: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Job>> {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn job(&self, job_id: &str) -> Result<Job> {
        self.lock()
            .get(job_id)
            .cloned()
            .ok_or_else(|| Error::not_found("job", job_id))
    }

    #[cfg(test)]
    fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    fn spawn(
        &self,
        job_id: &str,
        image: &str,
        vars: &BTreeMap<String, String>,
        index: usize,
    ) -> Result<Spawned> {
        let mut cmd = Command::new(&self.exe);
        cmd.arg("worker")
            .envs(vars)
            .env(env::ROLE, Role::Worker.to_string())
            .env(env::JOB, job_id)
            .env(env::IMAGE, image)
            .env(env::WORKER, index.to_string())
            .env(env::ADDR, "127.0.0.1:0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            Error::provisioning(format!("spawn worker {index} from `{}`: {err}", self.exe.display()))
        })?;
        let stdout = child.stdout.take().map(BufReader::new);
        tracing::debug!(job = job_id, worker = index, pid = ?child.id(), "worker spawned");
        Ok(Spawned {
            index,
            child,
            stdout,
        })
    }

    async fn read_addr(job_id: &str, w: &mut Spawned) -> Result<SocketAddr> {
        let Some(stdout) = w.stdout.as_mut() else {
            return Err(Error::provisioning(format!("worker {} has no stdout", w.index)));
        };
        let mut line = String::new();
        loop {
            line.clear();
            let n = stdout
                .read_line(&mut line)
                .await
                .map_err(|err| Error::provisioning(format!("read worker {}: {err}", w.index)))?;
            if n == 0 {
                return Err(Error::provisioning(format!(
                    "worker {} exited before becoming ready",
                    w.index
                )));
            }
            let line = line.trim_end();
            if let Some(addr) = line.strip_prefix(READY_PREFIX) {
                return addr.parse().map_err(|_| {
                    Error::provisioning(format!("worker {} reported bad address `{addr}`", w.index))
                });
            }
            tracing::info!(job = job_id, worker = w.index, "{line}");
        }
    }
}

#[async_trait]
impl ClusterProvisioner for ProcessProvisioner {
    async fn deploy_workers(
        &self,
        job_id: &str,
        image: &str,
        vars: &BTreeMap<String, String>,
        count: usize,
    ) -> Result<()> {
        if count == 0 {
            return Err(Error::provisioning("worker count must be positive"));
        }
        let mut jobs = self.lock();
        if jobs.contains_key(job_id) {
            return Err(Error::provisioning(format!("job `{job_id}` is already deployed")));
        }

        // Children spawned before a failure are killed when `spawned` drops.
        let spawned = (0..count)
            .map(|i| self.spawn(job_id, image, vars, i))
            .collect::<Result<Vec<_>>>()?;
        jobs.insert(job_id.to_string(), Arc::new(Mutex::new(spawned)));
        Ok(())
    }

    async fn await_ready(&self, job_id: &str) -> Result<()> {
        let job = self.job(job_id)?;
        let mut workers = job.lock().await;

        let limit = self.ready_timeout;
        let addrs = tokio::time::timeout(limit, async {
            let mut addrs = Vec::with_capacity(workers.len());
            for w in workers.iter_mut() {
                addrs.push(Self::read_addr(job_id, w).await?);
            }
            Ok::<_, Error>(addrs)
        })
        .await
        .map_err(|_| Error::Timeout(limit))??;

        tracing::debug!(job = job_id, ?addrs, "workers ready");
        self.connector.insert(job_id, addrs);
        Ok(())
    }

    async fn stream_logs(&self, job_id: &str) -> Result<LogStream> {
        let job = self.job(job_id)?;
        let mut workers = job.lock().await;

        let (tx, rx) = tokio::io::duplex(LOG_BUFFER);
        let tx = Arc::new(Mutex::new(tx));
        for w in workers.iter_mut() {
            if let Some(stdout) = w.stdout.take() {
                tokio::spawn(forward_lines(w.index, stdout, tx.clone()));
            }
        }
        Ok(Box::new(rx))
    }

    async fn exit_status(&self, job_id: &str) -> Result<JobStatus> {
        let job = self.job(job_id)?;
        let mut workers = job.lock().await;

        let mut code = 0;
        let mut failed = Vec::new();
        for w in workers.iter_mut() {
            match w.child.try_wait() {
                Ok(Some(status)) if !status.success() => {
                    // Killed by a signal: no code.
                    let c = status.code().unwrap_or(-1);
                    failed.push(format!("worker {} exited with {status}", w.index));
                    code = worse(code, c);
                }
                Ok(_) => {}
                Err(err) => failed.push(format!("worker {}: {err}", w.index)),
            }
        }

        let message = if failed.is_empty() {
            "running".to_string()
        } else {
            failed.join("; ")
        };
        Ok(JobStatus { message, code })
    }

    async fn tear_down(&self, job_id: &str) -> Result<()> {
        let job = self
            .lock()
            .remove(job_id)
            .ok_or_else(|| Error::not_found("job", job_id))?;
        self.connector.remove(job_id);

        for w in job.lock().await.iter_mut() {
            if let Err(err) = w.child.kill().await {
                tracing::debug!(job = job_id, worker = w.index, error = %err, "worker already gone");
            }
        }
        tracing::debug!(job = job_id, "workers stopped");
        Ok(())
    }
}

#[async_trait]
impl WorkerConnector for ProcessProvisioner {
    async fn connect(&self, job_id: &str, count: usize) -> Result<Vec<Arc<dyn WorkerApi>>> {
        self.connector.connect(job_id, count).await
    }
}

/// Keeps the status whose exit code is more severe; ties keep the higher raw code.
fn worse(current: i32, next: i32) -> i32 {
    let severity = |c: i32| (ExitCode::from_status(c), c);
    if severity(next) > severity(current) {
        next
    } else {
        current
    }
}

async fn forward_lines(
    index: usize,
    stdout: BufReader<ChildStdout>,
    sink: Arc<Mutex<DuplexStream>>,
) {
    let mut lines = stdout.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut out = sink.lock().await;
        if out
            .write_all(format!("[worker {index}] {line}\n").as_bytes())
            .await
            .is_err()
        {
            break;
        }
    }
}
