use std::collections::BTreeMap;
use std::sync::Arc;

use fleet_core::{ExitCode, Worker, WorkerBootstrap};
use fleet_rpc::WorkerServer;

use crate::run_error::RunError;
use crate::suites;

/// Printed on stdout once the control plane accepts connections.
pub(crate) const READY_PREFIX: &str = "FLEET_ADDR=";

/// Serves the worker control plane until interrupted.
pub(crate) async fn serve() -> Result<ExitCode, RunError> {
    let vars: BTreeMap<String, String> = std::env::vars().collect();
    let boot = WorkerBootstrap::from_env(&vars).map_err(|e| RunError::InvalidInput(e.into()))?;

    let registry = Arc::new(suites::registry());
    let worker = Worker::scoped(registry, boot.index, boot.scope.clone())
        .map_err(|e| RunError::InvalidInput(e.into()))?;
    let worker = Arc::new(worker);
    let server = WorkerServer::start(boot.addr, worker)
        .await
        .map_err(|e| RunError::RuntimeError(anyhow::Error::new(e).context("bind worker server")))?;

    tracing::info!(
        job = %boot.job_id,
        worker = boot.index,
        scope = ?boot.scope,
        addr = %server.addr(),
        "worker ready"
    );
    println!("{READY_PREFIX}{}", server.addr());

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to wait for ctrl-c");
    }
    tracing::info!(job = %boot.job_id, worker = boot.index, "worker shutting down");
    server.shutdown().await;
    Ok(ExitCode::Success)
}
