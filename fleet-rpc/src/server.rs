use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fleet_core::WorkerApi;
use fleet_core::protocol::{
    BenchmarkRequest, RunRequest, SimulationRequest, SimulatorRequest, SuiteRequest,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    CONTENT_TYPE_JSON, CONTENT_TYPE_NDJSON, PATH_BENCHMARK_RUN, PATH_BENCHMARK_SETUP,
    PATH_BENCHMARK_TEARDOWN, PATH_HEALTH, PATH_SIMULATION_SETUP, PATH_SIMULATION_TEARDOWN,
    PATH_SIMULATOR_SETUP, PATH_SIMULATOR_START, PATH_SIMULATOR_STOP, PATH_SIMULATOR_TEARDOWN,
    PATH_SUITE_SETUP, PATH_SUITE_TEARDOWN, PATH_WORKER_SETUP, PATH_WORKER_TEARDOWN,
};

type Api = Arc<dyn WorkerApi>;

/// A worker-side error on its way back to the coordinator.
struct Failure(fleet_core::Error);

impl From<fleet_core::Error> for Failure {
    fn from(err: fleet_core::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        use fleet_core::Error as E;
        let status = match &self.0 {
            E::NotFound { .. } => StatusCode::NOT_FOUND,
            E::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            E::InvalidState(_) => StatusCode::CONFLICT,
            E::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::debug!(status = status.as_u16(), error = %self.0, "rpc failed");
        match serde_json::to_vec(&self.0) {
            Ok(body) => (
                status,
                [(header::CONTENT_TYPE, CONTENT_TYPE_JSON)],
                Bytes::from(body),
            )
                .into_response(),
            Err(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Bytes::from_static(b"encode error"),
            )
                .into_response(),
        }
    }
}

type Reply<T> = std::result::Result<Json<T>, Failure>;

async fn handle_health() -> &'static str {
    "ok"
}

async fn handle_setup_suite(State(api): State<Api>, Json(req): Json<SuiteRequest>) -> Reply<()> {
    Ok(Json(api.setup_suite(req).await?))
}

async fn handle_teardown_suite(
    State(api): State<Api>,
    Json(req): Json<SuiteRequest>,
) -> Reply<()> {
    Ok(Json(api.teardown_suite(req).await?))
}

async fn handle_setup_worker(State(api): State<Api>, Json(req): Json<SuiteRequest>) -> Reply<()> {
    Ok(Json(api.setup_worker(req).await?))
}

async fn handle_teardown_worker(
    State(api): State<Api>,
    Json(req): Json<SuiteRequest>,
) -> Reply<()> {
    Ok(Json(api.teardown_worker(req).await?))
}

async fn handle_setup_benchmark(
    State(api): State<Api>,
    Json(req): Json<BenchmarkRequest>,
) -> Reply<()> {
    Ok(Json(api.setup_benchmark(req).await?))
}

async fn handle_teardown_benchmark(
    State(api): State<Api>,
    Json(req): Json<BenchmarkRequest>,
) -> Reply<()> {
    Ok(Json(api.teardown_benchmark(req).await?))
}

async fn handle_run_benchmark(
    State(api): State<Api>,
    Json(req): Json<RunRequest>,
) -> Reply<fleet_core::RunResult> {
    Ok(Json(api.run_benchmark(req).await?))
}

async fn handle_setup_simulation(
    State(api): State<Api>,
    Json(req): Json<SimulationRequest>,
) -> Reply<()> {
    Ok(Json(api.setup_simulation(req).await?))
}

async fn handle_teardown_simulation(
    State(api): State<Api>,
    Json(req): Json<SimulationRequest>,
) -> Reply<()> {
    Ok(Json(api.teardown_simulation(req).await?))
}

async fn handle_setup_simulator(
    State(api): State<Api>,
    Json(req): Json<SimulatorRequest>,
) -> Reply<()> {
    Ok(Json(api.setup_simulator(req).await?))
}

async fn handle_teardown_simulator(
    State(api): State<Api>,
    Json(req): Json<SimulationRequest>,
) -> Reply<()> {
    Ok(Json(api.teardown_simulator(req).await?))
}

async fn handle_stop_simulator(
    State(api): State<Api>,
    Json(req): Json<SimulationRequest>,
) -> Reply<()> {
    Ok(Json(api.stop_simulator(req).await?))
}

async fn handle_start_simulator(
    State(api): State<Api>,
    Json(req): Json<SimulationRequest>,
) -> std::result::Result<Response, Failure> {
    let traces = api.start_simulator(req).await?;
    let lines = UnboundedReceiverStream::new(traces).map(|trace| {
        let mut line = serde_json::to_vec(&trace)?;
        line.push(b'\n');
        Ok::<_, serde_json::Error>(Bytes::from(line))
    });
    Ok((
        [(header::CONTENT_TYPE, CONTENT_TYPE_NDJSON)],
        Body::from_stream(lines),
    )
        .into_response())
}

pub fn router(api: Arc<dyn WorkerApi>) -> Router {
    Router::new()
        .route(PATH_HEALTH, get(handle_health))
        .route(PATH_SUITE_SETUP, post(handle_setup_suite))
        .route(PATH_SUITE_TEARDOWN, post(handle_teardown_suite))
        .route(PATH_WORKER_SETUP, post(handle_setup_worker))
        .route(PATH_WORKER_TEARDOWN, post(handle_teardown_worker))
        .route(PATH_BENCHMARK_SETUP, post(handle_setup_benchmark))
        .route(PATH_BENCHMARK_TEARDOWN, post(handle_teardown_benchmark))
        .route(PATH_BENCHMARK_RUN, post(handle_run_benchmark))
        .route(PATH_SIMULATION_SETUP, post(handle_setup_simulation))
        .route(PATH_SIMULATION_TEARDOWN, post(handle_teardown_simulation))
        .route(PATH_SIMULATOR_SETUP, post(handle_setup_simulator))
        .route(PATH_SIMULATOR_TEARDOWN, post(handle_teardown_simulator))
        .route(PATH_SIMULATOR_START, post(handle_start_simulator))
        .route(PATH_SIMULATOR_STOP, post(handle_stop_simulator))
        .with_state(api)
}

/// Serves a [`WorkerApi`] on a TCP listener until shut down.
pub struct WorkerServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl WorkerServer {
    /// Binds `addr` (port `0` picks a free one) and starts serving in the background.
    pub async fn start(addr: SocketAddr, api: Arc<dyn WorkerApi>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let app = router(api);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = serve.await {
                tracing::error!(error = %err, "worker server failed");
            }
        });
        tracing::info!(%addr, "worker server listening");

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stops accepting connections and waits for in-flight requests to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for WorkerServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
