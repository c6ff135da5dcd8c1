use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fleet_core::protocol::{
    BenchmarkRequest, RunRequest, SimulationRequest, SimulatorRequest, SuiteRequest,
};
use fleet_core::{RunResult, Trace, TraceStream, WorkerApi};
use http_body_util::{BodyExt as _, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::{
    CONTENT_TYPE_JSON, Error, LineDecoder, PATH_BENCHMARK_RUN, PATH_BENCHMARK_SETUP,
    PATH_BENCHMARK_TEARDOWN, PATH_HEALTH, PATH_SIMULATION_SETUP, PATH_SIMULATION_TEARDOWN,
    PATH_SIMULATOR_SETUP, PATH_SIMULATOR_START, PATH_SIMULATOR_STOP, PATH_SIMULATOR_TEARDOWN,
    PATH_SUITE_SETUP, PATH_SUITE_TEARDOWN, PATH_WORKER_SETUP, PATH_WORKER_TEARDOWN, Result,
};

#[derive(Debug, Clone)]
pub struct WorkerClientConfig {
    pub connect_timeout: Option<Duration>,
    /// Extra attempts when the connection could not be established. A request
    /// that reached the worker is never sent twice.
    pub connect_retries: u32,
    pub retry_delay: Duration,
}

impl Default for WorkerClientConfig {
    fn default() -> Self {
        // An unreachable worker should fail in seconds, not after the OS connect timeout.
        Self {
            connect_timeout: Some(Duration::from_secs(3)),
            connect_retries: 3,
            retry_delay: Duration::from_millis(200),
        }
    }
}

/// [`WorkerApi`] over the HTTP control plane of a remote worker.
#[derive(Debug, Clone)]
pub struct WorkerClient {
    inner: Client<HttpConnector, Full<Bytes>>,
    base_url: String,
    config: WorkerClientConfig,
}

impl WorkerClient {
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self::with_config(addr, WorkerClientConfig::default())
    }

    #[must_use]
    pub fn with_config(addr: SocketAddr, config: WorkerClientConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(config.connect_timeout);
        connector.set_nodelay(true);
        let inner = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            inner,
            base_url: format!("http://{addr}"),
            config,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether the worker answers its health check.
    pub async fn health(&self) -> Result<()> {
        let res = self.send(Method::GET, PATH_HEALTH, Bytes::new()).await?;
        let (parts, body) = res.into_parts();
        let body = body.collect().await?.to_bytes();
        if parts.status.is_success() {
            Ok(())
        } else {
            Err(Error::Status {
                status: parts.status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            })
        }
    }

    /// Polls the health endpoint until it succeeds or `timeout` expires.
    pub async fn wait_ready(&self, timeout: Duration, poll: Duration) -> Result<()> {
        let poll = async {
            loop {
                match self.health().await {
                    Ok(()) => return,
                    Err(err) => {
                        tracing::trace!(url = %self.base_url, error = %err, "worker not ready");
                        tokio::time::sleep(poll).await;
                    }
                }
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| Error::Timeout(timeout))
    }

    async fn send(&self, method: Method, path: &str, body: Bytes) -> Result<Response<Incoming>> {
        let uri: hyper::Uri = format!("{}{path}", self.base_url)
            .parse()
            .map_err(|_| Error::InvalidAddress(self.base_url.clone()))?;

        let mut attempt = 0;
        loop {
            let req = Request::builder()
                .method(method.clone())
                .uri(uri.clone())
                .header(http::header::CONTENT_TYPE, CONTENT_TYPE_JSON)
                .body(Full::new(body.clone()))?;

            match self.inner.request(req).await {
                Ok(res) => return Ok(res),
                Err(err) if err.is_connect() && attempt < self.config.connect_retries => {
                    attempt += 1;
                    tracing::debug!(
                        url = %self.base_url,
                        path,
                        attempt,
                        error = %err,
                        "worker connect failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn call<Req, Res>(&self, path: &str, req: &Req) -> fleet_core::Result<Res>
    where
        Req: Serialize + Sync,
        Res: DeserializeOwned,
    {
        let body = serde_json::to_vec(req).map_err(Error::from)?;
        let res = self.send(Method::POST, path, Bytes::from(body)).await?;
        let (parts, body) = res.into_parts();
        let body = body.collect().await.map_err(Error::from)?.to_bytes();
        if !parts.status.is_success() {
            return Err(remote_error(parts.status.as_u16(), &body));
        }
        Ok(serde_json::from_slice(&body).map_err(Error::from)?)
    }
}

/// Decodes the worker's error body, falling back to a transport error.
fn remote_error(status: u16, body: &[u8]) -> fleet_core::Error {
    serde_json::from_slice::<fleet_core::Error>(body).unwrap_or_else(|_| {
        Error::Status {
            status,
            body: String::from_utf8_lossy(body).into_owned(),
        }
        .into()
    })
}

/// Forwards NDJSON traces from a response body until the body ends.
async fn relay_traces(mut body: Incoming, tx: mpsc::UnboundedSender<Trace>) {
    let mut decoder = LineDecoder::new();
    while let Some(frame) = body.frame().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                let err = Error::from(err);
                tracing::warn!(kind = %err.transport_error_kind(), error = %err, "trace stream broke");
                return;
            }
        };
        let Ok(chunk) = frame.into_data() else {
            continue;
        };
        decoder.extend(&chunk);
        while let Some(record) = decoder.next_record::<Trace>() {
            match record {
                Ok(trace) => {
                    if tx.send(trace).is_err() {
                        return;
                    }
                }
                Err(err) => tracing::warn!(error = %err, "skipping malformed trace"),
            }
        }
    }
    if decoder.remaining() > 0 {
        tracing::warn!(bytes = decoder.remaining(), "trace stream ended mid-record");
    }
}

#[async_trait]
impl WorkerApi for WorkerClient {
    async fn setup_suite(&self, req: SuiteRequest) -> fleet_core::Result<()> {
        self.call(PATH_SUITE_SETUP, &req).await
    }

    async fn teardown_suite(&self, req: SuiteRequest) -> fleet_core::Result<()> {
        self.call(PATH_SUITE_TEARDOWN, &req).await
    }

    async fn setup_worker(&self, req: SuiteRequest) -> fleet_core::Result<()> {
        self.call(PATH_WORKER_SETUP, &req).await
    }

    async fn teardown_worker(&self, req: SuiteRequest) -> fleet_core::Result<()> {
        self.call(PATH_WORKER_TEARDOWN, &req).await
    }

    async fn setup_benchmark(&self, req: BenchmarkRequest) -> fleet_core::Result<()> {
        self.call(PATH_BENCHMARK_SETUP, &req).await
    }

    async fn teardown_benchmark(&self, req: BenchmarkRequest) -> fleet_core::Result<()> {
        self.call(PATH_BENCHMARK_TEARDOWN, &req).await
    }

    async fn run_benchmark(&self, req: RunRequest) -> fleet_core::Result<RunResult> {
        self.call(PATH_BENCHMARK_RUN, &req).await
    }

    async fn setup_simulation(&self, req: SimulationRequest) -> fleet_core::Result<()> {
        self.call(PATH_SIMULATION_SETUP, &req).await
    }

    async fn teardown_simulation(&self, req: SimulationRequest) -> fleet_core::Result<()> {
        self.call(PATH_SIMULATION_TEARDOWN, &req).await
    }

    async fn setup_simulator(&self, req: SimulatorRequest) -> fleet_core::Result<()> {
        self.call(PATH_SIMULATOR_SETUP, &req).await
    }

    async fn teardown_simulator(&self, req: SimulationRequest) -> fleet_core::Result<()> {
        self.call(PATH_SIMULATOR_TEARDOWN, &req).await
    }

    async fn start_simulator(&self, req: SimulationRequest) -> fleet_core::Result<TraceStream> {
        let body = serde_json::to_vec(&req).map_err(Error::from)?;
        let res = self
            .send(Method::POST, PATH_SIMULATOR_START, Bytes::from(body))
            .await?;
        let (parts, body) = res.into_parts();
        if !parts.status.is_success() {
            let body = body.collect().await.map_err(Error::from)?.to_bytes();
            return Err(remote_error(parts.status.as_u16(), &body));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(relay_traces(body, tx));
        Ok(rx)
    }

    async fn stop_simulator(&self, req: SimulationRequest) -> fleet_core::Result<()> {
        self.call(PATH_SIMULATOR_STOP, &req).await
    }
}
