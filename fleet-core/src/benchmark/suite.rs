use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use fleet_value::Value;

use crate::{Args, BoxFuture, Params};

/// Scope of suite-level and worker-level hooks.
#[derive(Debug, Clone)]
pub struct SuiteContext {
    pub suite: String,
    pub worker: usize,
    pub args: Args,
}

/// Scope of one benchmark on one worker.
#[derive(Debug, Clone)]
pub struct BenchmarkContext {
    pub suite: String,
    pub benchmark: String,
    pub worker: usize,
    pub args: Args,
}

/// Lifecycle hooks of a benchmark suite. Every hook defaults to a no-op.
///
/// `setup_suite`/`teardown_suite` run once per job on worker 0,
/// `setup_worker`/`teardown_worker` once per worker process, and the benchmark
/// hooks once per benchmark on every worker. `before_run`/`after_run` bracket
/// every run; `after_run` is called even when the run failed.
#[async_trait]
pub trait BenchmarkSuite: Send + Sync + 'static {
    async fn setup_suite(&self, _ctx: &SuiteContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn teardown_suite(&self, _ctx: &SuiteContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn setup_worker(&self, _ctx: &SuiteContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn teardown_worker(&self, _ctx: &SuiteContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn setup_benchmark(&self, _ctx: &BenchmarkContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn teardown_benchmark(&self, _ctx: &BenchmarkContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn before_run(&self, _ctx: &BenchmarkContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_run(&self, _ctx: &BenchmarkContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// One benchmark invocation bound to a client connection.
pub type CallFn = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Opens a client and returns the call bound to it.
pub type ConnectFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<CallFn>> + Send + Sync>;

/// What a benchmark runs: an argument source and a way to open clients.
pub struct Workload {
    pub params: Params,
    pub connect: ConnectFn,
}

impl Workload {
    /// A workload without per-client state.
    pub fn new<F, Fut>(params: Params, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let call: CallFn = Arc::new(move |args| -> BoxFuture<'static, _> { Box::pin(f(args)) });
        let connect: ConnectFn = Arc::new(move || -> BoxFuture<'static, _> {
            let call = call.clone();
            Box::pin(async move { Ok(call) })
        });
        Self { params, connect }
    }

    /// A workload where every logical client opens its own connection with `init`
    /// and `call` runs against that connection.
    pub fn with_client<C, I, IFut, F, Fut>(params: Params, init: I, call: F) -> Self
    where
        C: Send + Sync + 'static,
        I: Fn() -> IFut + Send + Sync + 'static,
        IFut: Future<Output = anyhow::Result<C>> + Send + 'static,
        F: Fn(Arc<C>, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let call = Arc::new(call);
        let connect: ConnectFn = Arc::new(move || -> BoxFuture<'static, _> {
            let opening = init();
            let call = call.clone();
            Box::pin(async move {
                let client = Arc::new(opening.await?);
                let bound: CallFn = Arc::new(move |args| -> BoxFuture<'static, _> {
                    Box::pin((*call)(client.clone(), args))
                });
                Ok(bound)
            })
        });
        Self { params, connect }
    }
}
