#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fleet_core::protocol::{
    BenchmarkRequest, RunRequest, SimulationRequest, SimulatorRequest, SuiteRequest,
};
use fleet_core::{
    Args, BenchmarkContext, BenchmarkSuite, Error, Params, RandomString, Registry, RequestMode,
    RunOptions, SimulationSuite, SimulatorSetup, Value, Worker, WorkerApi, Workload, async_trait,
};
use fleet_rpc::{StaticConnector, WorkerClient, WorkerServer};

#[derive(Clone, Default)]
struct Kv {
    setups: Arc<AtomicUsize>,
}

#[async_trait]
impl BenchmarkSuite for Kv {
    async fn setup_benchmark(&self, ctx: &BenchmarkContext) -> anyhow::Result<()> {
        anyhow::ensure!(ctx.args.get("reject").is_none(), "rejected by args");
        self.setups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Pinger;

#[async_trait]
impl SimulationSuite for Pinger {
    async fn setup_simulator(&self, sim: &mut SimulatorSetup) -> anyhow::Result<()> {
        sim.operation("ping", Duration::from_millis(10), |ctx| async move {
            ctx.record(vec![Value::from("pong")]);
            Ok(())
        })?;
        Ok(())
    }
}

async fn serve() -> (WorkerServer, Kv) {
    let kv = Kv::default();
    let mut registry = Registry::new();
    let _ = registry.suite("kv", kv.clone()).benchmark("get", |_, _| {
        Ok(Workload::new(
            Params::new().with(RandomString::new(8, 4)),
            |args| async move {
                anyhow::ensure!(args.len() == 1, "expected one argument");
                tokio::time::sleep(Duration::from_millis(1)).await;
                Ok(())
            },
        ))
    });
    registry.simulation("pinger", Pinger);

    let worker = Arc::new(Worker::new(Arc::new(registry), 0));
    let server = WorkerServer::start("127.0.0.1:0".parse().unwrap(), worker)
        .await
        .unwrap();
    (server, kv)
}

fn bench_req(args: Args) -> BenchmarkRequest {
    BenchmarkRequest {
        suite: "kv".into(),
        benchmark: "get".into(),
        args,
    }
}

#[tokio::test]
async fn benchmark_lifecycle_round_trips() {
    let (server, kv) = serve().await;
    let client = WorkerClient::new(server.addr());
    client.health().await.unwrap();

    let suite = SuiteRequest {
        suite: "kv".into(),
        args: Args::new(),
    };
    client.setup_suite(suite.clone()).await.unwrap();
    client.setup_worker(suite.clone()).await.unwrap();
    client.setup_benchmark(bench_req(Args::new())).await.unwrap();

    let result = client
        .run_benchmark(RunRequest {
            suite: "kv".into(),
            benchmark: "get".into(),
            args: Args::new(),
            options: RunOptions {
                mode: RequestMode::Requests(50),
                parallelism: 4,
                ..RunOptions::default()
            },
        })
        .await
        .unwrap();
    assert_eq!(result.requests, 50);
    assert_eq!(result.errors, 0);
    assert!(result.latency.p50 >= Duration::from_millis(1));

    client.teardown_benchmark(bench_req(Args::new())).await.unwrap();
    client.teardown_worker(suite.clone()).await.unwrap();
    client.teardown_suite(suite).await.unwrap();
    assert_eq!(kv.setups.load(Ordering::SeqCst), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn worker_errors_keep_their_variant() {
    let (server, _) = serve().await;
    let client = WorkerClient::new(server.addr());

    let err = client
        .setup_suite(SuiteRequest {
            suite: "missing".into(),
            args: Args::new(),
        })
        .await
        .unwrap_err();
    assert_eq!(err, Error::not_found("suite", "missing"));

    let err = client
        .setup_benchmark(bench_req(Args::new().with("reject", "1")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SetupFailed(ref msg) if msg.contains("rejected by args")));

    let err = client
        .run_benchmark(RunRequest {
            suite: "kv".into(),
            benchmark: "get".into(),
            args: Args::new(),
            options: RunOptions::default(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)), "{err:?}");

    server.shutdown().await;
}

#[tokio::test]
async fn simulator_traces_stream_until_stopped() {
    let (server, _) = serve().await;
    let client = WorkerClient::new(server.addr());
    let sim = SimulationRequest {
        simulation: "pinger".into(),
        args: Args::new(),
    };

    client.setup_simulation(sim.clone()).await.unwrap();
    client
        .setup_simulator(SimulatorRequest {
            simulation: "pinger".into(),
            args: Args::new(),
            rates: Default::default(),
            jitters: Default::default(),
        })
        .await
        .unwrap();
    let mut traces = client.start_simulator(sim.clone()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    client.stop_simulator(sim.clone()).await.unwrap();

    let mut ops = 0;
    let mut pongs = 0;
    while let Some(trace) = traces.recv().await {
        if trace.values == vec![Value::from("pong")] {
            pongs += 1;
        } else {
            assert_eq!(trace.values[2], Value::from("ping"));
            ops += 1;
        }
    }
    assert!(ops > 5, "only {ops} executions");
    assert_eq!(ops, pongs);

    let err = client.stop_simulator(sim.clone()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));

    client.teardown_simulator(sim.clone()).await.unwrap();
    client.teardown_simulation(sim).await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn connector_hands_out_clients_per_job() {
    let (a, _) = serve().await;
    let (b, _) = serve().await;
    let connector = StaticConnector::default();
    connector.insert("job", vec![a.addr(), b.addr()]);

    let workers = fleet_core::WorkerConnector::connect(&connector, "job", 2)
        .await
        .unwrap();
    assert_eq!(workers.len(), 2);
    for w in &workers {
        w.setup_worker(SuiteRequest {
            suite: "kv".into(),
            args: Args::new(),
        })
        .await
        .unwrap();
    }

    a.shutdown().await;
    b.shutdown().await;
}
