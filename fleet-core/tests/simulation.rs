#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fleet_core::protocol::{SimulationRequest, SimulatorRequest};
use fleet_core::{
    Error, Registry, SimulationSuite, SimulatorSetup, Trace, Value, Worker, WorkerApi,
    async_trait,
};

/// Two operations, `foo` every second and `bar` every five, doing nothing.
struct Ticker;

#[async_trait]
impl SimulationSuite for Ticker {
    async fn setup_simulator(&self, sim: &mut SimulatorSetup) -> anyhow::Result<()> {
        sim.operation_with_jitter("foo", Duration::from_secs(1), 0.01, |_| async { Ok(()) })?;
        sim.operation_with_jitter("bar", Duration::from_secs(5), 0.01, |ctx| async move {
            ctx.record(vec![Value::from("bar-extra")]);
            Ok(())
        })?;
        Ok(())
    }
}

/// Operations that take a while, tracking how many run at once.
#[derive(Default)]
struct Busy {
    global_in_flight: Arc<AtomicUsize>,
    global_max: Arc<AtomicUsize>,
    replica_max: Arc<AtomicUsize>,
}

#[async_trait]
impl SimulationSuite for Busy {
    async fn setup_simulator(&self, sim: &mut SimulatorSetup) -> anyhow::Result<()> {
        let local_in_flight = Arc::new(AtomicUsize::new(0));
        for name in ["a", "b", "c"] {
            let local = local_in_flight.clone();
            let global = self.global_in_flight.clone();
            let global_max = self.global_max.clone();
            let replica_max = self.replica_max.clone();
            sim.operation_with_jitter(name, Duration::from_millis(10), 0.5, move |_| {
                let local = local.clone();
                let global = global.clone();
                let global_max = global_max.clone();
                let replica_max = replica_max.clone();
                async move {
                    let l = local.fetch_add(1, Ordering::SeqCst) + 1;
                    let g = global.fetch_add(1, Ordering::SeqCst) + 1;
                    replica_max.fetch_max(l, Ordering::SeqCst);
                    global_max.fetch_max(g, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(7)).await;
                    global.fetch_sub(1, Ordering::SeqCst);
                    local.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })?;
        }
        Ok(())
    }
}

fn sim_req(name: &str) -> SimulationRequest {
    SimulationRequest {
        simulation: name.to_string(),
        args: Default::default(),
    }
}

fn simulator_req(name: &str) -> SimulatorRequest {
    SimulatorRequest {
        simulation: name.to_string(),
        args: Default::default(),
        rates: BTreeMap::new(),
        jitters: BTreeMap::new(),
    }
}

async fn collect(mut rx: fleet_core::TraceStream) -> Vec<Trace> {
    let mut out = Vec::new();
    while let Some(t) = rx.recv().await {
        out.push(t);
    }
    out
}

fn count_op(traces: &[Trace], op: &str) -> usize {
    traces
        .iter()
        .filter(|t| t.values.len() >= 4 && t.values[2].as_str() == Some(op))
        .count()
}

#[tokio::test(start_paused = true)]
async fn independently_rated_operations_over_twelve_seconds() {
    let mut registry = Registry::new();
    registry.simulation("ticker", Ticker);
    let worker = Worker::new(Arc::new(registry), 0);

    worker.setup_simulation(sim_req("ticker")).await.unwrap();
    worker.setup_simulator(simulator_req("ticker")).await.unwrap();
    let rx = worker.start_simulator(sim_req("ticker")).await.unwrap();
    let traces = tokio::spawn(collect(rx));

    tokio::time::sleep(Duration::from_secs(12)).await;
    worker.stop_simulator(sim_req("ticker")).await.unwrap();
    let traces = traces.await.unwrap();

    let foo = count_op(&traces, "foo");
    let bar = count_op(&traces, "bar");
    assert!((11..=12).contains(&foo), "foo ran {foo} times");
    assert_eq!(bar, 2);

    let first = traces.iter().find(|t| t.values.len() >= 4).unwrap();
    assert_eq!(first.values[0], Value::from("ticker"));
    assert_eq!(first.values[1], Value::from(0_usize));
    assert_eq!(first.values[3], Value::Bool(true));

    let extras = traces
        .iter()
        .filter(|t| t.values == vec![Value::from("bar-extra")])
        .count();
    assert_eq!(extras, 2);

    worker.teardown_simulator(sim_req("ticker")).await.unwrap();
    worker.teardown_simulation(sim_req("ticker")).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn rate_overrides_apply_by_operation_name() {
    let mut registry = Registry::new();
    registry.simulation("ticker", Ticker);
    let worker = Worker::new(Arc::new(registry), 0);

    let mut req = simulator_req("ticker");
    req.rates.insert("bar".into(), Duration::from_secs(1));
    req.rates.insert("unknown".into(), Duration::from_secs(1));
    req.jitters.insert("bar".into(), 0.01);
    worker.setup_simulator(req).await.unwrap();
    let rx = worker.start_simulator(sim_req("ticker")).await.unwrap();
    let traces = tokio::spawn(collect(rx));

    tokio::time::sleep(Duration::from_millis(5500)).await;
    worker.stop_simulator(sim_req("ticker")).await.unwrap();
    let traces = traces.await.unwrap();
    assert_eq!(count_op(&traces, "bar"), 5);
}

#[tokio::test(start_paused = true)]
async fn operations_of_one_simulator_never_overlap() {
    let suite = Busy::default();
    let replica_max = suite.replica_max.clone();
    let global_max = suite.global_max.clone();

    let mut registry = Registry::new();
    registry.simulation("busy", suite);
    let registry = Arc::new(registry);
    let replicas = [
        Worker::new(registry.clone(), 0),
        Worker::new(registry.clone(), 1),
    ];

    let mut streams = Vec::new();
    for w in &replicas {
        w.setup_simulator(simulator_req("busy")).await.unwrap();
        streams.push(tokio::spawn(collect(
            w.start_simulator(sim_req("busy")).await.unwrap(),
        )));
    }

    tokio::time::sleep(Duration::from_secs(2)).await;
    for w in &replicas {
        w.stop_simulator(sim_req("busy")).await.unwrap();
    }
    let mut total = 0;
    for s in streams {
        total += s.await.unwrap().len();
    }

    assert!(total > 100, "only {total} executions");
    assert_eq!(replica_max.load(Ordering::SeqCst), 1);
    assert_eq!(global_max.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn start_and_stop_require_the_right_state() {
    let mut registry = Registry::new();
    registry.simulation("ticker", Ticker);
    let worker = Worker::new(Arc::new(registry), 0);

    let err = worker.start_simulator(sim_req("ticker")).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));

    worker.setup_simulator(simulator_req("ticker")).await.unwrap();
    let err = worker.stop_simulator(sim_req("ticker")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));

    let _rx = worker.start_simulator(sim_req("ticker")).await.unwrap();
    let err = worker.start_simulator(sim_req("ticker")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));

    // teardown stops a running simulator
    worker.teardown_simulator(sim_req("ticker")).await.unwrap();
}

#[tokio::test]
async fn zero_rate_override_is_rejected() {
    let mut registry = Registry::new();
    registry.simulation("ticker", Ticker);
    let worker = Worker::new(Arc::new(registry), 0);

    let mut req = simulator_req("ticker");
    req.rates.insert("foo".into(), Duration::ZERO);
    let err = worker.setup_simulator(req).await.unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}
