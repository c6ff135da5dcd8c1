#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fleet_core::{
    BenchmarkConfig, BenchmarkContext, BenchmarkSuite, Coordinator, Error, ExitCode, JobOutput,
    LocalCluster, MemoryRegister, Models, Params, Registry, RequestMode, SimulationConfig,
    SimulationSuite, SimulatorSetup, SuiteContext, Value, Workload, async_trait,
};

type Log = Arc<Mutex<Vec<String>>>;

/// Records every hook call as `<hook>:<worker>`.
struct Recording {
    log: Log,
    fail_setup_worker: bool,
}

impl Recording {
    fn push(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl BenchmarkSuite for Recording {
    async fn setup_suite(&self, ctx: &SuiteContext) -> anyhow::Result<()> {
        self.push(format!("setup_suite:{}", ctx.worker));
        Ok(())
    }

    async fn teardown_suite(&self, ctx: &SuiteContext) -> anyhow::Result<()> {
        self.push(format!("teardown_suite:{}", ctx.worker));
        Ok(())
    }

    async fn setup_worker(&self, ctx: &SuiteContext) -> anyhow::Result<()> {
        self.push(format!("setup_worker:{}", ctx.worker));
        anyhow::ensure!(!self.fail_setup_worker, "worker {} refused", ctx.worker);
        Ok(())
    }

    async fn teardown_worker(&self, ctx: &SuiteContext) -> anyhow::Result<()> {
        self.push(format!("teardown_worker:{}", ctx.worker));
        Ok(())
    }

    async fn setup_benchmark(&self, ctx: &BenchmarkContext) -> anyhow::Result<()> {
        self.push(format!("setup_benchmark:{}:{}", ctx.benchmark, ctx.worker));
        Ok(())
    }

    async fn teardown_benchmark(&self, ctx: &BenchmarkContext) -> anyhow::Result<()> {
        self.push(format!("teardown_benchmark:{}:{}", ctx.benchmark, ctx.worker));
        Ok(())
    }

    async fn before_run(&self, ctx: &BenchmarkContext) -> anyhow::Result<()> {
        self.push(format!("before_run:{}:{}", ctx.benchmark, ctx.worker));
        Ok(())
    }

    async fn after_run(&self, ctx: &BenchmarkContext) -> anyhow::Result<()> {
        self.push(format!("after_run:{}:{}", ctx.benchmark, ctx.worker));
        Ok(())
    }
}

fn sleeping(ms: u64) -> Workload {
    Workload::new(Params::new(), move |_| async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    })
}

fn registry(log: &Log, fail_setup_worker: bool) -> Registry {
    let mut r = Registry::new();
    let _ = r
        .suite(
            "alpha",
            Recording {
                log: log.clone(),
                fail_setup_worker,
            },
        )
        .benchmark("get", |_, _| Ok(sleeping(10)))
        .benchmark("put", |_, _| Ok(sleeping(10)));
    let _ = r
        .suite(
            "beta",
            Recording {
                log: Arc::new(Mutex::new(Vec::new())),
                fail_setup_worker: false,
            },
        )
        .benchmark("scan", |_, _| Ok(sleeping(10)));
    r
}

fn coordinator(registry: Registry) -> (Coordinator, Arc<LocalCluster>) {
    let registry = Arc::new(registry);
    let cluster = Arc::new(LocalCluster::new(registry.clone()));
    (
        Coordinator::new(registry, cluster.clone(), cluster.clone()),
        cluster,
    )
}

fn positions(log: &[String], entry: &str) -> usize {
    log.iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("missing `{entry}` in {log:?}"))
}

#[tokio::test(start_paused = true)]
async fn lifecycle_runs_in_order_across_workers() {
    let log = Log::default();
    let (coordinator, cluster) = coordinator(registry(&log, false));
    let cfg = BenchmarkConfig {
        job_id: "run".into(),
        suite: Some("alpha".into()),
        workers: 2,
        mode: RequestMode::Requests(20),
        parallelism: 2,
        ..BenchmarkConfig::default()
    };

    let outcome = coordinator.run_benchmarks(&cfg).await.unwrap();
    assert_eq!(outcome.exit_code(), ExitCode::Success);
    assert_eq!(outcome.jobs.len(), 1);
    let job = &outcome.jobs[0];
    assert_eq!(job.job_id, "run-alpha");
    assert!(job.error.is_none());

    let JobOutput::Benchmarks { reports } = &job.output else {
        panic!("expected benchmark output");
    };
    assert_eq!(reports.len(), 2);
    for report in reports {
        assert_eq!(report.result.requests, 20);
        assert_eq!(report.workers.len(), 2);
        assert!(report.workers.iter().all(|w| w.requests == 10));
        assert_eq!(report.result.latency.p50, Duration::from_millis(10));
    }

    let log = log.lock().unwrap().clone();
    let setup_suite = positions(&log, "setup_suite:0");
    assert!(!log.contains(&"setup_suite:1".to_string()));
    for w in 0..2 {
        let setup_worker = positions(&log, &format!("setup_worker:{w}"));
        let setup_get = positions(&log, &format!("setup_benchmark:get:{w}"));
        let before_get = positions(&log, &format!("before_run:get:{w}"));
        let after_get = positions(&log, &format!("after_run:get:{w}"));
        let teardown_get = positions(&log, &format!("teardown_benchmark:get:{w}"));
        let setup_put = positions(&log, &format!("setup_benchmark:put:{w}"));
        let teardown_worker = positions(&log, &format!("teardown_worker:{w}"));
        assert!(setup_suite < setup_worker);
        assert!(setup_worker < setup_get);
        assert!(setup_get < before_get);
        assert!(before_get < after_get);
        assert!(after_get < teardown_get);
        assert!(teardown_get < setup_put);
        assert!(setup_put < teardown_worker);
    }
    assert_eq!(log.last().map(String::as_str), Some("teardown_suite:0"));
    assert!(cluster.jobs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn independent_suites_run_in_parallel() {
    let log = Log::default();
    let (coordinator, _) = coordinator(registry(&log, false));
    let cfg = BenchmarkConfig {
        job_id: "all".into(),
        mode: RequestMode::Requests(20),
        ..BenchmarkConfig::default()
    };

    let started = tokio::time::Instant::now();
    let outcome = coordinator.run_benchmarks(&cfg).await.unwrap();
    let elapsed = started.elapsed();

    let names: Vec<_> = outcome.jobs.iter().map(|j| j.name.as_str()).collect();
    assert_eq!(names, ["alpha", "beta"]);
    let sum: Duration = outcome.jobs.iter().map(|j| j.elapsed).sum();
    assert!(elapsed < sum, "{elapsed:?} vs {sum:?}");
    assert_eq!(outcome.exit_code(), ExitCode::Success);
}

#[tokio::test]
async fn unknown_suite_is_not_found() {
    let log = Log::default();
    let (coordinator, _) = coordinator(registry(&log, false));
    let cfg = BenchmarkConfig {
        suite: Some("gamma".into()),
        ..BenchmarkConfig::default()
    };
    let err = coordinator.run_benchmarks(&cfg).await.unwrap_err();
    assert_eq!(err, Error::not_found("suite", "gamma"));
    assert_eq!(err.exit_code(), ExitCode::InvalidInput);

    let cfg = BenchmarkConfig {
        suite: Some("alpha".into()),
        benchmark: Some("delete".into()),
        ..BenchmarkConfig::default()
    };
    let err = coordinator.run_benchmarks(&cfg).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test(start_paused = true)]
async fn failed_setup_still_tears_down() {
    let log = Log::default();
    let (coordinator, cluster) = coordinator(registry(&log, true));
    let cfg = BenchmarkConfig {
        suite: Some("alpha".into()),
        workers: 2,
        mode: RequestMode::Requests(4),
        ..BenchmarkConfig::default()
    };

    let outcome = coordinator.run_benchmarks(&cfg).await.unwrap();
    let job = &outcome.jobs[0];
    assert!(matches!(job.error, Some(Error::SetupFailed(_))));
    assert_eq!(outcome.exit_code(), ExitCode::RuntimeError);

    let log = log.lock().unwrap().clone();
    assert!(!log.iter().any(|e| e.starts_with("setup_benchmark")));
    assert_eq!(log.last().map(String::as_str), Some("teardown_suite:0"));
    assert!(cluster.jobs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn keep_leaves_failed_job_deployed() {
    let log = Log::default();
    let (coordinator, cluster) = coordinator(registry(&log, true));
    let cfg = BenchmarkConfig {
        job_id: "dbg".into(),
        suite: Some("alpha".into()),
        mode: RequestMode::Requests(4),
        keep: true,
        ..BenchmarkConfig::default()
    };

    let outcome = coordinator.run_benchmarks(&cfg).await.unwrap();
    assert!(outcome.jobs[0].error.is_some());
    assert_eq!(cluster.jobs(), vec!["dbg-alpha"]);
}

#[tokio::test(start_paused = true)]
async fn latency_threshold_sets_exit_code() {
    let log = Log::default();
    let (coordinator, _) = coordinator(registry(&log, false));
    let cfg = BenchmarkConfig {
        suite: Some("beta".into()),
        mode: RequestMode::Requests(10),
        max_latency: Some(Duration::from_millis(1)),
        ..BenchmarkConfig::default()
    };

    let outcome = coordinator.run_benchmarks(&cfg).await.unwrap();
    assert!(outcome.jobs[0].error.is_none());
    assert_eq!(outcome.exit_code(), ExitCode::ThresholdExceeded);
}

#[tokio::test(start_paused = true)]
async fn job_timeout_fails_the_job() {
    let log = Log::default();
    let (coordinator, cluster) = coordinator(registry(&log, false));
    let cfg = BenchmarkConfig {
        suite: Some("beta".into()),
        mode: RequestMode::Requests(1000),
        timeout: Some(Duration::from_secs(1)),
        ..BenchmarkConfig::default()
    };

    let outcome = coordinator.run_benchmarks(&cfg).await.unwrap();
    assert_eq!(
        outcome.jobs[0].error,
        Some(Error::Timeout(Duration::from_secs(1)))
    );
    assert_eq!(outcome.exit_code(), ExitCode::RuntimeError);
    assert!(cluster.jobs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn timed_out_job_stops_worker_calls_and_tears_down() {
    let log = Log::default();
    let calls = Arc::new(AtomicU64::new(0));
    let mut registry = Registry::new();
    let counted = calls.clone();
    let _ = registry
        .suite(
            "slow",
            Recording {
                log: log.clone(),
                fail_setup_worker: false,
            },
        )
        .benchmark("scan", move |_, _| {
            let calls = counted.clone();
            Ok(Workload::new(Params::new(), move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(())
                }
            }))
        });
    let (coordinator, cluster) = coordinator(registry);
    let cfg = BenchmarkConfig {
        suite: Some("slow".into()),
        workers: 2,
        mode: RequestMode::Requests(10_000),
        timeout: Some(Duration::from_secs(1)),
        ..BenchmarkConfig::default()
    };

    let outcome = coordinator.run_benchmarks(&cfg).await.unwrap();
    assert_eq!(
        outcome.jobs[0].error,
        Some(Error::Timeout(Duration::from_secs(1)))
    );
    assert!(cluster.jobs().is_empty());

    // Calls already in flight may still finish; nothing new may start.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = calls.load(Ordering::SeqCst);
    assert!(settled > 0);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(calls.load(Ordering::SeqCst), settled);

    let log = log.lock().unwrap().clone();
    for w in 0..2 {
        positions(&log, &format!("teardown_benchmark:scan:{w}"));
        positions(&log, &format!("teardown_worker:{w}"));
    }
    assert_eq!(log.last().map(String::as_str), Some("teardown_suite:0"));
}

struct Counter;

#[async_trait]
impl SimulationSuite for Counter {
    async fn setup_simulator(&self, sim: &mut SimulatorSetup) -> anyhow::Result<()> {
        sim.operation("inc", Duration::from_millis(100), |_| async { Ok(()) })?;
        sim.operation("fail", Duration::from_millis(500), |_| async {
            anyhow::bail!("injected")
        })?;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn simulation_traces_reach_the_register() {
    let mut registry = Registry::new();
    registry.simulation("counter", Counter);
    let (coordinator, cluster) = coordinator(registry);
    let register = Arc::new(MemoryRegister::new());

    let cfg = SimulationConfig {
        job_id: "sim".into(),
        simulators: 2,
        duration: Duration::from_secs(3),
        ..SimulationConfig::default()
    };
    let outcome = coordinator
        .run_simulations(&cfg, register.clone())
        .await
        .unwrap();

    let job = &outcome.jobs[0];
    assert!(job.error.is_none(), "{:?}", job.error);
    let JobOutput::Simulation {
        report: Some(report),
    } = &job.output
    else {
        panic!("expected a simulation report");
    };
    assert_eq!(report.traces as usize, register.len());
    assert!(report.failures > 0);
    assert!(report.failures < report.traces);
    assert!(cluster.jobs().is_empty());
}

fn counter_models() -> Models {
    let mut models = Models::new();
    models.model("all-succeed", |traces| {
        let failed = traces
            .iter()
            .filter(|t| t.values.get(3) == Some(&Value::Bool(false)))
            .count();
        anyhow::ensure!(failed == 0, "{failed} executions failed");
        Ok(())
    });
    models.model("recorded", |traces| {
        anyhow::ensure!(!traces.is_empty(), "nothing recorded");
        Ok(())
    });
    models
}

fn counter_coordinator() -> (Coordinator, Arc<LocalCluster>) {
    let mut registry = Registry::new();
    registry.simulation("counter", Counter);
    let (coordinator, cluster) = coordinator(registry);
    (
        coordinator.with_model_checker(Arc::new(counter_models())),
        cluster,
    )
}

fn model_cfg(model: &str) -> SimulationConfig {
    SimulationConfig {
        job_id: "sim".into(),
        duration: Duration::from_secs(2),
        model: Some(model.into()),
        ..SimulationConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn model_check_passes_on_recorded_traces() {
    let (coordinator, _) = counter_coordinator();
    let outcome = coordinator
        .run_simulations(&model_cfg("recorded"), Arc::new(MemoryRegister::new()))
        .await
        .unwrap();

    let job = &outcome.jobs[0];
    assert!(job.error.is_none(), "{:?}", job.error);
    let JobOutput::Simulation {
        report: Some(report),
    } = &job.output
    else {
        panic!("expected a simulation report");
    };
    assert_eq!(report.model.as_deref(), Some("recorded"));
    assert_eq!(outcome.exit_code(), ExitCode::Success);
}

#[tokio::test(start_paused = true)]
async fn model_violation_fails_the_job() {
    let (coordinator, cluster) = counter_coordinator();
    let outcome = coordinator
        .run_simulations(&model_cfg("all-succeed"), Arc::new(MemoryRegister::new()))
        .await
        .unwrap();

    let job = &outcome.jobs[0];
    assert!(matches!(job.error, Some(Error::ModelViolation(_))), "{:?}", job.error);
    assert_eq!(outcome.exit_code(), ExitCode::ExecutionFailed);
    let JobOutput::Simulation {
        report: Some(report),
    } = &job.output
    else {
        panic!("expected a simulation report");
    };
    assert!(report.model.is_none());
    assert!(cluster.jobs().is_empty());
}

#[tokio::test]
async fn model_needs_a_known_checker() {
    let (coordinator, _) = counter_coordinator();
    let err = coordinator
        .run_simulations(&model_cfg("linearizable"), Arc::new(MemoryRegister::new()))
        .await
        .unwrap_err();
    assert_eq!(err, Error::not_found("model", "linearizable"));

    let mut registry = Registry::new();
    registry.simulation("counter", Counter);
    let (unchecked, _) = self::coordinator(registry);
    let err = unchecked
        .run_simulations(&model_cfg("recorded"), Arc::new(MemoryRegister::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)), "{err:?}");
}
