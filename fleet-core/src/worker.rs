use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use crate::protocol::{
    BenchmarkRequest, RunRequest, SimulationRequest, SimulatorRequest, SuiteRequest,
};
use crate::{
    BenchmarkContext, ChannelRegister, Error, JobScope, Registry, Result, RunResult,
    SimulationContext, Simulator, SimulatorSetup, SuiteContext, Trace, run_benchmark,
};

/// Traces of a started simulator. The stream ends after the simulator is stopped.
pub type TraceStream = mpsc::UnboundedReceiver<Trace>;

/// Lifecycle and execution calls a coordinator issues to one worker.
#[async_trait]
pub trait WorkerApi: Send + Sync {
    async fn setup_suite(&self, req: SuiteRequest) -> Result<()>;
    async fn teardown_suite(&self, req: SuiteRequest) -> Result<()>;
    async fn setup_worker(&self, req: SuiteRequest) -> Result<()>;
    async fn teardown_worker(&self, req: SuiteRequest) -> Result<()>;
    async fn setup_benchmark(&self, req: BenchmarkRequest) -> Result<()>;
    async fn teardown_benchmark(&self, req: BenchmarkRequest) -> Result<()>;
    async fn run_benchmark(&self, req: RunRequest) -> Result<RunResult>;

    async fn setup_simulation(&self, req: SimulationRequest) -> Result<()>;
    async fn teardown_simulation(&self, req: SimulationRequest) -> Result<()>;
    async fn setup_simulator(&self, req: SimulatorRequest) -> Result<()>;
    async fn teardown_simulator(&self, req: SimulationRequest) -> Result<()>;
    async fn start_simulator(&self, req: SimulationRequest) -> Result<TraceStream>;
    async fn stop_simulator(&self, req: SimulationRequest) -> Result<()>;
}

#[derive(Default)]
struct WorkerState {
    benchmarks: BTreeSet<(String, String)>,
    simulators: BTreeMap<String, Simulator>,
}

/// Executes lifecycle calls against suites resolved from a [`Registry`].
pub struct Worker {
    registry: Arc<Registry>,
    index: usize,
    scope: Option<JobScope>,
    state: Mutex<WorkerState>,
}

impl Worker {
    /// A worker that serves any registered suite or simulation.
    #[must_use]
    pub fn new(registry: Arc<Registry>, index: usize) -> Self {
        Self {
            registry,
            index,
            scope: None,
            state: Mutex::new(WorkerState::default()),
        }
    }

    /// A worker dedicated to one job. The scope must name a registered suite or
    /// simulation; calls for anything else fail with `InvalidState`.
    pub fn scoped(registry: Arc<Registry>, index: usize, scope: Option<JobScope>) -> Result<Self> {
        match &scope {
            Some(JobScope::Suite(name)) => {
                registry.benchmark_suite(name)?;
            }
            Some(JobScope::Simulation(name)) => {
                registry.simulation_suite(name)?;
            }
            None => {}
        }
        Ok(Self {
            scope,
            ..Self::new(registry, index)
        })
    }

    fn in_scope(&self, requested: JobScope) -> Result<()> {
        match &self.scope {
            Some(scope) if *scope != requested => Err(Error::invalid_state(format!(
                "worker {} serves {scope}, not {requested}",
                self.index
            ))),
            _ => Ok(()),
        }
    }

    fn suite_scope(&self, suite: &str) -> Result<()> {
        self.in_scope(JobScope::Suite(suite.to_string()))
    }

    fn simulation_scope(&self, simulation: &str) -> Result<()> {
        self.in_scope(JobScope::Simulation(simulation.to_string()))
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    fn suite_ctx(&self, req: SuiteRequest) -> SuiteContext {
        SuiteContext {
            suite: req.suite,
            worker: self.index,
            args: req.args,
        }
    }

    fn benchmark_ctx(&self, req: BenchmarkRequest) -> BenchmarkContext {
        BenchmarkContext {
            suite: req.suite,
            benchmark: req.benchmark,
            worker: self.index,
            args: req.args,
        }
    }

    fn simulation_ctx(&self, req: SimulationRequest) -> SimulationContext {
        SimulationContext {
            simulation: req.simulation,
            simulator: self.index,
            args: req.args,
        }
    }
}

#[async_trait]
impl WorkerApi for Worker {
    async fn setup_suite(&self, req: SuiteRequest) -> Result<()> {
        self.suite_scope(&req.suite)?;
        let entry = self.registry.benchmark_suite(&req.suite)?;
        tracing::debug!(worker = self.index, suite = %req.suite, "setup suite");
        entry
            .hooks
            .setup_suite(&self.suite_ctx(req))
            .await
            .map_err(Error::setup)
    }

    async fn teardown_suite(&self, req: SuiteRequest) -> Result<()> {
        self.suite_scope(&req.suite)?;
        let entry = self.registry.benchmark_suite(&req.suite)?;
        tracing::debug!(worker = self.index, suite = %req.suite, "teardown suite");
        entry
            .hooks
            .teardown_suite(&self.suite_ctx(req))
            .await
            .map_err(Error::teardown)
    }

    async fn setup_worker(&self, req: SuiteRequest) -> Result<()> {
        self.suite_scope(&req.suite)?;
        let entry = self.registry.benchmark_suite(&req.suite)?;
        tracing::debug!(worker = self.index, suite = %req.suite, "setup worker");
        entry
            .hooks
            .setup_worker(&self.suite_ctx(req))
            .await
            .map_err(Error::setup)
    }

    async fn teardown_worker(&self, req: SuiteRequest) -> Result<()> {
        self.suite_scope(&req.suite)?;
        let entry = self.registry.benchmark_suite(&req.suite)?;
        tracing::debug!(worker = self.index, suite = %req.suite, "teardown worker");
        entry
            .hooks
            .teardown_worker(&self.suite_ctx(req))
            .await
            .map_err(Error::teardown)
    }

    async fn setup_benchmark(&self, req: BenchmarkRequest) -> Result<()> {
        self.suite_scope(&req.suite)?;
        let (entry, _) = self.registry.benchmark(&req.suite, &req.benchmark)?;
        let key = (req.suite.clone(), req.benchmark.clone());
        tracing::debug!(worker = self.index, suite = %req.suite, benchmark = %req.benchmark, "setup benchmark");
        entry
            .hooks
            .setup_benchmark(&self.benchmark_ctx(req))
            .await
            .map_err(Error::setup)?;
        self.state.lock().await.benchmarks.insert(key);
        Ok(())
    }

    async fn teardown_benchmark(&self, req: BenchmarkRequest) -> Result<()> {
        self.suite_scope(&req.suite)?;
        let (entry, _) = self.registry.benchmark(&req.suite, &req.benchmark)?;
        self.state
            .lock()
            .await
            .benchmarks
            .remove(&(req.suite.clone(), req.benchmark.clone()));
        tracing::debug!(worker = self.index, suite = %req.suite, benchmark = %req.benchmark, "teardown benchmark");
        entry
            .hooks
            .teardown_benchmark(&self.benchmark_ctx(req))
            .await
            .map_err(Error::teardown)
    }

    async fn run_benchmark(&self, req: RunRequest) -> Result<RunResult> {
        self.suite_scope(&req.suite)?;
        let (entry, build) = self.registry.benchmark(&req.suite, &req.benchmark)?;
        let key = (req.suite.clone(), req.benchmark.clone());
        if !self.state.lock().await.benchmarks.contains(&key) {
            return Err(Error::invalid_state(format!(
                "benchmark `{}.{}` is not set up on worker {}",
                req.suite, req.benchmark, self.index
            )));
        }

        let opts = req.options;
        let ctx = self.benchmark_ctx(req.benchmark());
        let mut workload = build(&ctx).map_err(Error::setup)?;
        tracing::info!(
            worker = self.index,
            suite = %ctx.suite,
            benchmark = %ctx.benchmark,
            mode = ?opts.mode,
            parallelism = opts.parallelism,
            clients = opts.clients,
            "running benchmark"
        );
        entry.hooks.before_run(&ctx).await.map_err(Error::setup)?;
        let ran = run_benchmark(&mut workload, &opts).await;
        let after = entry.hooks.after_run(&ctx).await.map_err(Error::teardown);
        let result = ran?;
        after?;
        tracing::info!(
            worker = self.index,
            benchmark = %ctx.benchmark,
            requests = result.requests,
            errors = result.errors,
            duration = ?result.duration,
            "benchmark finished"
        );
        Ok(result)
    }

    async fn setup_simulation(&self, req: SimulationRequest) -> Result<()> {
        self.simulation_scope(&req.simulation)?;
        let suite = self.registry.simulation_suite(&req.simulation)?;
        tracing::debug!(worker = self.index, simulation = %req.simulation, "setup simulation");
        suite
            .setup_simulation(&self.simulation_ctx(req))
            .await
            .map_err(Error::setup)
    }

    async fn teardown_simulation(&self, req: SimulationRequest) -> Result<()> {
        self.simulation_scope(&req.simulation)?;
        let suite = self.registry.simulation_suite(&req.simulation)?;
        tracing::debug!(worker = self.index, simulation = %req.simulation, "teardown simulation");
        suite
            .teardown_simulation(&self.simulation_ctx(req))
            .await
            .map_err(Error::teardown)
    }

    async fn setup_simulator(&self, req: SimulatorRequest) -> Result<()> {
        self.simulation_scope(&req.simulation)?;
        let suite = self.registry.simulation_suite(&req.simulation)?;
        let mut state = self.state.lock().await;
        if state.simulators.contains_key(&req.simulation) {
            return Err(Error::invalid_state(format!(
                "simulator of `{}` is already set up on worker {}",
                req.simulation, self.index
            )));
        }

        let mut setup = SimulatorSetup::new(self.simulation_ctx(req.simulation()));
        suite
            .setup_simulator(&mut setup)
            .await
            .map_err(Error::setup)?;
        let sim = Simulator::new(setup, &req.rates, &req.jitters)?;
        for (name, rate, jitter) in sim.operations() {
            tracing::debug!(worker = self.index, operation = name, ?rate, jitter, "operation scheduled");
        }
        state.simulators.insert(req.simulation, sim);
        Ok(())
    }

    async fn teardown_simulator(&self, req: SimulationRequest) -> Result<()> {
        self.simulation_scope(&req.simulation)?;
        let suite = self.registry.simulation_suite(&req.simulation)?;
        let sim = self.state.lock().await.simulators.remove(&req.simulation);
        if let Some(mut sim) = sim
            && sim.is_running()
        {
            sim.stop().await?;
        }
        suite
            .teardown_simulator(&self.simulation_ctx(req))
            .await
            .map_err(Error::teardown)
    }

    async fn start_simulator(&self, req: SimulationRequest) -> Result<TraceStream> {
        self.simulation_scope(&req.simulation)?;
        let mut state = self.state.lock().await;
        let sim = state
            .simulators
            .get_mut(&req.simulation)
            .ok_or_else(|| Error::not_found("simulator", &req.simulation))?;
        let (register, traces) = ChannelRegister::new();
        sim.start(Arc::new(register))?;
        tracing::info!(worker = self.index, simulation = %req.simulation, "simulator started");
        Ok(traces)
    }

    async fn stop_simulator(&self, req: SimulationRequest) -> Result<()> {
        self.simulation_scope(&req.simulation)?;
        let mut state = self.state.lock().await;
        let sim = state
            .simulators
            .get_mut(&req.simulation)
            .ok_or_else(|| Error::not_found("simulator", &req.simulation))?;
        sim.stop().await?;
        tracing::info!(worker = self.index, simulation = %req.simulation, "simulator stopped");
        Ok(())
    }
}
