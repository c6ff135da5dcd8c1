use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use fleet_value::Value;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Duration, Instant};

use crate::config::env;
use crate::protocol::{
    BenchmarkRequest, RunRequest, SimulationRequest, SimulatorRequest, SuiteRequest,
};
use crate::{
    BenchmarkConfig, ClusterProvisioner, Error, ExitCode, ModelChecker, Register, Registry,
    Result, RunOptions, RunResult, SimulationConfig, Step, Trace, WorkerApi, WorkerConnector,
};

/// How long log streaming may lag behind teardown before it is cut off.
const LOG_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// How long the teardown of a timed-out job may take.
const ABANDON_GRACE: Duration = Duration::from_secs(10);

/// Aggregated result of one benchmark across all workers of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub suite: String,
    pub benchmark: String,
    pub result: RunResult,
    pub workers: Vec<RunResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub simulation: String,
    pub traces: u64,
    pub failures: u64,
    pub duration: Duration,
    /// Model the traces were checked against, when one was configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOutput {
    Benchmarks { reports: Vec<BenchmarkReport> },
    Simulation { report: Option<SimulationReport> },
}

/// Outcome of one isolated job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    pub name: String,
    pub output: JobOutput,
    pub error: Option<Error>,
    pub exit_code: ExitCode,
    pub elapsed: Duration,
}

/// Outcome of a coordinator run: one report per job, in name order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub jobs: Vec<JobReport>,
}

impl RunOutcome {
    /// The worst exit code across all jobs.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        self.jobs
            .iter()
            .map(|j| j.exit_code)
            .fold(ExitCode::Success, ExitCode::worst)
    }
}

/// Lifecycle stages a job has entered, so a timed-out job only tears down what it set up.
#[derive(Debug, Default)]
struct Progress {
    /// Suite or simulation set up on worker 0.
    scope: bool,
    /// Workers or simulators set up.
    workers: bool,
    benchmark: Option<String>,
}

fn mark(progress: &Mutex<Progress>, f: impl FnOnce(&mut Progress)) {
    f(&mut progress
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner()));
}

fn snapshot(progress: &Mutex<Progress>) -> Progress {
    std::mem::take(
        &mut *progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()),
    )
}

/// Provisions workers per job and drives them through the lifecycle.
#[derive(Clone)]
pub struct Coordinator {
    registry: Arc<Registry>,
    provisioner: Arc<dyn ClusterProvisioner>,
    connector: Arc<dyn WorkerConnector>,
    checker: Option<Arc<dyn ModelChecker>>,
}

impl Coordinator {
    pub fn new(
        registry: Arc<Registry>,
        provisioner: Arc<dyn ClusterProvisioner>,
        connector: Arc<dyn WorkerConnector>,
    ) -> Self {
        Self {
            registry,
            provisioner,
            connector,
            checker: None,
        }
    }

    /// Checks simulation traces with `checker` when a run names a model.
    #[must_use]
    pub fn with_model_checker(mut self, checker: Arc<dyn ModelChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Runs the configured suite, or every registered suite, one job per suite.
    ///
    /// Jobs run in parallel. A failing job is reported in the outcome and does
    /// not affect the others; only configuration errors fail the whole call.
    pub async fn run_benchmarks(&self, cfg: &BenchmarkConfig) -> Result<RunOutcome> {
        cfg.validate()?;
        let suites = self.registry.resolve_suites(cfg.suite.as_deref())?;
        if let (Some(suite), Some(benchmark)) = (&cfg.suite, &cfg.benchmark) {
            self.registry.benchmark(suite, benchmark)?;
        }

        let jobs = suites.into_iter().map(|suite| {
            let this = self.clone();
            let cfg = cfg.clone();
            async move { this.benchmark_job(suite, cfg).await }
        });
        Ok(collect_jobs(jobs).await)
    }

    /// Runs the configured simulation, or every registered simulation, one job each.
    /// Traces of every simulator are relayed into `register`.
    pub async fn run_simulations(
        &self,
        cfg: &SimulationConfig,
        register: Arc<dyn Register>,
    ) -> Result<RunOutcome> {
        cfg.validate()?;
        let simulations = self
            .registry
            .resolve_simulations(cfg.simulation.as_deref())?;
        if let Some(model) = &cfg.model {
            match &self.checker {
                None => {
                    return Err(Error::invalid_config(format!(
                        "model `{model}` requested but no model checker is configured"
                    )));
                }
                Some(checker) if !checker.knows(model) => {
                    return Err(Error::not_found("model", model));
                }
                Some(_) => {}
            }
        }

        let jobs = simulations.into_iter().map(|simulation| {
            let this = self.clone();
            let cfg = cfg.clone();
            let register = register.clone();
            async move { this.simulation_job(simulation, cfg, register).await }
        });
        Ok(collect_jobs(jobs).await)
    }

    async fn benchmark_job(self, suite: String, cfg: BenchmarkConfig) -> JobReport {
        let job_id = format!("{}-{}", cfg.job_id, suite);
        let mut job_env = cfg.to_env();
        job_env.insert(env::JOB.into(), job_id.clone());
        job_env.insert(env::SUITE.into(), suite.clone());

        let benchmarks = match &cfg.benchmark {
            Some(b) => Ok(vec![b.clone()]),
            None => self.registry.benchmark_names(&suite),
        };

        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        let progress = Mutex::new(Progress::default());
        let lifecycle = async {
            let benchmarks = benchmarks?;
            let workers = self.connect(&job_id, cfg.workers).await?;
            let collected =
                benchmark_lifecycle(&job_id, &suite, &benchmarks, &cfg, &workers, &progress).await;
            sink.lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .extend(collected.reports);
            match collected.error {
                Some(err) => Err(err),
                None => Ok(()),
            }
        };
        let abandon = async {
            let progress = snapshot(&progress);
            if let Ok(workers) = self.connect(&job_id, cfg.workers).await {
                abandon_benchmarks(&job_id, &suite, &cfg, &workers, progress).await;
            }
        };

        let started = Instant::now();
        let res = self
            .provisioned(
                &job_id,
                &cfg.image,
                &job_env,
                cfg.workers,
                cfg.timeout,
                cfg.keep,
                lifecycle,
                abandon,
            )
            .await;

        let reports = std::mem::take(
            &mut *reports
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        let verdicts = reports
            .iter()
            .map(|r: &BenchmarkReport| r.result.verdict.exit_code())
            .fold(ExitCode::Success, ExitCode::worst);
        job_report(job_id, suite, JobOutput::Benchmarks { reports }, res, verdicts, started)
    }

    async fn simulation_job(
        self,
        simulation: String,
        cfg: SimulationConfig,
        register: Arc<dyn Register>,
    ) -> JobReport {
        let job_id = format!("{}-{}", cfg.job_id, simulation);
        let mut job_env = cfg.to_env();
        job_env.insert(env::JOB.into(), job_id.clone());
        job_env.insert(env::SIMULATION.into(), simulation.clone());

        let report = Arc::new(Mutex::new(None));
        let sink = report.clone();
        let progress = Mutex::new(Progress::default());
        let checker = cfg.model.as_ref().and(self.checker.clone());
        let lifecycle = async {
            let workers = self.connect(&job_id, cfg.simulators).await?;
            let (mut res, traces) = simulation_lifecycle(
                &job_id,
                &simulation,
                &cfg,
                &workers,
                register,
                checker.is_some(),
                &progress,
            )
            .await?;

            let checked = match (&cfg.model, &checker) {
                (Some(model), Some(checker)) => Some(
                    Step::run(
                        &job_id,
                        format!("check model {model}"),
                        checker.check(model, &traces),
                    )
                    .await
                    .map(|()| model.clone()),
                ),
                _ => None,
            };
            if let Some(Ok(model)) = &checked {
                res.model = Some(model.clone());
            }
            *sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(res);
            checked.transpose().map(|_| ())
        };
        let abandon = async {
            let progress = snapshot(&progress);
            if let Ok(workers) = self.connect(&job_id, cfg.simulators).await {
                abandon_simulation(&job_id, &simulation, &cfg, &workers, progress).await;
            }
        };

        let started = Instant::now();
        let res = self
            .provisioned(
                &job_id,
                &cfg.image,
                &job_env,
                cfg.simulators,
                cfg.timeout,
                cfg.keep,
                lifecycle,
                abandon,
            )
            .await;
        let report = report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        job_report(
            job_id,
            simulation,
            JobOutput::Simulation { report },
            res,
            ExitCode::Success,
            started,
        )
    }

    async fn connect(&self, job_id: &str, count: usize) -> Result<Vec<Arc<dyn WorkerApi>>> {
        Step::run(job_id, "connect workers", async {
            let workers = self.connector.connect(job_id, count).await?;
            if workers.len() != count {
                return Err(Error::provisioning(format!(
                    "expected {count} workers, connected to {}",
                    workers.len()
                )));
            }
            Ok(workers)
        })
        .await
    }

    /// Deploys the job's workers, runs `lifecycle` against them and tears them down.
    ///
    /// When `timeout` expires the lifecycle is dropped, which aborts its in-flight
    /// worker calls, and `abandon` runs the remaining lifecycle teardown.
    /// Provisioner teardown is attempted even after a failed deploy, and skipped
    /// only when `keep` is set and the job failed. The provisioner's exit status
    /// is folded into the result.
    #[allow(clippy::too_many_arguments)]
    async fn provisioned<F, A>(
        &self,
        job_id: &str,
        image: &str,
        job_env: &BTreeMap<String, String>,
        count: usize,
        timeout: Option<Duration>,
        keep: bool,
        lifecycle: F,
        abandon: A,
    ) -> Result<ExitCode>
    where
        F: Future<Output = Result<()>>,
        A: Future<Output = ()>,
    {
        let deployed = Step::run(
            job_id,
            "deploy workers",
            self.provisioner.deploy_workers(job_id, image, job_env, count),
        )
        .await;

        let mut logs = None;
        let mut code = ExitCode::Success;
        let mut res = match deployed {
            Err(err) => Err(err),
            Ok(()) => {
                let body = async {
                    Step::run(job_id, "await workers", self.provisioner.await_ready(job_id))
                        .await?;
                    logs = Some(self.follow_logs(job_id).await?);
                    lifecycle.await
                };
                let res = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, body).await {
                        Ok(res) => res,
                        Err(_) => {
                            tracing::warn!(job = job_id, ?limit, "job timed out");
                            if tokio::time::timeout(ABANDON_GRACE, abandon).await.is_err() {
                                tracing::warn!(job = job_id, "teardown of timed-out job did not finish");
                            }
                            Err(Error::Timeout(limit))
                        }
                    },
                    None => body.await,
                };

                match self.provisioner.exit_status(job_id).await {
                    Ok(status) => {
                        if status.code != 0 {
                            tracing::warn!(
                                job = job_id,
                                code = status.code,
                                message = %status.message,
                                "workers exited with error"
                            );
                        }
                        code = status.exit_code();
                    }
                    Err(err) => {
                        tracing::warn!(job = job_id, error = %err, "failed to read exit status");
                    }
                }
                res
            }
        };

        if keep && res.is_err() {
            tracing::warn!(job = job_id, "keeping workers of failed job");
        } else if let Err(err) =
            Step::run(job_id, "tear down workers", self.provisioner.tear_down(job_id)).await
            && res.is_ok()
        {
            res = Err(err);
        }

        if let Some(logs) = logs
            && tokio::time::timeout(LOG_DRAIN_GRACE, logs).await.is_err()
        {
            tracing::debug!(job = job_id, "log stream still open after teardown");
        }

        res.map(|()| code)
    }

    async fn follow_logs(&self, job_id: &str) -> Result<JoinHandle<()>> {
        let stream = self.provisioner.stream_logs(job_id).await?;
        let job = job_id.to_string();
        Ok(tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => tracing::info!(job = %job, "{line}"),
                    Ok(None) => break,
                    Err(err) => {
                        tracing::debug!(job = %job, error = %err, "log stream failed");
                        break;
                    }
                }
            }
        }))
    }
}

fn job_report(
    job_id: String,
    name: String,
    output: JobOutput,
    res: Result<ExitCode>,
    verdicts: ExitCode,
    started: Instant,
) -> JobReport {
    let (error, exit_code) = match res {
        Ok(code) => (None, code.worst(verdicts)),
        Err(err) => {
            tracing::error!(job = %job_id, error = %err, "job failed");
            let code = err.exit_code().worst(verdicts);
            (Some(err), code)
        }
    };
    JobReport {
        job_id,
        name,
        output,
        error,
        exit_code,
        elapsed: started.elapsed(),
    }
}

async fn collect_jobs<I, F>(jobs: I) -> RunOutcome
where
    I: IntoIterator<Item = F>,
    F: Future<Output = JobReport> + Send + 'static,
{
    let done = Arc::new(Mutex::new(Vec::new()));
    let mut set = JoinSet::new();
    for job in jobs {
        let done = done.clone();
        set.spawn(async move {
            let report = job.await;
            done.lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(report);
        });
    }
    while let Some(res) = set.join_next().await {
        if let Err(err) = res {
            tracing::error!(error = %err, "job task failed");
        }
    }

    let mut jobs = std::mem::take(&mut *done.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
    jobs.sort_by(|a, b| a.name.cmp(&b.name));
    RunOutcome { jobs }
}

/// Best-effort teardown of a benchmark job that timed out. Failures are only logged.
async fn abandon_benchmarks(
    job_id: &str,
    suite: &str,
    cfg: &BenchmarkConfig,
    workers: &[Arc<dyn WorkerApi>],
    progress: Progress,
) {
    if let Some(benchmark) = progress.benchmark {
        let req = BenchmarkRequest {
            suite: suite.to_string(),
            benchmark: benchmark.clone(),
            args: cfg.args.clone(),
        };
        let _ = Step::run(job_id, format!("tear down benchmark {benchmark}"), {
            on_all(workers, move |_, w| {
                let req = req.clone();
                async move { w.teardown_benchmark(req).await }
            })
        })
        .await;
    }

    let suite_req = SuiteRequest {
        suite: suite.to_string(),
        args: cfg.args.clone(),
    };
    if progress.workers {
        let req = suite_req.clone();
        let _ = Step::run(job_id, "tear down workers", {
            on_all(workers, move |_, w| {
                let req = req.clone();
                async move { w.teardown_worker(req).await }
            })
        })
        .await;
    }
    if progress.scope
        && let Some(first) = workers.first()
    {
        let _ = Step::run(job_id, "tear down suite", first.teardown_suite(suite_req)).await;
    }
}

/// Best-effort teardown of a simulation job that timed out. Tearing down a
/// simulator also stops it.
async fn abandon_simulation(
    job_id: &str,
    simulation: &str,
    cfg: &SimulationConfig,
    workers: &[Arc<dyn WorkerApi>],
    progress: Progress,
) {
    let req = SimulationRequest {
        simulation: simulation.to_string(),
        args: cfg.args.clone(),
    };
    if progress.workers {
        let _ = teardown_simulators(job_id, workers, &req).await;
    }
    if progress.scope
        && let Some(first) = workers.first()
    {
        let _ = Step::run(job_id, "tear down simulation", first.teardown_simulation(req)).await;
    }
}

/// Issues the same call to every worker concurrently and waits for all of them.
///
/// Results come back in worker order; the lowest failing worker's error wins.
/// Dropping the returned future aborts every call still in flight.
async fn on_all<T, F, Fut>(workers: &[Arc<dyn WorkerApi>], call: F) -> Result<Vec<T>>
where
    T: Send + 'static,
    F: Fn(usize, Arc<dyn WorkerApi>) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let mut set = JoinSet::new();
    for (i, w) in workers.iter().enumerate() {
        let fut = call(i, w.clone());
        set.spawn(async move { (i, fut.await) });
    }

    let mut out: Vec<Option<T>> = std::iter::repeat_with(|| None).take(workers.len()).collect();
    let mut first_err: Option<(usize, Error)> = None;
    while let Some(joined) = set.join_next().await {
        let (i, err) = match joined {
            Ok((i, Ok(v))) => {
                if let Some(slot) = out.get_mut(i) {
                    *slot = Some(v);
                }
                continue;
            }
            Ok((i, Err(err))) => {
                tracing::debug!(worker = i, error = %err, "worker call failed");
                (i, err)
            }
            Err(err) => (usize::MAX, Error::from(err)),
        };
        if first_err.as_ref().is_none_or(|(j, _)| i < *j) {
            first_err = Some((i, err));
        }
    }
    match first_err {
        Some((_, err)) => Err(err),
        None => Ok(out.into_iter().flatten().collect()),
    }
}

/// Keeps the primary failure, falling back to the cleanup failure.
fn first_failure(primary: Result<()>, cleanup: Result<()>) -> Result<()> {
    primary.and(cleanup)
}

struct Collected {
    reports: Vec<BenchmarkReport>,
    error: Option<Error>,
}

async fn benchmark_lifecycle(
    job_id: &str,
    suite: &str,
    benchmarks: &[String],
    cfg: &BenchmarkConfig,
    workers: &[Arc<dyn WorkerApi>],
    progress: &Mutex<Progress>,
) -> Collected {
    let mut collected = Collected {
        reports: Vec::new(),
        error: None,
    };
    let suite_req = SuiteRequest {
        suite: suite.to_string(),
        args: cfg.args.clone(),
    };
    let Some(first) = workers.first() else {
        collected.error = Some(Error::provisioning("job has no workers"));
        return collected;
    };

    if let Err(err) = Step::run(job_id, "setup suite", first.setup_suite(suite_req.clone())).await {
        collected.error = Some(err);
        return collected;
    }
    mark(progress, |p| p.scope = true);

    let setup_workers = Step::run(job_id, "setup workers", {
        let req = suite_req.clone();
        on_all(workers, move |_, w| {
            let req = req.clone();
            async move { w.setup_worker(req).await }
        })
    })
    .await;

    let res = match setup_workers {
        Err(err) => Err(err),
        Ok(_) => {
            mark(progress, |p| p.workers = true);
            let mut res = Ok(());
            for benchmark in benchmarks {
                match run_one(job_id, suite, benchmark, cfg, workers, progress).await {
                    Ok(report) => collected.reports.push(report),
                    Err(err) => {
                        res = Err(err);
                        break;
                    }
                }
            }
            let teardown = Step::run(job_id, "tear down workers", {
                let req = suite_req.clone();
                on_all(workers, move |_, w| {
                    let req = req.clone();
                    async move { w.teardown_worker(req).await }
                })
            })
            .await
            .map(|_| ());
            mark(progress, |p| p.workers = false);
            first_failure(res, teardown)
        }
    };

    let teardown = Step::run(job_id, "tear down suite", first.teardown_suite(suite_req)).await;
    mark(progress, |p| p.scope = false);
    collected.error = first_failure(res, teardown).err();
    collected
}

async fn run_one(
    job_id: &str,
    suite: &str,
    benchmark: &str,
    cfg: &BenchmarkConfig,
    workers: &[Arc<dyn WorkerApi>],
    progress: &Mutex<Progress>,
) -> Result<BenchmarkReport> {
    let bench_req = BenchmarkRequest {
        suite: suite.to_string(),
        benchmark: benchmark.to_string(),
        args: cfg.args.clone(),
    };

    mark(progress, |p| p.benchmark = Some(benchmark.to_string()));
    Step::run(job_id, format!("setup benchmark {benchmark}"), {
        let req = bench_req.clone();
        on_all(workers, move |_, w| {
            let req = req.clone();
            async move { w.setup_benchmark(req).await }
        })
    })
    .await?;

    let run_req = RunRequest {
        suite: suite.to_string(),
        benchmark: benchmark.to_string(),
        args: cfg.args.clone(),
        options: RunOptions {
            mode: cfg.mode.split(workers.len()),
            parallelism: cfg.parallelism,
            clients: cfg.clients,
            max_latency: cfg.max_latency,
            error_policy: cfg.error_policy,
        },
    };
    let run = Step::run(job_id, format!("run benchmark {benchmark}"), {
        on_all(workers, move |_, w| {
            let req = run_req.clone();
            async move { w.run_benchmark(req).await }
        })
    })
    .await;

    let teardown = Step::run(job_id, format!("tear down benchmark {benchmark}"), {
        on_all(workers, move |_, w| {
            let req = bench_req.clone();
            async move { w.teardown_benchmark(req).await }
        })
    })
    .await;
    mark(progress, |p| p.benchmark = None);

    let per_worker = run?;
    teardown?;

    let result = RunResult::combine(&per_worker, cfg.max_latency)
        .ok_or_else(|| Error::execution(format!("benchmark `{benchmark}` produced no results")))?;
    if let crate::Verdict::ThresholdExceeded { limit, observed } = result.verdict {
        tracing::warn!(
            job = job_id,
            benchmark,
            limit = ?limit,
            observed = ?observed,
            "max latency threshold exceeded"
        );
    }
    Ok(BenchmarkReport {
        suite: suite.to_string(),
        benchmark: benchmark.to_string(),
        result,
        workers: per_worker,
    })
}

async fn simulation_lifecycle(
    job_id: &str,
    simulation: &str,
    cfg: &SimulationConfig,
    workers: &[Arc<dyn WorkerApi>],
    register: Arc<dyn Register>,
    keep_traces: bool,
    progress: &Mutex<Progress>,
) -> Result<(SimulationReport, Vec<Trace>)> {
    let sim_req = SimulationRequest {
        simulation: simulation.to_string(),
        args: cfg.args.clone(),
    };
    let first = workers
        .first()
        .ok_or_else(|| Error::provisioning("job has no workers"))?;

    Step::run(job_id, "setup simulation", first.setup_simulation(sim_req.clone())).await?;
    mark(progress, |p| p.scope = true);

    let simulator_req = SimulatorRequest {
        simulation: simulation.to_string(),
        args: cfg.args.clone(),
        rates: cfg.rates.clone(),
        jitters: cfg.jitters.clone(),
    };
    let setup = Step::run(job_id, "setup simulators", {
        on_all(workers, move |_, w| {
            let req = simulator_req.clone();
            async move { w.setup_simulator(req).await }
        })
    })
    .await;

    let res = match setup {
        Err(err) => Err(err),
        Ok(_) => {
            mark(progress, |p| p.workers = true);
            let ran = drive_simulators(job_id, &sim_req, cfg.duration, workers, register, keep_traces)
                .await;
            let teardown = teardown_simulators(job_id, workers, &sim_req).await;
            mark(progress, |p| p.workers = false);
            match (ran, teardown) {
                (Ok(report), Ok(())) => Ok(report),
                (Err(err), _) | (Ok(_), Err(err)) => Err(err),
            }
        }
    };

    let teardown = Step::run(job_id, "tear down simulation", first.teardown_simulation(sim_req)).await;
    mark(progress, |p| p.scope = false);
    match (res, teardown) {
        (Ok(report), Ok(())) => Ok(report),
        (Err(err), _) | (Ok(_), Err(err)) => Err(err),
    }
}

async fn teardown_simulators(
    job_id: &str,
    workers: &[Arc<dyn WorkerApi>],
    req: &SimulationRequest,
) -> Result<()> {
    let req = req.clone();
    Step::run(job_id, "tear down simulators", {
        on_all(workers, move |_, w| {
            let req = req.clone();
            async move { w.teardown_simulator(req).await }
        })
    })
    .await
    .map(|_| ())
}

#[derive(Default)]
struct Relayed {
    count: u64,
    failures: u64,
    traces: Vec<Trace>,
}

async fn drive_simulators(
    job_id: &str,
    req: &SimulationRequest,
    duration: Duration,
    workers: &[Arc<dyn WorkerApi>],
    register: Arc<dyn Register>,
    keep_traces: bool,
) -> Result<(SimulationReport, Vec<Trace>)> {
    let streams = Step::run(job_id, "start simulators", {
        let req = req.clone();
        on_all(workers, move |_, w| {
            let req = req.clone();
            async move { w.start_simulator(req).await }
        })
    })
    .await;

    // Some workers may have started before another failed; stop whatever runs.
    let streams = match streams {
        Ok(streams) => streams,
        Err(err) => {
            let _ = stop_all(workers, req).await;
            return Err(err);
        }
    };

    let started = Instant::now();
    // Dropping the set aborts the relays, e.g. when a simulator never stops.
    let mut relays = JoinSet::new();
    for mut stream in streams {
        let register = register.clone();
        relays.spawn(async move {
            let mut relayed = Relayed::default();
            while let Some(trace) = stream.recv().await {
                relayed.count += 1;
                if trace.values.get(3) == Some(&Value::Bool(false)) {
                    relayed.failures += 1;
                }
                if keep_traces {
                    relayed.traces.push(trace.clone());
                }
                register.record(trace);
            }
            relayed
        });
    }

    tracing::info!(job = job_id, ?duration, "simulation running");
    tokio::time::sleep(duration).await;

    Step::run(job_id, "stop simulators", stop_all(workers, req)).await?;
    let elapsed = started.elapsed();

    let mut total = Relayed::default();
    while let Some(relayed) = relays.join_next().await {
        let relayed = relayed?;
        total.count += relayed.count;
        total.failures += relayed.failures;
        total.traces.extend(relayed.traces);
    }

    let report = SimulationReport {
        simulation: req.simulation.clone(),
        traces: total.count,
        failures: total.failures,
        duration: elapsed,
        model: None,
    };
    Ok((report, total.traces))
}

async fn stop_all(workers: &[Arc<dyn WorkerApi>], req: &SimulationRequest) -> Result<()> {
    let req = req.clone();
    on_all(workers, move |_, w| {
        let req = req.clone();
        async move { w.stop_simulator(req).await }
    })
    .await
    .map(|_| ())
}
