use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context as _;
use fleet_core::{
    Args, BenchmarkConfig, ClusterProvisioner, Coordinator, ExitCode, JsonLinesRegister,
    LocalCluster, ModelChecker, Register, Registry, RequestMode, SimulationConfig, Tee,
    WorkerConnector,
};

use crate::cli::{BenchArgs, JobArgs, ProvisionerKind, SimulateArgs};
use crate::model::{self, CommandChecker};
use crate::output;
use crate::provision::ProcessProvisioner;
use crate::run_error::RunError;
use crate::suites;

fn suite_args(pairs: &[(String, String)]) -> Args {
    pairs
        .iter()
        .fold(Args::new(), |args, (k, v)| args.with(k.as_str(), v.as_str()))
}

fn env_map(pairs: &[(String, String)]) -> BTreeMap<String, String> {
    pairs.iter().cloned().collect()
}

pub(crate) fn bench_config(args: &BenchArgs) -> Result<BenchmarkConfig, RunError> {
    let mode = match (args.requests, args.duration) {
        (Some(n), None) => RequestMode::Requests(n),
        (None, Some(d)) => RequestMode::Duration(d),
        (None, None) => RequestMode::default(),
        (Some(_), Some(_)) => {
            return Err(RunError::InvalidInput(anyhow::anyhow!(
                "--requests and --duration are mutually exclusive"
            )));
        }
    };

    let cfg = BenchmarkConfig {
        job_id: args.job.job_id.clone(),
        image: args.job.image.clone(),
        suite: args.suite.clone(),
        benchmark: args.benchmark.clone(),
        workers: args.workers,
        mode,
        parallelism: args.parallelism,
        clients: args.clients,
        args: suite_args(&args.job.args),
        max_latency: args.max_latency,
        timeout: args.job.timeout,
        error_policy: args.error_policy,
        keep: args.job.keep,
        env: env_map(&args.job.env),
    };
    cfg.validate()
        .map_err(|e| RunError::InvalidInput(e.into()))?;
    Ok(cfg)
}

pub(crate) fn simulation_config(args: &SimulateArgs) -> Result<SimulationConfig, RunError> {
    let cfg = SimulationConfig {
        job_id: args.job.job_id.clone(),
        image: args.job.image.clone(),
        simulation: args.simulation.clone(),
        simulators: args.simulators,
        rates: args.rates.iter().cloned().collect(),
        jitters: args.jitters.iter().cloned().collect(),
        duration: args.duration,
        args: suite_args(&args.job.args),
        model: args.model.clone(),
        timeout: args.job.timeout,
        keep: args.job.keep,
        env: env_map(&args.job.env),
    };
    cfg.validate()
        .map_err(|e| RunError::InvalidInput(e.into()))?;
    Ok(cfg)
}

fn coordinator(registry: Arc<Registry>, job: &JobArgs) -> Result<Coordinator, RunError> {
    let (provisioner, connector): (Arc<dyn ClusterProvisioner>, Arc<dyn WorkerConnector>) =
        match job.provisioner {
            ProvisionerKind::Local => {
                let cluster = Arc::new(LocalCluster::new(registry.clone()));
                (cluster.clone(), cluster)
            }
            ProvisionerKind::Process => {
                let exe = std::env::current_exe()
                    .context("locate the fleet executable for worker processes")
                    .map_err(RunError::RuntimeError)?;
                let p = Arc::new(ProcessProvisioner::new(exe));
                (p.clone(), p)
            }
        };
    Ok(Coordinator::new(registry, provisioner, connector))
}

/// The external checker when one is given, the built-in models otherwise.
fn model_checker(args: &SimulateArgs) -> Option<Arc<dyn ModelChecker>> {
    args.model.as_ref()?;
    Some(match &args.model_checker {
        Some(path) => Arc::new(CommandChecker::new(path.clone())),
        None => Arc::new(model::builtin()),
    })
}

pub(crate) async fn bench(args: BenchArgs) -> Result<ExitCode, RunError> {
    let cfg = bench_config(&args)?;
    let registry = Arc::new(suites::registry());
    let jobs = registry.resolve_suites(cfg.suite.as_deref())?;

    let out = output::formatter(args.job.output);
    out.print_header(&cfg.job_id, &jobs);

    let outcome = coordinator(registry, &args.job)?
        .run_benchmarks(&cfg)
        .await?;
    out.print_outcome(&outcome).map_err(RunError::RuntimeError)?;
    Ok(outcome.exit_code())
}

pub(crate) async fn simulate(args: SimulateArgs) -> Result<ExitCode, RunError> {
    let cfg = simulation_config(&args)?;
    let registry = Arc::new(suites::registry());
    let jobs = registry.resolve_simulations(cfg.simulation.as_deref())?;

    let register: Arc<dyn Register> = match &args.traces {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("create trace file {}", path.display()))
                .map_err(RunError::InvalidInput)?;
            Arc::new(JsonLinesRegister::new(file))
        }
        None => Arc::new(Tee::new(Vec::new())),
    };

    let out = output::formatter(args.job.output);
    out.print_header(&cfg.job_id, &jobs);

    let mut coordinator = coordinator(registry, &args.job)?;
    if let Some(checker) = model_checker(&args) {
        coordinator = coordinator.with_model_checker(checker);
    }
    let outcome = coordinator.run_simulations(&cfg, register).await?;
    out.print_outcome(&outcome).map_err(RunError::RuntimeError)?;
    Ok(outcome.exit_code())
}

pub(crate) fn list() -> Result<ExitCode, RunError> {
    let registry = suites::registry();
    println!("benchmark suites:");
    for suite in registry.suite_names() {
        let benchmarks = registry.benchmark_names(suite)?;
        println!("  {suite}: {}", benchmarks.join(", "));
    }
    println!("simulations:");
    for simulation in registry.simulation_names() {
        println!("  {simulation}");
    }
    println!("models:");
    for name in model::builtin().names() {
        println!("  {name}");
    }
    Ok(ExitCode::Success)
}
