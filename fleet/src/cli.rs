use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use fleet_core::ErrorPolicy;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }
    humantime::parse_duration(s)
        .map_err(|err| format!("invalid duration '{s}': {err} (expected e.g. 10s, 250ms, 1m)"))
}

fn parse_positive_duration(input: &str) -> Result<Duration, String> {
    let d = parse_duration(input)?;
    if d.is_zero() {
        return Err(format!("duration '{}' must be positive", input.trim()));
    }
    Ok(d)
}

fn split_key_value(input: &str) -> Result<(String, &str), String> {
    let (k, v) = input
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{input}'"))?;
    let k = k.trim();
    if k.is_empty() {
        return Err(format!("empty key in '{input}'"));
    }
    Ok((k.to_string(), v))
}

fn parse_arg(input: &str) -> Result<(String, String), String> {
    split_key_value(input).map(|(k, v)| (k, v.to_string()))
}

fn parse_rate(input: &str) -> Result<(String, Duration), String> {
    let (k, v) = split_key_value(input)?;
    Ok((k, parse_positive_duration(v)?))
}

fn parse_jitter(input: &str) -> Result<(String, f64), String> {
    let (k, v) = split_key_value(input)?;
    let j: f64 = v
        .trim()
        .parse()
        .map_err(|_| format!("invalid jitter '{v}' (expected a number, e.g. 0.5)"))?;
    if !j.is_finite() || j <= 0.0 {
        return Err(format!("jitter '{v}' must be a positive number"));
    }
    Ok((k, j))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary.
    HumanReadable,
    /// One JSON document per run on stdout.
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProvisionerKind {
    /// Workers run inside this process.
    Local,
    /// Each worker is a `fleet worker` child process on a loopback port.
    Process,
}

#[derive(Debug, Parser)]
#[command(
    name = "fleet",
    author,
    version,
    about = "Distributed benchmark and simulation runner",
    long_about = "fleet provisions workers, drives registered benchmark suites or simulations through their lifecycle on every worker, and aggregates the results.\n\nEach suite runs as an isolated job; independent jobs run in parallel.",
    after_help = "Examples:\n  fleet bench --suite kv --requests 10000 --parallelism 8\n  fleet bench --workers 4 --duration 30s --provisioner process\n  fleet simulate --simulation counter --duration 1m --rate increment=50ms --traces traces.ndjson\n  FLEET_ROLE=worker FLEET_WORKER=0 FLEET_ADDR=127.0.0.1:7000 fleet worker"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run benchmark suites
    Bench(BenchArgs),

    /// Run simulations and collect their traces
    Simulate(SimulateArgs),

    /// Serve the worker control plane (configured from FLEET_* environment variables)
    Worker,

    /// List registered suites, benchmarks and simulations
    List,
}

#[derive(Debug, Args)]
pub struct JobArgs {
    /// Run identifier; each job is named `<run id>-<suite>`
    #[arg(long, default_value = "fleet", env = "FLEET_JOB")]
    pub job_id: String,

    /// Worker image handed to the provisioner
    #[arg(long, default_value = "fleet", env = "FLEET_IMAGE")]
    pub image: String,

    /// How workers are provisioned
    #[arg(long, value_enum, default_value_t = ProvisionerKind::Local)]
    pub provisioner: ProvisionerKind,

    /// Suite arguments (repeatable, KEY=VALUE)
    #[arg(long = "arg", value_name = "KEY=VALUE", value_parser = parse_arg)]
    pub args: Vec<(String, String)>,

    /// Extra environment for worker processes (repeatable, KEY=VALUE)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_arg)]
    pub env: Vec<(String, String)>,

    /// Fail a job that has not finished after this long (e.g. 5m)
    #[arg(long, value_parser = parse_positive_duration)]
    pub timeout: Option<Duration>,

    /// Keep the workers of a failed job for debugging
    #[arg(long)]
    pub keep: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct BenchArgs {
    /// Suite to run (default: every registered suite)
    #[arg(long, env = "FLEET_SUITE")]
    pub suite: Option<String>,

    /// Benchmark to run (default: every benchmark of the suite; requires --suite)
    #[arg(long, requires = "suite", env = "FLEET_BENCHMARK")]
    pub benchmark: Option<String>,

    /// Number of workers per job
    #[arg(long, default_value_t = 1, env = "FLEET_WORKERS")]
    pub workers: usize,

    /// Total measured requests, split evenly across workers
    #[arg(long, conflicts_with = "duration", env = "FLEET_REQUESTS")]
    pub requests: Option<u64>,

    /// Measured run time per worker (e.g. 10s, 250ms, 1m)
    #[arg(long, value_parser = parse_positive_duration, env = "FLEET_DURATION")]
    pub duration: Option<Duration>,

    /// Concurrent calls per client on each worker
    #[arg(long, default_value_t = 1, env = "FLEET_PARALLELISM")]
    pub parallelism: usize,

    /// Clients per worker
    #[arg(long, default_value_t = 1, env = "FLEET_CLIENTS")]
    pub clients: usize,

    /// Fail the benchmark when the slowest call exceeds this (e.g. 5ms)
    #[arg(long, value_parser = parse_duration, env = "FLEET_MAX_LATENCY")]
    pub max_latency: Option<Duration>,

    /// What to do with failed calls: ignore, record or abort
    #[arg(long, default_value_t = ErrorPolicy::Record, env = "FLEET_ERROR_POLICY")]
    pub error_policy: ErrorPolicy,

    #[command(flatten)]
    pub job: JobArgs,
}

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Simulation to run (default: every registered simulation)
    #[arg(long, env = "FLEET_SIMULATION")]
    pub simulation: Option<String>,

    /// Number of simulator replicas per job
    #[arg(long, default_value_t = 1, env = "FLEET_SIMULATORS")]
    pub simulators: usize,

    /// How long the simulators run (e.g. 30s)
    #[arg(long, default_value = "1m", value_parser = parse_positive_duration)]
    pub duration: Duration,

    /// Operation rate override (repeatable, NAME=DURATION)
    #[arg(long = "rate", value_name = "NAME=DURATION", value_parser = parse_rate)]
    pub rates: Vec<(String, Duration)>,

    /// Operation jitter override (repeatable, NAME=FACTOR)
    #[arg(long = "jitter", value_name = "NAME=FACTOR", value_parser = parse_jitter)]
    pub jitters: Vec<(String, f64)>,

    /// Write traces as NDJSON to this file
    #[arg(long)]
    pub traces: Option<PathBuf>,

    /// Check the recorded traces against this model once the simulators stop
    #[arg(long, env = "FLEET_MODEL")]
    pub model: Option<String>,

    /// External model checker, run as `<PATH> <MODEL>` with NDJSON traces on stdin
    #[arg(long, value_name = "PATH", requires = "model")]
    pub model_checker: Option<PathBuf>,

    #[command(flatten)]
    pub job: JobArgs,
}
