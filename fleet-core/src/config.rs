use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::args::{join_map, split_map};
use crate::{Args, Error, Result};

/// Environment variable names of the process bootstrap.
pub mod env {
    pub const ROLE: &str = "FLEET_ROLE";
    pub const JOB: &str = "FLEET_JOB";
    pub const IMAGE: &str = "FLEET_IMAGE";
    pub const SUITE: &str = "FLEET_SUITE";
    pub const BENCHMARK: &str = "FLEET_BENCHMARK";
    pub const SIMULATION: &str = "FLEET_SIMULATION";
    pub const WORKERS: &str = "FLEET_WORKERS";
    pub const WORKER: &str = "FLEET_WORKER";
    pub const REQUESTS: &str = "FLEET_REQUESTS";
    pub const DURATION: &str = "FLEET_DURATION";
    pub const PARALLELISM: &str = "FLEET_PARALLELISM";
    pub const CLIENTS: &str = "FLEET_CLIENTS";
    pub const MAX_LATENCY: &str = "FLEET_MAX_LATENCY";
    pub const ERROR_POLICY: &str = "FLEET_ERROR_POLICY";
    pub const TIMEOUT: &str = "FLEET_TIMEOUT";
    pub const SIMULATORS: &str = "FLEET_SIMULATORS";
    pub const RATES: &str = "FLEET_RATES";
    pub const JITTERS: &str = "FLEET_JITTERS";
    pub const ARGS: &str = "FLEET_ARGS";
    pub const MODEL: &str = "FLEET_MODEL";
    pub const ADDR: &str = "FLEET_ADDR";
}

/// Role a process is started in through `FLEET_ROLE`. Coordinators are the
/// `bench`/`simulate` commands and need no bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Worker,
}

/// How much work a benchmark run performs. The two modes are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestMode {
    Requests(u64),
    Duration(Duration),
}

impl RequestMode {
    /// Share of the workload handed to one of `workers` workers.
    ///
    /// Count mode splits evenly with integer division; duration mode is unchanged.
    #[must_use]
    pub fn split(self, workers: usize) -> Self {
        match self {
            Self::Requests(n) => Self::Requests(n / workers.max(1) as u64),
            Self::Duration(d) => Self::Duration(d),
        }
    }
}

impl Default for RequestMode {
    fn default() -> Self {
        Self::Requests(1000)
    }
}

/// What a benchmark run does when an individual call fails.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Drop the error; the call still counts as a request.
    Ignore,

    /// Count the error in the result and carry on.
    #[default]
    Record,

    /// Stop issuing calls and fail the run.
    Abort,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkConfig {
    pub job_id: String,
    pub image: String,
    /// `None` runs every registered suite.
    pub suite: Option<String>,
    /// `None` runs every benchmark of the suite.
    pub benchmark: Option<String>,
    pub workers: usize,
    pub mode: RequestMode,
    pub parallelism: usize,
    pub clients: usize,
    pub args: Args,
    pub max_latency: Option<Duration>,
    pub timeout: Option<Duration>,
    pub error_policy: ErrorPolicy,
    /// Skip provisioner teardown (debugging).
    pub keep: bool,
    pub env: BTreeMap<String, String>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            job_id: "fleet".to_string(),
            image: "fleet".to_string(),
            suite: None,
            benchmark: None,
            workers: 1,
            mode: RequestMode::default(),
            parallelism: 1,
            clients: 1,
            args: Args::new(),
            max_latency: None,
            timeout: None,
            error_policy: ErrorPolicy::default(),
            keep: false,
            env: BTreeMap::new(),
        }
    }
}

impl BenchmarkConfig {
    pub fn validate(&self) -> Result<()> {
        positive("workers", self.workers)?;
        positive("parallelism", self.parallelism)?;
        positive("clients", self.clients)?;
        match self.mode {
            RequestMode::Requests(0) => Err(Error::invalid_config(
                "`requests` must be a positive integer",
            )),
            RequestMode::Duration(d) if d.is_zero() => Err(Error::invalid_config(
                "`duration` must be a positive duration",
            )),
            RequestMode::Requests(n) if n < self.workers as u64 => Err(Error::invalid_config(
                format!("`requests` ({n}) must be at least the number of workers ({})", self.workers),
            )),
            _ => Ok(()),
        }
    }

    /// Environment handed to every provisioned process of this job.
    #[must_use]
    pub fn to_env(&self) -> BTreeMap<String, String> {
        let mut out = self.env.clone();
        out.insert(env::JOB.into(), self.job_id.clone());
        out.insert(env::IMAGE.into(), self.image.clone());
        out.insert(env::WORKERS.into(), self.workers.to_string());
        out.insert(env::PARALLELISM.into(), self.parallelism.to_string());
        out.insert(env::CLIENTS.into(), self.clients.to_string());
        out.insert(env::ERROR_POLICY.into(), self.error_policy.to_string());
        out.insert(env::ARGS.into(), self.args.encode());
        match self.mode {
            RequestMode::Requests(n) => out.insert(env::REQUESTS.into(), n.to_string()),
            RequestMode::Duration(d) => out.insert(env::DURATION.into(), fmt_duration(d)),
        };
        if let Some(suite) = &self.suite {
            out.insert(env::SUITE.into(), suite.clone());
        }
        if let Some(benchmark) = &self.benchmark {
            out.insert(env::BENCHMARK.into(), benchmark.clone());
        }
        if let Some(d) = self.max_latency {
            out.insert(env::MAX_LATENCY.into(), fmt_duration(d));
        }
        if let Some(d) = self.timeout {
            out.insert(env::TIMEOUT.into(), fmt_duration(d));
        }
        out
    }

    pub fn from_env(vars: &BTreeMap<String, String>) -> Result<Self> {
        let dflt = Self::default();
        let mode = match (get(vars, env::REQUESTS), get(vars, env::DURATION)) {
            (Some(_), Some(_)) => {
                return Err(Error::invalid_config(format!(
                    "`{}` and `{}` are mutually exclusive",
                    env::REQUESTS,
                    env::DURATION
                )));
            }
            (Some(raw), None) => RequestMode::Requests(parse(env::REQUESTS, raw)?),
            (None, Some(raw)) => RequestMode::Duration(parse_duration(env::DURATION, raw)?),
            (None, None) => dflt.mode,
        };

        let cfg = Self {
            job_id: get(vars, env::JOB).map_or(dflt.job_id, str::to_string),
            image: get(vars, env::IMAGE).map_or(dflt.image, str::to_string),
            suite: get(vars, env::SUITE).map(str::to_string),
            benchmark: get(vars, env::BENCHMARK).map(str::to_string),
            workers: opt(vars, env::WORKERS)?.unwrap_or(dflt.workers),
            mode,
            parallelism: opt(vars, env::PARALLELISM)?.unwrap_or(dflt.parallelism),
            clients: opt(vars, env::CLIENTS)?.unwrap_or(dflt.clients),
            args: get(vars, env::ARGS).map(Args::decode).unwrap_or_default(),
            max_latency: opt_duration(vars, env::MAX_LATENCY)?,
            timeout: opt_duration(vars, env::TIMEOUT)?,
            error_policy: opt(vars, env::ERROR_POLICY)?.unwrap_or_default(),
            keep: false,
            env: BTreeMap::new(),
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub job_id: String,
    pub image: String,
    /// `None` runs every registered simulation.
    pub simulation: Option<String>,
    pub simulators: usize,
    /// Per-operation rate overrides.
    pub rates: BTreeMap<String, Duration>,
    /// Per-operation jitter factor overrides.
    pub jitters: BTreeMap<String, f64>,
    pub duration: Duration,
    pub args: Args,
    /// Model the recorded traces are checked against once the simulators stop.
    pub model: Option<String>,
    pub timeout: Option<Duration>,
    pub keep: bool,
    pub env: BTreeMap<String, String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            job_id: "fleet".to_string(),
            image: "fleet".to_string(),
            simulation: None,
            simulators: 1,
            rates: BTreeMap::new(),
            jitters: BTreeMap::new(),
            duration: Duration::from_secs(60),
            args: Args::new(),
            model: None,
            timeout: None,
            keep: false,
            env: BTreeMap::new(),
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        positive("simulators", self.simulators)?;
        if self.duration.is_zero() {
            return Err(Error::invalid_config("`duration` must be a positive duration"));
        }
        if let Some((name, _)) = self.rates.iter().find(|(_, rate)| rate.is_zero()) {
            return Err(Error::invalid_config(format!(
                "rate of operation `{name}` must be a positive duration"
            )));
        }
        if let Some((name, _)) = self
            .jitters
            .iter()
            .find(|(_, j)| !j.is_finite() || **j < 0.0)
        {
            return Err(Error::invalid_config(format!(
                "jitter of operation `{name}` must be a non-negative number"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_env(&self) -> BTreeMap<String, String> {
        let rates: BTreeMap<&str, String> = self
            .rates
            .iter()
            .map(|(k, v)| (k.as_str(), fmt_duration(*v)))
            .collect();
        let jitters: BTreeMap<&str, String> = self
            .jitters
            .iter()
            .map(|(k, v)| (k.as_str(), v.to_string()))
            .collect();

        let mut out = self.env.clone();
        out.insert(env::JOB.into(), self.job_id.clone());
        out.insert(env::IMAGE.into(), self.image.clone());
        out.insert(env::WORKERS.into(), self.simulators.to_string());
        out.insert(env::SIMULATORS.into(), self.simulators.to_string());
        out.insert(env::DURATION.into(), fmt_duration(self.duration));
        out.insert(env::RATES.into(), join_map(&rates));
        out.insert(env::JITTERS.into(), join_map(&jitters));
        out.insert(env::ARGS.into(), self.args.encode());
        if let Some(simulation) = &self.simulation {
            out.insert(env::SIMULATION.into(), simulation.clone());
        }
        if let Some(model) = &self.model {
            out.insert(env::MODEL.into(), model.clone());
        }
        if let Some(d) = self.timeout {
            out.insert(env::TIMEOUT.into(), fmt_duration(d));
        }
        out
    }

    pub fn from_env(vars: &BTreeMap<String, String>) -> Result<Self> {
        let dflt = Self::default();
        let rates = get(vars, env::RATES)
            .map(split_map)
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| parse_duration(env::RATES, &v).map(|d| (k, d)))
            .collect::<Result<_>>()?;
        let jitters = get(vars, env::JITTERS)
            .map(split_map)
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| parse::<f64>(env::JITTERS, &v).map(|j| (k, j)))
            .collect::<Result<_>>()?;

        let cfg = Self {
            job_id: get(vars, env::JOB).map_or(dflt.job_id, str::to_string),
            image: get(vars, env::IMAGE).map_or(dflt.image, str::to_string),
            simulation: get(vars, env::SIMULATION).map(str::to_string),
            simulators: opt(vars, env::SIMULATORS)?.unwrap_or(dflt.simulators),
            rates,
            jitters,
            duration: opt_duration(vars, env::DURATION)?.unwrap_or(dflt.duration),
            args: get(vars, env::ARGS).map(Args::decode).unwrap_or_default(),
            model: get(vars, env::MODEL).map(str::to_string),
            timeout: opt_duration(vars, env::TIMEOUT)?,
            keep: false,
            env: BTreeMap::new(),
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

/// The suite or simulation a provisioned worker is dedicated to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobScope {
    Suite(String),
    Simulation(String),
}

impl JobScope {
    /// Reads and validates the job configuration a coordinator hands to its workers.
    ///
    /// `None` when the environment names neither a suite nor a simulation.
    pub fn from_env(vars: &BTreeMap<String, String>) -> Result<Option<Self>> {
        if let Some(simulation) = get(vars, env::SIMULATION) {
            SimulationConfig::from_env(vars)?;
            return Ok(Some(Self::Simulation(simulation.to_string())));
        }
        if let Some(suite) = get(vars, env::SUITE) {
            BenchmarkConfig::from_env(vars)?;
            return Ok(Some(Self::Suite(suite.to_string())));
        }
        Ok(None)
    }
}

impl std::fmt::Display for JobScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Suite(name) => write!(f, "suite `{name}`"),
            Self::Simulation(name) => write!(f, "simulation `{name}`"),
        }
    }
}

/// Identity of one provisioned worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerBootstrap {
    pub job_id: String,
    pub index: usize,
    pub addr: SocketAddr,
    pub scope: Option<JobScope>,
}

impl WorkerBootstrap {
    pub fn from_env(vars: &BTreeMap<String, String>) -> Result<Self> {
        // `worker` is the only role that parses.
        let Role::Worker = required::<Role>(vars, env::ROLE)?;
        Ok(Self {
            job_id: get(vars, env::JOB).unwrap_or("fleet").to_string(),
            index: required(vars, env::WORKER)?,
            addr: required(vars, env::ADDR)?,
            scope: JobScope::from_env(vars)?,
        })
    }

    #[must_use]
    pub fn to_env(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::from([
            (env::ROLE.to_string(), Role::Worker.to_string()),
            (env::JOB.to_string(), self.job_id.clone()),
            (env::WORKER.to_string(), self.index.to_string()),
            (env::ADDR.to_string(), self.addr.to_string()),
        ]);
        match &self.scope {
            Some(JobScope::Suite(name)) => out.insert(env::SUITE.to_string(), name.clone()),
            Some(JobScope::Simulation(name)) => {
                out.insert(env::SIMULATION.to_string(), name.clone())
            }
            None => None,
        };
        out
    }
}

fn fmt_duration(d: Duration) -> String {
    humantime::format_duration(d).to_string()
}

/// Blank values count as unset. Values are returned untrimmed so encoded maps keep
/// surrounding whitespace; scalar parsers trim on their own.
fn get<'a>(vars: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    vars.get(key)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| Error::invalid_config(format!("`{key}` has invalid value `{raw}`")))
}

fn parse_duration(key: &str, raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw.trim())
        .map_err(|err| Error::invalid_config(format!("`{key}` has invalid duration `{raw}`: {err}")))
}

fn opt<T: FromStr>(vars: &BTreeMap<String, String>, key: &str) -> Result<Option<T>> {
    get(vars, key).map(|raw| parse(key, raw)).transpose()
}

fn opt_duration(vars: &BTreeMap<String, String>, key: &str) -> Result<Option<Duration>> {
    get(vars, key).map(|raw| parse_duration(key, raw)).transpose()
}

fn required<T: FromStr>(vars: &BTreeMap<String, String>, key: &str) -> Result<T> {
    opt(vars, key)?.ok_or_else(|| Error::invalid_config(format!("`{key}` is required")))
}

fn positive(name: &str, v: usize) -> Result<()> {
    if v == 0 {
        return Err(Error::invalid_config(format!(
            "`{name}` must be a positive integer"
        )));
    }
    Ok(())
}
