use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use fleet_value::Value;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Duration, Instant};

use super::gate::PhaseBudget;
use super::suite::{CallFn, Workload};
use crate::{Error, ErrorPolicy, ExitCode, LatencySummary, RequestMode, Result};

/// Argument tuples pre-generated per phase in duration mode; submission cycles through them.
const DURATION_ARG_POOL: usize = 1024;

/// Result buffer in duration mode, where the request count is not known upfront.
const DURATION_RESULT_BUFFER: usize = 4096;

/// Upper bound of the count-mode result buffer; the collector drains concurrently.
const MAX_RESULT_BUFFER: usize = 1 << 20;

/// How one worker executes a benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    pub mode: RequestMode,
    pub parallelism: usize,
    pub clients: usize,
    pub max_latency: Option<Duration>,
    pub error_policy: ErrorPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: RequestMode::default(),
            parallelism: 1,
            clients: 1,
            max_latency: None,
            error_policy: ErrorPolicy::default(),
        }
    }
}

impl RunOptions {
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(Error::invalid_config("`parallelism` must be a positive integer"));
        }
        if self.clients == 0 {
            return Err(Error::invalid_config("`clients` must be a positive integer"));
        }
        match self.mode {
            RequestMode::Requests(0) => Err(Error::invalid_config(
                "`requests` must be a positive integer",
            )),
            RequestMode::Duration(d) if d.is_zero() => Err(Error::invalid_config(
                "`duration` must be a positive duration",
            )),
            _ => Ok(()),
        }
    }

    fn queue_capacity(&self) -> usize {
        self.clients.saturating_mul(self.parallelism)
    }

    fn result_capacity(&self) -> usize {
        match self.mode {
            RequestMode::Requests(n) => usize::try_from(n)
                .unwrap_or(usize::MAX)
                .clamp(1, MAX_RESULT_BUFFER),
            RequestMode::Duration(_) => DURATION_RESULT_BUFFER,
        }
    }

    fn arg_count(&self) -> usize {
        match self.mode {
            RequestMode::Requests(n) => usize::try_from(n).unwrap_or(usize::MAX),
            RequestMode::Duration(_) => DURATION_ARG_POOL,
        }
    }
}

/// Outcome of the latency threshold check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    #[default]
    Passed,
    ThresholdExceeded {
        limit: Duration,
        observed: Duration,
    },
}

impl Verdict {
    #[must_use]
    pub fn check(max_latency: Option<Duration>, observed: Duration) -> Self {
        match max_latency {
            Some(limit) if observed > limit => Self::ThresholdExceeded { limit, observed },
            _ => Self::Passed,
        }
    }

    #[must_use]
    pub fn exit_code(self) -> ExitCode {
        match self {
            Self::Passed => ExitCode::Success,
            Self::ThresholdExceeded { .. } => ExitCode::ThresholdExceeded,
        }
    }
}

/// Measured phase of one benchmark run.
///
/// `requests` always equals `latency.count`: failed calls are timed as well.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub requests: u64,
    pub errors: u64,
    pub duration: Duration,
    pub latency: LatencySummary,
    pub verdict: Verdict,
}

impl RunResult {
    /// Requests per second over the wall-clock duration.
    #[must_use]
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.requests as f64 / secs
        } else {
            0.0
        }
    }

    /// Merges results of the same benchmark run on several workers.
    ///
    /// Requests and errors add up, the duration is the slowest worker's, and
    /// latencies are averaged across workers.
    #[must_use]
    pub fn combine(parts: &[Self], max_latency: Option<Duration>) -> Option<Self> {
        let latencies: Vec<_> = parts.iter().map(|r| r.latency).collect();
        let latency = LatencySummary::average(&latencies)?;
        Some(Self {
            requests: parts.iter().map(|r| r.requests).sum(),
            errors: parts.iter().map(|r| r.errors).sum(),
            duration: parts.iter().map(|r| r.duration).max().unwrap_or_default(),
            latency,
            verdict: Verdict::check(max_latency, latency.max),
        })
    }
}

struct Sample {
    elapsed: Duration,
    failed: bool,
}

struct PhaseOutcome {
    samples: Vec<Duration>,
    errors: u64,
    elapsed: Duration,
    first_error: Option<String>,
}

/// Runs a warm-up phase (timing discarded) followed by the measured phase.
pub async fn run_benchmark(workload: &mut Workload, opts: &RunOptions) -> Result<RunResult> {
    opts.validate()?;
    workload.params.reset()?;

    let mut calls = Vec::with_capacity(opts.clients);
    for client in 0..opts.clients {
        let call = (workload.connect)()
            .await
            .map_err(|err| Error::setup(format!("client {client}: {err:#}")))?;
        calls.push(call);
    }

    let warmup_args: Arc<[Vec<Value>]> = workload.params.generate(opts.arg_count())?.into();
    let warmup = run_phase(&calls, warmup_args, opts).await?;
    if let Some(err) = warmup.first_error {
        return Err(Error::ExecutionFailed(err));
    }
    tracing::debug!(
        requests = warmup.samples.len(),
        elapsed = ?warmup.elapsed,
        "warm-up finished"
    );

    let args: Arc<[Vec<Value>]> = workload.params.generate(opts.arg_count())?.into();
    let measured = run_phase(&calls, args, opts).await?;
    if let Some(err) = measured.first_error {
        return Err(Error::ExecutionFailed(err));
    }

    let latency = LatencySummary::from_samples(measured.samples)
        .ok_or_else(|| Error::execution("no request completed in the measured phase"))?;

    Ok(RunResult {
        requests: latency.count,
        errors: measured.errors,
        duration: measured.elapsed,
        latency,
        verdict: Verdict::check(opts.max_latency, latency.max),
    })
}

async fn run_phase(
    calls: &[CallFn],
    args: Arc<[Vec<Value>]>,
    opts: &RunOptions,
) -> Result<PhaseOutcome> {
    let (arg_tx, arg_rx) = mpsc::channel::<Vec<Value>>(opts.queue_capacity());
    let arg_rx = Arc::new(tokio::sync::Mutex::new(arg_rx));
    let (result_tx, mut result_rx) = mpsc::channel::<Sample>(opts.result_capacity());
    let aborted = Arc::new(AtomicBool::new(false));
    let first_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let policy = opts.error_policy;

    let collector = tokio::spawn(async move {
        let mut samples = Vec::new();
        let mut errors = 0_u64;
        while let Some(sample) = result_rx.recv().await {
            samples.push(sample.elapsed);
            if sample.failed {
                errors += 1;
            }
        }
        (samples, errors)
    });

    // Dropping the phase aborts its clients, so a cancelled run issues no further calls.
    let mut clients = JoinSet::new();
    for call in calls {
        for _ in 0..opts.parallelism {
            let call = call.clone();
            let arg_rx = arg_rx.clone();
            let result_tx = result_tx.clone();
            let aborted = aborted.clone();
            let first_error = first_error.clone();

            clients.spawn(async move {
                loop {
                    let next = { arg_rx.lock().await.recv().await };
                    let Some(args) = next else {
                        break;
                    };
                    if aborted.load(Ordering::Relaxed) {
                        continue;
                    }

                    let started = Instant::now();
                    let res = call(args).await;
                    let elapsed = started.elapsed();

                    let failed = match res {
                        Ok(()) => false,
                        Err(err) => {
                            if policy != ErrorPolicy::Ignore {
                                tracing::debug!(error = %format!("{err:#}"), "call failed");
                            }
                            if policy == ErrorPolicy::Abort {
                                aborted.store(true, Ordering::Relaxed);
                                let mut slot = first_error
                                    .lock()
                                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                                slot.get_or_insert_with(|| format!("{err:#}"));
                            }
                            true
                        }
                    };

                    let sample = Sample {
                        elapsed,
                        failed: failed && policy != ErrorPolicy::Ignore,
                    };
                    if result_tx.send(sample).await.is_err() {
                        break;
                    }
                }
            });
        }
    }
    drop(result_tx);

    let started = Instant::now();
    let mut budget = PhaseBudget::new(opts.mode, started);

    let mut i = 0_usize;
    while budget.admit() {
        if aborted.load(Ordering::Relaxed) {
            break;
        }
        let tuple = args[i % args.len()].clone();
        if arg_tx.send(tuple).await.is_err() {
            break;
        }
        i += 1;
    }
    drop(arg_tx);

    while let Some(joined) = clients.join_next().await {
        joined?;
    }
    let (samples, errors) = collector.await?;
    let elapsed = started.elapsed();

    let first_error = first_error
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();

    Ok(PhaseOutcome {
        samples,
        errors,
        elapsed,
        first_error,
    })
}
