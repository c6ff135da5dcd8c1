use std::io::Write as _;
use std::time::Duration;

use fleet_core::{BenchmarkReport, JobOutput, JobReport, LatencySummary, RunOutcome, Verdict};
use serde::Serialize;

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _run: &str, _jobs: &[String]) {}

    fn print_outcome(&self, outcome: &RunOutcome) -> anyhow::Result<()> {
        let line = build_summary_line(outcome);
        let mut out = std::io::stdout().lock();
        serde_json::to_writer(&mut out, &line)?;
        writeln!(out)?;
        out.flush()?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine<'a> {
    pub kind: &'static str,
    pub exit_code: i32,
    pub jobs: Vec<JsonJob<'a>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonJob<'a> {
    pub job_id: &'a str,
    pub name: &'a str,
    pub exit_code: i32,
    pub elapsed_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'a fleet_core::Error>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub benchmarks: Vec<JsonBenchmark<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulation: Option<JsonSimulation<'a>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonBenchmark<'a> {
    pub suite: &'a str,
    pub benchmark: &'a str,
    pub workers: usize,
    pub requests: u64,
    pub errors: u64,
    pub duration_secs: f64,
    pub requests_per_sec: f64,
    pub latency_us: JsonLatency,
    pub threshold_exceeded: bool,
}

/// Latency figures in microseconds.
#[derive(Debug, Serialize)]
pub(crate) struct JsonLatency {
    pub count: u64,
    pub mean: u64,
    pub min: u64,
    pub max: u64,
    pub p1: u64,
    pub p5: u64,
    pub p25: u64,
    pub p50: u64,
    pub p75: u64,
    pub p95: u64,
    pub p99: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSimulation<'a> {
    pub simulation: &'a str,
    pub traces: u64,
    pub failures: u64,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
}

fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

fn build_latency(l: &LatencySummary) -> JsonLatency {
    JsonLatency {
        count: l.count,
        mean: micros(l.mean),
        min: micros(l.min),
        max: micros(l.max),
        p1: micros(l.p1),
        p5: micros(l.p5),
        p25: micros(l.p25),
        p50: micros(l.p50),
        p75: micros(l.p75),
        p95: micros(l.p95),
        p99: micros(l.p99),
    }
}

fn build_benchmark(report: &BenchmarkReport) -> JsonBenchmark<'_> {
    let r = &report.result;
    JsonBenchmark {
        suite: &report.suite,
        benchmark: &report.benchmark,
        workers: report.workers.len(),
        requests: r.requests,
        errors: r.errors,
        duration_secs: r.duration.as_secs_f64(),
        requests_per_sec: r.throughput(),
        latency_us: build_latency(&r.latency),
        threshold_exceeded: matches!(r.verdict, Verdict::ThresholdExceeded { .. }),
    }
}

fn build_job(job: &JobReport) -> JsonJob<'_> {
    let (benchmarks, simulation): (Vec<_>, _) = match &job.output {
        JobOutput::Benchmarks { reports } => (reports.iter().map(build_benchmark).collect(), None),
        JobOutput::Simulation { report } => (
            Vec::new(),
            report.as_ref().map(|r| JsonSimulation {
                simulation: &r.simulation,
                traces: r.traces,
                failures: r.failures,
                duration_secs: r.duration.as_secs_f64(),
                model: r.model.as_deref(),
            }),
        ),
    };
    JsonJob {
        job_id: &job.job_id,
        name: &job.name,
        exit_code: job.exit_code.as_i32(),
        elapsed_secs: job.elapsed.as_secs_f64(),
        error: job.error.as_ref(),
        benchmarks,
        simulation,
    }
}

pub(crate) fn build_summary_line(outcome: &RunOutcome) -> JsonSummaryLine<'_> {
    JsonSummaryLine {
        kind: "summary",
        exit_code: outcome.exit_code().as_i32(),
        jobs: outcome.jobs.iter().map(build_job).collect(),
    }
}
