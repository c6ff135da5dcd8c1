use std::fmt::Write as _;

use fleet_core::{BenchmarkReport, JobOutput, JobReport, RunOutcome, SimulationReport, Verdict};

mod format;

use format::{format_duration, format_rate};

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput;

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, run: &str, jobs: &[String]) {
        println!("run: {run}");
        for job in jobs {
            println!("job: {run}-{job}");
        }
        if !jobs.is_empty() {
            println!();
        }
    }

    fn print_outcome(&self, outcome: &RunOutcome) -> anyhow::Result<()> {
        print!("{}", render(outcome));

        let failed: Vec<_> = outcome.jobs.iter().filter(|j| j.error.is_some()).collect();
        if !failed.is_empty() {
            eprintln!("jobs failed:");
            for job in failed {
                if let Some(err) = &job.error {
                    eprintln!("  {}: {err}", job.job_id);
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn render(outcome: &RunOutcome) -> String {
    let mut out = String::new();
    if outcome.jobs.is_empty() {
        out.push_str("summary: no jobs\n");
        return out;
    }

    out.push_str("summary\n");
    for job in &outcome.jobs {
        render_job(job, &mut out);
        out.push('\n');
    }
    writeln!(out, "exit code: {}", outcome.exit_code().as_i32()).ok();
    out
}

fn render_job(job: &JobReport, out: &mut String) {
    let status = if job.error.is_some() { "failed" } else { "ok" };
    writeln!(
        out,
        "job: {} ({}) {status} in {}",
        job.job_id,
        job.name,
        format_duration(job.elapsed)
    )
    .ok();

    match &job.output {
        JobOutput::Benchmarks { reports } => {
            for report in reports {
                render_benchmark(report, out);
            }
        }
        JobOutput::Simulation { report } => {
            if let Some(report) = report {
                render_simulation(report, out);
            }
        }
    }

    if let Some(err) = &job.error {
        writeln!(out, "  error: {err}").ok();
    }
}

fn render_benchmark(report: &BenchmarkReport, out: &mut String) {
    let r = &report.result;
    let l = &r.latency;
    writeln!(out, "  benchmark: {}.{}", report.suite, report.benchmark).ok();
    writeln!(
        out,
        "    requests: {} (errors {}) in {} = {} req/s over {} worker(s)",
        r.requests,
        r.errors,
        format_duration(r.duration),
        format_rate(r.throughput()),
        report.workers.len()
    )
    .ok();
    writeln!(
        out,
        "    latency = mean={} p50={} p75={} p95={} p99={} min={} max={}",
        format_duration(l.mean),
        format_duration(l.p50),
        format_duration(l.p75),
        format_duration(l.p95),
        format_duration(l.p99),
        format_duration(l.min),
        format_duration(l.max)
    )
    .ok();
    if let Verdict::ThresholdExceeded { limit, observed } = r.verdict {
        writeln!(
            out,
            "    threshold exceeded: max latency {} > {}",
            format_duration(observed),
            format_duration(limit)
        )
        .ok();
    }
}

fn render_simulation(report: &SimulationReport, out: &mut String) {
    writeln!(
        out,
        "  simulation: {} traces={} failures={} in {}",
        report.simulation,
        report.traces,
        report.failures,
        format_duration(report.duration)
    )
    .ok();
    if let Some(model) = &report.model {
        writeln!(out, "  model `{model}` satisfied").ok();
    }
}
