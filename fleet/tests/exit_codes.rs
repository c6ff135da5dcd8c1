use std::process::{Command, Output};

use anyhow::Context as _;

fn status_code(out: &Output) -> i32 {
    out.status.code().unwrap_or(-1)
}

fn fleet(args: &[&str]) -> anyhow::Result<Output> {
    Command::new(env!("CARGO_BIN_EXE_fleet"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .context("run fleet binary")
}

fn expect_code(out: &Output, code: i32) -> anyhow::Result<()> {
    anyhow::ensure!(
        status_code(out) == code,
        "expected exit code {code}, got {}\nstdout:\n{}\nstderr:\n{}",
        status_code(out),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
    Ok(())
}

#[test]
fn invalid_flags_exit_30() -> anyhow::Result<()> {
    let out = fleet(&["bench", "--duration", "10x"])?;
    expect_code(&out, 30)
}

#[test]
fn unknown_suite_exit_30() -> anyhow::Result<()> {
    let out = fleet(&["bench", "--suite", "nope", "--requests", "10"])?;
    expect_code(&out, 30)?;
    let stderr = String::from_utf8_lossy(&out.stderr);
    anyhow::ensure!(stderr.contains("`nope` not found"), "stderr:\n{stderr}");
    Ok(())
}

#[test]
fn help_exits_0() -> anyhow::Result<()> {
    let out = fleet(&["--help"])?;
    expect_code(&out, 0)
}

#[test]
fn threshold_exceeded_exit_11() -> anyhow::Result<()> {
    let out = fleet(&[
        "bench",
        "--suite",
        "sleep",
        "--benchmark",
        "fixed",
        "--requests",
        "20",
        "--max-latency",
        "1us",
    ])?;
    expect_code(&out, 11)?;
    let stdout = String::from_utf8_lossy(&out.stdout);
    anyhow::ensure!(stdout.contains("threshold exceeded"), "stdout:\n{stdout}");
    Ok(())
}

#[test]
fn aborted_benchmark_exit_20() -> anyhow::Result<()> {
    let out = fleet(&[
        "bench",
        "--suite",
        "sleep",
        "--benchmark",
        "flaky",
        "--requests",
        "30",
        "--arg",
        "fail_every=3",
        "--error-policy",
        "abort",
    ])?;
    expect_code(&out, 20)
}

#[test]
fn json_summary_is_the_last_line() -> anyhow::Result<()> {
    let out = fleet(&[
        "bench",
        "--suite",
        "kv",
        "--requests",
        "200",
        "--parallelism",
        "4",
        "--output",
        "json",
    ])?;
    expect_code(&out, 0)?;

    let stdout = String::from_utf8(out.stdout).context("stdout is utf-8")?;
    let last = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .context("no output")?;
    let v: serde_json::Value = serde_json::from_str(last).context("parse summary line")?;

    anyhow::ensure!(v["kind"] == "summary", "unexpected line: {last}");
    anyhow::ensure!(v["exit_code"] == 0, "unexpected line: {last}");
    let benchmarks = v["jobs"][0]["benchmarks"]
        .as_array()
        .context("benchmarks array")?;
    anyhow::ensure!(benchmarks.len() == 2, "expected get and put: {last}");
    for b in benchmarks {
        anyhow::ensure!(b["requests"] == 200, "unexpected benchmark: {b}");
        anyhow::ensure!(b["errors"] == 0, "unexpected benchmark: {b}");
    }
    Ok(())
}

#[test]
fn simulate_writes_traces() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let path = tmp.path().join("traces.ndjson");
    let path_arg = path.to_str().context("utf-8 temp path")?;

    let out = fleet(&[
        "simulate",
        "--simulation",
        "counter",
        "--duration",
        "1500ms",
        "--rate",
        "check=100ms",
        "--traces",
        path_arg,
    ])?;
    expect_code(&out, 0)?;

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("read traces: {}", path.display()))?;
    let traces = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(serde_json::from_str::<serde_json::Value>)
        .collect::<Result<Vec<_>, _>>()
        .context("parse traces")?;
    let checks = traces
        .iter()
        .filter(|v| v["values"][0]["value"] == "check")
        .count();
    anyhow::ensure!(checks >= 5, "expected a trace per check, got:\n{text}");
    Ok(())
}

#[test]
fn process_workers_exit_0() -> anyhow::Result<()> {
    let out = fleet(&[
        "bench",
        "--suite",
        "sleep",
        "--benchmark",
        "fixed",
        "--workers",
        "2",
        "--requests",
        "20",
        "--provisioner",
        "process",
        "--timeout",
        "30s",
        "--output",
        "json",
    ])?;
    expect_code(&out, 0)?;

    let stdout = String::from_utf8_lossy(&out.stdout);
    let last = stdout.lines().last().context("no output")?;
    let v: serde_json::Value = serde_json::from_str(last).context("parse summary line")?;
    anyhow::ensure!(
        v["jobs"][0]["benchmarks"][0]["workers"] == 2,
        "unexpected line: {last}"
    );
    Ok(())
}

fn simulate_with_model(extra: &[&str]) -> anyhow::Result<Output> {
    let mut args = vec![
        "simulate",
        "--simulation",
        "counter",
        "--duration",
        "1500ms",
        "--rate",
        "check=100ms",
        "--output",
        "json",
    ];
    args.extend_from_slice(extra);
    fleet(&args)
}

#[test]
fn builtin_model_accepts_counter_traces() -> anyhow::Result<()> {
    let out = simulate_with_model(&["--model", "counter"])?;
    expect_code(&out, 0)?;
    let stdout = String::from_utf8_lossy(&out.stdout);
    let last = stdout.lines().last().context("no output")?;
    let v: serde_json::Value = serde_json::from_str(last).context("parse summary line")?;
    anyhow::ensure!(
        v["jobs"][0]["simulation"]["model"] == "counter",
        "unexpected line: {last}"
    );
    Ok(())
}

#[test]
fn unknown_model_exit_30() -> anyhow::Result<()> {
    let out = simulate_with_model(&["--model", "linearizable"])?;
    expect_code(&out, 30)
}

#[cfg(unix)]
#[test]
fn rejected_model_exit_20() -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;

    let tmp = tempfile::tempdir().context("create tempdir")?;
    let checker = tmp.path().join("reject.sh");
    std::fs::write(&checker, "#!/bin/sh\ncat >/dev/null\necho \"$1 does not hold\" >&2\nexit 1\n")
        .context("write checker")?;
    std::fs::set_permissions(&checker, std::fs::Permissions::from_mode(0o755))
        .context("chmod checker")?;
    let checker_arg = checker.to_str().context("utf-8 temp path")?;

    let out = simulate_with_model(&["--model", "strict", "--model-checker", checker_arg])?;
    expect_code(&out, 20)?;
    let stdout = String::from_utf8_lossy(&out.stdout);
    anyhow::ensure!(stdout.contains("strict does not hold"), "stdout:\n{stdout}");
    Ok(())
}
