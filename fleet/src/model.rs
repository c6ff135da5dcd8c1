//! Model checking of simulation traces: the built-in models and an external checker process.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use fleet_core::{Error, ModelChecker, Models, Result, Trace, Value};
use tokio::io::AsyncWriteExt as _;
use tokio::process::Command;

/// Models shipped with the built-in suites.
pub(crate) fn builtin() -> Models {
    let mut models = Models::new();
    models.model("counter", counter_consistent);
    models.model("no-failures", no_failures);
    models
}

/// Every `check` record of the counter simulation saw the value it expected.
fn counter_consistent(traces: &[Trace]) -> anyhow::Result<()> {
    let mut checks = 0_usize;
    for trace in traces {
        let [op, seen, expected] = trace.values.as_slice() else {
            continue;
        };
        if op.as_str() != Some("check") {
            continue;
        }
        checks += 1;
        anyhow::ensure!(
            seen == expected,
            "check #{checks} saw {seen} but {expected} operations were applied"
        );
    }
    anyhow::ensure!(checks > 0, "no `check` records among {} traces", traces.len());
    Ok(())
}

/// No operation execution failed.
fn no_failures(traces: &[Trace]) -> anyhow::Result<()> {
    let failed = traces
        .iter()
        .filter(|t| t.values.get(3) == Some(&Value::Bool(false)))
        .count();
    anyhow::ensure!(failed == 0, "{failed} of {} executions failed", traces.len());
    Ok(())
}

/// Runs `<program> <model>` with the traces as NDJSON on stdin; exit status 0 accepts them.
pub(crate) struct CommandChecker {
    program: PathBuf,
}

impl CommandChecker {
    pub(crate) fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

#[async_trait]
impl ModelChecker for CommandChecker {
    async fn check(&self, model: &str, traces: &[Trace]) -> Result<()> {
        let mut input = Vec::new();
        for trace in traces {
            serde_json::to_writer(&mut input, trace)
                .map_err(|err| Error::execution(format!("encode trace: {err}")))?;
            input.push(b'\n');
        }

        let mut child = Command::new(&self.program)
            .arg(model)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                Error::execution(format!(
                    "start model checker `{}`: {err}",
                    self.program.display()
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A checker may exit before reading everything; its status decides.
            if let Err(err) = stdin.write_all(&input).await {
                tracing::debug!(model, error = %err, "model checker closed stdin early");
            }
        }

        let out = child
            .wait_with_output()
            .await
            .map_err(|err| Error::execution(format!("wait for model checker: {err}")))?;
        for line in String::from_utf8_lossy(&out.stdout).lines() {
            tracing::info!(model, "{line}");
        }
        if out.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&out.stderr);
        Err(Error::ModelViolation(format!(
            "`{model}` rejected by `{}` ({}): {}",
            self.program.display(),
            out.status,
            stderr.trim()
        )))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn check(seen: i64, expected: i64) -> Trace {
        Trace::new(vec![Value::from("check"), Value::from(seen), Value::from(expected)])
    }

    fn execution(ok: bool) -> Trace {
        Trace::new(vec![
            Value::from("counter"),
            Value::from(0_u64),
            Value::from("increment"),
            Value::Bool(ok),
        ])
    }

    #[tokio::test]
    async fn counter_model_needs_consistent_checks() {
        let models = builtin();
        let good = vec![execution(true), check(3, 3), check(2, 2)];
        models.check("counter", &good).await.unwrap();

        let bad = vec![check(3, 3), check(4, 5)];
        let err = models.check("counter", &bad).await.unwrap_err();
        assert!(matches!(err, Error::ModelViolation(_)), "{err:?}");

        let err = models.check("counter", &[execution(true)]).await.unwrap_err();
        assert!(matches!(err, Error::ModelViolation(_)), "{err:?}");
    }

    #[tokio::test]
    async fn failed_executions_violate_no_failures() {
        let models = builtin();
        models
            .check("no-failures", &[execution(true), check(1, 1)])
            .await
            .unwrap();
        let err = models
            .check("no-failures", &[execution(true), execution(false)])
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), fleet_core::ExitCode::ExecutionFailed);
    }

    #[cfg(unix)]
    fn script(body: &str) -> (CommandChecker, tempfile::TempDir) {
        use std::os::unix::fs::PermissionsExt as _;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checker.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        (CommandChecker::new(path), dir)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn external_checker_reads_traces_from_stdin() {
        // Accepts the `pair` model when it receives exactly two traces.
        let (checker, _dir) = script(
            r#"n=$(wc -l | tr -d ' '); [ "$1" = pair ] && [ "$n" = 2 ] || { echo "got $1 with $n traces" >&2; exit 1; }"#,
        );
        checker.check("pair", &[check(1, 1), check(2, 2)]).await.unwrap();

        let err = checker.check("pair", &[check(1, 1)]).await.unwrap_err();
        let Error::ModelViolation(msg) = err else {
            panic!("expected a model violation, got {err:?}");
        };
        assert!(msg.contains("got pair with 1 traces"), "{msg}");
    }

    #[tokio::test]
    async fn missing_checker_is_an_execution_error() {
        let checker = CommandChecker::new(PathBuf::from("/nonexistent/checker"));
        let err = checker.check("any", &[]).await.unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed(_)), "{err:?}");
    }
}
