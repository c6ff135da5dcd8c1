use std::fmt::Display;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ExitCode;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced at a job or RPC boundary.
///
/// The enum is serializable so a worker can hand the exact variant back to the
/// coordinator over the control plane.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Error {
    #[error("{what} `{name}` not found")]
    NotFound { what: String, name: String },

    #[error("setup failed: {0}")]
    SetupFailed(String),

    #[error("teardown failed: {0}")]
    TeardownFailed(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("provisioning failed: {0}")]
    ProvisioningFailed(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("parameter source used before `reset`")]
    ParamNotReset,

    #[error("parameter source has an empty pool")]
    EmptyPool,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),

    #[error("model violated: {0}")]
    ModelViolation(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            what: what.into(),
            name: name.into(),
        }
    }

    pub fn setup(err: impl Display) -> Self {
        Self::SetupFailed(format!("{err:#}"))
    }

    pub fn teardown(err: impl Display) -> Self {
        Self::TeardownFailed(format!("{err:#}"))
    }

    pub fn execution(err: impl Display) -> Self {
        Self::ExecutionFailed(format!("{err:#}"))
    }

    pub fn provisioning(err: impl Display) -> Self {
        Self::ProvisioningFailed(format!("{err:#}"))
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::NotFound { .. } | Self::InvalidConfig(_) => ExitCode::InvalidInput,
            Self::ExecutionFailed(_)
            | Self::ModelViolation(_)
            | Self::ParamNotReset
            | Self::EmptyPool => ExitCode::ExecutionFailed,
            Self::SetupFailed(_)
            | Self::TeardownFailed(_)
            | Self::ProvisioningFailed(_)
            | Self::InvalidState(_)
            | Self::Transport(_)
            | Self::Timeout(_) => ExitCode::RuntimeError,
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::ExecutionFailed(format!("task join error: {err}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(format!("io error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn errors_survive_json() {
        let errs = vec![
            Error::not_found("suite", "kv"),
            Error::setup("boom"),
            Error::EmptyPool,
            Error::Timeout(Duration::from_secs(3)),
        ];
        let json = serde_json::to_string(&errs).unwrap();
        let back: Vec<Error> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, errs);
    }

    #[test]
    fn not_found_maps_to_invalid_input() {
        assert_eq!(
            Error::not_found("benchmark", "x").exit_code(),
            ExitCode::InvalidInput
        );
        assert_eq!(Error::setup("x").exit_code(), ExitCode::RuntimeError);
    }

    #[test]
    fn anyhow_chain_is_kept_in_message() {
        let err = anyhow::anyhow!("root").context("outer");
        let Error::SetupFailed(msg) = Error::setup(err) else {
            panic!("expected SetupFailed");
        };
        assert_eq!(msg, "outer: root");
    }
}
