use fleet_core::ExitCode;

#[derive(Debug)]
pub enum RunError {
    /// Bad flags or configuration, detected before any job started.
    InvalidInput(anyhow::Error),
    /// A coordinator failure that carries its own exit code.
    Job(fleet_core::Error),
    RuntimeError(anyhow::Error),
}

impl RunError {
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::InvalidInput(_) => ExitCode::InvalidInput,
            Self::Job(err) => err.exit_code(),
            Self::RuntimeError(_) => ExitCode::RuntimeError,
        }
    }
}

impl From<fleet_core::Error> for RunError {
    fn from(err: fleet_core::Error) -> Self {
        Self::Job(err)
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput(e) | Self::RuntimeError(e) => write!(f, "{e:#}"),
            Self::Job(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidInput(e) | Self::RuntimeError(e) => Some(e.as_ref()),
            Self::Job(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_errors_keep_their_exit_code() {
        let err = RunError::from(fleet_core::Error::not_found("suite", "kv"));
        assert_eq!(err.exit_code(), ExitCode::InvalidInput);
        assert_eq!(err.to_string(), "suite `kv` not found");

        let err = RunError::RuntimeError(anyhow::anyhow!("disk full"));
        assert_eq!(err.exit_code(), ExitCode::RuntimeError);
    }
}
