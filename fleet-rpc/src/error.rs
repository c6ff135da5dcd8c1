use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum TransportErrorKind {
    InvalidAddress,
    RequestBuild,
    Request,
    Timeout,
    BodyRead,
    Codec,
    Status,
}

/// Failures of the control-plane transport itself.
///
/// Errors raised by the worker are carried back as [`fleet_core::Error`] and
/// never end up here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid worker address: {0}")]
    InvalidAddress(String),

    #[error("rpc request build failed: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("rpc request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("rpc timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to read rpc body: {0}")]
    BodyRead(#[from] hyper::Error),

    #[error("invalid rpc payload: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("worker answered {status}: {body}")]
    Status { status: u16, body: String },
}

impl Error {
    #[must_use]
    pub fn transport_error_kind(&self) -> TransportErrorKind {
        match self {
            Self::InvalidAddress(_) => TransportErrorKind::InvalidAddress,
            Self::RequestBuild(_) => TransportErrorKind::RequestBuild,
            Self::Request(_) => TransportErrorKind::Request,
            Self::Timeout(_) => TransportErrorKind::Timeout,
            Self::BodyRead(_) => TransportErrorKind::BodyRead,
            Self::Codec(_) => TransportErrorKind::Codec,
            Self::Status { .. } => TransportErrorKind::Status,
        }
    }
}

impl From<Error> for fleet_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Timeout(limit) => Self::Timeout(limit),
            other => Self::Transport(format!("{}: {other}", other.transport_error_kind())),
        }
    }
}
