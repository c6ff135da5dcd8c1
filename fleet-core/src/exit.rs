use serde::{Deserialize, Serialize};

/// Process exit status shared by the coordinator, workers and provisioners.
///
/// Codes are ordered by severity so combining several jobs keeps the worst one.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(i32)]
pub enum ExitCode {
    #[default]
    Success = 0,

    /// A benchmark finished but its maximum latency exceeded `max_latency`.
    ThresholdExceeded = 11,

    /// User code failed while running a benchmark or simulation.
    ExecutionFailed = 20,

    /// Bad flags, bad environment, or a suite/benchmark/simulation that is not registered.
    InvalidInput = 30,

    /// Setup/teardown, provisioning, transport and timeout failures.
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Keeps the more severe of two codes.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }

    /// Maps a raw process status (as reported by a provisioner) onto a known code.
    ///
    /// Unknown non-zero statuses count as runtime errors.
    #[must_use]
    pub fn from_status(code: i32) -> Self {
        match code {
            0 => Self::Success,
            11 => Self::ThresholdExceeded,
            20 => Self::ExecutionFailed,
            30 => Self::InvalidInput,
            _ => Self::RuntimeError,
        }
    }
}
