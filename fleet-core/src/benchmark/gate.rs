use tokio::time::Instant;

use crate::RequestMode;

/// Submission bound of one phase, owned by the task that feeds arguments.
#[derive(Debug)]
pub(crate) struct PhaseBudget {
    submitted: u64,
    limit: Limit,
}

#[derive(Debug)]
enum Limit {
    Requests(u64),
    Deadline(Instant),
}

impl PhaseBudget {
    pub(crate) fn new(mode: RequestMode, started: Instant) -> Self {
        let limit = match mode {
            RequestMode::Requests(n) => Limit::Requests(n),
            RequestMode::Duration(d) => Limit::Deadline(started + d),
        };
        Self {
            submitted: 0,
            limit,
        }
    }

    /// Returns whether another request may be submitted, and counts it if so.
    pub(crate) fn admit(&mut self) -> bool {
        let open = match self.limit {
            Limit::Requests(n) => self.submitted < n,
            Limit::Deadline(deadline) => Instant::now() < deadline,
        };
        if open {
            self.submitted += 1;
        }
        open
    }
}
