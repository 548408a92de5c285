use std::time::Duration;

use crate::JobId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// The job reached a terminal state and the guard was released.
    JobFinished { job_id: JobId, outcome: JobOutcome },
    /// Send `Msg::GraceElapsed` for this job after the delay.
    ScheduleReset { job_id: JobId, after: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Every group ran to `complete`. Per-item failures are counted, not fatal.
    Completed { successful: usize, failed: usize },
    /// A group reported `error` or its transport broke; remaining work was abandoned.
    Failed { message: String },
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }
}
