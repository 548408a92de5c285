use chrono::{DateTime, Utc};

/// Aggregate progress of the current (or just finished) job.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchState {
    pub total_requested: usize,
    pub total_processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub current_item_text: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub estimated_seconds_remaining: Option<f64>,
}

impl BatchState {
    pub fn started(total_requested: usize, now: DateTime<Utc>) -> Self {
        Self {
            total_requested,
            started_at: Some(now),
            ..Self::default()
        }
    }

    /// True for the zero state shown when no job has run recently.
    pub fn is_idle(&self) -> bool {
        self.started_at.is_none() && self.total_requested == 0
    }

    /// Share of requested items processed so far, in `0.0..=1.0`.
    pub fn fraction_complete(&self) -> f64 {
        if self.total_requested == 0 {
            return 0.0;
        }
        (self.total_processed as f64 / self.total_requested as f64).min(1.0)
    }

    /// Moves `total_processed` forward; it never goes backwards. The ETA is
    /// recomputed whenever the count changes.
    pub(crate) fn advance_processed(&mut self, processed: usize, now: DateTime<Utc>) {
        if processed <= self.total_processed {
            return;
        }
        self.total_processed = processed.min(self.total_requested);
        if let Some(started_at) = self.started_at {
            let elapsed = (now - started_at).num_milliseconds() as f64 / 1000.0;
            self.estimated_seconds_remaining =
                estimate_seconds_remaining(elapsed, self.total_processed, self.total_requested);
        }
    }
}

/// Linear throughput estimate: average time per processed item times the
/// items left. `None` until something has been processed.
pub fn estimate_seconds_remaining(
    elapsed_seconds: f64,
    processed: usize,
    requested: usize,
) -> Option<f64> {
    if processed == 0 {
        return None;
    }
    let remaining = requested.saturating_sub(processed) as f64;
    let per_item = elapsed_seconds.max(0.0) / processed as f64;
    Some(per_item * remaining)
}
