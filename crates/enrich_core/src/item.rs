use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ItemId = String;

/// Lifecycle of one item across generation jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Idle,
    Pending,
    Generating,
    Complete,
    Error,
}

impl Status {
    /// Whether the reconciler may move an item from `self` to `next`.
    ///
    /// `Pending -> Error` is the forced failure of an aborted job.
    /// `Pending | Generating -> Idle` requeues an item left in flight by a
    /// job that no longer exists.
    pub fn can_transition_to(self, next: Status) -> bool {
        use Status::*;
        matches!(
            (self, next),
            (Idle | Complete | Error, Pending)
                | (Pending, Generating)
                | (Pending, Error)
                | (Generating, Complete | Error)
                | (Pending | Generating, Idle)
        )
    }

    /// Pending or generating: owned by a running job.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Status::Pending | Status::Generating)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::Idle => "idle",
            Status::Pending => "pending",
            Status::Generating => "generating",
            Status::Complete => "complete",
            Status::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal status transition for item {id}: {from} -> {to}")]
pub struct TransitionError {
    pub id: ItemId,
    pub from: Status,
    pub to: Status,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub text: String,
    pub group_key: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_asset_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_generated_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn new(id: impl Into<ItemId>, text: impl Into<String>, group_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            group_key: group_key.into(),
            status: Status::Idle,
            result_text: None,
            result_asset_path: None,
            error_message: None,
            last_generated_at: None,
        }
    }

    fn transition(&mut self, next: Status) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Drops an in-flight status left behind by a job that no longer exists.
    /// Returns true when the status was changed.
    pub fn clear_stale_flight(&mut self) -> bool {
        self.status.is_in_flight() && self.transition(Status::Idle).is_ok()
    }

    /// Queues the item for a new job. Previous results are kept until the
    /// new ones arrive; a previous error message is cleared.
    pub fn mark_pending(&mut self) -> Result<(), TransitionError> {
        self.transition(Status::Pending)?;
        self.error_message = None;
        Ok(())
    }

    pub fn mark_generating(&mut self) -> Result<(), TransitionError> {
        self.transition(Status::Generating)
    }

    pub fn mark_complete(
        &mut self,
        result_text: Option<String>,
        result_asset_path: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(Status::Complete)?;
        self.result_text = result_text;
        self.result_asset_path = result_asset_path;
        self.error_message = None;
        self.last_generated_at = Some(at);
        Ok(())
    }

    pub fn mark_error(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(Status::Error)?;
        self.error_message = Some(message.into());
        Ok(())
    }
}
