//! Enrich core: item model, progress protocol types and the job state machine.
mod batch_state;
mod effect;
mod event;
mod guard;
mod item;
mod msg;
mod partition;
mod reconciler;
mod store;

pub use batch_state::{estimate_seconds_remaining, BatchState};
pub use effect::{Effect, JobOutcome};
pub use event::{ItemResult, ProgressEvent};
pub use guard::FlightGuard;
pub use item::{Item, ItemId, Status, TransitionError};
pub use msg::Msg;
pub use partition::{first_duplicate_text, partition_by, Group};
pub use reconciler::{JobId, JobPlan, JobReconciler, RejectionReason, DEFAULT_RESET_GRACE};
pub use store::{ItemStore, MemoryItemStore};
