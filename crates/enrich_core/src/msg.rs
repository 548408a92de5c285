use crate::{ItemId, JobId, ProgressEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// The stream for the next group of the job was opened.
    GroupStarted {
        job_id: JobId,
        item_ids: Vec<ItemId>,
    },
    /// One decoded record from the current group's stream.
    Event { job_id: JobId, event: ProgressEvent },
    /// The group's stream broke or ended without a terminal record.
    TransportFailed { job_id: JobId, message: String },
    /// The grace period after a finished job ran out.
    GraceElapsed { job_id: JobId },
}
