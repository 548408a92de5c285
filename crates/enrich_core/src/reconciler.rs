use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use enrich_logging::{enrich_debug, enrich_info, enrich_warn};

use crate::partition::{first_duplicate_text, partition_by, Group};
use crate::{
    BatchState, Effect, FlightGuard, Item, ItemId, ItemResult, ItemStore, JobOutcome, Msg,
    ProgressEvent, Status, TransitionError,
};

pub type JobId = u64;

/// How long the terminal tally of a finished job stays visible.
pub const DEFAULT_RESET_GRACE: Duration = Duration::from_secs(3);

const UNREPORTED_MESSAGE: &str = "no result reported";
const FALLBACK_ERROR_MESSAGE: &str = "generation failed";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectionReason {
    #[error("a batch job is already running")]
    AlreadyRunning,
    #[error("no item ids were requested")]
    EmptyRequest,
    #[error("none of the requested items exist")]
    NoValidItems,
    #[error("text {text:?} appears more than once in one group")]
    DuplicateText { text: String },
}

/// Admitted job: its id and the resolved items, partitioned in run order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPlan<K> {
    pub job_id: JobId,
    pub groups: Vec<Group<K>>,
}

impl<K> JobPlan<K> {
    pub fn item_count(&self) -> usize {
        self.groups.iter().map(|group| group.items.len()).sum()
    }
}

#[derive(Debug)]
struct ActiveJob {
    id: JobId,
    item_ids: Vec<ItemId>,
    groups_total: usize,
    groups_started: usize,
    // Items completed by groups that already sent `complete`.
    group_offset: usize,
    current_group: Option<CurrentGroup>,
}

#[derive(Debug)]
struct CurrentGroup {
    item_ids: Vec<ItemId>,
    by_text: HashMap<String, ItemId>,
}

/// Consumer side of the protocol: turns decoded events into item status
/// writes and the aggregate [`BatchState`].
///
/// All mutation goes through [`JobReconciler::admit`] and
/// [`JobReconciler::update`]; callers share it behind one lock.
pub struct JobReconciler {
    store: Arc<dyn ItemStore>,
    guard: Arc<FlightGuard>,
    reset_grace: Duration,
    batch: BatchState,
    active: Option<ActiveJob>,
    last_finished: Option<JobId>,
    next_job_id: JobId,
}

impl JobReconciler {
    pub fn new(store: Arc<dyn ItemStore>) -> Self {
        Self {
            store,
            guard: Arc::new(FlightGuard::new()),
            reset_grace: DEFAULT_RESET_GRACE,
            batch: BatchState::default(),
            active: None,
            last_finished: None,
            next_job_id: 1,
        }
    }

    pub fn with_reset_grace(mut self, reset_grace: Duration) -> Self {
        self.reset_grace = reset_grace;
        self
    }

    pub fn guard(&self) -> Arc<FlightGuard> {
        self.guard.clone()
    }

    pub fn batch_state(&self) -> &BatchState {
        &self.batch
    }

    pub fn active_job(&self) -> Option<JobId> {
        self.active.as_ref().map(|job| job.id)
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Validates a request and, if accepted, takes the guard, marks every
    /// resolved item `Pending` and starts a fresh [`BatchState`].
    ///
    /// Unknown ids are dropped and repeated ids keep their first position.
    /// Nothing is written when the request is rejected.
    pub fn admit<K, F>(
        &mut self,
        ids: &[ItemId],
        key_of: F,
        now: DateTime<Utc>,
    ) -> Result<JobPlan<K>, RejectionReason>
    where
        K: Eq + Hash + Clone,
        F: Fn(&Item) -> K,
    {
        if self.active.is_some() || self.guard.is_held() {
            return Err(RejectionReason::AlreadyRunning);
        }
        if ids.is_empty() {
            return Err(RejectionReason::EmptyRequest);
        }

        let mut seen = HashSet::new();
        let items: Vec<Item> = ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .filter_map(|id| self.store.get(id))
            .collect();
        if items.is_empty() {
            return Err(RejectionReason::NoValidItems);
        }

        let mut groups = partition_by(items, key_of);
        for group in &groups {
            if let Some(text) = first_duplicate_text(&group.items) {
                return Err(RejectionReason::DuplicateText {
                    text: text.to_string(),
                });
            }
        }

        if !self.guard.try_acquire() {
            return Err(RejectionReason::AlreadyRunning);
        }

        let job_id = self.next_job_id;
        self.next_job_id += 1;

        let mut item_ids = Vec::new();
        for item in groups.iter_mut().flat_map(|group| group.items.iter_mut()) {
            if item.clear_stale_flight() {
                enrich_warn!("Item {} had a stale in-flight status; requeueing", item.id);
            }
            if let Err(err) = item.mark_pending() {
                enrich_warn!("{err}");
            }
            self.store.set(item.clone());
            item_ids.push(item.id.clone());
        }

        enrich_info!(
            "Admitted job {} with {} items in {} groups",
            job_id,
            item_ids.len(),
            groups.len()
        );

        self.batch = BatchState::started(item_ids.len(), now);
        self.last_finished = None;
        self.active = Some(ActiveJob {
            id: job_id,
            item_ids,
            groups_total: groups.len(),
            groups_started: 0,
            group_offset: 0,
            current_group: None,
        });

        Ok(JobPlan { job_id, groups })
    }

    /// Applies one message and returns the effects the driver must run.
    pub fn update(&mut self, msg: Msg, now: DateTime<Utc>) -> Vec<Effect> {
        match msg {
            Msg::GroupStarted { job_id, item_ids } => {
                if self.is_current(job_id) {
                    self.start_group(item_ids);
                } else {
                    enrich_debug!("Ignoring group start for stale job {job_id}");
                }
                Vec::new()
            }
            Msg::Event { job_id, event } => {
                if self.is_current(job_id) {
                    self.apply_event(event, now)
                } else {
                    enrich_debug!("Ignoring {} event for stale job {job_id}", event.kind());
                    Vec::new()
                }
            }
            Msg::TransportFailed { job_id, message } => {
                if self.is_current(job_id) {
                    self.abort(message)
                } else {
                    Vec::new()
                }
            }
            Msg::GraceElapsed { job_id } => {
                if self.active.is_none() && self.last_finished == Some(job_id) {
                    self.batch = BatchState::default();
                    self.last_finished = None;
                }
                Vec::new()
            }
        }
    }

    fn is_current(&self, job_id: JobId) -> bool {
        self.active_job() == Some(job_id)
    }

    fn start_group(&mut self, item_ids: Vec<ItemId>) {
        let Some(job) = self.active.as_mut() else {
            return;
        };
        job.groups_started += 1;
        if job.groups_started > job.groups_total {
            enrich_warn!(
                "Job {} started group {} of {}",
                job.id,
                job.groups_started,
                job.groups_total
            );
        }
        let by_text = item_ids
            .iter()
            .filter_map(|id| self.store.get(id).map(|item| (item.text, id.clone())))
            .collect();
        enrich_info!(
            "Job {} group {} started with {} items",
            job.id,
            job.groups_started,
            item_ids.len()
        );
        job.current_group = Some(CurrentGroup { item_ids, by_text });
    }

    fn apply_event(&mut self, event: ProgressEvent, now: DateTime<Utc>) -> Vec<Effect> {
        match event {
            ProgressEvent::Progress {
                processed_in_group,
                current_item_text,
                ..
            } => {
                if let Some(text) = current_item_text.as_deref() {
                    match self.lookup(text) {
                        Some(id) => {
                            self.update_item(&id, Item::mark_generating);
                        }
                        None => enrich_warn!("Progress for unknown item text {text:?}"),
                    }
                }
                self.batch.current_item_text = current_item_text;
                let processed = self.group_offset() + processed_in_group;
                self.batch.advance_processed(processed, now);
                Vec::new()
            }
            ProgressEvent::Result {
                processed_in_group,
                item,
                ..
            } => {
                let success = item.success;
                let applied = match self.lookup(&item.text) {
                    Some(id) => self.apply_result(&id, item, now),
                    None => {
                        enrich_warn!("Result for unknown item text {:?}", item.text);
                        false
                    }
                };
                // Only results that reached an item count; the rest are
                // force-failed at `complete`.
                if applied {
                    if success {
                        self.batch.successful += 1;
                    } else {
                        self.batch.failed += 1;
                    }
                }
                let processed = self.group_offset() + processed_in_group;
                self.batch.advance_processed(processed, now);
                Vec::new()
            }
            ProgressEvent::Complete { total_in_group, .. } => {
                self.complete_group(total_in_group, now)
            }
            ProgressEvent::Error { message } => self.abort(message),
        }
    }

    fn apply_result(&mut self, id: &str, result: ItemResult, now: DateTime<Utc>) -> bool {
        if !result.success {
            enrich_warn!(
                "Item {} failed: {}",
                id,
                result.error_message.as_deref().unwrap_or(FALLBACK_ERROR_MESSAGE)
            );
        }
        self.update_item(id, move |item| {
            // A result may overtake a lost progress record.
            if item.status == Status::Pending {
                item.mark_generating()?;
            }
            if result.success {
                item.mark_complete(result.result_text, result.result_asset_path, now)
            } else {
                item.mark_error(
                    result
                        .error_message
                        .unwrap_or_else(|| FALLBACK_ERROR_MESSAGE.to_string()),
                )
            }
        })
    }

    fn complete_group(&mut self, total_in_group: usize, now: DateTime<Utc>) -> Vec<Effect> {
        let Some(job) = self.active.as_mut() else {
            return Vec::new();
        };
        let group = job.current_group.take();
        let group_size = group
            .as_ref()
            .map_or(total_in_group, |group| group.item_ids.len());
        if group_size != total_in_group {
            enrich_debug!(
                "Job {} group reported {} items, expected {}",
                job.id,
                total_in_group,
                group_size
            );
        }
        job.group_offset += group_size;
        let offset = job.group_offset;
        let last_group = job.groups_started >= job.groups_total;

        if let Some(group) = group {
            let forced = self.force_fail(&group.item_ids, UNREPORTED_MESSAGE);
            self.batch.failed += forced;
        }
        self.batch.advance_processed(offset, now);
        self.batch.current_item_text = None;

        if last_group {
            self.finish()
        } else {
            Vec::new()
        }
    }

    fn finish(&mut self) -> Vec<Effect> {
        let Some(job) = self.active.take() else {
            return Vec::new();
        };
        self.guard.release();
        self.last_finished = Some(job.id);
        enrich_info!(
            "Job {} finished: {} succeeded, {} failed",
            job.id,
            self.batch.successful,
            self.batch.failed
        );
        vec![
            Effect::JobFinished {
                job_id: job.id,
                outcome: JobOutcome::Completed {
                    successful: self.batch.successful,
                    failed: self.batch.failed,
                },
            },
            Effect::ScheduleReset {
                job_id: job.id,
                after: self.reset_grace,
            },
        ]
    }

    /// Fails every in-flight item of the job, including groups that never
    /// started, and releases the guard.
    fn abort(&mut self, message: String) -> Vec<Effect> {
        let Some(job) = self.active.take() else {
            return Vec::new();
        };
        enrich_warn!("Job {} aborted: {}", job.id, message);
        let forced = self.force_fail(&job.item_ids, &format!("batch aborted: {message}"));
        self.batch.failed += forced;
        self.batch.current_item_text = None;
        self.batch.estimated_seconds_remaining = None;
        self.guard.release();
        self.last_finished = Some(job.id);
        vec![
            Effect::JobFinished {
                job_id: job.id,
                outcome: JobOutcome::Failed { message },
            },
            Effect::ScheduleReset {
                job_id: job.id,
                after: self.reset_grace,
            },
        ]
    }

    fn force_fail(&self, ids: &[ItemId], message: &str) -> usize {
        let mut forced = 0;
        for id in ids {
            let Some(mut item) = self.store.get(id) else {
                continue;
            };
            if !item.status.is_in_flight() {
                continue;
            }
            match item.mark_error(message) {
                Ok(()) => {
                    self.store.set(item);
                    forced += 1;
                }
                Err(err) => enrich_warn!("{err}"),
            }
        }
        forced
    }

    fn group_offset(&self) -> usize {
        self.active.as_ref().map_or(0, |job| job.group_offset)
    }

    fn lookup(&self, text: &str) -> Option<ItemId> {
        self.active
            .as_ref()
            .and_then(|job| job.current_group.as_ref())
            .and_then(|group| group.by_text.get(text).cloned())
    }

    /// Returns true when the change was applied and stored.
    fn update_item<F>(&self, id: &str, change: F) -> bool
    where
        F: FnOnce(&mut Item) -> Result<(), TransitionError>,
    {
        let Some(mut item) = self.store.get(id) else {
            enrich_warn!("Item {id} disappeared from the store during the job");
            return false;
        };
        match change(&mut item) {
            Ok(()) => {
                self.store.set(item);
                true
            }
            Err(err) => {
                enrich_warn!("{err}");
                false
            }
        }
    }
}
