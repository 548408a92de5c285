use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use enrich_core::{
    BatchState, Effect, Item, ItemId, ItemStore, JobId, JobOutcome, JobReconciler, Msg,
    RejectionReason, DEFAULT_RESET_GRACE,
};
use enrich_logging::{enrich_error, enrich_info};
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::codec::decode_stream;
use crate::ingress::GroupRequest;
use crate::transport::GroupTransport;
use crate::GroupConfig;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// How long the final tally stays in [`BatchState`] after a job ends.
    pub reset_grace: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            reset_grace: DEFAULT_RESET_GRACE,
        }
    }
}

/// Reconciler plus the channel observers read aggregate progress from.
struct Shared {
    reconciler: Mutex<JobReconciler>,
    state_tx: watch::Sender<BatchState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, JobReconciler> {
        self.reconciler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies one message, publishes the new aggregate and runs the
    /// resulting effects. Returns the outcome if the job just finished.
    fn dispatch(self: &Arc<Self>, msg: Msg) -> Option<JobOutcome> {
        let effects = {
            let mut reconciler = self.lock();
            let effects = reconciler.update(msg, Utc::now());
            self.state_tx.send_replace(reconciler.batch_state().clone());
            effects
        };

        let mut finished = None;
        for effect in effects {
            match effect {
                Effect::ScheduleReset { job_id, after } => {
                    let shared = self.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        shared.dispatch(Msg::GraceElapsed { job_id });
                    });
                }
                Effect::JobFinished { outcome, .. } => finished = Some(outcome),
            }
        }
        finished
    }

    fn fail(self: &Arc<Self>, job_id: JobId, message: String) -> JobOutcome {
        enrich_error!("Job {job_id}: {message}");
        self.dispatch(Msg::TransportFailed {
            job_id,
            message: message.clone(),
        })
        .unwrap_or(JobOutcome::Failed { message })
    }
}

/// Client side of the pipeline: admits jobs, runs their groups one after
/// another over a [`GroupTransport`] and feeds the decoded records to the
/// reconciler.
pub struct BatchOrchestrator {
    transport: Arc<dyn GroupTransport>,
    shared: Arc<Shared>,
    configs: HashMap<String, GroupConfig>,
}

impl BatchOrchestrator {
    pub fn new(
        store: Arc<dyn ItemStore>,
        transport: Arc<dyn GroupTransport>,
        settings: OrchestratorSettings,
    ) -> Self {
        let reconciler = JobReconciler::new(store).with_reset_grace(settings.reset_grace);
        let (state_tx, _) = watch::channel(BatchState::default());
        Self {
            transport,
            shared: Arc::new(Shared {
                reconciler: Mutex::new(reconciler),
                state_tx,
            }),
            configs: HashMap::new(),
        }
    }

    /// Registers the provider settings used for groups with this key.
    pub fn with_group_config(mut self, key: impl Into<String>, config: GroupConfig) -> Self {
        self.configs.insert(key.into(), config);
        self
    }

    pub fn batch_state(&self) -> BatchState {
        self.shared.lock().batch_state().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchState> {
        self.shared.state_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().guard().is_held()
    }

    /// Admits a job and starts it on a background task. Must be called from
    /// within a Tokio runtime.
    ///
    /// Groups run in first-seen key order, never concurrently. If any group
    /// fails outright the remaining groups are not started and all their
    /// items end in `Error`.
    pub fn submit<K, F>(&self, ids: &[ItemId], key_of: F) -> Result<JobHandle, RejectionReason>
    where
        K: Eq + Hash + Clone + ToString,
        F: Fn(&Item) -> K,
    {
        let plan = {
            let mut reconciler = self.shared.lock();
            let plan = reconciler.admit(ids, key_of, Utc::now())?;
            self.shared
                .state_tx
                .send_replace(reconciler.batch_state().clone());
            plan
        };

        let job_id = plan.job_id;
        let requests: Vec<GroupRequest> = plan
            .groups
            .into_iter()
            .map(|group| GroupRequest {
                config: self.config_for(&group.key.to_string()),
                ids: group.items.into_iter().map(|item| item.id).collect(),
            })
            .collect();
        enrich_info!("Job {} submitted with {} groups", job_id, requests.len());

        let driver = JobDriver {
            transport: self.transport.clone(),
            shared: self.shared.clone(),
        };
        let task = tokio::spawn(driver.run(job_id, requests));

        Ok(JobHandle {
            job_id,
            progress: self.subscribe(),
            shared: self.shared.clone(),
            task,
        })
    }

    /// One-item job grouped by the item's own key; waits for the outcome.
    pub async fn generate_one(&self, id: &str) -> Result<JobOutcome, RejectionReason> {
        let handle = self.submit(&[id.to_string()], |item| item.group_key.clone())?;
        Ok(handle.wait().await)
    }

    fn config_for(&self, key: &str) -> GroupConfig {
        self.configs
            .get(key)
            .cloned()
            .unwrap_or_else(|| GroupConfig::new(key))
    }
}

struct JobDriver {
    transport: Arc<dyn GroupTransport>,
    shared: Arc<Shared>,
}

impl JobDriver {
    async fn run(self, job_id: JobId, groups: Vec<GroupRequest>) -> JobOutcome {
        for request in groups {
            if let Some(outcome) = self.run_group(job_id, request).await {
                return outcome;
            }
        }
        self.shared
            .fail(job_id, "job ended without completing its last group".to_string())
    }

    /// Returns `Some` once the job is over, `None` when the next group may start.
    async fn run_group(&self, job_id: JobId, request: GroupRequest) -> Option<JobOutcome> {
        self.shared.dispatch(Msg::GroupStarted {
            job_id,
            item_ids: request.ids.clone(),
        });

        let reader = match self.transport.open(request).await {
            Ok(reader) => reader,
            Err(err) => return Some(self.shared.fail(job_id, err.to_string())),
        };

        let mut events = decode_stream(reader);
        while let Some(next) = events.next().await {
            match next {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    if let Some(outcome) = self.shared.dispatch(Msg::Event { job_id, event }) {
                        return Some(outcome);
                    }
                    if terminal {
                        return None;
                    }
                }
                Err(err) => {
                    return Some(self.shared.fail(job_id, format!("stream read failed: {err}")));
                }
            }
        }
        Some(
            self.shared
                .fail(job_id, "stream ended before the group completed".to_string()),
        )
    }
}

/// Running job. Dropping the handle does not stop the job.
pub struct JobHandle {
    job_id: JobId,
    progress: watch::Receiver<BatchState>,
    shared: Arc<Shared>,
    task: JoinHandle<JobOutcome>,
}

impl JobHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Live aggregate progress; updated after every record.
    pub fn progress(&self) -> watch::Receiver<BatchState> {
        self.progress.clone()
    }

    pub async fn wait(self) -> JobOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => self
                .shared
                .fail(self.job_id, format!("job task ended unexpectedly: {err}")),
        }
    }
}
