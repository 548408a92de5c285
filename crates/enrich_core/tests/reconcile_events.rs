use std::sync::{Arc, Once};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use enrich_core::{
    Effect, Item, ItemId, ItemResult, ItemStore, JobId, JobOutcome, JobReconciler,
    MemoryItemStore, Msg, ProgressEvent, Status,
};
use pretty_assertions::assert_eq;

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(enrich_logging::initialize_for_tests);
}

fn t(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(seconds)
}

fn progress(index: usize, total: usize, text: &str) -> ProgressEvent {
    ProgressEvent::Progress {
        processed_in_group: index,
        total_in_group: total,
        current_item_text: Some(text.to_string()),
    }
}

fn result(index: usize, total: usize, item: ItemResult) -> ProgressEvent {
    ProgressEvent::Result {
        processed_in_group: index + 1,
        total_in_group: total,
        item,
    }
}

fn ok(text: &str) -> ItemResult {
    ItemResult::succeeded(text, format!("about {text}"), format!("/audio/{text}.mp3"))
}

fn complete(results: Vec<ItemResult>) -> ProgressEvent {
    ProgressEvent::Complete {
        processed_in_group: results.len(),
        total_in_group: results.len(),
        all_results: results,
    }
}

struct Harness {
    store: Arc<MemoryItemStore>,
    reconciler: JobReconciler,
}

impl Harness {
    fn new(items: Vec<Item>) -> Self {
        init_logging();
        let store = Arc::new(MemoryItemStore::with_items(items));
        let reconciler =
            JobReconciler::new(store.clone()).with_reset_grace(Duration::from_millis(10));
        Self { store, reconciler }
    }

    fn admit(&mut self, ids: &[&str]) -> (JobId, Vec<Vec<ItemId>>) {
        let ids: Vec<ItemId> = ids.iter().map(|id| id.to_string()).collect();
        let plan = self
            .reconciler
            .admit(&ids, |item| item.group_key.clone(), t(0))
            .expect("admitted");
        let groups = plan
            .groups
            .iter()
            .map(|group| group.items.iter().map(|item| item.id.clone()).collect())
            .collect();
        (plan.job_id, groups)
    }

    fn start(&mut self, job_id: JobId, item_ids: &[ItemId]) {
        let effects = self.reconciler.update(
            Msg::GroupStarted {
                job_id,
                item_ids: item_ids.to_vec(),
            },
            t(0),
        );
        assert!(effects.is_empty());
    }

    fn send(&mut self, job_id: JobId, event: ProgressEvent, at: DateTime<Utc>) -> Vec<Effect> {
        self.reconciler.update(Msg::Event { job_id, event }, at)
    }

    fn status(&self, id: &str) -> Status {
        self.store.get(id).expect("item").status
    }
}

fn spanish() -> Vec<Item> {
    vec![Item::new("1", "hola", "es"), Item::new("2", "adios", "es")]
}

#[test]
fn single_group_run_completes_items_and_releases_guard() {
    let mut h = Harness::new(spanish());
    let (job, groups) = h.admit(&["1", "2"]);
    h.start(job, &groups[0]);

    assert!(h.send(job, progress(0, 2, "hola"), t(1)).is_empty());
    assert_eq!(h.status("1"), Status::Generating);
    assert_eq!(h.status("2"), Status::Pending);
    assert_eq!(h.reconciler.batch_state().current_item_text.as_deref(), Some("hola"));

    h.send(job, result(0, 2, ok("hola")), t(2));
    let first = h.store.get("1").unwrap();
    assert_eq!(first.status, Status::Complete);
    assert_eq!(first.result_text.as_deref(), Some("about hola"));
    assert_eq!(first.result_asset_path.as_deref(), Some("/audio/hola.mp3"));
    assert_eq!(first.last_generated_at, Some(t(2)));

    h.send(job, progress(1, 2, "adios"), t(3));
    assert_eq!(h.status("2"), Status::Generating);
    h.send(job, result(1, 2, ok("adios")), t(4));

    let effects = h.send(job, complete(vec![ok("hola"), ok("adios")]), t(4));
    assert_eq!(
        effects,
        vec![
            Effect::JobFinished {
                job_id: job,
                outcome: JobOutcome::Completed {
                    successful: 2,
                    failed: 0
                },
            },
            Effect::ScheduleReset {
                job_id: job,
                after: Duration::from_millis(10),
            },
        ]
    );
    assert!(!h.reconciler.guard().is_held());
    assert!(!h.reconciler.is_running());

    // Terminal tally stays until the grace period runs out.
    let batch = h.reconciler.batch_state().clone();
    assert_eq!(batch.total_processed, 2);
    assert_eq!(batch.successful, 2);
    assert_eq!(batch.current_item_text, None);

    h.reconciler.update(Msg::GraceElapsed { job_id: job }, t(10));
    assert!(h.reconciler.batch_state().is_idle());
}

#[test]
fn failed_item_is_recorded_and_others_continue() {
    let mut h = Harness::new(vec![
        Item::new("a", "uno", "es"),
        Item::new("b", "dos", "es"),
        Item::new("c", "tres", "es"),
    ]);
    let (job, groups) = h.admit(&["a", "b", "c"]);
    h.start(job, &groups[0]);

    let failed = ItemResult::failed("dos", "provider rejected text");
    let events = vec![
        progress(0, 3, "uno"),
        result(0, 3, ok("uno")),
        progress(1, 3, "dos"),
        result(1, 3, failed.clone()),
        progress(2, 3, "tres"),
        result(2, 3, ok("tres")),
    ];
    for (second, event) in events.into_iter().enumerate() {
        h.send(job, event, t(second as i64 + 1));
    }
    let effects = h.send(job, complete(vec![ok("uno"), failed, ok("tres")]), t(7));

    assert_eq!(h.status("a"), Status::Complete);
    assert_eq!(h.status("c"), Status::Complete);
    let b = h.store.get("b").unwrap();
    assert_eq!(b.status, Status::Error);
    assert_eq!(b.error_message.as_deref(), Some("provider rejected text"));
    assert!(matches!(
        effects.first(),
        Some(Effect::JobFinished {
            outcome: JobOutcome::Completed {
                successful: 2,
                failed: 1
            },
            ..
        })
    ));
}

#[test]
fn progress_stays_monotonic_across_groups() {
    let mut h = Harness::new(vec![
        Item::new("1", "hola", "es"),
        Item::new("2", "merci", "fr"),
        Item::new("3", "adios", "es"),
    ]);
    let (job, groups) = h.admit(&["1", "2", "3"]);
    assert_eq!(groups, vec![vec!["1".to_string(), "3".to_string()], vec!["2".to_string()]]);

    let mut seen = Vec::new();
    h.start(job, &groups[0]);
    for event in [
        progress(0, 2, "hola"),
        result(0, 2, ok("hola")),
        progress(1, 2, "adios"),
        result(1, 2, ok("adios")),
        complete(vec![ok("hola"), ok("adios")]),
    ] {
        h.send(job, event, t(1));
        seen.push(h.reconciler.batch_state().total_processed);
    }
    assert!(h.reconciler.is_running());

    h.start(job, &groups[1]);
    for event in [progress(0, 1, "merci"), result(0, 1, ok("merci"))] {
        h.send(job, event, t(2));
        seen.push(h.reconciler.batch_state().total_processed);
    }
    assert_eq!(h.status("2"), Status::Complete);
    let effects = h.send(job, complete(vec![ok("merci")]), t(2));
    seen.push(h.reconciler.batch_state().total_processed);

    assert_eq!(seen, vec![0, 1, 1, 2, 2, 2, 3, 3]);
    assert!(matches!(
        effects.first(),
        Some(Effect::JobFinished {
            outcome: JobOutcome::Completed { successful: 3, .. },
            ..
        })
    ));
}

#[test]
fn error_event_fails_every_unfinished_item_of_the_job() {
    let mut h = Harness::new(vec![
        Item::new("1", "hola", "es"),
        Item::new("2", "merci", "fr"),
        Item::new("3", "salut", "fr"),
        Item::new("4", "ciao", "it"),
    ]);
    let (job, groups) = h.admit(&["1", "2", "3", "4"]);

    h.start(job, &groups[0]);
    h.send(job, progress(0, 1, "hola"), t(1));
    h.send(job, result(0, 1, ok("hola")), t(1));
    h.send(job, complete(vec![ok("hola")]), t(1));

    h.start(job, &groups[1]);
    h.send(job, progress(0, 2, "merci"), t(2));
    let effects = h.send(
        job,
        ProgressEvent::Error {
            message: "missing api key".to_string(),
        },
        t(2),
    );

    assert_eq!(
        effects[0],
        Effect::JobFinished {
            job_id: job,
            outcome: JobOutcome::Failed {
                message: "missing api key".to_string()
            },
        }
    );
    assert_eq!(h.status("1"), Status::Complete);
    for id in ["2", "3", "4"] {
        let item = h.store.get(id).unwrap();
        assert_eq!(item.status, Status::Error, "item {id}");
        assert_eq!(
            item.error_message.as_deref(),
            Some("batch aborted: missing api key")
        );
    }
    assert!(!h.reconciler.guard().is_held());
    let batch = h.reconciler.batch_state();
    assert_eq!(batch.successful, 1);
    assert_eq!(batch.failed, 3);
    assert_eq!(batch.estimated_seconds_remaining, None);
}

#[test]
fn transport_failure_behaves_like_error_event() {
    let mut h = Harness::new(spanish());
    let (job, groups) = h.admit(&["1", "2"]);
    h.start(job, &groups[0]);
    h.send(job, progress(0, 2, "hola"), t(1));

    let effects = h.reconciler.update(
        Msg::TransportFailed {
            job_id: job,
            message: "stream ended early".to_string(),
        },
        t(2),
    );

    assert_eq!(effects.len(), 2);
    assert_eq!(h.status("1"), Status::Error);
    assert_eq!(h.status("2"), Status::Error);
    assert!(!h.reconciler.is_running());
}

#[test]
fn result_without_progress_still_completes_item() {
    let mut h = Harness::new(spanish());
    let (job, groups) = h.admit(&["1", "2"]);
    h.start(job, &groups[0]);

    h.send(job, result(0, 2, ok("hola")), t(1));
    assert_eq!(h.status("1"), Status::Complete);
}

#[test]
fn complete_with_unreported_item_fails_it() {
    let mut h = Harness::new(spanish());
    let (job, groups) = h.admit(&["1", "2"]);
    h.start(job, &groups[0]);
    h.send(job, progress(0, 2, "hola"), t(1));
    h.send(job, result(0, 2, ok("hola")), t(1));

    h.send(job, complete(vec![ok("hola")]), t(2));

    let missing = h.store.get("2").unwrap();
    assert_eq!(missing.status, Status::Error);
    assert_eq!(missing.error_message.as_deref(), Some("no result reported"));
    assert_eq!(h.reconciler.batch_state().failed, 1);
}

#[test]
fn result_for_unknown_text_is_not_counted() {
    let mut h = Harness::new(vec![Item::new("1", "hola", "es")]);
    let (job, groups) = h.admit(&["1"]);
    h.start(job, &groups[0]);
    h.send(job, progress(0, 1, "hola"), t(1));

    h.send(job, result(0, 1, ok("Hola")), t(2));
    assert_eq!(h.reconciler.batch_state().successful, 0);
    assert_eq!(h.status("1"), Status::Generating);

    let effects = h.send(job, complete(vec![ok("Hola")]), t(2));

    let state = h.reconciler.batch_state();
    assert!(state.successful + state.failed <= state.total_requested);
    assert_eq!((state.successful, state.failed), (0, 1));
    assert_eq!(h.status("1"), Status::Error);
    assert_eq!(
        effects[0],
        Effect::JobFinished {
            job_id: job,
            outcome: JobOutcome::Completed {
                successful: 0,
                failed: 1
            },
        }
    );
}

#[test]
fn repeated_result_for_one_item_counts_once() {
    let mut h = Harness::new(spanish());
    let (job, groups) = h.admit(&["1", "2"]);
    h.start(job, &groups[0]);
    h.send(job, progress(0, 2, "hola"), t(1));
    h.send(job, result(0, 2, ok("hola")), t(1));
    h.send(job, result(0, 2, ok("hola")), t(1));
    h.send(job, progress(1, 2, "adios"), t(2));
    h.send(job, result(1, 2, ok("adios")), t(2));

    h.send(job, complete(vec![ok("hola"), ok("adios")]), t(3));

    let state = h.reconciler.batch_state();
    assert_eq!((state.successful, state.failed), (2, 0));
    assert!(state.successful + state.failed <= state.total_requested);
}

#[test]
fn eta_follows_throughput() {
    let mut h = Harness::new(vec![
        Item::new("1", "a", "x"),
        Item::new("2", "b", "x"),
        Item::new("3", "c", "x"),
        Item::new("4", "d", "x"),
    ]);
    let (job, groups) = h.admit(&["1", "2", "3", "4"]);
    h.start(job, &groups[0]);

    h.send(job, progress(0, 4, "a"), t(0));
    assert_eq!(h.reconciler.batch_state().estimated_seconds_remaining, None);

    h.send(job, result(0, 4, ok("a")), t(5));
    assert_eq!(h.reconciler.batch_state().estimated_seconds_remaining, Some(15.0));

    h.send(job, progress(1, 4, "b"), t(5));
    h.send(job, result(1, 4, ok("b")), t(8));
    assert_eq!(h.reconciler.batch_state().estimated_seconds_remaining, Some(8.0));
}

#[test]
fn stale_messages_are_ignored() {
    let mut h = Harness::new(spanish());
    let (first, groups) = h.admit(&["1"]);
    h.start(first, &groups[0]);
    h.send(first, progress(0, 1, "hola"), t(1));
    h.send(first, result(0, 1, ok("hola")), t(1));
    h.send(first, complete(vec![ok("hola")]), t(1));

    let (second, groups) = h.admit(&["2"]);
    assert_ne!(first, second);
    h.start(second, &groups[0]);

    // Late reset timer and late records of the first job.
    h.reconciler.update(Msg::GraceElapsed { job_id: first }, t(2));
    assert_eq!(h.reconciler.batch_state().total_requested, 1);
    assert!(h.send(first, progress(0, 1, "adios"), t(2)).is_empty());
    assert_eq!(h.status("2"), Status::Pending);

    h.send(second, progress(0, 1, "adios"), t(3));
    assert_eq!(h.status("2"), Status::Generating);
}
