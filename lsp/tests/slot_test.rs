use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lazen_core::instrument::{noop, observer};
use lazen_core::ValueSnapshot;
use lazen_lsp::analysis::{
    AnalysisSettings, DiagnosticKind, EvaluationJob, EvaluationSlot, JobOutcome, QueryDispatcher, QueryError,
    RunStatus,
};
use lazen_lsp::draft::DraftStore;
use tower_lsp::lsp_types::{Position, Range, TextDocumentContentChangeEvent, Url};

fn uri(name: &str) -> Url {
    Url::parse(&format!("file:///project/{}.lz", name)).unwrap()
}

/// Keeps the worker busy inside an observed run until released.
struct Gate {
    release: Option<Sender<()>>,
    started: Receiver<()>,
}

impl Gate {
    fn hold(slot: &EvaluationSlot) -> Self {
        let (release, wait) = mpsc::channel::<()>();
        let (notify, started) = mpsc::channel::<()>();
        let wait = Mutex::new(wait);
        let notify = Mutex::new(notify);
        let blocker = observer(move |_, _, _, _| {
            let _ = notify.lock().unwrap().send(());
            // returns once the sender is dropped
            let _ = wait.lock().unwrap().recv();
        });
        slot.submit(EvaluationJob::observed(uri("gate"), blocker)).unwrap();
        started.recv_timeout(Duration::from_secs(10)).expect("gated run did not start");
        Gate {
            release: Some(release),
            started,
        }
    }

    fn open(mut self) {
        self.release.take();
        while self.started.try_recv().is_ok() {}
    }
}

fn setup(docs: &[(&str, &str)]) -> (Arc<DraftStore>, EvaluationSlot) {
    setup_with(docs, AnalysisSettings::default())
}

fn setup_with(docs: &[(&str, &str)], settings: AnalysisSettings) -> (Arc<DraftStore>, EvaluationSlot) {
    let drafts = Arc::new(DraftStore::new());
    drafts.open(uri("gate"), "1 + 1", 1);
    for (name, text) in docs {
        drafts.open(uri(name), text, 1);
    }
    let slot = EvaluationSlot::new(drafts.clone(), settings).unwrap();
    (drafts, slot)
}

#[tokio::test]
async fn only_one_evaluation_runs_at_a_time() {
    let (_drafts, slot) = setup(&[("a", "{ x = 1; }"), ("b", "[ 1 2 3 ]"), ("c", "let f = n: n * 2; in f 21")]);
    let slot = Arc::new(slot);

    let mut handles = Vec::new();
    for i in 0..12 {
        let slot = slot.clone();
        let name = ["a", "b", "c"][i % 3];
        handles.push(tokio::spawn(async move {
            let job = if i % 2 == 0 {
                EvaluationJob::new(uri(name))
            } else {
                EvaluationJob::observed(uri(name), noop())
            };
            slot.submit(job).unwrap().outcome().await.unwrap()
        }));
    }
    for handle in handles {
        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, JobOutcome::Completed(_) | JobOutcome::Superseded));
    }
    assert_eq!(slot.stats().max_active(), 1);
    assert!(slot.stats().runs() >= 6);
}

#[tokio::test]
async fn queued_plain_jobs_for_a_document_coalesce() {
    let (_drafts, slot) = setup(&[("main", "{ a = 1; }")]);
    let gate = Gate::hold(&slot);

    let first = slot.submit(EvaluationJob::new(uri("main"))).unwrap();
    let second = slot.submit(EvaluationJob::new(uri("main"))).unwrap();
    let third = slot.submit(EvaluationJob::new(uri("main"))).unwrap();
    let last_seq = third.seq;
    gate.open();

    assert!(matches!(first.outcome().await, Ok(JobOutcome::Superseded)));
    assert!(matches!(second.outcome().await, Ok(JobOutcome::Superseded)));
    match third.outcome().await {
        Ok(JobOutcome::Completed(result)) => assert_eq!(result.seq, last_seq),
        other => panic!("expected the newest job to run, got {:?}", other),
    }
    assert_eq!(slot.stats().superseded(), 2);
}

#[tokio::test]
async fn older_results_never_replace_newer_ones() {
    let (_drafts, slot) = setup(&[("main", "{ a = 1; }")]);
    let gate = Gate::hold(&slot);

    let older = slot.submit(EvaluationJob::observed(uri("main"), noop())).unwrap();
    let newer = slot.submit(EvaluationJob::observed(uri("main"), noop())).unwrap();
    let newer_seq = newer.seq;
    gate.open();

    // the newest job runs first, so the older one finishes last
    assert!(matches!(newer.outcome().await, Ok(JobOutcome::Completed(_))));
    assert!(matches!(older.outcome().await, Ok(JobOutcome::Completed(_))));
    assert_eq!(slot.cache().cached().unwrap().seq, newer_seq);
    assert_eq!(slot.cache().last_valid().unwrap().seq, newer_seq);
}

#[tokio::test]
async fn failed_runs_keep_the_last_valid_result() {
    let (drafts, slot) = setup(&[("main", "{ a = 1; }")]);

    let good = slot.submit(EvaluationJob::new(uri("main"))).unwrap();
    let good_seq = good.seq;
    assert!(matches!(good.outcome().await, Ok(JobOutcome::Completed(_))));

    let changed = drafts.apply_changes(
        &uri("main"),
        2,
        vec![TextDocumentContentChangeEvent {
            range: Some(Range::new(Position::new(0, 6), Position::new(0, 7))),
            range_length: None,
            text: "abort \"x\"".to_string(),
        }],
    );
    assert!(changed);

    let bad = slot.submit(EvaluationJob::new(uri("main"))).unwrap();
    let bad_seq = bad.seq;
    let Ok(JobOutcome::Completed(result)) = bad.outcome().await else {
        panic!("job did not complete");
    };
    assert_eq!(result.status, RunStatus::Fatal);
    assert_eq!(result.version, 2);

    let cache = slot.cache().snapshot();
    assert_eq!(cache.cached.as_ref().unwrap().seq, bad_seq);
    let valid = cache.last_valid.as_ref().unwrap();
    assert_eq!(valid.seq, good_seq);
    let attrs = valid.root.as_ref().unwrap().as_attrs().unwrap();
    assert_eq!(attrs.get("a"), Some(&ValueSnapshot::Int(1)));
}

#[tokio::test]
async fn invalidation_drops_runs_already_in_flight() {
    let (_drafts, slot) = setup(&[("main", "{ a = 1; }")]);
    let gate = Gate::hold(&slot);

    let pending = slot.submit(EvaluationJob::new(uri("main"))).unwrap();
    slot.invalidate();
    gate.open();

    assert!(matches!(pending.outcome().await, Ok(JobOutcome::Completed(_))));
    assert!(slot.cache().cached().is_none());
    assert!(slot.cache().last_valid().is_none());

    let fresh = slot.submit(EvaluationJob::new(uri("main"))).unwrap();
    let fresh_seq = fresh.seq;
    assert!(matches!(fresh.outcome().await, Ok(JobOutcome::Completed(_))));
    assert_eq!(slot.cache().cached().unwrap().seq, fresh_seq);
}

#[tokio::test]
async fn slow_hovers_time_out_and_are_not_run_later() {
    let settings = AnalysisSettings {
        timeout: Duration::from_millis(50),
        ..AnalysisSettings::default()
    };
    let (drafts, slot) = setup_with(&[("main", "{ a = 1 + 1; }")], settings);
    let slot = Arc::new(slot);
    let queries = QueryDispatcher::new(slot.clone(), drafts);
    let gate = Gate::hold(&slot);

    let plain = slot.submit(EvaluationJob::new(uri("main"))).unwrap();
    assert_eq!(
        queries.hover(&uri("main"), Position::new(0, 10)).await,
        Err(QueryError::Timeout)
    );
    gate.open();

    assert!(matches!(plain.outcome().await, Ok(JobOutcome::Completed(_))));
    assert_eq!(slot.stats().abandoned(), 1);
    assert_eq!(slot.stats().runs(), 2);
}

#[tokio::test]
async fn panicking_runs_become_fatal_results() {
    let (_drafts, slot) = setup(&[("main", "{ a = 1 + 1; }")]);

    let failing = observer(|_, _, _, _| panic!("observer failed"));
    let ticket = slot.submit(EvaluationJob::observed(uri("main"), failing)).unwrap();
    let Ok(JobOutcome::Completed(result)) = ticket.outcome().await else {
        panic!("job did not complete");
    };
    assert_eq!(result.status, RunStatus::Fatal);
    assert_eq!(result.diagnostics.len(), 1);
    assert_eq!(result.diagnostics[0].kind, DiagnosticKind::Fatal);
    assert!(result.diagnostics[0].message.contains("internal error: observer failed"));
    assert!(slot.cache().last_valid().is_none());

    // the rebuilt interpreter keeps serving
    let ticket = slot.submit(EvaluationJob::new(uri("main"))).unwrap();
    let Ok(JobOutcome::Completed(result)) = ticket.outcome().await else {
        panic!("job did not complete");
    };
    assert_eq!(result.status, RunStatus::Evaluated);
    assert!(result.diagnostics.is_empty());
}
