use std::sync::Arc;

use tower_lsp::lsp_types::{Position, Range, Url};

use lazen_core::eval::{MAX_ENV_BINDINGS, ValueSnapshot};
use lazen_core::instrument::noop;

use super::slot::instrument;
use super::*;
use crate::draft::DraftStore;

fn uri(name: &str) -> Url {
    Url::parse(&format!("file:///work/{}.lz", name)).unwrap()
}

fn result(seq: u64, version: i32, status: RunStatus) -> Arc<EvaluationResult> {
    Arc::new(EvaluationResult {
        seq,
        uri: uri("main"),
        version,
        status,
        root: Ok(ValueSnapshot::Null),
        diagnostics: Vec::new(),
        values: ValueIndex::default(),
    })
}

#[test]
fn cache_ignores_out_of_order_completions() {
    let cache = ResultCache::new();
    let newer = cache.publish(result(2, 2, RunStatus::Evaluated));
    assert!(newer.cached && newer.last_valid);

    let older = cache.publish(result(1, 1, RunStatus::Evaluated));
    assert_eq!(older, Published::default());
    assert_eq!(cache.cached().unwrap().version, 2);
    assert_eq!(cache.last_valid().unwrap().version, 2);
}

#[test]
fn failed_runs_only_replace_the_attempt() {
    let cache = ResultCache::new();
    cache.publish(result(1, 1, RunStatus::Evaluated));
    let fatal = cache.publish(result(2, 2, RunStatus::Fatal));
    assert_eq!(
        fatal,
        Published {
            cached: true,
            last_valid: false
        }
    );
    cache.publish(result(3, 3, RunStatus::ParseFailed));

    let snapshot = cache.snapshot();
    assert_eq!(snapshot.last_valid.as_ref().unwrap().seq, 1);
    assert_eq!(snapshot.cached.as_ref().unwrap().seq, 3);
}

#[test]
fn invalidation_refuses_older_submissions() {
    let cache = ResultCache::new();
    cache.publish(result(1, 1, RunStatus::Evaluated));
    let held = cache.snapshot();
    cache.invalidate(3);

    assert!(cache.cached().is_none());
    assert!(cache.last_valid().is_none());
    // readers keep what they copied out
    assert_eq!(held.cached.as_ref().unwrap().seq, 1);

    assert!(!cache.publish(result(3, 3, RunStatus::Evaluated)).cached);
    assert!(cache.publish(result(4, 4, RunStatus::Evaluated)).cached);

    cache.invalidate(2);
    assert_eq!(cache.snapshot().floor, 3);
}

fn entry(start: usize, end: usize, value: i64) -> ValueEntry {
    let text = lazen_core::parse("0").unwrap();
    let mut span = text.root_node().span;
    span.start.offset = start;
    span.end.offset = end;
    ValueEntry {
        span,
        range: Range::default(),
        value: ValueSnapshot::Int(value),
        env: Default::default(),
    }
}

#[test]
fn value_index_prefers_the_smallest_node() {
    let index = ValueIndex::new(vec![entry(0, 20, 1), entry(5, 10, 2), entry(6, 9, 3), entry(6, 9, 4)]);
    assert_eq!(index.at(7).map(|e| &e.value), Some(&ValueSnapshot::Int(3)));
    assert_eq!(index.at(12).map(|e| &e.value), Some(&ValueSnapshot::Int(1)));
    assert!(index.at(30).is_none());
}

#[test]
fn completion_filters_by_prefix() {
    let text = "let counter = 1; config = { }; in co";
    let labels: Vec<String> = candidates(text, text, None).into_iter().map(|c| c.label).collect();
    assert_eq!(labels, vec!["counter".to_string(), "config".to_string()]);

    let members = candidates("builtins.le", "builtins.le", None);
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].label, "length");
    assert_eq!(members[0].kind, CandidateKind::Builtin);

    let all = candidates("", "", None);
    assert!(all.iter().any(|c| c.label == "throw" && c.detail.is_some()));
    assert!(all.iter().any(|c| c.label == "inherit" && c.kind == CandidateKind::Keyword));
}

#[test]
fn parse_errors_map_to_syntax_diagnostics() {
    let diagnostics = parse_diagnostics("{ a = 1 +; }");
    assert_eq!(diagnostics.len(), 1);
    let diagnostic = &diagnostics[0];
    assert_eq!(diagnostic.kind, DiagnosticKind::Syntax);
    assert_eq!(diagnostic.range.start, Position::new(0, 8));
    assert_eq!(diagnostic.code(), "lazen_syntax_error");
    let lsp = diagnostic.to_lsp();
    assert_eq!(lsp.source.as_deref(), Some("lazen"));
}

#[tokio::test]
async fn slot_evaluates_and_caches() {
    let drafts = Arc::new(DraftStore::new());
    drafts.open(uri("main"), "{ a = 1 + 1; b = a * 2; }", 3);
    let slot = EvaluationSlot::new(drafts.clone(), AnalysisSettings::default()).unwrap();

    let ticket = slot.submit(EvaluationJob::new(uri("main"))).unwrap();
    let seq = ticket.seq;
    let JobOutcome::Completed(done) = ticket.outcome().await.unwrap() else {
        panic!("job did not complete");
    };
    assert_eq!(done.seq, seq);
    assert_eq!(done.version, 3);
    assert_eq!(done.status, RunStatus::Evaluated);
    assert_eq!(done.root_attr_names(), vec!["a".to_string(), "b".to_string()]);
    assert!(!done.values.is_empty());
    assert_eq!(slot.cache().cached().unwrap().seq, seq);
    assert_eq!(slot.stats().runs(), 1);
}

#[tokio::test]
async fn slot_reports_unopened_documents() {
    let drafts = Arc::new(DraftStore::new());
    let slot = EvaluationSlot::new(drafts, AnalysisSettings::default()).unwrap();
    let outcome = slot.submit(EvaluationJob::new(uri("missing"))).unwrap().outcome().await;
    assert!(matches!(outcome, Ok(JobOutcome::DocumentNotOpen(u)) if u == uri("missing")));
    assert!(slot.cache().cached().is_none());
}

#[tokio::test]
async fn entry_point_target_and_args() {
    let drafts = Arc::new(DraftStore::new());
    drafts.open(uri("entry"), "{ name }: { greeting = \"hi \" + name; }", 1);
    drafts.open(uri("other"), "1 +", 1);
    let settings = AnalysisSettings {
        entry: EntryPoint {
            args: vec!["--argstr".into(), "name".into(), "there".into()],
            target: Some(uri("entry")),
        },
        ..AnalysisSettings::default()
    };
    let slot = Arc::new(EvaluationSlot::new(drafts.clone(), settings).unwrap());
    let queries = QueryDispatcher::new(slot.clone(), drafts.clone());

    let JobOutcome::Completed(done) = slot.submit(EvaluationJob::new(uri("other"))).unwrap().outcome().await.unwrap()
    else {
        panic!("job did not complete");
    };
    assert_eq!(done.uri, uri("entry"));
    let greeting = done.root.as_ref().unwrap().as_attrs().unwrap().get("greeting").cloned();
    assert_eq!(greeting, Some(ValueSnapshot::String("hi there".to_string())));

    // documents other than the root only get parse diagnostics
    let report = queries.diagnose(&uri("other")).await.unwrap();
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].kind, DiagnosticKind::Syntax);
}

#[tokio::test]
async fn bad_entry_arguments_are_ignored() {
    let drafts = Arc::new(DraftStore::new());
    drafts.open(uri("main"), "{ n ? 5 }: n", 1);
    let settings = AnalysisSettings {
        entry: EntryPoint {
            args: vec!["--arg".into(), "n".into()],
            target: None,
        },
        ..AnalysisSettings::default()
    };
    let slot = EvaluationSlot::new(drafts, settings).unwrap();
    let JobOutcome::Completed(done) = slot.submit(EvaluationJob::new(uri("main"))).unwrap().outcome().await.unwrap()
    else {
        panic!("job did not complete");
    };
    assert_eq!(done.root, Ok(ValueSnapshot::Int(5)));
}

#[tokio::test]
async fn hover_scenario_and_invalidate() {
    let drafts = Arc::new(DraftStore::new());
    drafts.open(uri("main"), "{ a = 1 + 1; b = a * 2; }", 1);
    let slot = Arc::new(EvaluationSlot::new(drafts.clone(), AnalysisSettings::default()).unwrap());
    let queries = QueryDispatcher::new(slot.clone(), drafts.clone());

    let info = queries.hover(&uri("main"), Position::new(0, 19)).await.unwrap();
    assert_eq!(info.type_name, "int");
    assert_eq!(info.value, "4");
    assert_eq!(info.range, Range::new(Position::new(0, 17), Position::new(0, 22)));
    assert!(info.env.iter().any(|b| b.name == "a" && b.value == ValueSnapshot::Int(2)));
    assert!(!info.stale);
    assert!(info.to_markdown().contains("`a` = `2`"));

    assert!(queries.cached_hover(&uri("main"), Position::new(0, 19)).is_ok());
    queries.invalidate();
    assert_eq!(
        queries.cached_hover(&uri("main"), Position::new(0, 19)),
        Err(QueryError::NoInfo)
    );
}

#[tokio::test]
async fn hover_on_builtins_shows_docs() {
    let drafts = Arc::new(DraftStore::new());
    drafts.open(uri("main"), "builtins.length [ 1 2 ]", 1);
    let settings = AnalysisSettings {
        record_values: false,
        ..AnalysisSettings::default()
    };
    let slot = Arc::new(EvaluationSlot::new(drafts.clone(), settings).unwrap());
    let queries = QueryDispatcher::new(slot, drafts);

    let info = queries.hover(&uri("main"), Position::new(0, 11)).await.unwrap();
    assert_eq!(info.type_name, "lambda");
    assert!(info.doc.unwrap().contains("number of elements"));
}

#[tokio::test]
async fn unforced_code_has_no_hover() {
    let drafts = Arc::new(DraftStore::new());
    drafts.open(uri("main"), "let unused = 40 + 2; in 1", 1);
    let slot = Arc::new(EvaluationSlot::new(drafts.clone(), AnalysisSettings::default()).unwrap());
    let queries = QueryDispatcher::new(slot, drafts);

    assert_eq!(
        queries.hover(&uri("main"), Position::new(0, 16)).await,
        Err(QueryError::NoInfo)
    );
    assert_eq!(
        queries.hover(&uri("nope"), Position::new(0, 0)).await,
        Err(QueryError::DocumentNotOpen(uri("nope")))
    );
}

#[tokio::test]
async fn large_scopes_keep_hovers_bounded() {
    let mut text = String::from("{ ");
    for i in 0..2000 {
        text.push_str(&format!("a{i} = {i}; "));
    }
    text.push_str("r = a0 + 1; }");
    let plus = text.find("a0 + 1").unwrap() + 3;

    let drafts = Arc::new(DraftStore::new());
    drafts.open(uri("main"), &text, 1);
    let slot = Arc::new(EvaluationSlot::new(drafts.clone(), AnalysisSettings::default()).unwrap());
    let queries = QueryDispatcher::new(slot.clone(), drafts);

    let report = queries.diagnose(&uri("main")).await.unwrap();
    assert!(!report.stale);
    assert!(report.diagnostics.is_empty());
    assert_eq!(slot.cache().cached().unwrap().status, RunStatus::Evaluated);

    let info = queries.hover(&uri("main"), Position::new(0, plus as u32)).await.unwrap();
    assert_eq!(info.value, "1");
    assert_eq!(info.env.len(), MAX_ENV_BINDINGS);
    assert!(info.env_truncated);
    assert!(info.to_markdown().ends_with("- ..."));
}

#[test]
fn failed_instrumentation_is_an_internal_error() {
    let text = "1 + 1";
    let rope = ropey::Rope::from_str(text);
    let mut tree = lazen_core::parse(text).unwrap();
    assert_eq!(instrument(&mut tree.arena, tree.root, Vec::new(), &rope), Ok(tree.root));

    let root = instrument(&mut tree.arena, tree.root, vec![noop()], &rope).unwrap();
    assert_ne!(root, tree.root);
    let err = instrument(&mut tree.arena, root, vec![noop()], &rope).unwrap_err();
    assert_eq!(err.kind, DiagnosticKind::Fatal);
    assert!(err.message.contains("already instrumented"));
}
