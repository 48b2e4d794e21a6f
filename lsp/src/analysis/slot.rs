//! Single-owner evaluation worker.
//!
//! The [`Interpreter`] is created on, and never leaves, the `lazen-eval`
//! thread, so only one evaluation can ever touch it at a time. Jobs reach the
//! thread over a channel and answer through a oneshot.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context;
use ropey::Rope;
use tokio::sync::{mpsc, oneshot};
use tower_lsp::lsp_types::Url;
use tracing::{debug, error, info, warn};

use lazen_core::eval::{AutoArgs, DEFAULT_MAX_DEPTH, EvalConfig, EvalError, Interpreter};
use lazen_core::instrument::{Observer, combine, rewrite};
use lazen_core::{Arena, NodeId, parse};

use super::cache::ResultCache;
use super::hover::ValueRecorder;
use super::result::{AnalysisDiagnostic, EvaluationResult, RunStatus, ValueIndex};
use crate::draft::DraftSource;

const WORKER_STACK_SIZE: usize = 64 * 1024 * 1024;

/// The configured starting point of evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPoint {
    /// `--arg name expr` / `--argstr name value` pairs for the root function.
    pub args: Vec<String>,
    /// Document to evaluate instead of the one a job was submitted for.
    pub target: Option<Url>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSettings {
    pub entry: EntryPoint,
    pub max_depth: usize,
    /// Keep a value index for every run, which serves hovers without a new run.
    pub record_values: bool,
    /// How long queries wait for a live run.
    pub timeout: Duration,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            entry: EntryPoint::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            record_values: true,
            timeout: Duration::from_millis(2000),
        }
    }
}

/// A request to evaluate the document behind `uri`.
#[derive(Clone)]
pub struct EvaluationJob {
    /// The job's document, evaluated unless an entry point target is set.
    pub uri: Url,
    pub observer: Option<Observer>,
}

impl EvaluationJob {
    pub fn new(uri: Url) -> Self {
        Self { uri, observer: None }
    }

    /// A job whose observer must run; these are never coalesced away.
    pub fn observed(uri: Url, observer: Observer) -> Self {
        Self {
            uri,
            observer: Some(observer),
        }
    }
}

impl fmt::Debug for EvaluationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationJob")
            .field("uri", &self.uri.as_str())
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed(Arc<EvaluationResult>),
    /// A newer job for the same document replaced this one before it ran.
    Superseded,
    /// The document to evaluate is not open.
    DocumentNotOpen(Url),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotClosed;

impl fmt::Display for SlotClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evaluation worker is not running")
    }
}

impl std::error::Error for SlotClosed {}

/// Handle to a submitted job.
#[derive(Debug)]
pub struct JobTicket {
    pub seq: u64,
    rx: oneshot::Receiver<JobOutcome>,
}

impl JobTicket {
    pub async fn outcome(self) -> Result<JobOutcome, SlotClosed> {
        self.rx.await.map_err(|_| SlotClosed)
    }
}

/// Counters kept by the worker.
#[derive(Debug, Default)]
pub struct SlotStats {
    runs: AtomicU64,
    superseded: AtomicU64,
    abandoned: AtomicU64,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl SlotStats {
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn superseded(&self) -> u64 {
        self.superseded.load(Ordering::SeqCst)
    }

    /// Observed jobs skipped because nobody was waiting for them anymore.
    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Largest number of evaluations ever seen running at once.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

enum Message {
    Submit(Queued),
    Shutdown,
}

struct Queued {
    seq: u64,
    job: EvaluationJob,
    reply: oneshot::Sender<JobOutcome>,
}

pub struct EvaluationSlot {
    tx: mpsc::UnboundedSender<Message>,
    next_seq: AtomicU64,
    cache: Arc<ResultCache>,
    settings: Arc<Mutex<AnalysisSettings>>,
    stats: Arc<SlotStats>,
    worker: Option<JoinHandle<()>>,
}

impl EvaluationSlot {
    pub fn new(drafts: Arc<dyn DraftSource>, settings: AnalysisSettings) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let cache = Arc::new(ResultCache::new());
        let settings = Arc::new(Mutex::new(settings));
        let stats = Arc::new(SlotStats::default());

        let shared = Shared {
            drafts,
            cache: cache.clone(),
            settings: settings.clone(),
            stats: stats.clone(),
        };
        let worker = std::thread::Builder::new()
            .name("lazen-eval".to_string())
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || Worker::new(shared).run(rx))
            .context("failed to start the evaluation worker")?;

        Ok(Self {
            tx,
            next_seq: AtomicU64::new(0),
            cache,
            settings,
            stats,
            worker: Some(worker),
        })
    }

    /// Queue `job`. Sequence numbers are handed out in submission order.
    pub fn submit(&self, job: EvaluationJob) -> Result<JobTicket, SlotClosed> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let (reply, rx) = oneshot::channel();
        debug!(seq, job = ?job, "submitting evaluation");
        self.tx
            .send(Message::Submit(Queued { seq, job, reply }))
            .map_err(|_| SlotClosed)?;
        Ok(JobTicket { seq, rx })
    }

    /// Forget every result; runs submitted before this call can no longer land.
    pub fn invalidate(&self) {
        let floor = self.next_seq.load(Ordering::SeqCst);
        info!(floor, "invalidating analysis results");
        self.cache.invalidate(floor);
    }

    pub fn configure(&self, settings: AnalysisSettings) {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    pub fn settings(&self) -> AnalysisSettings {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The document a job submitted for `uri` evaluates.
    pub fn resolve_root(&self, uri: &Url) -> Url {
        let settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        settings.entry.target.clone().unwrap_or_else(|| uri.clone())
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn stats(&self) -> &SlotStats {
        &self.stats
    }
}

impl Drop for EvaluationSlot {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("evaluation worker panicked during shutdown");
            }
        }
    }
}

struct Shared {
    drafts: Arc<dyn DraftSource>,
    cache: Arc<ResultCache>,
    settings: Arc<Mutex<AnalysisSettings>>,
    stats: Arc<SlotStats>,
}

struct Worker {
    interpreter: Interpreter,
    shared: Shared,
    /// Oldest first; the newest job runs next.
    pending: Vec<Queued>,
}

impl Worker {
    fn new(shared: Shared) -> Self {
        Self {
            interpreter: Interpreter::default(),
            shared,
            pending: Vec::new(),
        }
    }

    fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        info!("evaluation worker started");
        'serve: loop {
            if self.pending.is_empty() {
                match rx.blocking_recv() {
                    Some(message) => {
                        if !self.accept(message) {
                            break 'serve;
                        }
                    }
                    None => break 'serve,
                }
            }
            while let Ok(message) = rx.try_recv() {
                if !self.accept(message) {
                    break 'serve;
                }
            }
            if let Some(queued) = self.pending.pop() {
                self.execute(queued);
            }
        }
        info!(pending = self.pending.len(), "evaluation worker stopped");
    }

    /// Returns false on shutdown.
    fn accept(&mut self, message: Message) -> bool {
        let queued = match message {
            Message::Submit(queued) => queued,
            Message::Shutdown => return false,
        };
        if queued.job.observer.is_none() {
            let (superseded, kept): (Vec<Queued>, Vec<Queued>) = std::mem::take(&mut self.pending)
                .into_iter()
                .partition(|p| p.job.observer.is_none() && p.job.uri == queued.job.uri);
            self.pending = kept;
            for old in superseded {
                debug!(seq = old.seq, by = queued.seq, "evaluation superseded");
                self.shared.stats.superseded.fetch_add(1, Ordering::SeqCst);
                let _ = old.reply.send(JobOutcome::Superseded);
            }
        }
        self.pending.push(queued);
        true
    }

    fn execute(&mut self, queued: Queued) {
        let Queued { seq, job, reply } = queued;
        if job.observer.is_some() && reply.is_closed() {
            debug!(seq, uri = %job.uri, "skipping observed evaluation nobody waits for");
            self.shared.stats.abandoned.fetch_add(1, Ordering::SeqCst);
            return;
        }
        let settings = self
            .shared
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let root = settings.entry.target.clone().unwrap_or(job.uri);
        let Some((text, version)) = self.shared.drafts.get_text(&root) else {
            warn!(seq, root = %root, "evaluation root is not open");
            let _ = reply.send(JobOutcome::DocumentNotOpen(root));
            return;
        };

        let started = Instant::now();
        self.shared.stats.enter();
        let interpreter = &mut self.interpreter;
        let run = catch_unwind(AssertUnwindSafe(|| {
            evaluate_document(interpreter, &settings, seq, &root, &text, version, job.observer)
        }));
        self.shared.stats.leave();

        let result = match run {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(seq, root = %root, %message, "evaluation panicked; rebuilding interpreter");
                self.interpreter = Interpreter::new(EvalConfig {
                    max_depth: settings.max_depth,
                });
                let diagnostic = AnalysisDiagnostic::from_eval_error(
                    &EvalError::internal(format!("internal error: {}", message)),
                    &Rope::new(),
                );
                EvaluationResult {
                    seq,
                    uri: root,
                    version,
                    status: RunStatus::Fatal,
                    root: Err(diagnostic.clone()),
                    diagnostics: vec![diagnostic],
                    values: ValueIndex::default(),
                }
            }
        };

        let result = Arc::new(result);
        self.shared.cache.publish(result.clone());
        debug!(
            seq,
            version,
            status = ?result.status,
            diagnostics = result.diagnostics.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "evaluation finished"
        );
        let _ = reply.send(JobOutcome::Completed(result));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Parse, instrument and evaluate one document.
fn evaluate_document(
    interpreter: &mut Interpreter,
    settings: &AnalysisSettings,
    seq: u64,
    uri: &Url,
    text: &str,
    version: i32,
    observer: Option<Observer>,
) -> EvaluationResult {
    let rope = Rope::from_str(text);
    let finish = |status: RunStatus,
                  root: Result<_, AnalysisDiagnostic>,
                  diagnostics: Vec<AnalysisDiagnostic>,
                  values: ValueIndex| EvaluationResult {
        seq,
        uri: uri.clone(),
        version,
        status,
        root,
        diagnostics,
        values,
    };

    let mut tree = match parse(text) {
        Ok(tree) => tree,
        Err(err) => {
            debug!(seq, uri = %uri, version, error = %err, "parse failed");
            let diagnostic = AnalysisDiagnostic::from_parse_error(&err, &rope);
            return finish(
                RunStatus::ParseFailed,
                Err(diagnostic.clone()),
                vec![diagnostic],
                ValueIndex::default(),
            );
        }
    };

    let auto_args = AutoArgs::from_args(&mut tree.arena, &settings.entry.args).unwrap_or_else(|err| {
        warn!(error = %format!("{:#}", err), "ignoring invalid entry point arguments");
        AutoArgs::new()
    });

    let recorder = settings.record_values.then(ValueRecorder::new);
    let observers: Vec<Observer> = recorder
        .iter()
        .map(ValueRecorder::observer)
        .chain(observer)
        .collect();
    let root = match instrument(&mut tree.arena, tree.root, observers, &rope) {
        Ok(root) => root,
        Err(diagnostic) => {
            error!(seq, uri = %uri, version, message = %diagnostic.message, "instrumentation failed");
            return finish(
                RunStatus::Fatal,
                Err(diagnostic.clone()),
                vec![diagnostic],
                ValueIndex::default(),
            );
        }
    };

    interpreter.set_max_depth(settings.max_depth);
    let evaluation = interpreter.evaluate(&tree.arena, root, &auto_args);
    let values = recorder.map(|r| r.finish(&rope)).unwrap_or_default();
    match evaluation {
        Ok(evaluation) => {
            let diagnostics = evaluation
                .errors
                .iter()
                .map(|e| AnalysisDiagnostic::from_eval_error(e, &rope))
                .collect();
            let root = evaluation
                .value
                .map_err(|e| AnalysisDiagnostic::from_eval_error(&e, &rope));
            finish(RunStatus::Evaluated, root, diagnostics, values)
        }
        Err(fatal) => {
            warn!(seq, uri = %uri, version, error = %fatal, "evaluation stopped on a fatal error");
            let diagnostic = AnalysisDiagnostic::from_eval_error(&fatal, &rope);
            finish(RunStatus::Fatal, Err(diagnostic.clone()), vec![diagnostic], values)
        }
    }
}

/// Wrap `root` with every observer. A rewrite failure is an internal error.
pub(super) fn instrument(
    arena: &mut Arena,
    root: NodeId,
    observers: Vec<Observer>,
    rope: &Rope,
) -> Result<NodeId, AnalysisDiagnostic> {
    if observers.is_empty() {
        return Ok(root);
    }
    rewrite(arena, root, &combine(observers))
        .map_err(|err| AnalysisDiagnostic::from_eval_error(&EvalError::internal(err.to_string()), rope))
}
