use std::fmt;
use std::sync::Arc;

use ropey::Rope;
use serde::Serialize;
use tokio::time::timeout;
use tower_lsp::lsp_types::{Position, Url};
use tracing::debug;

use lazen_core::{Span, parse};

use super::completion::{CompletionCandidate, candidates};
use super::hover::{HoverCapture, HoverInfo};
use super::result::{AnalysisDiagnostic, EvaluationResult, ValueEntry, parse_diagnostics};
use super::slot::{EvaluationJob, EvaluationSlot, JobOutcome, SlotClosed};
use crate::draft::{DraftSource, position_to_char_idx};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Nothing was evaluated at the position.
    NoInfo,
    /// The live run did not finish in time; it keeps running.
    Timeout,
    DocumentNotOpen(Url),
    SlotClosed,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::NoInfo => write!(f, "no information available"),
            QueryError::Timeout => write!(f, "evaluation did not finish in time"),
            QueryError::DocumentNotOpen(uri) => write!(f, "document {} is not open", uri),
            QueryError::SlotClosed => write!(f, "evaluation worker is not running"),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<SlotClosed> for QueryError {
    fn from(_: SlotClosed) -> Self {
        QueryError::SlotClosed
    }
}

/// Diagnostics for one document and the version they describe.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDiagnostics {
    pub uri: Url,
    pub version: i32,
    pub diagnostics: Vec<AnalysisDiagnostic>,
    /// Set when the diagnostics were computed for an older version.
    pub stale: bool,
}

/// Turns editor queries into evaluation jobs and reads answers back out.
pub struct QueryDispatcher {
    slot: Arc<EvaluationSlot>,
    drafts: Arc<dyn DraftSource>,
}

impl QueryDispatcher {
    pub fn new(slot: Arc<EvaluationSlot>, drafts: Arc<dyn DraftSource>) -> Self {
        Self { slot, drafts }
    }

    pub fn slot(&self) -> &Arc<EvaluationSlot> {
        &self.slot
    }

    fn draft(&self, uri: &Url) -> Result<(Rope, i32), QueryError> {
        let (text, version) = self
            .drafts
            .get_text(uri)
            .ok_or_else(|| QueryError::DocumentNotOpen(uri.clone()))?;
        Ok((Rope::from_str(&text), version))
    }

    pub async fn hover(&self, uri: &Url, position: Position) -> Result<HoverInfo, QueryError> {
        let (text, version) = self.draft(uri)?;
        let offset = position_to_char_idx(&text, position);
        let target = HoverTarget::new(&text.to_string(), offset, version);

        if let Some(cached) = self.slot.cache().cached() {
            if cached.uri == *uri && cached.version == version {
                if let Some(entry) = target.pick(&cached) {
                    debug!(uri = %uri, version, "hover answered from cache");
                    return Ok(HoverInfo::from_entry(entry, version, false));
                }
            }
        }

        let capture = HoverCapture::new(offset);
        let ticket = self.slot.submit(EvaluationJob::observed(uri.clone(), capture.observer()))?;
        let seq = ticket.seq;
        let mut timed_out = false;
        match timeout(self.slot.settings().timeout, ticket.outcome()).await {
            Ok(Ok(JobOutcome::Completed(result))) => {
                if result.uri == *uri && result.version == version {
                    if let Some(entry) = capture.take(&text).filter(|e| target.matches(e)) {
                        return Ok(HoverInfo::from_entry(&entry, version, false));
                    }
                }
            }
            Ok(Ok(JobOutcome::Superseded)) => {}
            Ok(Ok(JobOutcome::DocumentNotOpen(root))) => {
                debug!(root = %root, "hover root is not open");
            }
            Ok(Err(closed)) => return Err(closed.into()),
            Err(_) => {
                debug!(seq, uri = %uri, "hover timed out");
                timed_out = true;
            }
        }

        match self.from_last_valid(uri, &target) {
            Some(info) => Ok(info),
            None if timed_out => Err(QueryError::Timeout),
            None => Err(QueryError::NoInfo),
        }
    }

    /// Hover from results already computed. Never starts a run.
    pub fn cached_hover(&self, uri: &Url, position: Position) -> Result<HoverInfo, QueryError> {
        let (text, version) = self.draft(uri)?;
        let offset = position_to_char_idx(&text, position);
        let target = HoverTarget::new(&text.to_string(), offset, version);
        let snapshot = self.slot.cache().snapshot();
        if let Some(cached) = &snapshot.cached {
            if cached.uri == *uri {
                if let Some(entry) = target.pick(cached) {
                    return Ok(HoverInfo::from_entry(entry, cached.version, cached.version != version));
                }
            }
        }
        self.from_last_valid(uri, &target).ok_or(QueryError::NoInfo)
    }

    fn from_last_valid(&self, uri: &Url, target: &HoverTarget) -> Option<HoverInfo> {
        let valid = self.slot.cache().last_valid()?;
        if valid.uri != *uri {
            return None;
        }
        let entry = target.pick(&valid)?;
        Some(HoverInfo::from_entry(entry, valid.version, valid.version != target.version))
    }

    pub async fn diagnose(&self, uri: &Url) -> Result<DocumentDiagnostics, QueryError> {
        let (text, version) = self.draft(uri)?;
        let standalone = || DocumentDiagnostics {
            uri: uri.clone(),
            version,
            diagnostics: parse_diagnostics(&text.to_string()),
            stale: false,
        };

        if self.slot.resolve_root(uri) != *uri {
            return Ok(standalone());
        }
        if let Some(cached) = self.slot.cache().cached() {
            if cached.uri == *uri && cached.version == version {
                return Ok(report(&cached, version));
            }
        }

        let ticket = self.slot.submit(EvaluationJob::new(uri.clone()))?;
        match timeout(self.slot.settings().timeout, ticket.outcome()).await {
            Ok(Ok(JobOutcome::Completed(result))) if result.uri == *uri => return Ok(report(&result, version)),
            Ok(Ok(JobOutcome::DocumentNotOpen(root))) => return Err(QueryError::DocumentNotOpen(root)),
            Ok(Err(closed)) => return Err(closed.into()),
            Ok(Ok(_)) => {}
            Err(_) => debug!(uri = %uri, "diagnostics timed out; serving previous results"),
        }

        match self.slot.cache().cached() {
            Some(cached) if cached.uri == *uri => Ok(report(&cached, version)),
            _ => Ok(standalone()),
        }
    }

    pub fn complete(&self, uri: &Url, position: Position) -> Result<Vec<CompletionCandidate>, QueryError> {
        let (text, _) = self.draft(uri)?;
        let offset = position_to_char_idx(&text, position);
        let line = text.char_to_line(offset);
        let line_prefix = text.slice(text.line_to_char(line)..offset).to_string();
        let valid = self.slot.cache().last_valid().filter(|r| r.uri == *uri);
        Ok(candidates(&text.to_string(), &line_prefix, valid.as_deref()))
    }

    pub fn invalidate(&self) {
        self.slot.invalidate();
    }
}

fn report(result: &EvaluationResult, current_version: i32) -> DocumentDiagnostics {
    DocumentDiagnostics {
        uri: result.uri.clone(),
        version: result.version,
        diagnostics: result.diagnostics.clone(),
        stale: result.version != current_version,
    }
}

/// The node a hover position points at in the current text.
struct HoverTarget {
    offset: usize,
    version: i32,
    /// Smallest node containing the offset; `None` when the text does not parse.
    span: Option<Span>,
}

impl HoverTarget {
    fn new(text: &str, offset: usize, version: i32) -> Self {
        let span = parse(text)
            .ok()
            .and_then(|tree| tree.arena.node_at(offset).map(|n| n.span));
        Self { offset, version, span }
    }

    /// A value recorded for a less specific node than the one under the
    /// cursor means the node itself was never forced.
    fn matches(&self, entry: &ValueEntry) -> bool {
        self.span.is_none_or(|span| span == entry.span)
    }

    fn pick<'r>(&self, result: &'r EvaluationResult) -> Option<&'r ValueEntry> {
        let entry = result.values.at(self.offset)?;
        if result.version == self.version && !self.matches(entry) {
            return None;
        }
        Some(entry)
    }
}
