use ropey::Rope;
use serde::Serialize;
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, NumberOrString, Range, Url};

use lazen_core::eval::{EnvSnapshot, ErrorCategory, EvalError, ValueSnapshot};
use lazen_core::{ParseError, Span};

use crate::draft::span_to_range;

/// Stable diagnostic taxonomy shown to users.
pub type DiagnosticKind = ErrorCategory;

/// How far a run got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    /// Evaluated to the end, possibly with soft errors.
    Evaluated,
    /// The text did not parse; nothing was evaluated.
    ParseFailed,
    /// The interpreter stopped on a fatal error.
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisDiagnostic {
    pub kind: DiagnosticKind,
    pub range: Range,
    pub message: String,
}

impl AnalysisDiagnostic {
    pub fn from_parse_error(err: &ParseError, text: &Rope) -> Self {
        Self {
            kind: ErrorCategory::Syntax,
            range: span_range(err.span, text),
            message: err.message.clone(),
        }
    }

    pub fn from_eval_error(err: &EvalError, text: &Rope) -> Self {
        Self {
            kind: err.kind.category(),
            range: span_range(err.span, text),
            message: err.message.clone(),
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn to_lsp(&self) -> Diagnostic {
        Diagnostic {
            range: self.range,
            severity: Some(DiagnosticSeverity::ERROR),
            code: Some(NumberOrString::String(self.code().to_string())),
            source: Some("lazen".to_string()),
            message: self.message.clone(),
            ..Default::default()
        }
    }
}

// errors without a location are reported at the start of the document
fn span_range(span: Option<Span>, text: &Rope) -> Range {
    span.map(|s| span_to_range(text, s)).unwrap_or_default()
}

/// Parse-only diagnostics for documents that are not being evaluated.
pub fn parse_diagnostics(text: &str) -> Vec<AnalysisDiagnostic> {
    match lazen_core::parse(text) {
        Ok(_) => Vec::new(),
        Err(err) => vec![AnalysisDiagnostic::from_parse_error(&err, &Rope::from_str(text))],
    }
}

/// A value some node produced during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueEntry {
    /// Source span of the node, in char offsets of the evaluated text.
    #[serde(skip)]
    pub span: Span,
    pub range: Range,
    pub value: ValueSnapshot,
    pub env: EnvSnapshot,
}

/// Values recorded for every node that was forced, first observation wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValueIndex {
    entries: Vec<ValueEntry>,
}

impl ValueIndex {
    pub fn new(entries: Vec<ValueEntry>) -> Self {
        Self { entries }
    }

    /// Smallest recorded node containing `offset`; the earliest recorded wins ties.
    pub fn at(&self, offset: usize) -> Option<&ValueEntry> {
        self.entries
            .iter()
            .filter(|e| e.span.contains(offset))
            .min_by_key(|e| e.span.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Immutable outcome of one evaluation job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    /// Submission order; later jobs have larger numbers.
    pub seq: u64,
    /// The document that was evaluated.
    pub uri: Url,
    pub version: i32,
    pub status: RunStatus,
    /// The fully forced root value, or the error that replaced it.
    pub root: Result<ValueSnapshot, AnalysisDiagnostic>,
    pub diagnostics: Vec<AnalysisDiagnostic>,
    pub values: ValueIndex,
}

impl EvaluationResult {
    /// Whether this run may serve as `last_valid`.
    pub fn is_valid(&self) -> bool {
        self.status == RunStatus::Evaluated
    }

    /// Attribute names of the root value when it is a set.
    pub fn root_attr_names(&self) -> Vec<String> {
        match &self.root {
            Ok(value) => value
                .as_attrs()
                .map(|attrs| attrs.keys().cloned().collect())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    pub fn lsp_diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.iter().map(AnalysisDiagnostic::to_lsp).collect()
    }
}
