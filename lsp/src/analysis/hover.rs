use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError};

use ropey::Rope;
use serde::Serialize;
use tower_lsp::lsp_types::Range;

use lazen_core::Span;
use lazen_core::eval::{EnvBinding, EnvSnapshot, ValueSnapshot};
use lazen_core::instrument::{Observer, observer};
use lazen_core::util::FastHashSet;

use super::result::{ValueEntry, ValueIndex};
use crate::draft::span_to_range;

#[derive(Debug, Clone)]
struct Captured {
    span: Span,
    value: ValueSnapshot,
    env: EnvSnapshot,
}

impl Captured {
    fn into_entry(self, text: &Rope) -> ValueEntry {
        ValueEntry {
            range: span_to_range(text, self.span),
            span: self.span,
            value: self.value,
            env: self.env,
        }
    }
}

/// Records the first value of every forced node; the slot turns the
/// recording into the [`ValueIndex`] of a result.
#[derive(Clone, Default)]
pub struct ValueRecorder {
    inner: Arc<Mutex<RecorderState>>,
}

#[derive(Default)]
struct RecorderState {
    seen: FastHashSet<lazen_core::NodeId>,
    values: Vec<Captured>,
}

impl ValueRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observer(&self) -> Observer {
        let inner = self.inner.clone();
        observer(move |node, ev, env, value| {
            let mut state = inner.lock().unwrap_or_else(PoisonError::into_inner);
            if !state.seen.insert(node.id) {
                return;
            }
            state.values.push(Captured {
                span: node.span,
                value: ev.snapshot(value),
                env: ev.env_snapshot(env),
            });
        })
    }

    pub fn finish(&self, text: &Rope) -> ValueIndex {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.seen.clear();
        let values = std::mem::take(&mut state.values);
        ValueIndex::new(values.into_iter().map(|c| c.into_entry(text)).collect())
    }
}

/// Keeps the most specific node containing one offset.
#[derive(Clone)]
pub struct HoverCapture {
    offset: usize,
    best: Arc<Mutex<Option<Captured>>>,
}

impl HoverCapture {
    pub fn new(offset: usize) -> Self {
        Self {
            offset,
            best: Arc::default(),
        }
    }

    pub fn observer(&self) -> Observer {
        let offset = self.offset;
        let best = self.best.clone();
        observer(move |node, ev, env, value| {
            if !node.span.contains(offset) {
                return;
            }
            let mut best = best.lock().unwrap_or_else(PoisonError::into_inner);
            if best.as_ref().is_some_and(|b| b.span.len() <= node.span.len()) {
                return;
            }
            *best = Some(Captured {
                span: node.span,
                value: ev.snapshot(value),
                env: ev.env_snapshot(env),
            });
        })
    }

    pub fn take(&self, text: &Rope) -> Option<ValueEntry> {
        self.best
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|c| c.into_entry(text))
    }
}

/// Answer to a hover query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoverInfo {
    pub range: Range,
    pub type_name: String,
    pub value: String,
    pub doc: Option<String>,
    pub env: Vec<EnvBinding>,
    /// More names were in scope than are listed.
    pub env_truncated: bool,
    /// Version of the text the value was computed from.
    pub version: i32,
    /// Set when the value comes from an older version than the one open now.
    pub stale: bool,
}

impl HoverInfo {
    pub fn from_entry(entry: &ValueEntry, version: i32, stale: bool) -> Self {
        Self {
            range: entry.range,
            type_name: entry.value.type_name().to_string(),
            value: entry.value.to_string(),
            doc: entry.value.doc().map(str::to_string),
            env: entry.env.bindings.clone(),
            env_truncated: entry.env.truncated,
            version,
            stale,
        }
    }

    pub fn to_markdown(&self) -> String {
        let mut out = format!("`{}`\n```lazen\n{}\n```", self.type_name, self.value);
        if let Some(doc) = &self.doc {
            let _ = write!(out, "\n\n{}", doc);
        }
        if !self.env.is_empty() {
            out.push_str("\n\n---\n");
            for binding in self.env.iter().take(16) {
                let _ = write!(out, "\n- `{}` = `{}`", binding.name, binding.value);
            }
            if self.env_truncated || self.env.len() > 16 {
                out.push_str("\n- ...");
            }
        }
        if self.stale {
            let _ = write!(out, "\n\n_from version {}_", self.version);
        }
        out
    }
}
