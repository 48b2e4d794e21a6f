//! Open-document text storage and position conversions.

use std::hash::{Hash, Hasher};

use dashmap::DashMap;
use ropey::Rope;
use tower_lsp::lsp_types::{Position, Range, TextDocumentContentChangeEvent, Url};
use twox_hash::XxHash64;

use lazen_core::Span;

/// Read access to the freshest text of open documents.
pub trait DraftSource: Send + Sync {
    /// Content and version of `uri`, or `None` when it is not open.
    fn get_text(&self, uri: &Url) -> Option<(String, i32)>;
}

#[derive(Debug, Default)]
pub struct Document {
    pub content: Rope,
    pub version: i32,
    pub content_hash: u64,
    /// Bumped when the content changes; pending diagnostics compare against it.
    pub debounce_seq: u64,
}

#[derive(Debug, Default)]
pub struct DraftStore {
    documents: DashMap<Url, Document>,
}

impl DraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, uri: Url, text: &str, version: i32) {
        self.documents.insert(
            uri,
            Document {
                content: Rope::from_str(text),
                version,
                content_hash: content_hash(text),
                debounce_seq: 0,
            },
        );
    }

    /// Apply full or incremental changes. Returns whether the content
    /// actually changed.
    pub fn apply_changes(&self, uri: &Url, version: i32, changes: Vec<TextDocumentContentChangeEvent>) -> bool {
        let mut entry = self.documents.entry(uri.clone()).or_default();
        entry.version = version;
        for change in &changes {
            apply_incremental_change_rope(&mut entry.content, change);
        }
        let hash = content_hash(&entry.content.to_string());
        let changed = hash != entry.content_hash;
        entry.content_hash = hash;
        if changed {
            entry.debounce_seq = entry.debounce_seq.wrapping_add(1);
        }
        changed
    }

    pub fn close(&self, uri: &Url) -> bool {
        self.documents.remove(uri).is_some()
    }

    pub fn debounce_seq(&self, uri: &Url) -> Option<u64> {
        self.documents.get(uri).map(|d| d.debounce_seq)
    }

    /// Whether the document is still open with the content it had when
    /// `debounce_seq` was read.
    pub fn is_current(&self, uri: &Url, debounce_seq: u64) -> bool {
        self.debounce_seq(uri) == Some(debounce_seq)
    }
}

impl DraftSource for DraftStore {
    fn get_text(&self, uri: &Url) -> Option<(String, i32)> {
        self.documents
            .get(uri)
            .map(|doc| (doc.content.to_string(), doc.version))
    }
}

pub fn content_hash(content: &str) -> u64 {
    let mut hasher = XxHash64::default();
    content.hash(&mut hasher);
    hasher.finish()
}

// Convert LSP UTF-16 position to Rope char index (scalar values), clamped to the end of the line.
pub fn position_to_char_idx(text: &Rope, pos: Position) -> usize {
    let line_idx = pos.line as usize;
    if line_idx >= text.len_lines() {
        return text.len_chars();
    }
    let line_start_char = text.line_to_char(line_idx);
    let line_slice = text.line(line_idx);
    let target_utf16 = pos.character as usize;

    if let Some(s) = line_slice.as_str() {
        if s.is_ascii() {
            return line_start_char + target_utf16.min(s.len());
        }
    }

    let mut seen_utf16 = 0usize;
    let mut chars_in_line = 0usize;
    for ch in line_slice.chars() {
        let u16_len = ch.len_utf16();
        if seen_utf16 + u16_len > target_utf16 {
            break;
        }
        seen_utf16 += u16_len;
        chars_in_line += 1;
        if seen_utf16 == target_utf16 {
            break;
        }
    }
    line_start_char + chars_in_line
}

/// Inverse of [`position_to_char_idx`].
pub fn char_idx_to_position(text: &Rope, char_idx: usize) -> Position {
    let char_idx = char_idx.min(text.len_chars());
    let line = text.char_to_line(char_idx);
    let line_start = text.line_to_char(line);
    let character = text.char_to_utf16_cu(char_idx) - text.char_to_utf16_cu(line_start);
    Position::new(line as u32, character as u32)
}

/// LSP range of a source span; span offsets are char indices.
pub fn span_to_range(text: &Rope, span: Span) -> Range {
    Range::new(
        char_idx_to_position(text, span.start.offset),
        char_idx_to_position(text, span.end.offset),
    )
}

// Apply incremental LSP changes to a rope buffer.
pub fn apply_incremental_change_rope(text: &mut Rope, change: &TextDocumentContentChangeEvent) {
    if let Some(range) = &change.range {
        let start_char = position_to_char_idx(text, range.start);
        let end_char = position_to_char_idx(text, range.end);
        let (s, e) = if start_char <= end_char {
            (start_char, end_char)
        } else {
            (end_char, start_char)
        };
        if s != e {
            text.remove(s..e);
        }
        if !change.text.is_empty() {
            text.insert(s, &change.text);
        }
    } else {
        *text = Rope::from_str(&change.text);
    }
}
