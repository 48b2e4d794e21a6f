use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use lazen_core::eval::builtins;
use lazen_core::util::FastHashSet;

use super::result::EvaluationResult;

const KEYWORDS: &[&str] = &[
    "let", "in", "if", "then", "else", "assert", "with", "rec", "inherit", "or", "true", "false", "null",
];

static IDENT_PREFIX: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_'-]*$").ok());
static BUILTINS_DOT: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\bbuiltins\.([A-Za-z_]*)$").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CandidateKind {
    Keyword,
    Builtin,
    Binding,
    Attribute,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionCandidate {
    pub label: String,
    pub kind: CandidateKind,
    pub detail: Option<String>,
}

impl CompletionCandidate {
    fn new(label: impl Into<String>, kind: CandidateKind, detail: Option<String>) -> Self {
        Self {
            label: label.into(),
            kind,
            detail,
        }
    }
}

/// Names worth offering at the end of `line_prefix`.
pub fn candidates(text: &str, line_prefix: &str, last_valid: Option<&EvaluationResult>) -> Vec<CompletionCandidate> {
    // after `builtins.` only members of the builtins set make sense
    if let Some(caps) = BUILTINS_DOT.as_ref().and_then(|re| re.captures(line_prefix)) {
        let typed = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        return builtins::BUILTINS
            .iter()
            .filter(|b| b.name.starts_with(typed))
            .map(|b| CompletionCandidate::new(b.name, CandidateKind::Builtin, Some(b.doc.to_string())))
            .collect();
    }

    let typed = IDENT_PREFIX
        .as_ref()
        .and_then(|re| re.find(line_prefix))
        .map(|m| m.as_str())
        .unwrap_or("");

    let mut out = Vec::new();
    for keyword in KEYWORDS {
        out.push(CompletionCandidate::new(*keyword, CandidateKind::Keyword, None));
    }
    for name in builtins::global_names() {
        let detail = builtins::lookup(name).map(|b| b.doc.to_string());
        out.push(CompletionCandidate::new(name, CandidateKind::Builtin, detail));
    }
    if let Ok(tree) = lazen_core::parse(text) {
        for name in tree.arena.bound_names() {
            out.push(CompletionCandidate::new(name.as_ref(), CandidateKind::Binding, None));
        }
    }
    if let Some(result) = last_valid {
        for name in result.root_attr_names() {
            out.push(CompletionCandidate::new(
                name,
                CandidateKind::Attribute,
                Some(format!("attribute of version {}", result.version)),
            ));
        }
    }

    let mut seen = FastHashSet::default();
    out.retain(|c| c.label.starts_with(typed) && c.label != typed && seen.insert(c.label.clone()));
    out
}
