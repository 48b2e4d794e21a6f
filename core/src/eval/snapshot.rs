use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::evaluator::Evaluator;
use super::heap::{Env, ThunkId, ThunkState};
use super::value::Value;
use crate::ast::{NodeKind, Param};
use crate::util::FastHashSet;

const VALUE_DEPTH: usize = 6;
const ENV_VALUE_DEPTH: usize = 2;
const MAX_LIST_ITEMS: usize = 64;
/// Innermost names kept by an environment snapshot.
pub const MAX_ENV_BINDINGS: usize = 32;

/// Plain-data copy of a value, safe to send across threads. Taking a snapshot
/// never forces anything.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum ValueSnapshot {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<ValueSnapshot>),
    Attrs(BTreeMap<String, ValueSnapshot>),
    Lambda { signature: String },
    PrimOp { name: String, doc: String },
    /// Never forced during the run.
    Unevaluated,
    /// Forcing raised an error.
    Error,
    /// Cut off by the depth or length limit.
    Truncated,
}

impl ValueSnapshot {
    pub fn type_name(&self) -> &'static str {
        match self {
            ValueSnapshot::Null => "null",
            ValueSnapshot::Bool(_) => "bool",
            ValueSnapshot::Int(_) => "int",
            ValueSnapshot::Float(_) => "float",
            ValueSnapshot::String(_) => "string",
            ValueSnapshot::List(_) => "list",
            ValueSnapshot::Attrs(_) => "set",
            ValueSnapshot::Lambda { .. } | ValueSnapshot::PrimOp { .. } => "lambda",
            ValueSnapshot::Unevaluated => "thunk",
            ValueSnapshot::Error => "error",
            ValueSnapshot::Truncated => "...",
        }
    }

    pub fn doc(&self) -> Option<&str> {
        match self {
            ValueSnapshot::PrimOp { doc, .. } => Some(doc),
            _ => None,
        }
    }

    pub fn as_attrs(&self) -> Option<&BTreeMap<String, ValueSnapshot>> {
        match self {
            ValueSnapshot::Attrs(attrs) => Some(attrs),
            _ => None,
        }
    }
}

impl fmt::Display for ValueSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSnapshot::Null => write!(f, "null"),
            ValueSnapshot::Bool(b) => write!(f, "{}", b),
            ValueSnapshot::Int(i) => write!(f, "{}", i),
            ValueSnapshot::Float(x) => write!(f, "{}", x),
            ValueSnapshot::String(s) => write!(f, "{:?}", s),
            ValueSnapshot::List(items) => {
                write!(f, "[ ")?;
                for item in items {
                    write!(f, "{} ", item)?;
                }
                write!(f, "]")
            }
            ValueSnapshot::Attrs(attrs) => {
                write!(f, "{{ ")?;
                for (name, value) in attrs {
                    write!(f, "{} = {}; ", name, value)?;
                }
                write!(f, "}}")
            }
            ValueSnapshot::Lambda { signature } => write!(f, "<lambda {}>", signature),
            ValueSnapshot::PrimOp { name, .. } => write!(f, "<primop {}>", name),
            ValueSnapshot::Unevaluated => write!(f, "<unevaluated>"),
            ValueSnapshot::Error => write!(f, "<error>"),
            ValueSnapshot::Truncated => write!(f, "..."),
        }
    }
}

/// One visible name of a lexical environment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvBinding {
    pub name: String,
    pub value: ValueSnapshot,
}

/// Names visible at a point of evaluation, innermost scope first. Shadowed
/// names and the builtin scope are left out.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnvSnapshot {
    pub bindings: Vec<EnvBinding>,
    /// Number of enclosing `with` scopes, whose names are not listed.
    pub with_scopes: usize,
    /// Set when more names were visible than [`MAX_ENV_BINDINGS`].
    pub truncated: bool,
}

impl EnvSnapshot {
    pub fn get(&self, name: &str) -> Option<&ValueSnapshot> {
        self.bindings.iter().find(|b| b.name == name).map(|b| &b.value)
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl Evaluator<'_> {
    pub fn snapshot(&self, value: &Value) -> ValueSnapshot {
        self.snapshot_value(value, VALUE_DEPTH)
    }

    pub fn thunk_snapshot(&self, thunk: ThunkId) -> ValueSnapshot {
        self.snapshot_thunk(thunk, VALUE_DEPTH)
    }

    pub fn env_snapshot(&self, env: Env) -> EnvSnapshot {
        let heap = self.heap();
        let mut snapshot = EnvSnapshot::default();
        let mut shadowed: FastHashSet<&str> = FastHashSet::default();
        let mut current = Some(env);
        'frames: while let Some(env) = current {
            let frame = heap.frame(env);
            // the builtin scope is the only frame without a parent
            if frame.parent.is_none() {
                break;
            }
            if frame.with_scope.is_some() {
                snapshot.with_scopes += 1;
            }
            for (name, thunk) in frame.vars.iter().rev() {
                if !shadowed.insert(name.as_ref()) {
                    continue;
                }
                if snapshot.bindings.len() == MAX_ENV_BINDINGS {
                    snapshot.truncated = true;
                    break 'frames;
                }
                snapshot.bindings.push(EnvBinding {
                    name: name.to_string(),
                    value: self.snapshot_thunk(*thunk, ENV_VALUE_DEPTH),
                });
            }
            current = frame.parent;
        }
        snapshot
    }

    fn snapshot_thunk(&self, thunk: ThunkId, depth: usize) -> ValueSnapshot {
        match self.heap().state(thunk) {
            ThunkState::Ready(value) => self.snapshot_value(value, depth),
            ThunkState::Failed(_) => ValueSnapshot::Error,
            _ => ValueSnapshot::Unevaluated,
        }
    }

    fn snapshot_value(&self, value: &Value, depth: usize) -> ValueSnapshot {
        match value {
            Value::Null => ValueSnapshot::Null,
            Value::Bool(b) => ValueSnapshot::Bool(*b),
            Value::Int(i) => ValueSnapshot::Int(*i),
            Value::Float(f) => ValueSnapshot::Float(*f),
            Value::Str(s) => ValueSnapshot::String(s.to_string()),
            Value::Lambda(closure) => ValueSnapshot::Lambda {
                signature: match self.arena().unwrap_kind(closure.node) {
                    NodeKind::Lambda { param, .. } => describe_param(param),
                    _ => String::new(),
                },
            },
            Value::PrimOp(app) => ValueSnapshot::PrimOp {
                name: app.builtin.name.to_string(),
                doc: app.builtin.doc.to_string(),
            },
            _ if depth == 0 => ValueSnapshot::Truncated,
            Value::List(items) => {
                let mut out: Vec<ValueSnapshot> = items
                    .iter()
                    .take(MAX_LIST_ITEMS)
                    .map(|t| self.snapshot_thunk(*t, depth - 1))
                    .collect();
                if items.len() > MAX_LIST_ITEMS {
                    out.push(ValueSnapshot::Truncated);
                }
                ValueSnapshot::List(out)
            }
            Value::Attrs(attrs) => ValueSnapshot::Attrs(
                attrs
                    .iter()
                    .map(|(name, t)| (name.to_string(), self.snapshot_thunk(*t, depth - 1)))
                    .collect(),
            ),
        }
    }
}

fn describe_param(param: &Param) -> String {
    match param {
        Param::Ident(name) => name.to_string(),
        Param::Formals {
            formals,
            ellipsis,
            alias,
        } => {
            let mut parts: Vec<String> = formals
                .iter()
                .map(|f| {
                    if f.default.is_some() {
                        format!("{} ? ...", f.name)
                    } else {
                        f.name.to_string()
                    }
                })
                .collect();
            if *ellipsis {
                parts.push("...".to_string());
            }
            let set = if parts.is_empty() {
                "{ }".to_string()
            } else {
                format!("{{ {} }}", parts.join(", "))
            };
            match alias {
                Some(alias) => format!("{} @ {}", set, alias),
                None => set,
            }
        }
    }
}
