use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use super::builtins::Builtin;
use super::heap::{Env, ThunkId};
use crate::ast::NodeId;

/// A value in weak head normal form. Children of lists and sets stay lazy.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<[ThunkId]>),
    Attrs(Rc<BTreeMap<Arc<str>, ThunkId>>),
    Lambda(Rc<Closure>),
    PrimOp(Rc<PrimOpApp>),
}

/// A lambda node closed over the environment it was evaluated in.
pub struct Closure {
    pub node: NodeId,
    pub env: Env,
}

/// A builtin with the arguments it has received so far.
pub struct PrimOpApp {
    pub builtin: &'static Builtin,
    pub args: Vec<ThunkId>,
}

impl Value {
    /// Type name as reported by `builtins.typeOf`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Attrs(_) => "set",
            Value::Lambda(_) | Value::PrimOp(_) => "lambda",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Value::Lambda(_) | Value::PrimOp(_))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(items) => write!(f, "<list of {}>", items.len()),
            Value::Attrs(attrs) => write!(f, "<set of {}>", attrs.len()),
            Value::Lambda(closure) => write!(f, "<lambda {}>", closure.node),
            Value::PrimOp(app) => write!(f, "<primop {}>", app.builtin.name),
        }
    }
}
