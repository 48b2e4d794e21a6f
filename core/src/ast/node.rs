use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::instrument::Observer;
use crate::op::{BinOp, UnaryOp};
use crate::token::Span;

/// Index of a node inside the [`Arena`](super::Arena) that allocated it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One syntax node. Immutable once allocated.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub span: Span,
    pub kind: NodeKind,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Bool(bool),
    Null,
    /// Variable reference
    Var(Arc<str>),
    /// `[ a b c ]`
    List(Vec<NodeId>),
    /// `{ a = 1; inherit b; }`, always self-referential
    Attrs(Vec<Binding>),
    /// `let bindings in body`
    Let { bindings: Vec<Binding>, body: NodeId },
    /// `x: body` or `{ a, b ? 1 }: body`
    Lambda { param: Param, body: NodeId },
    /// `func arg`
    Apply { func: NodeId, arg: NodeId },
    /// `target.a.b or default`
    Select {
        target: NodeId,
        path: Vec<AttrKey>,
        default: Option<NodeId>,
    },
    /// `target ? a.b`
    HasAttr { target: NodeId, path: Vec<AttrKey> },
    If { cond: NodeId, then: NodeId, otherwise: NodeId },
    /// `assert cond; body`
    Assert { cond: NodeId, body: NodeId },
    /// `with scope; body`
    With { scope: NodeId, body: NodeId },
    Binary { op: BinOp, lhs: NodeId, rhs: NodeId },
    Unary { op: UnaryOp, operand: NodeId },
    /// `( expr )`
    Paren(NodeId),
    /// Instrumented copy of another node; see [`crate::instrument`].
    Observed(Box<Observed>),
}

impl NodeKind {
    /// Short name of the node kind, used in logs and debug output.
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Int(_) => "int",
            NodeKind::Float(_) => "float",
            NodeKind::Str(_) => "string",
            NodeKind::Bool(_) => "bool",
            NodeKind::Null => "null",
            NodeKind::Var(_) => "var",
            NodeKind::List(_) => "list",
            NodeKind::Attrs(_) => "attrs",
            NodeKind::Let { .. } => "let",
            NodeKind::Lambda { .. } => "lambda",
            NodeKind::Apply { .. } => "apply",
            NodeKind::Select { .. } => "select",
            NodeKind::HasAttr { .. } => "has-attr",
            NodeKind::If { .. } => "if",
            NodeKind::Assert { .. } => "assert",
            NodeKind::With { .. } => "with",
            NodeKind::Binary { .. } => "binary",
            NodeKind::Unary { .. } => "unary",
            NodeKind::Paren(_) => "paren",
            NodeKind::Observed(_) => "observed",
        }
    }
}

/// Attribute name in a select path or binding.
pub type AttrKey = Arc<str>;

#[derive(Debug, Clone)]
pub struct Binding {
    pub name: AttrKey,
    pub name_span: Span,
    pub value: BindingValue,
}

#[derive(Debug, Clone)]
pub enum BindingValue {
    Expr(NodeId),
    /// `inherit name;` resolved against the scope enclosing the binding group.
    Inherit,
}

#[derive(Debug, Clone)]
pub enum Param {
    Ident(Arc<str>),
    Formals {
        formals: Vec<Formal>,
        ellipsis: bool,
        alias: Option<Arc<str>>,
    },
}

impl Param {
    /// Names this parameter introduces into the lambda body.
    pub fn bound_names(&self) -> Vec<Arc<str>> {
        match self {
            Param::Ident(name) => vec![name.clone()],
            Param::Formals { formals, alias, .. } => formals
                .iter()
                .map(|f| f.name.clone())
                .chain(alias.iter().cloned())
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Formal {
    pub name: Arc<str>,
    pub default: Option<NodeId>,
}

/// The generic instrumentation wrapper: evaluates `inner` exactly like an
/// uninstrumented node would, then reports the value to `observer`.
#[derive(Clone)]
pub struct Observed {
    /// Node this copy was made from.
    pub origin: NodeId,
    pub inner: NodeKind,
    pub observer: Observer,
}

impl fmt::Debug for Observed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observed")
            .field("origin", &self.origin)
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}
