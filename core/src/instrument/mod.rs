//! Instrumenting rewriter.
//!
//! [`rewrite`] copies every node reachable from a root into the same arena,
//! wrapping each value-producing node in [`NodeKind::Observed`]. The evaluator
//! runs the wrapped kind unchanged and then hands the value to the observer,
//! so instrumented and plain trees always evaluate identically.

#[cfg(test)]
mod instrument_test;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error};

use crate::ast::{Arena, Binding, BindingValue, Formal, Node, NodeId, NodeKind, Observed, Param};
use crate::eval::{Env, Evaluator, Value};
use crate::util::FastHashMap;

/// Called with the original node, the evaluator (read-only), the environment
/// the node was evaluated in and the value it produced.
pub type Observer = Arc<dyn Fn(&Node, &Evaluator<'_>, Env, &Value) + Send + Sync>;

pub fn observer<F>(f: F) -> Observer
where
    F: Fn(&Node, &Evaluator<'_>, Env, &Value) + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn noop() -> Observer {
    Arc::new(|_, _, _, _| {})
}

/// One observer that calls each of `observers` in order.
pub fn combine(mut observers: Vec<Observer>) -> Observer {
    if observers.len() == 1 {
        return observers.remove(0);
    }
    Arc::new(move |node, ev, env, value| {
        for observer in &observers {
            observer(node, ev, env, value);
        }
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteError {
    /// The input already contains instrumented nodes.
    AlreadyInstrumented { node: NodeId },
    /// A child id does not belong to the arena.
    DanglingNode { node: NodeId },
}

impl fmt::Display for RewriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewriteError::AlreadyInstrumented { node } => {
                write!(f, "internal error: node {} is already instrumented", node)
            }
            RewriteError::DanglingNode { node } => {
                write!(f, "internal error: node {} is not in the arena", node)
            }
        }
    }
}

impl std::error::Error for RewriteError {}

/// Produce an instrumented copy of the tree under `root`. The original nodes
/// are left untouched; the returned id is the root of the copy.
pub fn rewrite(arena: &mut Arena, root: NodeId, observer: &Observer) -> Result<NodeId, RewriteError> {
    let before = arena.len();
    let mut rewriter = Rewriter {
        arena: &mut *arena,
        observer,
        memo: FastHashMap::default(),
    };
    let new_root = rewriter.rewrite(root)?;
    debug!(
        root = %root,
        new_root = %new_root,
        nodes = arena.len() - before,
        "instrumented tree"
    );
    Ok(new_root)
}

struct Rewriter<'a> {
    arena: &'a mut Arena,
    observer: &'a Observer,
    memo: FastHashMap<NodeId, NodeId>,
}

impl Rewriter<'_> {
    fn rewrite(&mut self, id: NodeId) -> Result<NodeId, RewriteError> {
        if let Some(done) = self.memo.get(&id) {
            return Ok(*done);
        }
        let Some(node) = self.arena.get(id) else {
            error!(node = %id, "rewrite reached a node outside the arena");
            return Err(RewriteError::DanglingNode { node: id });
        };
        let span = node.span;
        let kind = node.kind.clone();

        let new = match kind {
            NodeKind::Paren(inner) => {
                let inner = self.rewrite(inner)?;
                self.arena.alloc(span, NodeKind::Paren(inner))
            }
            kind => {
                let inner = self.rewrite_children(id, kind)?;
                self.arena.alloc(
                    span,
                    NodeKind::Observed(Box::new(Observed {
                        origin: id,
                        inner,
                        observer: self.observer.clone(),
                    })),
                )
            }
        };
        self.memo.insert(id, new);
        Ok(new)
    }

    fn rewrite_children(&mut self, id: NodeId, kind: NodeKind) -> Result<NodeKind, RewriteError> {
        let kind = match kind {
            NodeKind::Int(_)
            | NodeKind::Float(_)
            | NodeKind::Str(_)
            | NodeKind::Bool(_)
            | NodeKind::Null
            | NodeKind::Var(_) => kind,
            NodeKind::List(items) => NodeKind::List(self.rewrite_all(items)?),
            NodeKind::Attrs(bindings) => NodeKind::Attrs(self.rewrite_bindings(bindings)?),
            NodeKind::Let { bindings, body } => NodeKind::Let {
                bindings: self.rewrite_bindings(bindings)?,
                body: self.rewrite(body)?,
            },
            NodeKind::Lambda { param, body } => NodeKind::Lambda {
                param: self.rewrite_param(param)?,
                body: self.rewrite(body)?,
            },
            NodeKind::Apply { func, arg } => NodeKind::Apply {
                func: self.rewrite(func)?,
                arg: self.rewrite(arg)?,
            },
            NodeKind::Select { target, path, default } => NodeKind::Select {
                target: self.rewrite(target)?,
                path,
                default: default.map(|d| self.rewrite(d)).transpose()?,
            },
            NodeKind::HasAttr { target, path } => NodeKind::HasAttr {
                target: self.rewrite(target)?,
                path,
            },
            NodeKind::If { cond, then, otherwise } => NodeKind::If {
                cond: self.rewrite(cond)?,
                then: self.rewrite(then)?,
                otherwise: self.rewrite(otherwise)?,
            },
            NodeKind::Assert { cond, body } => NodeKind::Assert {
                cond: self.rewrite(cond)?,
                body: self.rewrite(body)?,
            },
            NodeKind::With { scope, body } => NodeKind::With {
                scope: self.rewrite(scope)?,
                body: self.rewrite(body)?,
            },
            NodeKind::Binary { op, lhs, rhs } => NodeKind::Binary {
                op,
                lhs: self.rewrite(lhs)?,
                rhs: self.rewrite(rhs)?,
            },
            NodeKind::Unary { op, operand } => NodeKind::Unary {
                op,
                operand: self.rewrite(operand)?,
            },
            NodeKind::Paren(inner) => NodeKind::Paren(self.rewrite(inner)?),
            NodeKind::Observed(_) => {
                error!(node = %id, "refusing to instrument an instrumented node");
                return Err(RewriteError::AlreadyInstrumented { node: id });
            }
        };
        Ok(kind)
    }

    fn rewrite_all(&mut self, ids: Vec<NodeId>) -> Result<Vec<NodeId>, RewriteError> {
        ids.into_iter().map(|id| self.rewrite(id)).collect()
    }

    fn rewrite_bindings(&mut self, bindings: Vec<Binding>) -> Result<Vec<Binding>, RewriteError> {
        bindings
            .into_iter()
            .map(|binding| {
                let value = match binding.value {
                    BindingValue::Expr(node) => BindingValue::Expr(self.rewrite(node)?),
                    BindingValue::Inherit => BindingValue::Inherit,
                };
                Ok(Binding { value, ..binding })
            })
            .collect()
    }

    fn rewrite_param(&mut self, param: Param) -> Result<Param, RewriteError> {
        match param {
            Param::Ident(name) => Ok(Param::Ident(name)),
            Param::Formals {
                formals,
                ellipsis,
                alias,
            } => {
                let formals = formals
                    .into_iter()
                    .map(|formal| {
                        Ok(Formal {
                            default: formal.default.map(|d| self.rewrite(d)).transpose()?,
                            name: formal.name,
                        })
                    })
                    .collect::<Result<Vec<_>, RewriteError>>()?;
                Ok(Param::Formals {
                    formals,
                    ellipsis,
                    alias,
                })
            }
        }
    }
}
