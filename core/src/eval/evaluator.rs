use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use super::auto_args::{AutoArgValue, AutoArgs};
use super::error::{EvalError, EvalErrorKind};
use super::heap::{Env, Heap, ThunkId, ThunkState};
use super::value::{Closure, PrimOpApp, Value};
use crate::ast::{Arena, AttrKey, Binding, BindingValue, Node, NodeId, NodeKind, Param};
use crate::op::BinOp;
use crate::token::Span;
use crate::util::FastHashSet;

/// One evaluation pass over an arena. Borrows the interpreter heap for the
/// duration of a run; observers receive it read-only.
pub struct Evaluator<'a> {
    arena: &'a Arena,
    heap: &'a mut Heap,
    depth: usize,
    max_depth: usize,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(arena: &'a Arena, heap: &'a mut Heap, max_depth: usize) -> Self {
        Self {
            arena,
            heap,
            depth: 0,
            max_depth,
        }
    }

    pub fn arena(&self) -> &'a Arena {
        self.arena
    }

    pub(crate) fn heap(&self) -> &Heap {
        &*self.heap
    }

    /// Current nesting of evaluation calls.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn alloc_thunk(&mut self, state: ThunkState) -> ThunkId {
        self.heap.alloc(state)
    }

    fn enter(&mut self, span: Span) -> Result<(), EvalError> {
        if self.depth >= self.max_depth {
            return Err(EvalError::new(
                EvalErrorKind::StackOverflow,
                format!("stack overflow: evaluation nested deeper than {} levels", self.max_depth),
            )
            .at(span));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    pub(crate) fn eval(&mut self, id: NodeId, env: Env) -> Result<Value, EvalError> {
        let node = self.arena.node(id);
        self.enter(node.span)?;
        let result = self.eval_kind(node, &node.kind, env);
        self.leave();
        result
    }

    fn eval_kind(&mut self, node: &'a Node, kind: &'a NodeKind, env: Env) -> Result<Value, EvalError> {
        match kind {
            NodeKind::Observed(observed) => {
                let value = self.eval_kind(node, &observed.inner, env)?;
                let origin = self.arena.node(observed.origin);
                (observed.observer)(origin, self, env, &value);
                Ok(value)
            }
            NodeKind::Int(i) => Ok(Value::Int(*i)),
            NodeKind::Float(f) => Ok(Value::Float(*f)),
            NodeKind::Str(s) => Ok(Value::Str(Rc::from(&**s))),
            NodeKind::Bool(b) => Ok(Value::Bool(*b)),
            NodeKind::Null => Ok(Value::Null),
            NodeKind::Var(name) => {
                let thunk = self.lookup(name, env, node.span)?;
                self.force(thunk).map_err(|e| e.at(node.span))
            }
            NodeKind::Paren(inner) => self.eval(*inner, env),
            NodeKind::List(items) => {
                let thunks: Rc<[ThunkId]> = items
                    .iter()
                    .map(|item| self.heap.alloc(ThunkState::Pending { node: *item, env }))
                    .collect();
                Ok(Value::List(thunks))
            }
            NodeKind::Attrs(bindings) => {
                let scope = self.heap.new_frame(Some(env));
                let attrs = self.bind_all(bindings, env, scope);
                Ok(Value::Attrs(Rc::new(attrs)))
            }
            NodeKind::Let { bindings, body } => {
                let scope = self.heap.new_frame(Some(env));
                self.bind_all(bindings, env, scope);
                self.eval(*body, scope)
            }
            NodeKind::Lambda { .. } => Ok(Value::Lambda(Rc::new(Closure { node: node.id, env }))),
            NodeKind::Apply { func, arg } => {
                let func = self.eval(*func, env)?;
                let arg = self.heap.alloc(ThunkState::Pending { node: *arg, env });
                self.call(func, arg, node.span)
            }
            NodeKind::Select { target, path, default } => self.select(*target, path, *default, env, node.span),
            NodeKind::HasAttr { target, path } => self.has_attr(*target, path, env, node.span),
            NodeKind::If { cond, then, otherwise } => {
                if self.eval_bool(*cond, env, || "if condition".to_string())? {
                    self.eval(*then, env)
                } else {
                    self.eval(*otherwise, env)
                }
            }
            NodeKind::Assert { cond, body } => {
                if !self.eval_bool(*cond, env, || "assertion".to_string())? {
                    let span = self.arena.node(*cond).span;
                    return Err(EvalError::new(EvalErrorKind::AssertionFailed, "assertion failed").at(span));
                }
                self.eval(*body, env)
            }
            NodeKind::With { scope, body } => {
                let scope = self.heap.alloc(ThunkState::Pending { node: *scope, env });
                let inner = self.heap.new_with_frame(env, scope);
                self.eval(*body, inner)
            }
            NodeKind::Binary { op, lhs, rhs } => self.binary(*op, *lhs, *rhs, env, node.span),
            NodeKind::Unary { op, operand } => {
                let value = self.eval(*operand, env)?;
                op.eval_val(&value).map_err(|e| e.at(node.span))
            }
        }
    }

    /// Allocate one thunk per binding in `scope`. `inherit` resolves against `outer`.
    fn bind_all(&mut self, bindings: &'a [Binding], outer: Env, scope: Env) -> BTreeMap<AttrKey, ThunkId> {
        let mut attrs = BTreeMap::new();
        for binding in bindings {
            let state = match binding.value {
                BindingValue::Expr(node) => ThunkState::Pending { node, env: scope },
                BindingValue::Inherit => ThunkState::Lookup {
                    name: binding.name.clone(),
                    env: outer,
                    span: binding.name_span,
                },
            };
            let thunk = self.heap.alloc(state);
            self.heap.bind(scope, binding.name.clone(), thunk);
            attrs.insert(binding.name.clone(), thunk);
        }
        attrs
    }

    fn eval_bool(&mut self, id: NodeId, env: Env, what: impl Fn() -> String) -> Result<bool, EvalError> {
        match self.eval(id, env)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::new(
                EvalErrorKind::Type,
                format!("expected a bool in {} but found {}", what(), other.type_name()),
            )
            .at(self.arena.node(id).span)),
        }
    }

    fn binary(&mut self, op: BinOp, lhs: NodeId, rhs: NodeId, env: Env, span: Span) -> Result<Value, EvalError> {
        let what = || format!("operand of '{}'", op);
        match op {
            BinOp::And => {
                if !self.eval_bool(lhs, env, what)? {
                    return Ok(Value::Bool(false));
                }
                self.eval_bool(rhs, env, what).map(Value::Bool)
            }
            BinOp::Or => {
                if self.eval_bool(lhs, env, what)? {
                    return Ok(Value::Bool(true));
                }
                self.eval_bool(rhs, env, what).map(Value::Bool)
            }
            BinOp::Impl => {
                if !self.eval_bool(lhs, env, what)? {
                    return Ok(Value::Bool(true));
                }
                self.eval_bool(rhs, env, what).map(Value::Bool)
            }
            BinOp::Eq | BinOp::Ne => {
                let l = self.eval(lhs, env)?;
                let r = self.eval(rhs, env)?;
                let equal = self.values_equal(&l, &r, span)?;
                Ok(Value::Bool(if op == BinOp::Eq { equal } else { !equal }))
            }
            _ => {
                let l = self.eval(lhs, env)?;
                let r = self.eval(rhs, env)?;
                op.eval_vals(&l, &r).map_err(|e| e.at(span))
            }
        }
    }

    fn select(
        &mut self,
        target: NodeId,
        path: &[AttrKey],
        default: Option<NodeId>,
        env: Env,
        span: Span,
    ) -> Result<Value, EvalError> {
        let mut value = self.eval(target, env)?;
        for key in path {
            let next = match &value {
                Value::Attrs(attrs) => attrs.get(key).copied(),
                other if default.is_none() => {
                    return Err(EvalError::new(
                        EvalErrorKind::Type,
                        format!("expected a set but found {} while selecting '{}'", other.type_name(), key),
                    )
                    .at(span));
                }
                _ => None,
            };
            match next {
                Some(thunk) => value = self.force(thunk).map_err(|e| e.at(span))?,
                None => {
                    return match default {
                        Some(default) => self.eval(default, env),
                        None => Err(EvalError::new(
                            EvalErrorKind::MissingAttribute,
                            format!("attribute '{}' missing", key),
                        )
                        .at(span)),
                    };
                }
            }
        }
        Ok(value)
    }

    fn has_attr(&mut self, target: NodeId, path: &[AttrKey], env: Env, span: Span) -> Result<Value, EvalError> {
        let mut value = self.eval(target, env)?;
        for (idx, key) in path.iter().enumerate() {
            let Value::Attrs(attrs) = &value else {
                return Ok(Value::Bool(false));
            };
            let Some(thunk) = attrs.get(key).copied() else {
                return Ok(Value::Bool(false));
            };
            if idx + 1 == path.len() {
                break;
            }
            value = self.force(thunk).map_err(|e| e.at(span))?;
        }
        Ok(Value::Bool(true))
    }

    /// Resolve `name` lexically, then through enclosing `with` scopes innermost first.
    pub(crate) fn lookup(&mut self, name: &str, env: Env, span: Span) -> Result<ThunkId, EvalError> {
        let mut with_scopes = Vec::new();
        let mut current = Some(env);
        while let Some(env) = current {
            let frame = self.heap.frame(env);
            if let Some(thunk) = frame.get(name) {
                return Ok(thunk);
            }
            if let Some(scope) = frame.with_scope {
                with_scopes.push(scope);
            }
            current = frame.parent;
        }

        for scope in with_scopes {
            match self.force(scope).map_err(|e| e.at(span))? {
                Value::Attrs(attrs) => {
                    if let Some(thunk) = attrs.get(name) {
                        return Ok(*thunk);
                    }
                }
                other => {
                    return Err(EvalError::new(
                        EvalErrorKind::Type,
                        format!("expected a set in 'with' but found {}", other.type_name()),
                    )
                    .at(span));
                }
            }
        }

        Err(EvalError::new(
            EvalErrorKind::UndefinedVariable,
            format!("undefined variable '{}'", name),
        )
        .at(span))
    }

    /// Bring a thunk to weak head normal form, memoising the result.
    pub fn force(&mut self, thunk: ThunkId) -> Result<Value, EvalError> {
        let state = std::mem::replace(self.heap.state_mut(thunk), ThunkState::Blackhole);
        let result = match &state {
            ThunkState::Ready(value) => {
                let value = value.clone();
                *self.heap.state_mut(thunk) = state;
                return Ok(value);
            }
            ThunkState::Blackhole => {
                return Err(EvalError::new(
                    EvalErrorKind::InfiniteRecursion,
                    "infinite recursion encountered",
                ));
            }
            suspended => self.run_suspended(suspended),
        };
        match result {
            Ok(value) => {
                *self.heap.state_mut(thunk) = ThunkState::Ready(value.clone());
                Ok(value)
            }
            Err(err) => {
                let restored = match state {
                    ThunkState::Failed(inner) => ThunkState::Failed(inner),
                    other => ThunkState::Failed(Box::new(other)),
                };
                *self.heap.state_mut(thunk) = restored;
                Err(err)
            }
        }
    }

    fn run_suspended(&mut self, state: &ThunkState) -> Result<Value, EvalError> {
        match state {
            ThunkState::Pending { node, env } => self.eval(*node, *env),
            ThunkState::Apply { func, arg, span } => {
                let func = self.force(*func).map_err(|e| e.at(*span))?;
                self.call(func, *arg, *span)
            }
            ThunkState::Lookup { name, env, span } => {
                let thunk = self.lookup(name, *env, *span)?;
                self.force(thunk).map_err(|e| e.at(*span))
            }
            ThunkState::Failed(inner) => self.run_suspended(inner),
            ThunkState::Ready(value) => Ok(value.clone()),
            ThunkState::Blackhole => Err(EvalError::new(
                EvalErrorKind::InfiniteRecursion,
                "infinite recursion encountered",
            )),
        }
    }

    /// Apply a function value to a lazy argument.
    pub(crate) fn call(&mut self, func: Value, arg: ThunkId, span: Span) -> Result<Value, EvalError> {
        match func {
            Value::Lambda(closure) => self.call_lambda(&closure, arg, span),
            Value::PrimOp(app) => {
                let mut args = app.args.clone();
                args.push(arg);
                if args.len() < app.builtin.arity {
                    return Ok(Value::PrimOp(Rc::new(PrimOpApp {
                        builtin: app.builtin,
                        args,
                    })));
                }
                self.enter(span)?;
                let result = (app.builtin.func)(self, &args, span);
                self.leave();
                result
            }
            other => Err(EvalError::new(
                EvalErrorKind::Type,
                format!(
                    "attempt to call something which is not a function but {}",
                    other.type_name()
                ),
            )
            .at(span)),
        }
    }

    fn call_lambda(&mut self, closure: &Closure, arg: ThunkId, span: Span) -> Result<Value, EvalError> {
        let NodeKind::Lambda { param, body } = self.arena.unwrap_kind(closure.node) else {
            return Err(EvalError::internal(format!("closure {} does not point at a lambda", closure.node)).at(span));
        };
        let scope = self.heap.new_frame(Some(closure.env));
        match param {
            Param::Ident(name) => self.heap.bind(scope, name.clone(), arg),
            Param::Formals {
                formals,
                ellipsis,
                alias,
            } => {
                let attrs = match self.force(arg).map_err(|e| e.at(span))? {
                    Value::Attrs(attrs) => attrs,
                    other => {
                        return Err(EvalError::new(
                            EvalErrorKind::Type,
                            format!("function expects a set argument but got {}", other.type_name()),
                        )
                        .at(span));
                    }
                };
                if !*ellipsis {
                    if let Some(extra) = attrs.keys().find(|k| !formals.iter().any(|f| f.name == **k)) {
                        return Err(EvalError::new(
                            EvalErrorKind::Type,
                            format!("function called with unexpected argument '{}'", extra),
                        )
                        .at(span));
                    }
                }
                for formal in formals {
                    let thunk = match (attrs.get(&formal.name), formal.default) {
                        (Some(thunk), _) => *thunk,
                        (None, Some(default)) => self.heap.alloc(ThunkState::Pending {
                            node: default,
                            env: scope,
                        }),
                        (None, None) => {
                            return Err(EvalError::new(
                                EvalErrorKind::MissingAttribute,
                                format!("function called without required argument '{}'", formal.name),
                            )
                            .at(span));
                        }
                    };
                    self.heap.bind(scope, formal.name.clone(), thunk);
                }
                if let Some(alias) = alias {
                    self.heap.bind(scope, alias.clone(), arg);
                }
            }
        }
        self.eval(*body, scope)
    }

    /// Call a root function that takes formals with the configured auto-args.
    /// Anything else is returned as is.
    pub(crate) fn auto_call(&mut self, value: Value, args: &AutoArgs, env: Env, span: Span) -> Result<Value, EvalError> {
        let Value::Lambda(closure) = &value else {
            return Ok(value);
        };
        let NodeKind::Lambda {
            param: Param::Formals { formals, ellipsis, .. },
            ..
        } = self.arena.unwrap_kind(closure.node)
        else {
            return Ok(value);
        };

        let mut set: BTreeMap<Arc<str>, ThunkId> = BTreeMap::new();
        for arg in args.iter() {
            if !*ellipsis && !formals.iter().any(|f| f.name == arg.name) {
                continue;
            }
            let thunk = match &arg.value {
                AutoArgValue::Expr(node) => self.heap.alloc(ThunkState::Pending { node: *node, env }),
                AutoArgValue::Str(s) => self.heap.ready(Value::Str(Rc::from(&**s))),
            };
            set.insert(arg.name.clone(), thunk);
        }
        let arg = self.heap.ready(Value::Attrs(Rc::new(set)));
        self.call(value.clone(), arg, span)
    }

    /// Deep equality; forces both sides as far as needed.
    pub(crate) fn values_equal(&mut self, l: &Value, r: &Value, span: Span) -> Result<bool, EvalError> {
        let equal = match (l, r) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                if a.len() != b.len() {
                    return Ok(false);
                }
                self.enter(span)?;
                let result = self.thunks_equal(a.iter().copied().zip(b.iter().copied()), span);
                self.leave();
                result?
            }
            (Value::Attrs(a), Value::Attrs(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                if a.len() != b.len() || !a.keys().eq(b.keys()) {
                    return Ok(false);
                }
                self.enter(span)?;
                let result = self.thunks_equal(a.values().copied().zip(b.values().copied()), span);
                self.leave();
                result?
            }
            _ => match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        };
        Ok(equal)
    }

    fn thunks_equal(
        &mut self,
        pairs: impl Iterator<Item = (ThunkId, ThunkId)>,
        span: Span,
    ) -> Result<bool, EvalError> {
        for (a, b) in pairs {
            let a = self.force(a).map_err(|e| e.at(span))?;
            let b = self.force(b).map_err(|e| e.at(span))?;
            if !self.values_equal(&a, &b, span)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Force every element of lists and sets reachable from `value`. Soft
    /// errors are collected and the walk continues; fatal errors stop it.
    pub(crate) fn force_deep(
        &mut self,
        value: &Value,
        span: Span,
        errors: &mut Vec<EvalError>,
        seen: &mut FastHashSet<ThunkId>,
    ) -> Result<(), EvalError> {
        let children: Vec<ThunkId> = match value {
            Value::List(items) => items.to_vec(),
            Value::Attrs(attrs) => attrs.values().copied().collect(),
            _ => return Ok(()),
        };
        self.enter(span)?;
        for thunk in children {
            if !seen.insert(thunk) {
                continue;
            }
            match self.force(thunk) {
                Ok(child) => {
                    if let Err(err) = self.force_deep(&child, span, errors, seen) {
                        self.leave();
                        return Err(err);
                    }
                }
                Err(err) if err.is_fatal() => {
                    self.leave();
                    return Err(err);
                }
                Err(err) => errors.push(err),
            }
        }
        self.leave();
        Ok(())
    }
}
