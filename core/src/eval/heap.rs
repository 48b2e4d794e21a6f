use std::fmt;
use std::sync::Arc;

use super::builtins;
use super::value::Value;
use crate::ast::NodeId;
use crate::token::Span;

/// Handle to a scope frame in the [`Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Env(u32);

/// Handle to a lazily computed value in the [`Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThunkId(u32);

impl fmt::Display for ThunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

pub(crate) struct Frame {
    pub(crate) vars: Vec<(Arc<str>, ThunkId)>,
    pub(crate) parent: Option<Env>,
    /// Set for frames introduced by `with`; names resolve through it only
    /// after every lexical frame missed.
    pub(crate) with_scope: Option<ThunkId>,
}

impl Frame {
    pub(crate) fn get(&self, name: &str) -> Option<ThunkId> {
        self.vars
            .iter()
            .rev()
            .find(|(n, _)| n.as_ref() == name)
            .map(|(_, t)| *t)
    }
}

#[derive(Clone)]
pub(crate) enum ThunkState {
    Pending { node: NodeId, env: Env },
    /// `func arg`, created by builtins such as `map`.
    Apply { func: ThunkId, arg: ThunkId, span: Span },
    /// `inherit name;`
    Lookup { name: Arc<str>, env: Env, span: Span },
    /// Currently being forced.
    Blackhole,
    /// Last force raised an error; forcing again retries the computation.
    Failed(Box<ThunkState>),
    Ready(Value),
}

/// All frames and thunks of one evaluation run.
pub struct Heap {
    frames: Vec<Frame>,
    thunks: Vec<ThunkState>,
    base: Env,
}

impl Heap {
    pub fn new() -> Self {
        let mut heap = Heap {
            frames: Vec::new(),
            thunks: Vec::new(),
            base: Env(0),
        };
        heap.reset();
        heap
    }

    /// Drop everything and reinstall the builtin scope.
    pub fn reset(&mut self) {
        self.frames.clear();
        self.thunks.clear();
        self.base = builtins::install(self);
    }

    /// The root scope holding the builtins.
    pub fn base_env(&self) -> Env {
        self.base
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn thunk_count(&self) -> usize {
        self.thunks.len()
    }

    pub(crate) fn new_frame(&mut self, parent: Option<Env>) -> Env {
        self.push_frame(Frame {
            vars: Vec::new(),
            parent,
            with_scope: None,
        })
    }

    pub(crate) fn new_with_frame(&mut self, parent: Env, scope: ThunkId) -> Env {
        self.push_frame(Frame {
            vars: Vec::new(),
            parent: Some(parent),
            with_scope: Some(scope),
        })
    }

    fn push_frame(&mut self, frame: Frame) -> Env {
        let env = Env(self.frames.len() as u32);
        self.frames.push(frame);
        env
    }

    pub(crate) fn bind(&mut self, env: Env, name: Arc<str>, thunk: ThunkId) {
        self.frames[env.0 as usize].vars.push((name, thunk));
    }

    pub(crate) fn frame(&self, env: Env) -> &Frame {
        &self.frames[env.0 as usize]
    }

    pub(crate) fn alloc(&mut self, state: ThunkState) -> ThunkId {
        let id = ThunkId(self.thunks.len() as u32);
        self.thunks.push(state);
        id
    }

    pub(crate) fn ready(&mut self, value: Value) -> ThunkId {
        self.alloc(ThunkState::Ready(value))
    }

    pub(crate) fn state(&self, thunk: ThunkId) -> &ThunkState {
        &self.thunks[thunk.0 as usize]
    }

    pub(crate) fn state_mut(&mut self, thunk: ThunkId) -> &mut ThunkState {
        &mut self.thunks[thunk.0 as usize]
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
