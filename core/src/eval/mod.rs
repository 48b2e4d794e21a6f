//! Lazy tree-walking evaluator.
//!
//! All interpreter memory lives in a [`Heap`] owned by the [`Interpreter`] and
//! is reset at the start of every run. [`Value`]s are `!Send`; only
//! [`ValueSnapshot`] and [`EnvSnapshot`] leave the evaluating thread.

mod auto_args;
pub mod builtins;
mod error;
mod evaluator;
mod heap;
mod snapshot;
mod value;

#[cfg(test)]
mod eval_test;

use tracing::debug;

pub use auto_args::{AutoArg, AutoArgValue, AutoArgs};
pub use error::{ErrorCategory, EvalError, EvalErrorKind};
pub use evaluator::Evaluator;
pub use heap::{Env, Heap, ThunkId};
pub use snapshot::{EnvBinding, EnvSnapshot, MAX_ENV_BINDINGS, ValueSnapshot};
pub use value::{Closure, PrimOpApp, Value};

use crate::ast::{Arena, NodeId};
use crate::util::FastHashSet;

pub const DEFAULT_MAX_DEPTH: usize = 1024;

#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Nesting limit before a run aborts with a stack overflow.
    pub max_depth: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Outcome of a run that did not hit a fatal error.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// The fully forced root, or the soft error that prevented evaluating it.
    pub value: Result<ValueSnapshot, EvalError>,
    /// Every distinct soft error met, the root error included.
    pub errors: Vec<EvalError>,
}

/// Owns the mutable interpreter state. Not `Send`: it stays on the thread
/// that created it.
pub struct Interpreter {
    heap: Heap,
    config: EvalConfig,
    runs: u64,
}

impl Interpreter {
    pub fn new(config: EvalConfig) -> Self {
        Self {
            heap: Heap::new(),
            config,
            runs: 0,
        }
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    pub fn set_max_depth(&mut self, max_depth: usize) {
        self.config.max_depth = max_depth;
    }

    /// Number of runs started so far.
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// Evaluate `root`, auto-call it when it is a function taking formals, then
    /// force it deeply. Returns `Err` only for fatal errors.
    pub fn evaluate(&mut self, arena: &Arena, root: NodeId, auto_args: &AutoArgs) -> Result<Evaluation, EvalError> {
        self.heap.reset();
        self.runs += 1;
        let base = self.heap.base_env();
        let span = arena.node(root).span;
        let mut ev = Evaluator::new(arena, &mut self.heap, self.config.max_depth);

        let mut errors = Vec::new();
        let whnf = ev
            .eval(root, base)
            .and_then(|value| ev.auto_call(value, auto_args, base, span));
        let value = match whnf {
            Ok(value) => {
                let mut seen = FastHashSet::default();
                ev.force_deep(&value, span, &mut errors, &mut seen)?;
                Ok(ev.snapshot(&value))
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                errors.insert(0, err.clone());
                Err(err)
            }
        };

        let mut distinct: Vec<EvalError> = Vec::with_capacity(errors.len());
        for err in errors {
            if !distinct.contains(&err) {
                distinct.push(err);
            }
        }
        debug!(
            run = self.runs,
            thunks = self.heap.thunk_count(),
            frames = self.heap.frame_count(),
            errors = distinct.len(),
            "evaluation finished"
        );
        Ok(Evaluation {
            value,
            errors: distinct,
        })
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(EvalConfig::default())
    }
}
