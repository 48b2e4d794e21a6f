pub mod ast;
pub mod eval;
pub mod instrument;
pub mod op;
pub mod token;
pub mod util;

pub use ast::{Arena, Node, NodeId, NodeKind, Tree, parse, parse_into};
pub use eval::{AutoArgs, EvalConfig, EvalError, EvalErrorKind, Evaluation, Interpreter, ValueSnapshot};
pub use instrument::{Observer, RewriteError, rewrite};
pub use token::{ParseError, Position, Span};
