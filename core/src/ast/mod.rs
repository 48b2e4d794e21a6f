mod arena;
mod node;
mod parser;


pub use arena::Arena;
pub use node::{AttrKey, Binding, BindingValue, Formal, Node, NodeId, NodeKind, Observed, Param};
pub use parser::{MAX_NESTING, Parser, Tree, parse, parse_into};
