mod ops;
#[cfg(test)]
mod op_test;

pub use ops::{BinOp, UnaryOp};
