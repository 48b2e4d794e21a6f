//! Language server for lazen. Analysis answers come from actually evaluating
//! the open document on a single evaluation worker.

pub mod analysis;
pub mod draft;
mod server;

pub use server::{run, run_cli};
