mod cli;
mod config;
mod entry;
mod handlers;
mod state;

pub use cli::run_cli;
pub use entry::run;
