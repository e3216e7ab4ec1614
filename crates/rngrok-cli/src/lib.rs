//! Library half of the `rngrok` binary: argument parsing and handlers.

pub mod handlers;
mod parser;

pub use parser::{Cli, Commands, StartArgs};
