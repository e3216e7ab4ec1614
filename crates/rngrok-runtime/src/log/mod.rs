//! Agent log parsing and retention.
//!
//! - `LogRecord` / `LogLevel` - structured form of one agent log line
//! - `shell_split` - the quoting-aware tokenizer behind `LogRecord::parse`
//! - `BoundedLogHistory` - fixed-size record buffer with an observer callback

mod history;
mod parser;
mod record;

pub use history::{BoundedLogHistory, LogCallback};
pub use parser::shell_split;
pub use record::{LogLevel, LogRecord};
