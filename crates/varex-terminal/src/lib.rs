//! Text-command protocol engine.
//!
//! Lines are split by a quoting-aware tokenizer, resolved against a command
//! table (exact arity, optional default command), and answered in-band. The
//! built-in `GET`/`SET`/`LIST` commands bind the engine to a variable
//! registry.

pub mod builtins;
mod processor;
pub mod tokenizer;

/// Register the built-in commands into a table.
pub use builtins::{line_processor, register_builtins};
/// A single protocol command.
pub use processor::Command;
/// Name -> command mapping with an optional default command.
pub use processor::CommandTable;
/// A command built from a closure.
pub use processor::FnCommand;
/// Protocol and handler errors for one line.
pub use processor::LineError;
/// Dispatcher and session loop.
pub use processor::LineProcessor;
