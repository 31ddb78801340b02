#![deny(missing_docs)]
//! Slash-command parsing and built-ins for trident.
//!
//! The parser turns `/<name> args...` into a [`ParsedCommand`]; the
//! handler dispatches the five built-ins (`status`, `model`, `config`,
//! `mode`, `session`) against the session store and the dispatcher's
//! [`StatusSurface`]. Built-ins never touch tools.

mod handler;
mod parse;
mod status;

pub use handler::{CommandHandler, CommandOutcome, BUILTIN_COMMANDS};
pub use parse::{parse_command, ParsedCommand};
pub use status::{AgentMode, AgentStatus, StatusSurface};
