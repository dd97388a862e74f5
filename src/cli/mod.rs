//! CLI module - command-line interface
//!
//! Contains the REPL, the session it drives, and command parsing.

pub mod commands;
pub mod repl;

pub use repl::{Repl, Session};
