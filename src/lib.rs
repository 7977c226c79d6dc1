//! A small line-oriented shell: quoting-aware lexing with `$NAME` expansion,
//! pipelines of built-in and external commands, and variable assignment.
//!
//! The main entry point is [`Shell`], which executes one input line at a time through
//! [`Shell::execute_line`]. A line is split into tokens by [`lexer`], grouped into a
//! [`parser::Pipeline`], and run by [`executor`]: a single stage in the shell's own
//! process, longer pipelines as one forked process per stage. The public modules
//! [`command`] and [`env`] expose the result type, stream traits and the variable store.

mod builtin;
pub mod command;
pub mod env;
pub mod executor;
pub mod external;
mod interpreter;
mod io_adapters;
pub mod lexer;
pub mod parser;
mod process;
pub mod repl;

pub use command::{ExecResult, ExitCode, Input, Output};
pub use env::Environment;
/// Just a convenient re-export of the line interpreter.
///
/// See [`Shell`] for the high-level API and examples.
pub use interpreter::Shell;
