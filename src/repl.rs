//! Read loops that feed lines to a [`Shell`].

use crate::command::{ExitCode, SIGNAL_BASE, SUCCESS};
use crate::interpreter::Shell;
use anyhow::{Context, Result};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::{self, BufRead};
use std::path::PathBuf;

/// Exit code of a line abandoned with Ctrl-C.
const INTERRUPTED: ExitCode = SIGNAL_BASE + 2;

/// Settings of the interactive loop.
#[derive(Debug, Clone)]
pub struct ReplConfig {
    pub prompt: String,
    /// File to load history from on start and save it to on exit.
    pub history: Option<PathBuf>,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            prompt: "$ ".to_string(),
            history: None,
        }
    }
}

/// Where the last line left the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue(ExitCode),
    Exit(ExitCode),
}

fn execute(shell: &mut Shell, line: &str) -> Flow {
    let result = shell.execute_line(line, &mut io::stdout(), &mut io::stderr());
    if result.should_exit() {
        Flow::Exit(result.exit_code())
    } else {
        Flow::Continue(result.exit_code())
    }
}

/// Interactive Read-Eval-Print Loop on top of `rustyline`.
///
/// Returns the code passed to `exit`, or the last line's code at end of input.
pub fn run_interactive(shell: &mut Shell, config: &ReplConfig) -> Result<ExitCode> {
    let mut rl = DefaultEditor::new().context("failed to initialize line editor")?;
    if let Some(path) = &config.history {
        if let Err(e) = rl.load_history(path) {
            tracing::debug!(path = %path.display(), error = %e, "no history loaded");
        }
    }

    let mut last = SUCCESS;
    loop {
        match rl.readline(&config.prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = rl.add_history_entry(line.as_str());
                }
                match execute(shell, &line) {
                    Flow::Continue(code) => last = code,
                    Flow::Exit(code) => {
                        last = code;
                        break;
                    }
                }
            }
            Err(ReadlineError::Interrupted) => last = INTERRUPTED,
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err).context("failed to read line"),
        }
    }

    if let Some(path) = &config.history {
        rl.save_history(path)
            .with_context(|| format!("failed to save history to {}", path.display()))?;
    }
    Ok(last)
}

/// Execute every line of `reader` until its end or an `exit`.
pub fn run_script<R: BufRead>(shell: &mut Shell, mut reader: R) -> Result<ExitCode> {
    run_lines(shell, |buf| reader.read_line(buf))
}

/// Like [`run_script`], for the process's standard input.
///
/// The stdin lock is only held while a line is read, so builtins in the script can
/// consume the input that follows it.
pub fn run_stdin(shell: &mut Shell) -> Result<ExitCode> {
    let stdin = io::stdin();
    run_lines(shell, |buf| stdin.read_line(buf))
}

fn run_lines(
    shell: &mut Shell,
    mut read_line: impl FnMut(&mut String) -> io::Result<usize>,
) -> Result<ExitCode> {
    let mut last = SUCCESS;
    let mut buf = String::new();
    loop {
        buf.clear();
        if read_line(&mut buf).context("failed to read line")? == 0 {
            return Ok(last);
        }
        let line = buf.trim_end_matches(['\n', '\r']);
        match execute(shell, line) {
            Flow::Continue(code) => last = code,
            Flow::Exit(code) => return Ok(code),
        }
    }
}
