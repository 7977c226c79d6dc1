//! minishell entry point.
//!
//! Usage:
//!   minishell                  # Interactive REPL (or read stdin when it is not a tty)
//!   minishell -c <line>        # Execute one line and exit with its code
//!   minishell script.sh        # Run a script line by line

use std::fs::File;
use std::io::{self, BufReader, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use argh::FromArgs;
use minishell::Shell;
use minishell::repl::{self, ReplConfig};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(FromArgs)]
/// a small shell with pipelines, quoting and variable expansion.
struct Args {
    #[argh(option, short = 'c')]
    /// execute a single line and exit with its exit code
    command: Option<String>,

    #[argh(option, default = "String::from(\"$ \")")]
    /// prompt shown in interactive mode
    prompt: String,

    #[argh(option)]
    /// file to load interactive history from and save it to
    history: Option<PathBuf>,

    #[argh(positional)]
    /// script to execute line by line
    script: Option<PathBuf>,
}

fn main() -> ExitCode {
    // Logs go to stderr; RUST_LOG overrides the default level.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args: Args = argh::from_env();
    match run(args) {
        Ok(code) => ExitCode::from((code & 0xff) as u8),
        Err(e) => {
            eprintln!("minishell: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<minishell::ExitCode> {
    let mut shell = Shell::default();

    if let Some(line) = args.command {
        let result = shell.execute_line(&line, &mut io::stdout(), &mut io::stderr());
        return Ok(result.exit_code());
    }

    if let Some(path) = args.script {
        let file = File::open(&path)
            .with_context(|| format!("can't open script {}", path.display()))?;
        return repl::run_script(&mut shell, BufReader::new(file));
    }

    if io::stdin().is_terminal() {
        let config = ReplConfig {
            prompt: args.prompt,
            history: args.history,
        };
        repl::run_interactive(&mut shell, &config)
    } else {
        repl::run_stdin(&mut shell)
    }
}
