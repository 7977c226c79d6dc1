//! Multi-process pipeline execution.
//!
//! A pipeline of N >= 2 stages runs as N forked children. Their stdout chain is wired
//! through one pipe per boundary; the last stage writes into a collector pipe for the
//! pipeline's output, and every stage shares a second collector pipe for errors.
//! A launch moves through: collectors allocated, children spawned, parent write ends
//! closed, collectors drained, children waited. Aborting at any point before the last
//! spawn drops every descriptor and kills what was already started.

use crate::command::{COMMAND_NOT_FOUND, ExecResult, ExitCode, Streams};
use crate::io_adapters::FdStream;
use crate::parser::Pipeline;
use crate::process::{self, Collector, Pipe};
use nix::errno::Errno;
use nix::libc::{STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::unistd::{ForkResult, Pid, fork};
use std::io::Write;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use thiserror::Error;
use tracing::subscriber::NoSubscriber;

/// Runs a single resolved stage on behalf of the executor.
pub trait StageRunner {
    /// Route for a one-stage line, run in the calling process so that its side
    /// effects (assignments, termination requests) stay visible to the caller.
    fn run_in_process(&mut self, argv: &[String], io: &mut Streams<'_>) -> ExecResult;

    /// Route for one stage of a longer pipeline, called inside its forked child.
    fn run_stage(&mut self, argv: &[String], io: &mut Streams<'_>) -> ExecResult;
}

/// Failure to acquire the OS resources for a pipeline.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("pipe: {0}")]
    Pipe(#[source] Errno),
    #[error("fork failed: {0}")]
    Fork(#[source] Errno),
}

/// Execute `pipeline`, writing its combined output and errors to `io`.
///
/// One stage runs in-process through [`StageRunner::run_in_process`] and its result
/// is returned as-is. Longer pipelines report the last stage's exit code and never
/// request interpreter termination.
pub fn execute<R: StageRunner>(
    pipeline: &Pipeline,
    runner: &mut R,
    io: &mut Streams<'_>,
) -> ExecResult {
    match pipeline.stages() {
        [] => ExecResult::success(),
        [single] => runner.run_in_process(single.argv(), io),
        _ => execute_forked(pipeline, runner, io),
    }
}

fn execute_forked<R: StageRunner>(
    pipeline: &Pipeline,
    runner: &mut R,
    io: &mut Streams<'_>,
) -> ExecResult {
    // Buffered output must not be duplicated into the children.
    io.flush();
    let stdin_fd = io.stdin.inheritable_fd();

    let mut launch = match Launch::open(pipeline.len()) {
        Ok(launch) => launch,
        Err(e) => return report_abort(e, io),
    };

    let stages = pipeline.stages();
    for (index, stage) in stages.iter().enumerate() {
        let next = if index + 1 == stages.len() {
            None
        } else {
            match Pipe::open() {
                Ok(pipe) => Some(pipe),
                Err(e) => {
                    launch.abort();
                    return report_abort(LaunchError::Pipe(e), io);
                }
            }
        };

        match unsafe { fork() } {
            Ok(ForkResult::Child) => run_child(runner, stage.argv(), stdin_fd, launch, next),
            Ok(ForkResult::Parent { child }) => {
                tracing::debug!(pid = %child, program = %stage.program(), "spawned pipeline stage");
                launch.record(child, next);
            }
            Err(e) => {
                drop(next);
                launch.abort();
                return report_abort(LaunchError::Fork(e), io);
            }
        }
    }

    ExecResult::new(launch.finish(io))
}

fn report_abort(error: LaunchError, io: &mut Streams<'_>) -> ExecResult {
    tracing::warn!(%error, "pipeline aborted during setup");
    let _ = writeln!(io.stderr, "minishell: {error}");
    ExecResult::new(COMMAND_NOT_FOUND)
}

/// Resources of one pipeline execution in progress.
struct Launch {
    output: Pipe,
    errors: Pipe,
    /// Read end of the pipe feeding the next stage to be spawned.
    previous: Option<OwnedFd>,
    children: Vec<Pid>,
}

impl Launch {
    fn open(stage_count: usize) -> Result<Self, LaunchError> {
        let errors = Pipe::open().map_err(LaunchError::Pipe)?;
        let output = Pipe::open().map_err(LaunchError::Pipe)?;
        Ok(Self {
            output,
            errors,
            previous: None,
            children: Vec::with_capacity(stage_count),
        })
    }

    /// Parent side of a successful fork.
    ///
    /// The child holds its own copies of the stage's descriptors, so the previous
    /// read end and the new write end are closed here.
    fn record(&mut self, child: Pid, next: Option<Pipe>) {
        self.children.push(child);
        self.previous = next.map(|pipe| {
            drop(pipe.write);
            pipe.read
        });
    }

    /// Release every descriptor, then kill and reap the children already spawned.
    fn abort(self) {
        let Launch {
            output,
            errors,
            previous,
            children,
        } = self;
        drop(previous);
        drop(output);
        drop(errors);
        process::kill_and_reap(&children);
    }

    /// Close the parent's write ends, drain both collectors, wait for every child.
    fn finish(self, io: &mut Streams<'_>) -> ExitCode {
        let Launch {
            output,
            errors,
            previous,
            children,
        } = self;
        drop(previous);
        // Otherwise the collectors never reach end-of-data.
        drop(output.write);
        drop(errors.write);

        {
            let mut collectors = [
                Collector::new(output.read, &mut *io.stdout),
                Collector::new(errors.read, &mut *io.stderr),
            ];
            if let Err(e) = process::drain(&mut collectors) {
                tracing::warn!(error = %e, "failed to collect pipeline output");
            }
        }
        let _ = io.stdout.flush();

        wait_all(&children, io)
    }
}

/// Wait for `children` in creation order; only the last one decides the exit code.
fn wait_all(children: &[Pid], io: &mut Streams<'_>) -> ExitCode {
    let mut exit_code = 0;
    for (index, &pid) in children.iter().enumerate() {
        let is_last = index + 1 == children.len();
        match process::wait_child(pid) {
            Ok(code) if is_last => exit_code = code,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(%pid, error = %e, "waitpid failed");
                let _ = writeln!(io.stderr, "minishell: waitpid failed: {e}");
                if is_last {
                    exit_code = COMMAND_NOT_FOUND;
                }
            }
        }
    }
    exit_code
}

/// Body of a forked pipeline stage. Never returns: the process exits with the
/// stage's exit code.
fn run_child<R: StageRunner>(
    runner: &mut R,
    argv: &[String],
    stdin_fd: Option<RawFd>,
    launch: Launch,
    next: Option<Pipe>,
) -> ! {
    // The child shares the parent's log sink, and its stderr is the pipeline's error sink.
    let _quiet = tracing::subscriber::set_default(NoSubscriber::default());

    // The first stage reads the caller's input, or nothing if it has no descriptor.
    let null_input = match (&launch.previous, stdin_fd) {
        (None, None) => process::null_input().ok(),
        _ => None,
    };
    let input = launch
        .previous
        .as_ref()
        .map(AsRawFd::as_raw_fd)
        .or(stdin_fd)
        .or_else(|| null_input.as_ref().map(AsRawFd::as_raw_fd));
    let output = match &next {
        Some(pipe) => pipe.write.as_raw_fd(),
        None => launch.output.write.as_raw_fd(),
    };
    let error = launch.errors.write.as_raw_fd();

    let redirected = input
        .map_or(Ok(()), |fd| process::redirect(fd, STDIN_FILENO))
        .and_then(|_| process::redirect(output, STDOUT_FILENO))
        .and_then(|_| process::redirect(error, STDERR_FILENO));

    // Every descriptor this stage needs now lives on as 0, 1 or 2.
    drop(null_input);
    drop(next);
    drop(launch);

    let mut stdin = FdStream::stdin();
    let mut stdout = FdStream::stdout();
    let mut stderr = FdStream::stderr();

    if let Err(e) = redirected {
        let _ = writeln!(stderr, "minishell: dup2: {e}");
        process::exit_child(COMMAND_NOT_FOUND);
    }

    let mut io = Streams::new(&mut stdin, &mut stdout, &mut stderr);
    let result = runner.run_stage(argv, &mut io);
    io.flush();
    process::exit_child(result.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Stage;
    use serial_test::serial;
    use std::io::Cursor;

    /// Stages understood by the test runner:
    /// `emit WORDS...` writes the words, `upper` upper-cases its input,
    /// `warn TEXT` writes to stderr, `log TEXT` emits a tracing event, `code N` exits
    /// with N, `quit N` asks to terminate.
    #[derive(Default)]
    struct ScriptedRunner {
        in_process: Vec<Vec<String>>,
    }

    impl StageRunner for ScriptedRunner {
        fn run_in_process(&mut self, argv: &[String], io: &mut Streams<'_>) -> ExecResult {
            self.in_process.push(argv.to_vec());
            self.run_stage(argv, io)
        }

        fn run_stage(&mut self, argv: &[String], io: &mut Streams<'_>) -> ExecResult {
            let number = || -> ExitCode { argv.get(1).and_then(|n| n.parse().ok()).unwrap_or(0) };
            match argv[0].as_str() {
                "emit" => {
                    writeln!(io.stdout, "{}", argv[1..].join(" ")).unwrap();
                    ExecResult::success()
                }
                "upper" => {
                    let mut input = String::new();
                    io.stdin.read_to_string(&mut input).unwrap();
                    write!(io.stdout, "{}", input.to_uppercase()).unwrap();
                    ExecResult::success()
                }
                "warn" => {
                    writeln!(io.stderr, "{}", argv[1..].join(" ")).unwrap();
                    ExecResult::success()
                }
                "log" => {
                    tracing::warn!("{}", argv[1..].join(" "));
                    ExecResult::success()
                }
                "code" => ExecResult::new(number()),
                "quit" => ExecResult::exit(number()),
                _ => ExecResult::new(COMMAND_NOT_FOUND),
            }
        }
    }

    fn pipeline(stages: &[&[&str]]) -> Pipeline {
        let tokens = stages
            .iter()
            .enumerate()
            .flat_map(|(i, argv)| {
                let pipe = (i > 0).then_some(crate::lexer::Token::Pipe);
                pipe.into_iter().chain(
                    argv.iter()
                        .map(|word| crate::lexer::Token::Word(word.to_string())),
                )
            })
            .collect();
        crate::parser::parse(tokens).unwrap()
    }

    fn run(runner: &mut ScriptedRunner, stages: &[&[&str]]) -> (ExecResult, String, String) {
        let mut stdin = Cursor::new(b"ignored".to_vec());
        let mut out = Vec::new();
        let mut err = Vec::new();
        let result = {
            let mut io = Streams::new(&mut stdin, &mut out, &mut err);
            execute(&pipeline(stages), runner, &mut io)
        };
        (
            result,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn test_empty_pipeline_succeeds() {
        let mut runner = ScriptedRunner::default();
        assert_eq!(run(&mut runner, &[]).0, ExecResult::success());
        assert!(runner.in_process.is_empty());
    }

    #[test]
    fn test_single_stage_runs_in_process() {
        let mut runner = ScriptedRunner::default();
        let (result, _, _) = run(&mut runner, &[&["quit", "5"]]);
        assert_eq!(result, ExecResult::exit(5));
        assert_eq!(runner.in_process, vec![vec!["quit".to_string(), "5".to_string()]]);
    }

    #[test]
    #[serial]
    fn test_stages_are_chained() {
        let mut runner = ScriptedRunner::default();
        let (result, out, err) = run(&mut runner, &[&["emit", "hello", "pipe"], &["upper"]]);
        assert_eq!(result, ExecResult::success());
        assert_eq!(out, "HELLO PIPE\n");
        assert!(err.is_empty());
        assert!(runner.in_process.is_empty());
    }

    #[test]
    #[serial]
    fn test_first_stage_without_descriptor_reads_nothing() {
        let mut runner = ScriptedRunner::default();
        let (_, out, _) = run(&mut runner, &[&["upper"], &["upper"]]);
        assert_eq!(out, "");
    }

    #[test]
    #[serial]
    fn test_errors_of_every_stage_are_merged() {
        let mut runner = ScriptedRunner::default();
        let (_, out, err) = run(&mut runner, &[&["warn", "first"], &["warn", "second"]]);
        assert_eq!(out, "");
        let mut lines: Vec<&str> = err.lines().collect();
        lines.sort_unstable();
        assert_eq!(lines, vec!["first", "second"]);
    }

    #[test]
    #[serial]
    fn test_last_stage_decides_exit_code() {
        let mut runner = ScriptedRunner::default();
        assert_eq!(
            run(&mut runner, &[&["code", "3"], &["code", "0"]]).0,
            ExecResult::success()
        );
        assert_eq!(
            run(&mut runner, &[&["code", "0"], &["code", "4"]]).0,
            ExecResult::new(4)
        );
    }

    #[test]
    #[serial]
    fn test_pipeline_never_requests_termination() {
        let mut runner = ScriptedRunner::default();
        let (result, _, _) = run(&mut runner, &[&["emit", "x"], &["quit", "9"]]);
        assert_eq!(result, ExecResult::new(9));
        assert!(!result.should_exit());
    }

    #[test]
    #[serial]
    fn test_stages_do_not_log_into_error_sink() {
        // A subscriber on fd 2 would write into the errors collector inside a stage.
        let subscriber = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut runner = ScriptedRunner::default();
        let (result, out, err) = run(&mut runner, &[&["log", "from stage"], &["emit", "x"]]);
        assert_eq!(result, ExecResult::success());
        assert_eq!(out, "x\n");
        assert_eq!(err, "");
    }

    #[test]
    fn test_stage_argv_survives_parsing() {
        let p = pipeline(&[&["emit", "a"], &["upper"]]);
        assert_eq!(p.stages()[1], Stage::new(vec!["upper".to_string()]).unwrap());
    }
}
