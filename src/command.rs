use crate::env::Environment;
use std::io::{Read, Write};
use std::os::fd::RawFd;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// This mirrors the convention used by POSIX shells and many command-line tools.
pub type ExitCode = i32;

pub const SUCCESS: ExitCode = 0;
/// Runtime failure inside a builtin.
pub const FAILURE: ExitCode = 1;
/// Syntax errors and bad builtin usage.
pub const USAGE_ERROR: ExitCode = 2;
/// The program was found but could not be executed.
pub const CANNOT_EXECUTE: ExitCode = 126;
/// Resolution failures, and any failure to set up processes or pipes.
pub const COMMAND_NOT_FOUND: ExitCode = 127;
/// Added to the signal number when a child is killed by a signal.
pub const SIGNAL_BASE: ExitCode = 128;

/// Outcome of executing a line, a pipeline or a single command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    exit_code: ExitCode,
    should_exit: bool,
}

impl ExecResult {
    /// A result that leaves the interpreter running.
    pub const fn new(exit_code: ExitCode) -> Self {
        Self {
            exit_code,
            should_exit: false,
        }
    }

    pub const fn success() -> Self {
        Self::new(SUCCESS)
    }

    /// A result asking the interpreter to terminate with `exit_code`.
    pub const fn exit(exit_code: ExitCode) -> Self {
        Self {
            exit_code,
            should_exit: true,
        }
    }

    pub const fn exit_code(&self) -> ExitCode {
        self.exit_code
    }

    pub const fn should_exit(&self) -> bool {
        self.should_exit
    }
}

/// A readable input stream.
///
/// When the stream is backed by an OS descriptor, external programs read from that
/// descriptor directly; otherwise they get an empty input.
pub trait Input: Read {
    /// Descriptor a child process may inherit as its standard input.
    fn inheritable_fd(&self) -> Option<RawFd> {
        None
    }
}

/// A writable output sink.
///
/// Sinks backed by an OS descriptor are inherited by external programs; other sinks
/// receive the program's output through a pipe drained by the interpreter.
pub trait Output: Write {
    /// Descriptor a child process may inherit as its standard output or error.
    fn inheritable_fd(&self) -> Option<RawFd> {
        None
    }
}

/// Standard streams of a single invocation.
pub struct Streams<'a> {
    pub stdin: &'a mut dyn Input,
    pub stdout: &'a mut dyn Output,
    pub stderr: &'a mut dyn Output,
}

impl<'a> Streams<'a> {
    pub fn new(
        stdin: &'a mut dyn Input,
        stdout: &'a mut dyn Output,
        stderr: &'a mut dyn Output,
    ) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
        }
    }

    /// Flush both sinks, e.g. before forking.
    pub fn flush(&mut self) {
        let _ = self.stdout.flush();
        let _ = self.stderr.flush();
    }
}

/// Object-safe trait for any command that can be executed by the shell.
///
/// This is implemented by built-ins via a blanket impl and by external commands.
/// Commands never fork for pipelines or manage pipes themselves; they only talk
/// through the supplied streams and their result.
pub trait ExecutableCommand {
    /// Executes the command.
    fn execute(self: Box<Self>, io: &mut Streams<'_>, env: &mut Environment) -> ExecResult;
}

/// Factory that tries to create a command from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`.
/// Implementations can use the environment to resolve executables (e.g., using PATH).
pub trait CommandFactory {
    /// Attempt to create a command instance for the provided name and arguments.
    fn try_create(
        &self,
        env: &Environment,
        name: &str,
        args: &[&str],
    ) -> Option<Box<dyn ExecutableCommand>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_result_constructors() {
        assert_eq!(ExecResult::success().exit_code(), 0);
        assert!(!ExecResult::success().should_exit());

        let r = ExecResult::new(COMMAND_NOT_FOUND);
        assert_eq!(r.exit_code(), 127);
        assert!(!r.should_exit());

        let r = ExecResult::exit(3);
        assert_eq!(r.exit_code(), 3);
        assert!(r.should_exit());
    }
}
