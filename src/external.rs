use crate::command::{
    CANNOT_EXECUTE, COMMAND_NOT_FOUND, CommandFactory, ExecResult, ExecutableCommand, ExitCode,
    Streams,
};
use crate::env::Environment;
use crate::executor::LaunchError;
use crate::interpreter::Factory;
use crate::io_adapters::FdStream;
use crate::process::{self, Collector, Pipe};
use nix::errno::Errno;
use nix::libc::{STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::sys::signal::{SigHandler, Signal, signal};
use nix::unistd::{ForkResult, execve, fork};
use std::ffi::{CStr, CString, NulError, OsStr};
use std::fs;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Command that is not a builtin.
pub struct ExternalCommand {
    path: PathBuf,
    argv: Vec<String>,
}

impl ExternalCommand {
    /// `argv[0]` is the name as typed, `path` the resolved executable.
    pub fn new(path: PathBuf, argv: Vec<String>) -> Self {
        Self { path, argv }
    }
}

impl CommandFactory for Factory<ExternalCommand> {
    fn try_create(
        &self,
        env: &Environment,
        name: &str,
        args: &[&str],
    ) -> Option<Box<dyn ExecutableCommand>> {
        let path = resolve(name, env)?;
        tracing::debug!(name, path = %path.display(), "resolved executable");
        let argv = std::iter::once(name)
            .chain(args.iter().copied())
            .map(str::to_owned)
            .collect();
        Some(Box::new(ExternalCommand::new(path, argv)))
    }
}

#[derive(Debug, Error)]
enum SpawnError {
    #[error("argument contains a NUL byte")]
    Nul(#[from] NulError),
    #[error("/dev/null: {0}")]
    NullInput(#[source] io::Error),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("waitpid failed: {0}")]
    Wait(#[source] Errno),
}

impl SpawnError {
    fn exit_code(&self) -> ExitCode {
        match self {
            SpawnError::Nul(_) => CANNOT_EXECUTE,
            _ => COMMAND_NOT_FOUND,
        }
    }
}

impl ExecutableCommand for ExternalCommand {
    fn execute(self: Box<Self>, io: &mut Streams<'_>, env: &mut Environment) -> ExecResult {
        match self.spawn_and_wait(io, env) {
            Ok(code) => ExecResult::new(code),
            Err(e) => {
                let _ = writeln!(io.stderr, "minishell: {}: {}", self.argv[0], e);
                ExecResult::new(e.exit_code())
            }
        }
    }
}

impl ExternalCommand {
    fn spawn_and_wait(&self, io: &mut Streams<'_>, env: &Environment) -> Result<ExitCode, SpawnError> {
        // Everything the child needs is allocated before the fork.
        let program = CString::new(self.path.as_os_str().as_bytes())?;
        let argv = self
            .argv
            .iter()
            .map(|arg| CString::new(arg.as_str()))
            .collect::<Result<Vec<_>, _>>()?;
        let envp = env
            .snapshot()
            .map(|(name, value)| CString::new(format!("{name}={value}")))
            .collect::<Result<Vec<_>, _>>()?;

        io.flush();

        let null_input = match io.stdin.inheritable_fd() {
            Some(_) => None,
            None => Some(process::null_input().map_err(SpawnError::NullInput)?),
        };
        let out_capture = capture_for(io.stdout.inheritable_fd())?;
        let err_capture = capture_for(io.stderr.inheritable_fd())?;

        let fds = ChildFds {
            input: io
                .stdin
                .inheritable_fd()
                .or_else(|| null_input.as_ref().map(AsRawFd::as_raw_fd)),
            output: io
                .stdout
                .inheritable_fd()
                .or_else(|| out_capture.as_ref().map(|p| p.write.as_raw_fd())),
            error: io
                .stderr
                .inheritable_fd()
                .or_else(|| err_capture.as_ref().map(|p| p.write.as_raw_fd())),
        };

        let child = match unsafe { fork() } {
            Ok(ForkResult::Child) => exec_child(&program, &argv, &envp, fds),
            Ok(ForkResult::Parent { child }) => child,
            Err(e) => return Err(LaunchError::Fork(e).into()),
        };
        tracing::debug!(pid = %child, program = %self.path.display(), "spawned external program");
        drop(null_input);

        {
            let mut collectors = Vec::with_capacity(2);
            if let Some(pipe) = out_capture {
                drop(pipe.write);
                collectors.push(Collector::new(pipe.read, &mut *io.stdout));
            }
            if let Some(pipe) = err_capture {
                drop(pipe.write);
                collectors.push(Collector::new(pipe.read, &mut *io.stderr));
            }
            if let Err(e) = process::drain(&mut collectors) {
                tracing::warn!(error = %e, "failed to collect program output");
            }
        }

        process::wait_child(child).map_err(|e| {
            tracing::warn!(pid = %child, error = %e, "waitpid failed");
            SpawnError::Wait(e)
        })
    }
}

/// A pipe to capture a sink that has no descriptor of its own.
fn capture_for(fd: Option<RawFd>) -> Result<Option<Pipe>, LaunchError> {
    match fd {
        Some(_) => Ok(None),
        None => Pipe::open().map(Some).map_err(LaunchError::Pipe),
    }
}

#[derive(Clone, Copy)]
struct ChildFds {
    input: Option<RawFd>,
    output: Option<RawFd>,
    error: Option<RawFd>,
}

/// Body of the forked child: redirect, then replace the process image.
/// Never returns.
fn exec_child(program: &CStr, argv: &[CString], envp: &[CString], fds: ChildFds) -> ! {
    let redirected = [
        (fds.input, STDIN_FILENO),
        (fds.output, STDOUT_FILENO),
        (fds.error, STDERR_FILENO),
    ]
    .into_iter()
    .try_for_each(|(fd, target)| fd.map_or(Ok(()), |fd| process::redirect(fd, target)));

    let mut stderr = FdStream::stderr();
    if let Err(e) = redirected {
        let _ = writeln!(stderr, "minishell: dup2: {e}");
        process::exit_child(COMMAND_NOT_FOUND);
    }

    // The Rust runtime ignores SIGPIPE, and ignored dispositions survive exec.
    let _ = unsafe { signal(Signal::SIGPIPE, SigHandler::SigDfl) };

    // Capture pipes are close-on-exec, so only 0, 1 and 2 survive into the program.
    let error = match execve(program, argv, envp) {
        Ok(never) => match never {},
        Err(e) => e,
    };
    let _ = writeln!(
        stderr,
        "minishell: {}: {}",
        program.to_string_lossy(),
        error
    );
    process::exit_child(CANNOT_EXECUTE)
}

/// Resolve a command name to an executable the way a typical shell would.
///
/// Behavior:
/// - Name containing `/` (absolute, `./foo`, `bin/sh`): returns it if it is executable.
/// - Bare name: search each directory of the Environment's `PATH`, or of the process
///   `PATH` when the Environment has none, and return the first executable match.
/// - Empty name: returns `None`.
pub fn resolve(name: &str, env: &Environment) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    let path = Path::new(name);
    if name.contains('/') {
        return find_by_path(path).map(Path::to_path_buf);
    }

    match env.get("PATH") {
        Some(search_paths) => find_in_path(OsStr::new(search_paths), path.as_os_str()),
        None => find_in_path(&std::env::var_os("PATH")?, path.as_os_str()),
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(cmd))
        .find(|path| find_by_path(path).is_some())
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if is_executable(path) { Some(path) } else { None }
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
