//! Descriptor and process primitives shared by the pipeline executor and the
//! external-program launcher.
//!
//! Every descriptor is held in an [`OwnedFd`], so it is closed exactly once when its
//! owner goes out of scope, on success and on every error path alike.

use crate::command::{COMMAND_NOT_FOUND, ExitCode, Output, SIGNAL_BASE};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{Pid, dup2, pipe2};
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsFd, OwnedFd, RawFd};

const IO_BUFFER_SIZE: usize = 4096;

/// Both ends of an OS pipe. Close-on-exec is set on both; `dup2` clears it on the copy.
pub(crate) struct Pipe {
    pub(crate) read: OwnedFd,
    pub(crate) write: OwnedFd,
}

impl Pipe {
    pub(crate) fn open() -> nix::Result<Self> {
        let (read, write) = retry(|| pipe2(OFlag::O_CLOEXEC))?;
        Ok(Self { read, write })
    }
}

/// Repeat `f` while it fails with `EINTR`.
pub(crate) fn retry<T>(mut f: impl FnMut() -> nix::Result<T>) -> nix::Result<T> {
    loop {
        match f() {
            Err(Errno::EINTR) => {}
            result => return result,
        }
    }
}

/// Make `target` (0, 1 or 2) refer to the same file as `fd`.
pub(crate) fn redirect(fd: RawFd, target: RawFd) -> nix::Result<()> {
    if fd != target {
        retry(|| dup2(fd, target))?;
    }
    Ok(())
}

/// Input for children whose caller has no real stdin descriptor.
pub(crate) fn null_input() -> io::Result<OwnedFd> {
    Ok(File::open("/dev/null")?.into())
}

/// Map a termination status to a shell exit code.
pub(crate) fn exit_code_of(status: WaitStatus) -> ExitCode {
    match status {
        WaitStatus::Exited(_, code) => code,
        WaitStatus::Signaled(_, signal, _) => SIGNAL_BASE + signal as i32,
        _ => COMMAND_NOT_FOUND,
    }
}

/// Block until `pid` terminates and return its exit code.
pub(crate) fn wait_child(pid: Pid) -> nix::Result<ExitCode> {
    retry(|| waitpid(pid, None)).map(exit_code_of)
}

/// Kill and reap children of an aborted launch.
pub(crate) fn kill_and_reap(children: &[Pid]) {
    for &pid in children {
        let _ = kill(pid, Signal::SIGKILL);
        if let Err(e) = retry(|| waitpid(pid, None)) {
            tracing::warn!(%pid, error = %e, "failed to reap aborted child");
        }
    }
}

/// Terminate the current (forked) process immediately with `code`.
///
/// Skips atexit handlers and the standard library's stdout cleanup, both of which
/// belong to the parent process.
pub(crate) fn exit_child(code: ExitCode) -> ! {
    unsafe { nix::libc::_exit(code) }
}

/// The read end of a pipe paired with the sink that receives its data.
pub(crate) struct Collector<'a> {
    source: Option<File>,
    sink: &'a mut dyn Output,
}

impl<'a> Collector<'a> {
    pub(crate) fn new(source: OwnedFd, sink: &'a mut dyn Output) -> Self {
        Self {
            source: Some(File::from(source)),
            sink,
        }
    }

    fn is_open(&self) -> bool {
        self.source.is_some()
    }

    /// Move one chunk from the pipe to the sink; closes the pipe at end-of-data.
    fn pump(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let Some(source) = self.source.as_mut() else {
            return Ok(());
        };
        match source.read(buf) {
            Ok(0) => self.source = None,
            Ok(n) => self.sink.write_all(&buf[..n])?,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

/// Read every collector until all writers have closed their ends.
///
/// All pipes are polled together, so a writer blocked on one full pipe cannot stall
/// reading from another. On error the remaining read ends are closed when the
/// collectors are dropped.
pub(crate) fn drain(collectors: &mut [Collector<'_>]) -> io::Result<()> {
    let mut buf = [0u8; IO_BUFFER_SIZE];
    while collectors.iter().any(Collector::is_open) {
        let ready: Vec<bool> = {
            let mut fds: Vec<PollFd<'_>> = collectors
                .iter()
                .filter_map(|c| c.source.as_ref())
                .map(|f| PollFd::new(f.as_fd(), PollFlags::POLLIN))
                .collect();
            retry(|| poll(&mut fds, PollTimeout::NONE))?;
            fds.iter()
                .map(|fd| fd.revents().is_some_and(|r| !r.is_empty()))
                .collect()
        };

        let mut ready = ready.into_iter();
        for collector in collectors.iter_mut().filter(|c| c.is_open()) {
            if ready.next() == Some(true) {
                collector.pump(&mut buf)?;
            }
        }
    }
    Ok(())
}
