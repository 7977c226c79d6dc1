use crate::command::{Input, Output};
use std::fs::File;
use std::io::{Cursor, Read, Result as IoResult, Write};
use std::mem::ManuallyDrop;
use std::os::fd::{AsRawFd, FromRawFd, RawFd};

use nix::libc::{STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};

impl Input for std::io::Stdin {
    fn inheritable_fd(&self) -> Option<RawFd> {
        Some(STDIN_FILENO)
    }
}

impl Input for File {
    fn inheritable_fd(&self) -> Option<RawFd> {
        Some(self.as_raw_fd())
    }
}

/// In-memory input is only visible to builtins; external programs get `/dev/null`.
impl Input for std::io::Empty {}

impl Input for &[u8] {}

impl<T: AsRef<[u8]>> Input for Cursor<T> {}

impl Output for std::io::Stdout {
    fn inheritable_fd(&self) -> Option<RawFd> {
        Some(STDOUT_FILENO)
    }
}

impl Output for std::io::Stderr {
    fn inheritable_fd(&self) -> Option<RawFd> {
        Some(STDERR_FILENO)
    }
}

impl Output for File {
    fn inheritable_fd(&self) -> Option<RawFd> {
        Some(self.as_raw_fd())
    }
}

/// Captured in memory: children write into a pipe that the interpreter drains here.
impl Output for Vec<u8> {}

impl Output for std::io::Sink {}

/// Unbuffered, non-owning stream over a raw descriptor.
///
/// Used inside forked pipeline stages, where the standard descriptors have been
/// redirected and the process must not touch the locks behind `std::io::stdout()`.
pub(crate) struct FdStream {
    file: ManuallyDrop<File>,
}

impl FdStream {
    /// # Safety
    ///
    /// `fd` must stay open for as long as the stream is used. The stream never closes it.
    pub(crate) unsafe fn borrow_raw(fd: RawFd) -> Self {
        Self {
            file: ManuallyDrop::new(unsafe { File::from_raw_fd(fd) }),
        }
    }

    pub(crate) fn stdin() -> Self {
        unsafe { Self::borrow_raw(STDIN_FILENO) }
    }

    pub(crate) fn stdout() -> Self {
        unsafe { Self::borrow_raw(STDOUT_FILENO) }
    }

    pub(crate) fn stderr() -> Self {
        unsafe { Self::borrow_raw(STDERR_FILENO) }
    }
}

impl Read for FdStream {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        (&*self.file).read(buf)
    }
}

impl Write for FdStream {
    fn write(&mut self, data: &[u8]) -> IoResult<usize> {
        (&*self.file).write(data)
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

impl Input for FdStream {
    fn inheritable_fd(&self) -> Option<RawFd> {
        Some(self.file.as_raw_fd())
    }
}

impl Output for FdStream {
    fn inheritable_fd(&self) -> Option<RawFd> {
        Some(self.file.as_raw_fd())
    }
}
