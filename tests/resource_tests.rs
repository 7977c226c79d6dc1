//! Descriptor and child-process accounting around pipeline execution.

mod common;

use common::{run, shell};
use minishell::ExecResult;
use nix::errno::Errno;
use nix::fcntl::{FcntlArg, fcntl};
use nix::libc::rlim_t;
use nix::sys::resource::{Resource, getrlimit, setrlimit};
use nix::sys::wait::{WaitPidFlag, waitpid};
use nix::unistd::Pid;
use serial_test::serial;
use std::collections::BTreeSet;
use std::fs;
use std::os::fd::RawFd;

/// Descriptors currently open in this process.
fn open_fds() -> BTreeSet<RawFd> {
    let listed: Vec<RawFd> = fs::read_dir("/proc/self/fd")
        .expect("list /proc/self/fd")
        .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
        .collect();
    // The directory handle used for listing is closed by now.
    listed
        .into_iter()
        .filter(|&fd| fcntl(fd, FcntlArg::F_GETFD).is_ok())
        .collect()
}

/// The smallest descriptor limit that leaves exactly `free` descriptors available.
fn limit_leaving(free: usize) -> rlim_t {
    let open = open_fds();
    let mut available = 0;
    let mut fd: RawFd = 0;
    loop {
        if !open.contains(&fd) {
            if available == free {
                return fd as rlim_t;
            }
            available += 1;
        }
        fd += 1;
    }
}

/// Run `line` with the descriptor limit lowered so only `free` more can be opened.
fn run_with_free_fds(free: usize, line: &str) -> common::Outcome {
    let mut sh = shell();
    let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE).expect("getrlimit");
    setrlimit(Resource::RLIMIT_NOFILE, limit_leaving(free), hard).expect("lower limit");
    let out = run(&mut sh, line);
    setrlimit(Resource::RLIMIT_NOFILE, soft, hard).expect("restore limit");
    out
}

fn assert_no_children_left() {
    assert_eq!(waitpid(None::<Pid>, Some(WaitPidFlag::WNOHANG)), Err(Errno::ECHILD));
}

#[test]
#[serial]
fn no_descriptor_outlives_a_line() {
    let mut sh = shell();
    let before = open_fds();

    for _ in 0..5 {
        run(&mut sh, "echo 123 | cat | wc");
        run(&mut sh, "sh -c 'echo out; echo err >&2'");
        run(&mut sh, "echo x | nonexistent_program_xyz | cat");
        run(&mut sh, "nonexistent_program_xyz");
        run(&mut sh, "echo 'unterminated");
    }

    assert_eq!(open_fds(), before);
    assert_no_children_left();
}

#[test]
#[serial]
fn pipe_failure_between_stages_aborts_pipeline() {
    let before = open_fds();

    // Both collector pipes fit, the first inter-stage pipe does not.
    let out = run_with_free_fds(4, "echo a | cat");

    assert_eq!(out.result, ExecResult::new(127));
    assert!(!out.result.should_exit());
    assert!(out.stderr.starts_with("minishell: pipe: "), "{:?}", out.stderr);
    assert_eq!(out.stdout, "");
    assert_eq!(open_fds(), before);
    assert_no_children_left();
}

#[test]
#[serial]
fn abort_after_first_spawn_reaps_the_child() {
    let before = open_fds();

    // Room for the collectors and the first inter-stage pipe; after the first fork
    // only one descriptor is released, so the second inter-stage pipe fails.
    let out = run_with_free_fds(6, "echo a | cat | cat");

    assert_eq!(out.result, ExecResult::new(127));
    assert!(out.stderr.contains("minishell: pipe: "), "{:?}", out.stderr);
    assert_eq!(out.stdout, "");
    assert_eq!(open_fds(), before);
    assert_no_children_left();
}

#[test]
#[serial]
fn collector_failure_leaves_nothing_open() {
    let before = open_fds();

    // Only one of the two collector pipes can be created.
    let out = run_with_free_fds(3, "echo a | cat");

    assert_eq!(out.result, ExecResult::new(127));
    assert!(out.stderr.starts_with("minishell: pipe: "), "{:?}", out.stderr);
    assert_eq!(open_fds(), before);
    assert_no_children_left();
}
