mod common;

use common::{run, shell};
use minishell::ExecResult;
use serial_test::serial;

#[test]
#[serial]
fn echo_into_wc() {
    let mut sh = shell();
    let out = run(&mut sh, "echo 123 | wc");
    assert_eq!(out.result, ExecResult::success());
    assert!(out.stdout.contains("1 1"), "got {:?}", out.stdout);
    assert_eq!(out.stdout, "1 1 4\n");
}

#[test]
#[serial]
fn three_stage_pipeline() {
    let mut sh = shell();
    let out = run(&mut sh, "echo hello | cat | wc");
    assert_eq!(out.result, ExecResult::success());
    assert_eq!(out.stdout, "1 1 6\n");
}

#[test]
#[serial]
fn exit_in_pipeline_does_not_terminate() {
    let mut sh = shell();
    let out = run(&mut sh, "echo 1 | exit");
    assert!(!out.result.should_exit());
    assert_eq!(out.result.exit_code(), 0);

    let out = run(&mut sh, "exit 7 | echo still here");
    assert!(!out.result.should_exit());
    assert_eq!(out.stdout, "still here\n");
}

#[test]
#[serial]
fn exit_code_comes_from_last_stage() {
    let mut sh = shell();
    assert_eq!(run(&mut sh, "sh -c 'exit 3' | echo ok").result, ExecResult::success());
    assert_eq!(run(&mut sh, "echo ok | sh -c 'exit 5'").result, ExecResult::new(5));
}

#[test]
#[serial]
fn signal_on_last_stage() {
    let mut sh = shell();
    let out = run(&mut sh, "echo x | sh -c 'kill -9 $$'");
    assert_eq!(out.result, ExecResult::new(128 + 9));
}

#[test]
#[serial]
fn builtins_and_externals_mix() {
    let mut sh = shell();

    let out = run(&mut sh, "echo abc | tr a-z A-Z");
    assert_eq!(out.stdout, "ABC\n");

    let out = run(&mut sh, "printf 'one two\\nthree\\n' | wc");
    assert_eq!(out.stdout, "2 3 14\n");

    let out = run(&mut sh, "printf 'alpha\\nbeta\\ngamma\\n' | grep -i A$ | cat");
    assert_eq!(out.stdout, "alpha\nbeta\ngamma\n");
}

#[test]
#[serial]
fn stderr_of_every_stage_is_collected() {
    let mut sh = shell();
    let out = run(&mut sh, "sh -c 'echo first >&2' | sh -c 'cat; echo second >&2'");
    assert_eq!(out.stdout, "");
    let mut lines: Vec<&str> = out.stderr.lines().collect();
    lines.sort_unstable();
    assert_eq!(lines, vec!["first", "second"]);
}

#[test]
#[serial]
fn large_output_does_not_deadlock() {
    let mut sh = shell();
    let out = run(&mut sh, "sh -c 'yes | head -c 200000' | cat");
    assert_eq!(out.result, ExecResult::success());
    assert_eq!(out.stdout.len(), 200_000);

    let out = run(&mut sh, "sh -c 'yes | head -c 200000' | wc");
    assert_eq!(out.stdout, "100000 100000 200000\n");
}

#[test]
#[serial]
fn missing_program_inside_pipeline() {
    let mut sh = shell();
    let out = run(&mut sh, "echo x | nonexistent_program_xyz");
    assert_eq!(out.result, ExecResult::new(127));
    assert!(out.stderr.contains("command not found"));
}

#[test]
#[serial]
fn assignment_inside_pipeline_is_not_applied() {
    let mut sh = shell();
    let out = run(&mut sh, "A=1 | echo x");
    assert_eq!(out.stdout, "x\n");
    assert_eq!(sh.env().get("A"), None);
}

#[test]
#[serial]
fn cd_inside_pipeline_keeps_working_directory() {
    let before = std::env::current_dir().unwrap();
    let mut sh = shell();
    let out = run(&mut sh, "cd / | echo done");
    assert_eq!(out.stdout, "done\n");
    assert_eq!(std::env::current_dir().unwrap(), before);
}

#[test]
fn malformed_pipelines_are_syntax_errors() {
    let mut sh = shell();
    for line in ["| echo", "echo |", "echo 1 || wc", "|", "echo a | | wc"] {
        let out = run(&mut sh, line);
        assert_eq!(out.result, ExecResult::new(2), "line {line:?}");
        assert!(out.stdout.is_empty(), "line {line:?}");
        assert_eq!(
            out.stderr, "minishell: syntax error: empty command in pipeline\n",
            "line {line:?}"
        );
    }
}

#[test]
#[serial]
fn quoted_pipe_is_an_argument() {
    let mut sh = shell();
    let out = run(&mut sh, "echo 'a | b' \"c|d\"");
    assert_eq!(out.stdout, "a | b c|d\n");
}

#[test]
#[serial]
fn builtin_stage_ends_quietly_when_reader_exits() {
    let mut sh = shell();
    let out = run(&mut sh, "sh -c 'yes | head -c 1000000' | cat | head -c 10");
    assert_eq!(out.result, ExecResult::success());
    assert_eq!(out.stdout, "y\ny\ny\ny\ny\n");
    assert_eq!(out.stderr, "");
}
