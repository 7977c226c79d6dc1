use minishell::{Environment, ExecResult, Shell};

/// A shell with an empty environment apart from the test process's `PATH`.
pub fn shell() -> Shell {
    let mut env = Environment::new();
    if let Ok(path) = std::env::var("PATH") {
        env.set("PATH", path);
    }
    Shell::new(env)
}

pub struct Outcome {
    pub result: ExecResult,
    pub stdout: String,
    pub stderr: String,
}

/// Execute `line` with an empty standard input, capturing both sinks.
pub fn run(shell: &mut Shell, line: &str) -> Outcome {
    let mut stdin = std::io::empty();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let result = shell.execute_line_with_input(line, &mut stdin, &mut stdout, &mut stderr);
    Outcome {
        result,
        stdout: String::from_utf8(stdout).expect("utf8 stdout"),
        stderr: String::from_utf8(stderr).expect("utf8 stderr"),
    }
}
