use crate::command::{
    COMMAND_NOT_FOUND, CommandFactory, ExecResult, FAILURE, Input, Output, Streams, USAGE_ERROR,
};
use crate::env::{self, Environment};
use crate::executor::{self, StageRunner};
use crate::parser;

/// Factory allows creating instances of ExecutableCommand.
///
/// Only support commands defined in this crate — BuiltinCommand and ExternalCommand.
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

/// A line-oriented shell that executes pipelines of built-in and external commands.
///
/// The shell owns an [`Environment`] and a list of [`CommandFactory`] objects that
/// are queried, in order, to create a command by name. See [`Shell::new`] for the
/// factories included out of the box.
///
/// A line with a single stage runs in the shell's own process, so assignments and
/// `exit` are visible to the caller. Every stage of a longer pipeline runs in a child.
///
/// Example
/// ```
/// use minishell::{Environment, Shell};
/// let mut sh = Shell::new(Environment::new());
/// let mut out = Vec::new();
/// let mut err = Vec::new();
/// let result = sh.execute_line("echo hello world", &mut out, &mut err);
/// assert_eq!(result.exit_code(), 0);
/// assert_eq!(out, b"hello world\n");
/// ```
pub struct Shell {
    env: Environment,
    commands: Vec<Box<dyn CommandFactory>>,
}

impl Shell {
    /// Create a shell with the default commands:
    /// - built-ins: `echo`, `cat`, `wc`, `pwd`, `cd`, `exit`, `grep`
    /// - external command launcher
    pub fn new(env: Environment) -> Self {
        use crate::builtin::*;
        use crate::external::ExternalCommand;
        Self::with_commands(
            env,
            vec![
                Box::new(Factory::<Echo>::default()),
                Box::new(Factory::<Cat>::default()),
                Box::new(Factory::<WC>::default()),
                Box::new(Factory::<Pwd>::default()),
                Box::new(Factory::<Cd>::default()),
                Box::new(Factory::<Exit>::default()),
                Box::new(Factory::<Grep>::default()),
                Box::new(Factory::<ExternalCommand>::default()),
            ],
        )
    }

    /// Create a shell with a custom set of command factories.
    pub fn with_commands(env: Environment, commands: Vec<Box<dyn CommandFactory>>) -> Self {
        Self { env, commands }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    /// Execute one line, with builtins reading the process's standard input.
    ///
    /// Never fails: every error is reported on `err` and reflected in the exit code.
    /// An empty line does nothing and succeeds.
    pub fn execute_line(
        &mut self,
        line: &str,
        out: &mut dyn Output,
        err: &mut dyn Output,
    ) -> ExecResult {
        let mut stdin = std::io::stdin();
        self.execute_line_with_input(line, &mut stdin, out, err)
    }

    /// Execute one line reading from `input` instead of the process's standard input.
    pub fn execute_line_with_input(
        &mut self,
        line: &str,
        input: &mut dyn Input,
        out: &mut dyn Output,
        err: &mut dyn Output,
    ) -> ExecResult {
        let mut io = Streams::new(input, out, err);
        let pipeline = match parser::parse_line(line, &self.env) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                let _ = writeln!(io.stderr, "minishell: {e}");
                return ExecResult::new(USAGE_ERROR);
            }
        };
        let result = executor::execute(&pipeline, self, &mut io);
        io.flush();
        result
    }

    /// Apply a line made only of `NAME=value` words.
    ///
    /// Returns `None` when the line is not assignment-only. Names are all validated
    /// before any is applied, so a rejected line leaves the environment untouched.
    fn try_assignments(&mut self, argv: &[String], io: &mut Streams<'_>) -> Option<ExecResult> {
        let assignments = argv
            .iter()
            .map(|word| match word.split_once('=') {
                Some((name, value)) if !name.is_empty() => Some((name, value)),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;

        if let Some((name, _)) = assignments.iter().find(|(name, _)| !env::is_valid_name(name)) {
            let _ = writeln!(io.stderr, "minishell: {name}: not a valid identifier");
            return Some(ExecResult::new(FAILURE));
        }

        for (name, value) in assignments {
            self.env.set(name, value);
        }
        Some(ExecResult::success())
    }

    /// Run a builtin or external program; the assignment route is not considered.
    fn dispatch(&mut self, argv: &[String], io: &mut Streams<'_>) -> ExecResult {
        let Some((name, rest)) = argv.split_first() else {
            return ExecResult::success();
        };
        let args: Vec<&str> = rest.iter().map(String::as_str).collect();

        for factory in &self.commands {
            if let Some(cmd) = factory.try_create(&self.env, name, &args) {
                return cmd.execute(io, &mut self.env);
            }
        }

        let _ = writeln!(io.stderr, "minishell: {name}: command not found");
        ExecResult::new(COMMAND_NOT_FOUND)
    }
}

impl Default for Shell {
    /// A shell seeded with the variables of the current process.
    fn default() -> Self {
        Self::new(Environment::from_process_env())
    }
}

impl StageRunner for Shell {
    fn run_in_process(&mut self, argv: &[String], io: &mut Streams<'_>) -> ExecResult {
        if let Some(result) = self.try_assignments(argv, io) {
            return result;
        }
        self.dispatch(argv, io)
    }

    fn run_stage(&mut self, argv: &[String], io: &mut Streams<'_>) -> ExecResult {
        self.dispatch(argv, io)
    }
}
