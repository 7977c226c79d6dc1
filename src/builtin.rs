use crate::command::{
    CommandFactory, ExecResult, ExecutableCommand, ExitCode, FAILURE, SIGNAL_BASE, SUCCESS,
    Streams, USAGE_ERROR,
};
use crate::env::Environment;
use crate::interpreter::Factory;
use anyhow::{Context, Result};
use argh::{EarlyExit, FromArgs};
use regex::RegexBuilder;
use std::env;
use std::fmt;
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::PathBuf;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in the process that dispatches them: the interpreter itself for a one-stage line,
/// or the forked child of a pipeline stage.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "echo" or "cd".
    fn name() -> &'static str;

    /// Executes the command using provided IO streams and environment.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    /// An `Err` is reported on stderr and becomes exit code 1.
    fn execute(self, io: &mut Streams<'_>, env: &mut Environment) -> Result<ExecResult>;
}

/// Exit code of a builtin whose reader went away, as if killed by SIGPIPE.
const BROKEN_PIPE: ExitCode = SIGNAL_BASE + nix::libc::SIGPIPE;

fn is_broken_pipe(e: &anyhow::Error) -> bool {
    e.chain()
        .filter_map(|cause| cause.downcast_ref::<io::Error>())
        .any(|cause| cause.kind() == io::ErrorKind::BrokenPipe)
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(self: Box<Self>, io: &mut Streams<'_>, env: &mut Environment) -> ExecResult {
        match <T as BuiltinCommand>::execute(*self, io, env) {
            Ok(result) => result,
            // SIGPIPE is ignored in this process; end quietly like a program killed by it.
            Err(e) if is_broken_pipe(&e) => ExecResult::new(BROKEN_PIPE),
            Err(e) => {
                let _ = writeln!(io.stderr, "{e:#}");
                ExecResult::new(FAILURE)
            }
        }
    }
}

/// Output of `--help` or of a failed argument parse.
struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(self: Box<Self>, io: &mut Streams<'_>, _env: &mut Environment) -> ExecResult {
        if self.is_error {
            let _ = writeln!(io.stderr, "{}", self.output.trim_end());
            ExecResult::new(USAGE_ERROR)
        } else {
            let _ = writeln!(io.stdout, "{}", self.output.trim_end());
            ExecResult::success()
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(
        &self,
        _env: &Environment,
        name: &str,
        args: &[&str],
    ) -> Option<Box<dyn ExecutableCommand>> {
        if name == T::name() {
            Some(match T::from_args(&[name], args) {
                Ok(cmd) => Box::new(cmd),
                Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                    output,
                    is_error: status.is_err(),
                }),
            })
        } else {
            None
        }
    }
}

#[derive(FromArgs)]
/// print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(self, io: &mut Streams<'_>, _env: &mut Environment) -> Result<ExecResult> {
        let cwd = env::current_dir().context("pwd")?;
        writeln!(io.stdout, "{}", cwd.display())?;
        Ok(ExecResult::success())
    }
}

#[derive(FromArgs)]
/// change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory. Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, _io: &mut Streams<'_>, env: &mut Environment) -> Result<ExecResult> {
        let target = match &self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => match env.get("HOME") {
                Some(home) => PathBuf::from(home),
                None => anyhow::bail!("cd: no target and HOME not set"),
            },
        };

        let old_dir = env::current_dir().context("cd: can't read current directory")?;
        let new_dir = if target.is_absolute() {
            target
        } else {
            old_dir.join(target)
        };

        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("cd: {}", new_dir.display()))?;

        env::set_current_dir(&canonical)
            .with_context(|| format!("cd: can't chdir to {}", canonical.display()))?;
        env.set("OLDPWD", old_dir.to_string_lossy());
        env.set("PWD", canonical.to_string_lossy());
        Ok(ExecResult::success())
    }
}

#[derive(FromArgs)]
/// ask the interpreter to terminate.
pub struct Exit {
    #[argh(positional)]
    /// exit status, 0 when omitted
    pub code: Option<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, io: &mut Streams<'_>, _env: &mut Environment) -> Result<ExecResult> {
        let Some(code) = self.code else {
            return Ok(ExecResult::exit(SUCCESS));
        };
        match code.parse::<i32>() {
            Ok(n) => Ok(ExecResult::exit(n & 0xff)),
            Err(_) => {
                writeln!(io.stderr, "exit: {code}: numeric argument required")?;
                Ok(ExecResult::new(USAGE_ERROR))
            }
        }
    }
}

#[derive(FromArgs)]
/// write the arguments to standard output, separated by spaces.
/// by default, a trailing newline is printed.
pub struct Echo {
    #[argh(switch, short = 'n')]
    /// do not output the trailing newline.
    pub no_newline: bool,

    #[argh(positional, greedy)]
    /// values to print as-is, separated by spaces.
    pub args: Vec<String>,
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    fn execute(self, io: &mut Streams<'_>, _env: &mut Environment) -> Result<ExecResult> {
        let s = self.args.join(" ");
        if self.no_newline {
            write!(io.stdout, "{}", s)?;
        } else {
            writeln!(io.stdout, "{}", s)?;
        }
        Ok(ExecResult::success())
    }
}

/// Line, word and byte counts of one input.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counts {
    lines: usize,
    words: usize,
    bytes: usize,
}

impl Counts {
    fn of(data: &[u8]) -> Self {
        Counts {
            lines: data.iter().filter(|&&b| b == b'\n').count(),
            words: data
                .split(u8::is_ascii_whitespace)
                .filter(|w| !w.is_empty())
                .count(),
            bytes: data.len(),
        }
    }

    fn add(&mut self, other: Counts) {
        self.lines += other.lines;
        self.words += other.words;
        self.bytes += other.bytes;
    }
}

impl fmt::Display for Counts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lines, self.words, self.bytes)
    }
}

#[derive(FromArgs)]
/// count lines, words and bytes
pub struct WC {
    #[argh(positional, greedy)]
    /// files to count. If none provided, reads from stdin.
    pub files: Vec<String>,
}

impl BuiltinCommand for WC {
    fn name() -> &'static str {
        "wc"
    }

    fn execute(self, io: &mut Streams<'_>, _env: &mut Environment) -> Result<ExecResult> {
        if self.files.is_empty() {
            let mut buf = Vec::new();
            io.stdin.read_to_end(&mut buf).context("wc: stdin")?;
            writeln!(io.stdout, "{}", Counts::of(&buf))?;
            return Ok(ExecResult::success());
        }

        let show_names = self.files.len() > 1;
        let mut total = Counts::default();
        let mut exit_code = SUCCESS;
        for fname in &self.files {
            match fs::read(fname) {
                Ok(data) => {
                    let counts = Counts::of(&data);
                    total.add(counts);
                    if show_names {
                        writeln!(io.stdout, "{} {}", counts, fname)?;
                    } else {
                        writeln!(io.stdout, "{}", counts)?;
                    }
                }
                Err(e) => {
                    writeln!(io.stderr, "wc: {}: {}", fname, e)?;
                    exit_code = FAILURE;
                }
            }
        }
        if show_names {
            writeln!(io.stdout, "{} total", total)?;
        }
        Ok(ExecResult::new(exit_code))
    }
}

#[derive(FromArgs)]
/// print file(s) to stdout
pub struct Cat {
    #[argh(positional, greedy)]
    /// files to print. If none provided, copies stdin.
    pub files: Vec<String>,
}

impl BuiltinCommand for Cat {
    fn name() -> &'static str {
        "cat"
    }

    fn execute(self, io: &mut Streams<'_>, _env: &mut Environment) -> Result<ExecResult> {
        if self.files.is_empty() {
            std::io::copy(io.stdin, io.stdout).context("cat: stdin")?;
            return Ok(ExecResult::success());
        }

        let mut exit_code = SUCCESS;
        for fname in &self.files {
            match fs::File::open(fname) {
                Ok(mut f) => {
                    std::io::copy(&mut f, io.stdout)
                        .with_context(|| format!("cat: {}", fname))?;
                }
                Err(e) => {
                    writeln!(io.stderr, "cat: {}: {}", fname, e)?;
                    exit_code = FAILURE;
                }
            }
        }
        Ok(ExecResult::new(exit_code))
    }
}

#[derive(FromArgs)]
/// print lines matching a pattern
pub struct Grep {
    #[argh(positional)]
    /// the pattern to search for (a regular expression)
    pub pattern: String,

    #[argh(positional, greedy)]
    /// files to search. If none provided, reads from stdin.
    pub files: Vec<String>,

    #[argh(switch, short = 'w')]
    /// match only whole words (using non-word characters as boundaries)
    pub word_regexp: bool,

    #[argh(switch, short = 'i')]
    /// ignore case distinctions
    pub ignore_case: bool,

    #[argh(option, short = 'A', default = "0")]
    /// print NUM lines of trailing context after matching lines
    pub after_context: usize,
}

impl Grep {
    /// Print the matching lines of one source; returns whether anything matched.
    fn process_source<R: Read + ?Sized, W: Write + ?Sized>(
        &self,
        reader: &mut R,
        stdout: &mut W,
        file_name: Option<&str>,
        re: &regex::Regex,
    ) -> Result<bool> {
        let reader = BufReader::new(reader);

        let mut lines = Vec::new();
        let mut match_indices = Vec::new();
        for (line_num, line) in reader.split(b'\n').enumerate() {
            let line = String::from_utf8_lossy(&line?).into_owned();
            if re.is_match(&line) {
                match_indices.push(line_num);
            }
            lines.push(line);
        }

        let total_lines = lines.len();
        let mut to_print = vec![false; total_lines];
        for &match_line in &match_indices {
            let end_print = (match_line + self.after_context + 1).min(total_lines);
            for flag in &mut to_print[match_line..end_print] {
                *flag = true;
            }
        }

        let prefix = file_name
            .map(|name| format!("{}:", name))
            .unwrap_or_default();
        let mut last_printed_index: Option<usize> = None;

        for (i, line) in lines.iter().enumerate() {
            if !to_print[i] {
                continue;
            }
            if self.after_context > 0 && last_printed_index.is_some_and(|last| i > last + 1) {
                stdout.write_all(b"--\n")?;
            }
            writeln!(stdout, "{}{}", prefix, line)?;
            last_printed_index = Some(i);
        }

        Ok(!match_indices.is_empty())
    }
}

impl BuiltinCommand for Grep {
    fn name() -> &'static str {
        "grep"
    }

    fn execute(self, io: &mut Streams<'_>, _env: &mut Environment) -> Result<ExecResult> {
        let pattern = if self.word_regexp {
            format!(r"\b({})\b", self.pattern)
        } else {
            self.pattern.clone()
        };

        let re = match RegexBuilder::new(&pattern)
            .case_insensitive(self.ignore_case)
            .build()
        {
            Ok(re) => re,
            Err(e) => {
                writeln!(io.stderr, "grep: invalid pattern: {}", e)?;
                return Ok(ExecResult::new(USAGE_ERROR));
            }
        };

        if self.files.is_empty() {
            let matched = self
                .process_source(io.stdin, io.stdout, None, &re)
                .context("grep: stdin")?;
            return Ok(ExecResult::new(if matched { SUCCESS } else { FAILURE }));
        }

        let show_names = self.files.len() > 1;
        let mut matched_any = false;
        let mut had_error = false;
        for file_name in &self.files {
            let result = fs::File::open(file_name).map_err(anyhow::Error::from).and_then(|mut f| {
                self.process_source(&mut f, io.stdout, show_names.then_some(file_name.as_str()), &re)
            });
            match result {
                Ok(matched) => matched_any |= matched,
                Err(e) => {
                    writeln!(io.stderr, "grep: {}: {}", file_name, e)?;
                    had_error = true;
                }
            }
        }

        let exit_code = match (had_error, matched_any) {
            (true, _) => USAGE_ERROR,
            (false, true) => SUCCESS,
            (false, false) => FAILURE,
        };
        Ok(ExecResult::new(exit_code))
    }
}
