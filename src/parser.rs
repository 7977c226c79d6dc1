//! Grouping of lexed tokens into pipeline stages.

use crate::env::Environment;
use crate::lexer::{self, LexError, Token};
use thiserror::Error;

/// The resolved argument vector of one command: `argv[0]` is the program or builtin.
///
/// A stage is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    argv: Vec<String>,
}

impl Stage {
    /// Returns `None` for an empty argument list.
    pub fn new(argv: Vec<String>) -> Option<Self> {
        if argv.is_empty() {
            None
        } else {
            Some(Self { argv })
        }
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub fn into_argv(self) -> Vec<String> {
        self.argv
    }
}

/// Stages connected by pipes, in execution order.
///
/// Empty only when the source line had no words at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Errors that can occur while grouping tokens into stages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The line starts with `|`, or consists only of pipes.
    #[error("empty command in pipeline")]
    LeadingPipe,
    /// Two pipes with nothing between them.
    #[error("empty command in pipeline")]
    EmptyStage,
    /// The line ends with `|`.
    #[error("empty command in pipeline")]
    TrailingPipe,
}

/// Any error that stops a line before execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error("syntax error: {0}")]
    Lex(#[from] LexError),
    #[error("syntax error: {0}")]
    Parse(#[from] ParseError),
}

struct StageBuilder {
    stages: Vec<Stage>,
    current: Vec<String>,
    saw_word: bool,
}

impl StageBuilder {
    fn new() -> Self {
        StageBuilder {
            stages: Vec::new(),
            current: Vec::new(),
            saw_word: false,
        }
    }

    fn push(&mut self, token: Token) -> Result<(), ParseError> {
        match token {
            Token::Word(text) => {
                self.saw_word = true;
                self.current.push(text);
            }
            Token::Pipe if !self.saw_word => return Err(ParseError::LeadingPipe),
            Token::Pipe => {
                let stage = Stage::new(std::mem::take(&mut self.current))
                    .ok_or(ParseError::EmptyStage)?;
                self.stages.push(stage);
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Pipeline, ParseError> {
        match Stage::new(std::mem::take(&mut self.current)) {
            Some(stage) => self.stages.push(stage),
            // words were seen, so the line ended right after a pipe
            None if self.saw_word => return Err(ParseError::TrailingPipe),
            None => {}
        }
        Ok(Pipeline {
            stages: self.stages,
        })
    }
}

/// Groups a token sequence into a [`Pipeline`].
///
/// A token sequence with no words yields an empty pipeline; a stage left empty by a
/// leading, doubled or trailing pipe is an error.
pub fn parse(tokens: Vec<Token>) -> Result<Pipeline, ParseError> {
    let mut builder = StageBuilder::new();
    for token in tokens {
        builder.push(token)?;
    }
    builder.finish()
}

/// Lexes and parses one input line.
pub fn parse_line(line: &str, env: &Environment) -> Result<Pipeline, SyntaxError> {
    let tokens = lexer::split_into_tokens(line, env)?;
    let pipeline = parse(tokens)?;
    tracing::debug!(stages = pipeline.len(), "parsed line");
    Ok(pipeline)
}
