//! Lexical analysis of a command line.
//!
//! Quote removal and `$NAME` expansion happen during the scan, so every word the
//! lexer emits is final text ready to become an argument.

use crate::env::Environment;
use thiserror::Error;

/// Represents a token resulting from lexical analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A word with quotes removed and variables already expanded.
    Word(String),
    /// The pipe operator, `|`.
    Pipe,
}

/// Errors that can occur during the lexical analysis process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    /// A closing quote (single or double) was not found.
    #[error("unterminated quote")]
    UnterminatedQuote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Normal,
    InSingleQuote,
    InDoubleQuote,
}

struct LexingFSM<'a> {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    buffer: String,
    env: &'a Environment,
}

impl<'a> LexingFSM<'a> {
    fn new(line: &str, env: &'a Environment) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Normal,
            buffer: String::new(),
            env,
        }
    }

    /// Runs the machine over the whole input.
    ///
    /// Fails if the input ends while a quote is still open; in that case no
    /// tokens are returned at all.
    fn make_tokens(&mut self) -> Result<Vec<Token>, LexError> {
        let mut out = Vec::new();

        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Normal => self.handle_normal(ch, &mut out),
                LexingState::InSingleQuote => self.handle_single_quote(ch),
                LexingState::InDoubleQuote => self.handle_double_quote(ch),
            }
        }

        if self.state != LexingState::Normal {
            return Err(LexError::UnterminatedQuote);
        }

        self.flush_word(&mut out);
        Ok(out)
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn handle_normal(&mut self, ch: char, out: &mut Vec<Token>) {
        match ch {
            '|' => {
                self.flush_word(out);
                out.push(Token::Pipe);
            }
            ' ' | '\t' => self.flush_word(out),
            '\'' => self.state = LexingState::InSingleQuote,
            '"' => self.state = LexingState::InDoubleQuote,
            '$' => self.expand_variable(),
            c => self.buffer.push(c),
        }
    }

    fn handle_single_quote(&mut self, ch: char) {
        match ch {
            '\'' => self.state = LexingState::Normal,
            c => self.buffer.push(c),
        }
    }

    fn handle_double_quote(&mut self, ch: char) {
        match ch {
            '"' => self.state = LexingState::Normal,
            '$' => self.expand_variable(),
            c => self.buffer.push(c),
        }
    }

    /// Handles a `$` that was just consumed.
    ///
    /// A name is a letter or underscore followed by letters, digits and underscores.
    /// Without a name the `$` stays literal. Unknown names expand to nothing, and the
    /// substituted value is never scanned again.
    fn expand_variable(&mut self) {
        match self.peek_char() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => {
                self.buffer.push('$');
                return;
            }
        }

        let mut name = String::new();
        while let Some(c) = self.peek_char() {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }
            name.push(c);
            self.pos += 1;
        }

        if let Some(value) = self.env.get(&name) {
            self.buffer.push_str(value);
        }
    }

    /// Emits the pending word, unless it is empty.
    fn flush_word(&mut self, out: &mut Vec<Token>) {
        if !self.buffer.is_empty() {
            out.push(Token::Word(std::mem::take(&mut self.buffer)));
        }
    }
}

/// The main entry point function to perform lexical analysis.
///
/// Splits `line` into words and pipe operators, removing quotes and expanding
/// variables from `env` on the way.
pub fn split_into_tokens(line: &str, env: &Environment) -> Result<Vec<Token>, LexError> {
    let mut lexer = LexingFSM::new(line, env);
    let tokens = lexer.make_tokens()?;
    tracing::trace!(?tokens, "lexed line");
    Ok(tokens)
}
