/// Streaming lexer for Alto source text.
///
/// The [`Lexer`] implements [`Iterator`] over [`Token`]s, tracking byte
/// offset, row, and column for every token it produces. The stream is
/// finite and always ends with a single [`TokenKind::End`] sentinel.
///
/// # Syntax handled here
///
/// | Form              | Notes                                        |
/// |-------------------|----------------------------------------------|
/// | `#!…` first line  | Skipped (interpreter line)                   |
/// | `// …`            | Line comment, runs to end of row             |
/// | `'…'` / `"…"`     | Strings with `\n \r \" \' \\` escapes        |
/// | `...`             | The only three-character punctuation         |
///
/// Rows split on `\n`, `\r\n`, or a lone `\r`. An unrecognized character
/// fails with [`LexError`] carrying its row and column.
use std::rc::Rc;

use thiserror::Error;

use crate::span::{Pos, Span};
use crate::token::{Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LexError {
    #[error("unrecognized character `{character}` at {row}:{column}")]
    UnrecognizedCharacter {
        character: char,
        row: usize,
        column: usize,
    },
    #[error("unterminated string literal starting at {row}:{column}")]
    UnterminatedString { row: usize, column: usize },
}

/// Two-character operators, longest-match after `...`.
const PUNCT_TWO: &[&str] = &[
    "==", "!=", "<=", ">=", "&&", "||", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "=>",
];

fn is_punct_single(c: char) -> bool {
    matches!(
        c,
        '+' | '-'
            | '*'
            | '/'
            | '%'
            | '<'
            | '>'
            | '='
            | '!'
            | '&'
            | '|'
            | '^'
            | '('
            | ')'
            | '['
            | ']'
            | '{'
            | '}'
            | ','
            | '.'
            | ':'
            | ';'
            | '?'
    )
}

fn is_word_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_word_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub struct Lexer {
    chars: Vec<char>,
    /// Source rows, shared into every token for error context.
    lines: Vec<Rc<str>>,
    pos: usize,
    offset: usize,
    row: usize,
    column: usize,
    prev_was_cr: bool,
    finished: bool,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        let lines = split_rows(source);
        let mut lexer = Self {
            chars: source.chars().collect(),
            lines,
            pos: 0,
            offset: 0,
            row: 1,
            column: 1,
            prev_was_cr: false,
            finished: false,
        };
        // A `#!` interpreter line is not part of the program.
        if source.starts_with("#!") {
            while let Some(c) = lexer.peek() {
                if c == '\n' || c == '\r' {
                    break;
                }
                lexer.advance();
            }
        }
        lexer
    }

    /// Lex a whole source text into a token vector ending in `End`.
    pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
        Self::new(source).collect()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_ahead(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).copied()
    }

    fn current_pos(&self) -> Pos {
        Pos::new(self.offset, self.row, self.column)
    }

    fn line_text(&self, row: usize) -> Rc<str> {
        self.lines
            .get(row - 1)
            .cloned()
            .unwrap_or_else(|| Rc::from(""))
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        self.offset += c.len_utf8();
        match c {
            '\r' => {
                self.row += 1;
                self.column = 1;
                self.prev_was_cr = true;
            }
            '\n' => {
                if !self.prev_was_cr {
                    self.row += 1;
                    self.column = 1;
                }
                self.prev_was_cr = false;
            }
            _ => {
                self.column += 1;
                self.prev_was_cr = false;
            }
        }
        Some(c)
    }

    /// Skip whitespace and `//` comments. Returns false at end of input.
    fn skip_trivia(&mut self) -> bool {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_ahead(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' || c == '\r' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some(_) => return true,
                None => return false,
            }
        }
    }

    fn token(
        &self,
        kind: TokenKind,
        start: Pos,
        lexeme: impl Into<String>,
    ) -> Token {
        let span = Span::new(start, self.current_pos());
        Token::new(kind, span, lexeme, self.line_text(start.row))
    }

    fn lex_word(&mut self, start: Pos) -> Token {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if !is_word_continue(c) {
                break;
            }
            text.push(c);
            self.advance();
        }
        self.token(TokenKind::Word(text.clone()), start, text)
    }

    fn lex_number(&mut self, start: Pos) -> Token {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            text.push(c);
            self.advance();
        }
        // A fraction only when a digit follows the dot, so `1.x` stays a
        // member access on a number.
        if self.peek() == Some('.')
            && self.peek_ahead(1).is_some_and(|c| c.is_ascii_digit())
        {
            text.push('.');
            self.advance();
            while let Some(c) = self.peek() {
                if !c.is_ascii_digit() {
                    break;
                }
                text.push(c);
                self.advance();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let exp_digit_at = match self.peek_ahead(1) {
                Some('+') | Some('-') => 2,
                _ => 1,
            };
            if self
                .peek_ahead(exp_digit_at)
                .is_some_and(|c| c.is_ascii_digit())
            {
                for _ in 0..exp_digit_at {
                    text.push(self.advance().unwrap_or_default());
                }
                while let Some(c) = self.peek() {
                    if !c.is_ascii_digit() {
                        break;
                    }
                    text.push(c);
                    self.advance();
                }
            }
        }
        let value = text.parse::<f64>().unwrap_or(f64::NAN);
        self.token(TokenKind::Number(value), start, text)
    }

    fn lex_string(&mut self, start: Pos) -> Result<Token, LexError> {
        let quote = self.advance().unwrap_or_default();
        let mut decoded = String::new();
        let mut lexeme = String::new();
        lexeme.push(quote);
        loop {
            let Some(c) = self.advance() else {
                return Err(LexError::UnterminatedString {
                    row: start.row,
                    column: start.column,
                });
            };
            lexeme.push(c);
            if c == quote {
                break;
            }
            if c == '\\' {
                let Some(escaped) = self.advance() else {
                    return Err(LexError::UnterminatedString {
                        row: start.row,
                        column: start.column,
                    });
                };
                lexeme.push(escaped);
                decoded.push(match escaped {
                    'n' => '\n',
                    'r' => '\r',
                    '"' => '"',
                    '\'' => '\'',
                    '\\' => '\\',
                    other => other,
                });
            } else {
                decoded.push(c);
            }
        }
        Ok(self.token(TokenKind::Str(decoded), start, lexeme))
    }

    fn lex_punct(&mut self, start: Pos) -> Result<Token, LexError> {
        if self.peek() == Some('.')
            && self.peek_ahead(1) == Some('.')
            && self.peek_ahead(2) == Some('.')
        {
            self.advance();
            self.advance();
            self.advance();
            return Ok(self.token(
                TokenKind::Punct("...".to_string()),
                start,
                "...",
            ));
        }

        let first = self.peek().unwrap_or_default();
        if let Some(second) = self.peek_ahead(1) {
            let pair: String = [first, second].iter().collect();
            if PUNCT_TWO.contains(&pair.as_str()) {
                self.advance();
                self.advance();
                return Ok(self.token(
                    TokenKind::Punct(pair.clone()),
                    start,
                    pair,
                ));
            }
        }

        if is_punct_single(first) {
            self.advance();
            let text = first.to_string();
            return Ok(self.token(TokenKind::Punct(text.clone()), start, text));
        }

        Err(LexError::UnrecognizedCharacter {
            character: first,
            row: start.row,
            column: start.column,
        })
    }
}

impl Iterator for Lexer {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Result<Token, LexError>> {
        if self.finished {
            return None;
        }
        if !self.skip_trivia() {
            self.finished = true;
            let pos = self.current_pos();
            return Some(Ok(Token::new(
                TokenKind::End,
                Span::point(pos),
                "",
                self.line_text(pos.row),
            )));
        }

        let start = self.current_pos();
        let c = self.peek().unwrap_or_default();
        let token = if is_word_start(c) {
            Ok(self.lex_word(start))
        } else if c.is_ascii_digit() {
            Ok(self.lex_number(start))
        } else if c == '\'' || c == '"' {
            self.lex_string(start)
        } else {
            self.lex_punct(start)
        };
        if token.is_err() {
            self.finished = true;
        }
        Some(token)
    }
}

/// Split source text into rows on `\n`, `\r\n`, or a lone `\r`.
fn split_rows(source: &str) -> Vec<Rc<str>> {
    let mut rows = Vec::new();
    let mut current = String::new();
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\n' => rows.push(Rc::from(current.as_str())),
            '\r' => {
                rows.push(Rc::from(current.as_str()));
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            other => {
                current.push(other);
                continue;
            }
        }
        current.clear();
    }
    rows.push(Rc::from(current.as_str()));
    rows
}
