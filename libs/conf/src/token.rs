//! Token and source position types.

use std::fmt;

use serde::Serialize;

/// A location in request text.
///
/// `line` and `column` are 1-based; `offset` is the byte offset from the
/// start of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Position {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl Position {
    /// Position of the first byte of the input.
    pub const START: Position = Position {
        offset: 0,
        line: 1,
        column: 1,
    };
}

impl Default for Position {
    fn default() -> Self {
        Self::START
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Lexical category of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    LBracket,
    RBracket,
    Ident,
    Str,
    Int,
    At,
    Comma,
    Equals,
    Eof,
}

impl TokenKind {
    /// Short human-readable description used in diagnostics.
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::Ident => "identifier",
            TokenKind::Str => "string literal",
            TokenKind::Int => "integer",
            TokenKind::At => "'@'",
            TokenKind::Comma => "','",
            TokenKind::Equals => "'='",
            TokenKind::Eof => "end of input",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// A single lexeme.
///
/// `text` holds the decoded value: identifier and integer text verbatim,
/// string literals with the surrounding quotes removed and doubled quotes
/// collapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub pos: Position,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, pos: Position) -> Self {
        Self {
            kind,
            text: text.into(),
            pos,
        }
    }

    /// True if this is the identifier `word`. Keywords are plain
    /// identifiers at the lexical level.
    pub fn is_keyword(&self, word: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == word
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Ident | TokenKind::Int => write!(f, "'{}'", self.text),
            TokenKind::Str => write!(f, "string '{}'", self.text.replace('\'', "''")),
            kind => f.write_str(kind.describe()),
        }
    }
}
