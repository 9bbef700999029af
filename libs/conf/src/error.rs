//! Error types for lexing, parsing and semantic analysis.
//!
//! Every error carries the [`Position`] it is blamed on.

use std::fmt;

use thiserror::Error;

use crate::token::{Position, TokenKind};

/// Fatal scanner failure. Scanning stops at the first one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("{pos}: unexpected character {ch:?}")]
    UnexpectedChar { pos: Position, ch: char },

    #[error("{pos}: unterminated string literal")]
    UnterminatedString { pos: Position },

    #[error("{pos}: integer literal out of range: {text}")]
    IntegerOverflow { pos: Position, text: String },
}

impl LexError {
    pub fn pos(&self) -> Position {
        match self {
            LexError::UnexpectedChar { pos, .. }
            | LexError::UnterminatedString { pos }
            | LexError::IntegerOverflow { pos, .. } => *pos,
        }
    }
}

/// Something the parser would have accepted at the point of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    Token(TokenKind),
    Keyword(&'static str),
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expected::Token(kind) => f.write_str(kind.describe()),
            Expected::Keyword(word) => write!(f, "'{}'", word),
        }
    }
}

/// Renders an expected set as `a`, `a or b`, or `one of a, b, c`.
pub(crate) struct ExpectedList<'a>(pub &'a [Expected]);

impl fmt::Display for ExpectedList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            [] => f.write_str("nothing"),
            [one] => write!(f, "{}", one),
            [a, b] => write!(f, "{} or {}", a, b),
            many => {
                f.write_str("one of ")?;
                for (i, e) in many.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                Ok(())
            }
        }
    }
}

/// Failure to turn request text into a syntax tree.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("{pos}: expected {}, got {found}", ExpectedList(.expected))]
    Syntax {
        pos: Position,
        found: String,
        expected: Vec<Expected>,
    },

    #[error("{pos}: unknown property '{key}': expected 'addr', 'lock', 'dbnameIn' or 'dbnameRewritten'")]
    UnknownProperty { pos: Position, key: String },

    #[error("{pos}: duplicate property '{key}'")]
    DuplicateProperty { pos: Position, key: String },
}

impl ParseError {
    pub fn pos(&self) -> Position {
        match self {
            ParseError::Lex(e) => e.pos(),
            ParseError::Syntax { pos, .. }
            | ParseError::UnknownProperty { pos, .. }
            | ParseError::DuplicateProperty { pos, .. } => *pos,
        }
    }

    /// Returns true if the scanner, not the grammar, rejected the input.
    pub fn is_lexical(&self) -> bool {
        matches!(self, ParseError::Lex(_))
    }
}

/// A well-formed request whose target is not legal for its action.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnalyzeError {
    #[error("{pos}: {action} cannot target {target}: {reason}")]
    BadTarget {
        pos: Position,
        action: &'static str,
        target: &'static str,
        reason: &'static str,
    },
}

impl AnalyzeError {
    pub fn pos(&self) -> Position {
        match self {
            AnalyzeError::BadTarget { pos, .. } => *pos,
        }
    }
}

/// Any failure of the text-to-directive pipeline.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
}

impl ConfError {
    pub fn pos(&self) -> Position {
        match self {
            ConfError::Parse(e) => e.pos(),
            ConfError::Analyze(e) => e.pos(),
        }
    }

    /// Stable short name of the failing stage: `lex`, `syntax` or `target`.
    pub fn kind(&self) -> &'static str {
        match self {
            ConfError::Parse(ParseError::Lex(_)) => "lex",
            ConfError::Parse(_) => "syntax",
            ConfError::Analyze(_) => "target",
        }
    }
}
