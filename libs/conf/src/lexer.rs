//! Scanner for request text.
//!
//! Recognized lexemes:
//! - punctuation `[ ] @ , =`
//! - identifiers (`route`, `all`, `get`, ... are ordinary identifiers here)
//! - single-quoted strings, with `''` standing for one embedded quote
//! - unsigned decimal integers
//!
//! The first bad character or unterminated string aborts the scan.

use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::LexError;
use crate::token::{Position, Token, TokenKind};

pub struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
    pos: Position,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            pos: Position::START,
        }
    }

    /// Scan the whole input. The returned vector always ends with an
    /// [`TokenKind::Eof`] token.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace();

        let start = self.pos;
        let Some(c) = self.peek_char() else {
            return Ok(Token::new(TokenKind::Eof, "", start));
        };

        let kind = match c {
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '@' => TokenKind::At,
            ',' => TokenKind::Comma,
            '=' => TokenKind::Equals,
            '\'' => return self.scan_string(start),
            c if c.is_ascii_digit() => return self.scan_integer(start),
            c if c.is_ascii_alphabetic() || c == '_' => return Ok(self.scan_identifier(start)),
            ch => return Err(LexError::UnexpectedChar { pos: start, ch }),
        };

        self.advance();
        Ok(Token::new(kind, &self.source[start.offset..self.pos.offset], start))
    }

    fn scan_identifier(&mut self, start: Position) -> Token {
        while let Some(c) = self.peek_char() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }
        Token::new(
            TokenKind::Ident,
            &self.source[start.offset..self.pos.offset],
            start,
        )
    }

    fn scan_integer(&mut self, start: Position) -> Result<Token, LexError> {
        while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        let text = &self.source[start.offset..self.pos.offset];
        if text.parse::<u64>().is_err() {
            return Err(LexError::IntegerOverflow {
                pos: start,
                text: text.to_string(),
            });
        }
        Ok(Token::new(TokenKind::Int, text, start))
    }

    fn scan_string(&mut self, start: Position) -> Result<Token, LexError> {
        // Opening quote.
        self.advance();

        let mut value = String::new();
        loop {
            match self.advance() {
                None => return Err(LexError::UnterminatedString { pos: start }),
                Some('\'') => {
                    if self.peek_char() == Some('\'') {
                        self.advance();
                        value.push('\'');
                    } else {
                        return Ok(Token::new(TokenKind::Str, value, start));
                    }
                }
                Some(c) => value.push(c),
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek_char(), Some(c) if c.is_ascii_whitespace()) {
            self.advance();
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn advance(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        self.pos.offset += c.len_utf8();
        if c == '\n' {
            self.pos.line += 1;
            self.pos.column = 1;
        } else {
            self.pos.column += 1;
        }
        Some(c)
    }
}

/// Convenience wrapper around [`Lexer::tokenize`].
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_punctuation_and_words() {
        assert_eq!(
            kinds("[route 'x' @ 5 [get]]"),
            vec![
                TokenKind::LBracket,
                TokenKind::Ident,
                TokenKind::Str,
                TokenKind::At,
                TokenKind::Int,
                TokenKind::LBracket,
                TokenKind::Ident,
                TokenKind::RBracket,
                TokenKind::RBracket,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_empty_input_is_just_eof() {
        let tokens = tokenize("  \n\t ").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Eof);
        assert_eq!(tokens[0].pos.line, 2);
    }

    #[test]
    fn test_doubled_quote_decodes_to_one() {
        let tokens = tokenize(r#"'x'',"'"#).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Str);
        assert_eq!(tokens[0].text, r#"x',""#);
    }

    #[test]
    fn test_empty_string_literal() {
        let tokens = tokenize("''").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Str);
        assert_eq!(tokens[0].text, "");
    }

    #[test]
    fn test_positions_track_lines_and_columns() {
        let tokens = tokenize("[route\n  all]").unwrap();
        assert_eq!(tokens[1].pos, Position { offset: 1, line: 1, column: 2 });
        assert_eq!(tokens[2].pos, Position { offset: 9, line: 2, column: 3 });
        assert_eq!(tokens[2].text, "all");
    }

    #[test]
    fn test_camel_case_identifier() {
        let tokens = tokenize("dbnameRewritten=").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Ident);
        assert_eq!(tokens[0].text, "dbnameRewritten");
        assert_eq!(tokens[1].kind, TokenKind::Equals);
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("[route 'bar @ 137 [delete]").unwrap_err();
        assert_eq!(
            err,
            LexError::UnterminatedString {
                pos: Position { offset: 7, line: 1, column: 8 }
            }
        );
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("[route all; [get]]").unwrap_err();
        assert!(matches!(err, LexError::UnexpectedChar { ch: ';', .. }));
        assert_eq!(err.pos().column, 11);
    }

    #[test]
    fn test_double_quotes_are_not_strings() {
        assert!(matches!(
            tokenize(r#""bar""#),
            Err(LexError::UnexpectedChar { ch: '"', .. })
        ));
    }

    #[test]
    fn test_integer_overflow() {
        let err = tokenize("99999999999999999999999").unwrap_err();
        assert!(matches!(err, LexError::IntegerOverflow { .. }));
    }

    #[test]
    fn test_max_integer() {
        let tokens = tokenize("18446744073709551615").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Int);
    }
}
