//! Recursive-descent parser.
//!
//! Grammar:
//!
//! ```text
//! request    = '[' 'route' route-spec action ']'
//! route-spec = 'all' | target
//! target     = string [ '@' integer ]
//! action     = '[' ('get'|'delete') ']'
//!            | '[' ('patch'|'create') '[' prop-list ']' ']'
//! prop-list  = prop (',' prop)*
//! prop       = ident '=' string
//! ```
//!
//! Property keys are checked here rather than in semantic analysis:
//! property lists only occur in `create` and `patch`, and both accept the
//! same key set.

use crate::ast::{Action, Prop, PropKey, Props, Request, Spec};
use crate::error::{Expected, ParseError};
use crate::lexer::tokenize;
use crate::token::{Token, TokenKind};

const ACTION_KEYWORDS: [Expected; 4] = [
    Expected::Keyword("get"),
    Expected::Keyword("delete"),
    Expected::Keyword("patch"),
    Expected::Keyword("create"),
];

/// Parse exactly one request from `source`.
pub fn parse_request(source: &str) -> Result<Request, ParseError> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).parse()
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// `tokens` must end with an [`TokenKind::Eof`] token, as produced by
    /// the lexer.
    pub fn new(tokens: Vec<Token>) -> Self {
        debug_assert!(matches!(tokens.last(), Some(t) if t.kind == TokenKind::Eof));
        Self { tokens, pos: 0 }
    }

    pub fn parse(mut self) -> Result<Request, ParseError> {
        let request = self.parse_request()?;
        self.expect(TokenKind::Eof)?;
        Ok(request)
    }

    fn parse_request(&mut self) -> Result<Request, ParseError> {
        self.expect(TokenKind::LBracket)?;
        self.expect_keyword("route")?;
        let spec = self.parse_route_spec()?;
        let action = self.parse_action()?;
        self.expect(TokenKind::RBracket)?;
        Ok(Request { spec, action })
    }

    fn parse_route_spec(&mut self) -> Result<Spec, ParseError> {
        if self.current().is_keyword("all") {
            let token = self.take();
            return Ok(Spec::All { token });
        }

        if !self.check(TokenKind::Str) {
            return Err(self.error(&[Expected::Keyword("all"), Expected::Token(TokenKind::Str)]));
        }
        let name = self.take();

        if self.check(TokenKind::LBracket) {
            return Ok(Spec::One { name });
        }
        if !self.check(TokenKind::At) {
            return Err(self.error(&[
                Expected::Token(TokenKind::At),
                Expected::Token(TokenKind::LBracket),
            ]));
        }
        self.advance();

        let ocn_token = self.expect(TokenKind::Int)?;
        // The lexer only emits Int tokens that fit in a u64.
        let ocn = ocn_token.text.parse::<u64>().map_err(|_| ParseError::Syntax {
            pos: ocn_token.pos,
            found: ocn_token.to_string(),
            expected: vec![Expected::Token(TokenKind::Int)],
        })?;

        Ok(Spec::OneAtVersion {
            name,
            ocn,
            ocn_token,
        })
    }

    fn parse_action(&mut self) -> Result<Action, ParseError> {
        self.expect(TokenKind::LBracket)?;

        if !self.check(TokenKind::Ident) {
            return Err(self.error(&ACTION_KEYWORDS));
        }

        let keyword = self.current().text.clone();
        let action = match keyword.as_str() {
            "get" => Action::Get { token: self.take() },
            "delete" => Action::Delete { token: self.take() },
            "patch" => {
                let token = self.take();
                let props = self.parse_props()?;
                Action::Patch { token, props }
            }
            "create" => {
                let token = self.take();
                let props = self.parse_props()?;
                Action::Create { token, props }
            }
            _ => return Err(self.error(&ACTION_KEYWORDS)),
        };

        self.expect(TokenKind::RBracket)?;
        Ok(action)
    }

    fn parse_props(&mut self) -> Result<Props, ParseError> {
        self.expect(TokenKind::LBracket)?;

        let mut props = Props::new();
        loop {
            let prop = self.parse_prop()?;
            let key = prop
                .key
                .text
                .parse::<PropKey>()
                .map_err(|_| ParseError::UnknownProperty {
                    pos: prop.key.pos,
                    key: prop.key.text.clone(),
                })?;
            if props.contains_key(&key) {
                return Err(ParseError::DuplicateProperty {
                    pos: prop.key.pos,
                    key: prop.key.text,
                });
            }
            props.insert(key, prop);

            match self.current().kind {
                TokenKind::Comma => self.advance(),
                TokenKind::RBracket => break,
                _ => {
                    return Err(self.error(&[
                        Expected::Token(TokenKind::Comma),
                        Expected::Token(TokenKind::RBracket),
                    ]))
                }
            }
        }

        self.expect(TokenKind::RBracket)?;
        Ok(props)
    }

    fn parse_prop(&mut self) -> Result<Prop, ParseError> {
        let key = self.expect(TokenKind::Ident)?;
        self.expect(TokenKind::Equals)?;
        let value = self.expect(TokenKind::Str)?;
        Ok(Prop { key, value })
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    fn advance(&mut self) {
        if self.current().kind != TokenKind::Eof {
            self.pos += 1;
        }
    }

    /// Consume the current token and return it.
    fn take(&mut self) -> Token {
        let token = self.current().clone();
        self.advance();
        token
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.check(kind) {
            Ok(self.take())
        } else {
            Err(self.error(&[Expected::Token(kind)]))
        }
    }

    fn expect_keyword(&mut self, word: &'static str) -> Result<Token, ParseError> {
        if self.current().is_keyword(word) {
            Ok(self.take())
        } else {
            Err(self.error(&[Expected::Keyword(word)]))
        }
    }

    fn error(&self, expected: &[Expected]) -> ParseError {
        let token = self.current();
        ParseError::Syntax {
            pos: token.pos,
            found: token.to_string(),
            expected: expected.to_vec(),
        }
    }
}
