//! # dog-conf
//!
//! Front end for the routing command language used to administer the
//! dog proxy's route table.
//!
//! ```text
//! text --lexer--> tokens --parser--> Request --analyze--> Directive
//! ```
//!
//! Requests look like:
//!
//! ```text
//! [route all [get]]
//! [route 'accounts' [create [addr='10.0.0.5:5432', dbnameRewritten='accounts_v2']]]
//! [route 'accounts' @ 3 [patch [lock='true']]]
//! [route 'accounts' @ 4 [delete]]
//! ```
//!
//! All failures are returned as values carrying the source position they
//! are blamed on.

pub mod ast;
pub mod directive;
mod error;
pub mod lexer;
pub mod parser;
mod sem;
mod token;

pub use ast::{Action, Prop, PropKey, Props, Request, Spec};
pub use directive::{
    Attrs, CreateDirective, DeleteDirective, DeleteTarget, Directive, GetDirective, GetTarget,
    PatchDirective, TargetOcn, TargetOne,
};
pub use error::{AnalyzeError, ConfError, Expected, LexError, ParseError};
pub use lexer::{tokenize, Lexer};
pub use parser::{parse_request, Parser};
pub use sem::analyze;
pub use token::{Position, Token, TokenKind};

/// Parse and analyze `source` in one step.
pub fn compile(source: &str) -> Result<Directive, ConfError> {
    let request = parse_request(source)?;
    Ok(analyze(&request)?)
}
