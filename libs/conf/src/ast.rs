//! Syntax tree for a single routing request.
//!
//! Nodes keep the tokens they were built from so that later stages can
//! blame a precise source position.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::token::Token;

/// `[route <spec> <action>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub spec: Spec,
    pub action: Action,
}

/// Which route(s) a request applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Spec {
    /// The `all` keyword.
    All { token: Token },
    /// A quoted route name without a version.
    One { name: Token },
    /// A quoted route name qualified with `@ <ocn>`.
    OneAtVersion { name: Token, ocn: u64, ocn_token: Token },
}

impl Spec {
    /// The token diagnostics about this target point at.
    pub fn blame(&self) -> &Token {
        match self {
            Spec::All { token } => token,
            Spec::One { name } | Spec::OneAtVersion { name, .. } => name,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Spec::All { .. } => "'all'",
            Spec::One { .. } => "an unversioned route",
            Spec::OneAtVersion { .. } => "a versioned route",
        }
    }
}

/// What to do with the targeted route(s).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Get { token: Token },
    Delete { token: Token },
    Create { token: Token, props: Props },
    Patch { token: Token, props: Props },
}

impl Action {
    /// The keyword token that introduced the action.
    pub fn blame(&self) -> &Token {
        match self {
            Action::Get { token }
            | Action::Delete { token }
            | Action::Create { token, .. }
            | Action::Patch { token, .. } => token,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Action::Get { .. } => "get",
            Action::Delete { .. } => "delete",
            Action::Create { .. } => "create",
            Action::Patch { .. } => "patch",
        }
    }
}

/// The closed set of keys a property list may set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PropKey {
    #[serde(rename = "addr")]
    Addr,
    #[serde(rename = "lock")]
    Lock,
    #[serde(rename = "dbnameIn")]
    DbnameIn,
    #[serde(rename = "dbnameRewritten")]
    DbnameRewritten,
}

impl PropKey {
    pub const ALL: [PropKey; 4] = [
        PropKey::Addr,
        PropKey::Lock,
        PropKey::DbnameIn,
        PropKey::DbnameRewritten,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PropKey::Addr => "addr",
            PropKey::Lock => "lock",
            PropKey::DbnameIn => "dbnameIn",
            PropKey::DbnameRewritten => "dbnameRewritten",
        }
    }
}

impl FromStr for PropKey {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PropKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or(())
    }
}

impl fmt::Display for PropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `key='value'` entry of a property list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prop {
    pub key: Token,
    pub value: Token,
}

/// Property list; keys are unique.
pub type Props = BTreeMap<PropKey, Prop>;

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "'{}'", s.replace('\'', "''"))
}

impl fmt::Display for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Spec::All { .. } => f.write_str("all"),
            Spec::One { name } => write_quoted(f, &name.text),
            Spec::OneAtVersion { name, ocn, .. } => {
                write_quoted(f, &name.text)?;
                write!(f, " @ {}", ocn)
            }
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Get { .. } | Action::Delete { .. } => write!(f, "[{}]", self.keyword()),
            Action::Create { props, .. } | Action::Patch { props, .. } => {
                write!(f, "[{} [", self.keyword())?;
                for (i, (key, prop)) in props.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}=", key)?;
                    write_quoted(f, &prop.value.text)?;
                }
                f.write_str("]]")
            }
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[route {} {}]", self.spec, self.action)
    }
}
