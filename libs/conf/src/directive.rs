//! Semantically analyzed commands.
//!
//! A [`Directive`] is only built by [`crate::analyze`], after its target
//! shape has been checked against its action. Directives can still fail
//! at execution time (unknown route, OCN mismatch); that is the
//! executor's business.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::ast::PropKey;
use crate::token::Position;

/// Attribute changes carried by `create` and `patch`.
pub type Attrs = BTreeMap<PropKey, String>;

/// A single named route, regardless of version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetOne {
    pub name: String,
    #[serde(skip)]
    pub pos: Position,
}

/// A named route at a specific version, so that a stale OCN can be
/// detected as a concurrent modification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetOcn {
    pub name: String,
    pub ocn: u64,
    #[serde(skip)]
    pub pos: Position,
}

/// Targets accepted by `get`: everything, or one route without a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GetTarget {
    All,
    One(TargetOne),
}

/// Targets accepted by `delete`: everything, or one route at a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeleteTarget {
    All,
    At(TargetOcn),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GetDirective {
    pub target: GetTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteDirective {
    pub target: DeleteTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateDirective {
    pub target: TargetOne,
    pub attrs: Attrs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchDirective {
    pub target: TargetOcn,
    pub attrs: Attrs,
}

/// Top-level output of semantic analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Directive {
    Get(GetDirective),
    Delete(DeleteDirective),
    Create(CreateDirective),
    Patch(PatchDirective),
}

impl Directive {
    pub fn action(&self) -> &'static str {
        match self {
            Directive::Get(_) => "get",
            Directive::Delete(_) => "delete",
            Directive::Create(_) => "create",
            Directive::Patch(_) => "patch",
        }
    }

    /// Name of the targeted route, or `None` for `all`.
    pub fn route_name(&self) -> Option<&str> {
        match self {
            Directive::Get(GetDirective {
                target: GetTarget::One(t),
            }) => Some(&t.name),
            Directive::Delete(DeleteDirective {
                target: DeleteTarget::At(t),
            }) => Some(&t.name),
            Directive::Create(d) => Some(&d.target.name),
            Directive::Patch(d) => Some(&d.target.name),
            _ => None,
        }
    }
}
