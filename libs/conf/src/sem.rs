//! Semantic analysis: checks the target shape of a request against its
//! action and produces a [`Directive`].
//!
//! | Action | Accepted targets                   |
//! |--------|------------------------------------|
//! | create | one route, no version              |
//! | patch  | one route, version required        |
//! | get    | `all`, or one route without version|
//! | delete | `all`, or one route with version   |
//!
//! Mutations of a single route must name the version they were based on.
//! Reads and bulk operations must not carry one.

use crate::ast::{Action, Props, Request, Spec};
use crate::directive::{
    Attrs, CreateDirective, DeleteDirective, DeleteTarget, Directive, GetDirective, GetTarget,
    PatchDirective, TargetOcn, TargetOne,
};
use crate::error::AnalyzeError;

/// Analyze a parsed request. Pure: the result depends on `req` only.
pub fn analyze(req: &Request) -> Result<Directive, AnalyzeError> {
    let spec = &req.spec;
    match &req.action {
        Action::Create { props, .. } => match spec {
            Spec::One { name } => Ok(Directive::Create(CreateDirective {
                target: TargetOne {
                    name: name.text.clone(),
                    pos: name.pos,
                },
                attrs: attrs(props),
            })),
            Spec::All { .. } => Err(bad_target(req, "a route must be created by name")),
            Spec::OneAtVersion { .. } => {
                Err(bad_target(req, "a route being created has no version yet"))
            }
        },
        Action::Patch { props, .. } => match spec {
            Spec::OneAtVersion { name, ocn, .. } => Ok(Directive::Patch(PatchDirective {
                target: TargetOcn {
                    name: name.text.clone(),
                    ocn: *ocn,
                    pos: name.pos,
                },
                attrs: attrs(props),
            })),
            Spec::All { .. } => Err(bad_target(req, "routes are patched one at a time")),
            Spec::One { .. } => Err(bad_target(req, "patch requires a version ('@ <ocn>')")),
        },
        Action::Get { .. } => match spec {
            Spec::All { .. } => Ok(Directive::Get(GetDirective {
                target: GetTarget::All,
            })),
            Spec::One { name } => Ok(Directive::Get(GetDirective {
                target: GetTarget::One(TargetOne {
                    name: name.text.clone(),
                    pos: name.pos,
                }),
            })),
            Spec::OneAtVersion { .. } => Err(bad_target(req, "get does not take a version")),
        },
        Action::Delete { .. } => match spec {
            Spec::All { .. } => Ok(Directive::Delete(DeleteDirective {
                target: DeleteTarget::All,
            })),
            Spec::OneAtVersion { name, ocn, .. } => Ok(Directive::Delete(DeleteDirective {
                target: DeleteTarget::At(TargetOcn {
                    name: name.text.clone(),
                    ocn: *ocn,
                    pos: name.pos,
                }),
            })),
            Spec::One { .. } => Err(bad_target(req, "delete requires a version ('@ <ocn>')")),
        },
    }
}

fn attrs(props: &Props) -> Attrs {
    props
        .iter()
        .map(|(key, prop)| (*key, prop.value.text.clone()))
        .collect()
}

fn bad_target(req: &Request, reason: &'static str) -> AnalyzeError {
    AnalyzeError::BadTarget {
        pos: req.spec.blame().pos,
        action: req.action.keyword(),
        target: req.spec.describe(),
        reason,
    }
}
