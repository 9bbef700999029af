//! Applies analyzed directives to the route table.
//!
//! Every directive runs as one atomic step against the table: its checks
//! and its write happen under the table's writer lock, so two
//! administrators racing on the same route cannot both win an OCN check.

use dog_conf::{
    Attrs, CreateDirective, DeleteDirective, DeleteTarget, Directive, GetDirective, GetTarget,
    PatchDirective, PropKey,
};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::proxy::{RouteEntry, RouteSnapshot, RouteTable};

/// Result of a successful directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecOutcome {
    /// Every route, ordered by ID.
    Routes(Vec<RouteEntry>),
    /// The route as it is after the directive.
    Route(RouteEntry),
    /// Number of routes removed.
    Deleted(usize),
}

/// Reasons a well-formed directive cannot be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("route '{id}' not found")]
    NotFound { id: String },

    #[error("route '{id}' already exists")]
    RouteExists { id: String },

    #[error("database '{dbname}' is already routed by '{owner}'")]
    DatabaseTaken { dbname: String, owner: String },

    #[error("route '{id}' is at version {current}, not {given}")]
    OcnMismatch { id: String, current: u64, given: u64 },

    #[error("create requires '{attr}'")]
    MissingAttr { attr: PropKey },

    #[error("invalid value '{value}' for '{attr}': {reason}")]
    InvalidAttr {
        attr: PropKey,
        value: String,
        reason: &'static str,
    },
}

/// Apply `directive` to `table`.
pub async fn execute(table: &RouteTable, directive: Directive) -> Result<ExecOutcome, ExecError> {
    match directive {
        Directive::Get(d) => get(table, d).await,
        Directive::Delete(d) => delete(table, d).await,
        Directive::Create(d) => create(table, d).await,
        Directive::Patch(d) => patch(table, d).await,
    }
}

async fn get(table: &RouteTable, d: GetDirective) -> Result<ExecOutcome, ExecError> {
    match d.target {
        GetTarget::All => Ok(ExecOutcome::Routes(table.entries().await)),
        GetTarget::One(t) => table
            .get(&t.name)
            .await
            .map(ExecOutcome::Route)
            .ok_or(ExecError::NotFound { id: t.name }),
    }
}

async fn delete(table: &RouteTable, d: DeleteDirective) -> Result<ExecOutcome, ExecError> {
    let deleted = match d.target {
        DeleteTarget::All => table.clear().await,
        DeleteTarget::At(t) => {
            table
                .try_update(|routes| {
                    check_ocn(routes, &t.name, t.ocn)?;
                    routes.remove(&t.name);
                    Ok::<_, ExecError>(1)
                })
                .await?
        }
    };
    info!(deleted, "Routes deleted");
    Ok(ExecOutcome::Deleted(deleted))
}

async fn create(table: &RouteTable, d: CreateDirective) -> Result<ExecOutcome, ExecError> {
    let CreateDirective { target, attrs } = d;

    let addr = attrs
        .get(&PropKey::Addr)
        .cloned()
        .ok_or(ExecError::MissingAttr {
            attr: PropKey::Addr,
        })?;
    let dbname_in = attrs
        .get(&PropKey::DbnameIn)
        .cloned()
        .unwrap_or_else(|| target.name.clone());

    check_dbname_in(&dbname_in)?;

    let mut entry = RouteEntry::new(target.name, dbname_in, addr);
    if let Some(out) = attrs.get(&PropKey::DbnameRewritten) {
        entry.dbname_out = out.clone();
    }
    if let Some(lock) = attrs.get(&PropKey::Lock) {
        entry.locked = parse_bool(PropKey::Lock, lock)?;
    }

    let entry = table
        .try_update(|routes| {
            if routes.get(&entry.id).is_some() {
                return Err(ExecError::RouteExists {
                    id: entry.id.clone(),
                });
            }
            check_dbname_free(routes, &entry)?;
            routes.insert(entry.clone());
            Ok(entry)
        })
        .await?;

    info!(
        route_id = %entry.id,
        database = %entry.dbname_in,
        addr = %entry.addr,
        "Route created"
    );
    Ok(ExecOutcome::Route(entry))
}

async fn patch(table: &RouteTable, d: PatchDirective) -> Result<ExecOutcome, ExecError> {
    let PatchDirective { target, attrs } = d;
    let locked = attrs
        .get(&PropKey::Lock)
        .map(|v| parse_bool(PropKey::Lock, v))
        .transpose()?;
    if let Some(dbname_in) = attrs.get(&PropKey::DbnameIn) {
        check_dbname_in(dbname_in)?;
    }

    let entry = table
        .try_update(|routes| {
            let mut entry = check_ocn(routes, &target.name, target.ocn)?.clone();
            apply_attrs(&mut entry, &attrs, locked);
            check_dbname_free(routes, &entry)?;
            entry.ocn += 1;
            routes.insert(entry.clone());
            Ok::<_, ExecError>(entry)
        })
        .await?;

    info!(route_id = %entry.id, ocn = entry.ocn, "Route patched");
    Ok(ExecOutcome::Route(entry))
}

fn apply_attrs(entry: &mut RouteEntry, attrs: &Attrs, locked: Option<bool>) {
    if let Some(addr) = attrs.get(&PropKey::Addr) {
        entry.addr = addr.clone();
    }
    if let Some(dbname_in) = attrs.get(&PropKey::DbnameIn) {
        entry.dbname_in = dbname_in.clone();
    }
    if let Some(dbname_out) = attrs.get(&PropKey::DbnameRewritten) {
        entry.dbname_out = dbname_out.clone();
    }
    if let Some(locked) = locked {
        entry.locked = locked;
    }
}

fn check_ocn<'a>(routes: &'a RouteSnapshot, id: &str, given: u64) -> Result<&'a RouteEntry, ExecError> {
    let entry = routes.get(id).ok_or_else(|| ExecError::NotFound { id: id.to_string() })?;
    if entry.ocn != given {
        return Err(ExecError::OcnMismatch {
            id: id.to_string(),
            current: entry.ocn,
            given,
        });
    }
    Ok(entry)
}

fn check_dbname_free(routes: &RouteSnapshot, entry: &RouteEntry) -> Result<(), ExecError> {
    match routes.lookup(&entry.dbname_in) {
        Some(owner) if owner.id != entry.id => Err(ExecError::DatabaseTaken {
            dbname: entry.dbname_in.clone(),
            owner: owner.id.clone(),
        }),
        _ => Ok(()),
    }
}

fn check_dbname_in(value: &str) -> Result<(), ExecError> {
    if value.is_empty() {
        return Err(ExecError::InvalidAttr {
            attr: PropKey::DbnameIn,
            value: value.to_string(),
            reason: "inbound database name must not be empty",
        });
    }
    Ok(())
}

fn parse_bool(attr: PropKey, value: &str) -> Result<bool, ExecError> {
    match value.to_ascii_lowercase().as_str() {
        "t" | "true" | "on" | "1" | "y" | "yes" => Ok(true),
        "f" | "false" | "off" | "0" | "n" | "no" => Ok(false),
        _ => Err(ExecError::InvalidAttr {
            attr,
            value: value.to_string(),
            reason: "expected a boolean",
        }),
    }
}
