//! Route table and handshake rewriting.
//!
//! The table maps an inbound database name to a [`RouteEntry`]: where to
//! dial, and which database name the backend should see.
//!
//! - At most one entry per inbound database name
//! - Entries are replaced whole; readers never see a half-applied update
//! - Lookups never block, not even behind a writer
//! - Writers are serialized, so check-then-write sequences are atomic
//! - A write is visible to every lookup that starts after it returns

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dog_wire::StartupParams;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Startup parameter carrying the requested database.
pub const DATABASE_PARAM: &str = "database";

/// A single route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteEntry {
    /// Administrative name of the route.
    pub id: String,
    /// Database name clients ask for.
    pub dbname_in: String,
    /// Backend address: a unix socket path if it contains '/', else host:port.
    pub addr: String,
    /// Database name sent to the backend.
    pub dbname_out: String,
    /// Locked routes still match but refuse new sessions.
    pub locked: bool,
    /// Optimistic concurrency number, bumped on every change.
    pub ocn: u64,
}

impl RouteEntry {
    /// A fresh, unlocked entry at OCN 1 with no database rename.
    pub fn new(id: impl Into<String>, dbname_in: impl Into<String>, addr: impl Into<String>) -> Self {
        let dbname_in = dbname_in.into();
        Self {
            id: id.into(),
            dbname_out: dbname_in.clone(),
            dbname_in,
            addr: addr.into(),
            locked: false,
            ocn: 1,
        }
    }

    pub fn with_rewrite(mut self, dbname_out: impl Into<String>) -> Self {
        self.dbname_out = dbname_out.into();
        self
    }
}

/// Immutable view of the table.
#[derive(Debug, Clone, Default)]
pub struct RouteSnapshot {
    /// Entries indexed by inbound database name.
    by_dbname: HashMap<String, RouteEntry>,
    /// Route ID to inbound database name.
    by_id: HashMap<String, String>,
}

impl RouteSnapshot {
    /// Entry for an inbound database name.
    pub fn lookup(&self, dbname_in: &str) -> Option<&RouteEntry> {
        self.by_dbname.get(dbname_in)
    }

    /// Entry for a route ID.
    pub fn get(&self, id: &str) -> Option<&RouteEntry> {
        self.by_id.get(id).and_then(|db| self.by_dbname.get(db))
    }

    /// Install `entry`, replacing whatever held its inbound name and
    /// whatever was previously stored under its ID.
    pub fn insert(&mut self, entry: RouteEntry) {
        if let Some(old_db) = self.by_id.get(&entry.id) {
            if *old_db != entry.dbname_in {
                let old_db = old_db.clone();
                self.by_dbname.remove(&old_db);
            }
        }
        if let Some(displaced) = self.by_dbname.get(&entry.dbname_in) {
            if displaced.id != entry.id {
                let displaced_id = displaced.id.clone();
                self.by_id.remove(&displaced_id);
            }
        }

        self.by_id.insert(entry.id.clone(), entry.dbname_in.clone());
        self.by_dbname.insert(entry.dbname_in.clone(), entry);
    }

    /// Remove the route with the given ID.
    pub fn remove(&mut self, id: &str) -> Option<RouteEntry> {
        let db = self.by_id.remove(id)?;
        self.by_dbname.remove(&db)
    }

    /// Remove every route, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let n = self.by_dbname.len();
        self.by_dbname.clear();
        self.by_id.clear();
        n
    }

    /// All entries, ordered by route ID.
    pub fn entries(&self) -> Vec<RouteEntry> {
        let mut entries: Vec<_> = self.by_dbname.values().cloned().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    pub fn len(&self) -> usize {
        self.by_dbname.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_dbname.is_empty()
    }
}

/// Route table shared by every connection and the admin path.
///
/// Readers load the current snapshot through an `ArcSwap`. Writers take
/// `writer`, copy the snapshot, change the copy and swap it in.
pub struct RouteTable {
    snapshot: ArcSwap<RouteSnapshot>,
    writer: Mutex<()>,
}

impl RouteTable {
    /// Create a new empty route table.
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(RouteSnapshot::default()),
            writer: Mutex::new(()),
        }
    }

    /// Install or replace the entry for `entry.dbname_in`.
    pub async fn post(&self, entry: RouteEntry) {
        let id = entry.id.clone();
        let dbname_in = entry.dbname_in.clone();
        self.write(|routes| routes.insert(entry)).await;
        info!(route_id = %id, database = %dbname_in, "Route posted");
    }

    /// Find the route for an inbound database name.
    pub async fn lookup(&self, dbname_in: &str) -> Option<RouteEntry> {
        self.snapshot.load().lookup(dbname_in).cloned()
    }

    /// Route a startup packet.
    ///
    /// On a match the `database` parameter is replaced by the entry's
    /// outbound name and the entry is returned. Otherwise `params` are left
    /// untouched. A startup without a `database` parameter never matches.
    pub async fn rewrite(&self, params: &mut StartupParams) -> Option<RouteEntry> {
        let requested = params.get(DATABASE_PARAM)?;
        let route = self.lookup(requested).await?;

        debug!(
            route_id = %route.id,
            database = %route.dbname_in,
            rewritten = %route.dbname_out,
            "Rewriting startup database"
        );
        params.set(DATABASE_PARAM, route.dbname_out.clone());
        Some(route)
    }

    /// Get a route by ID.
    pub async fn get(&self, id: &str) -> Option<RouteEntry> {
        self.snapshot.load().get(id).cloned()
    }

    /// Remove a route by ID.
    pub async fn remove(&self, id: &str) -> Option<RouteEntry> {
        self.write(|routes| routes.remove(id)).await
    }

    /// Remove every route, returning how many there were.
    pub async fn clear(&self) -> usize {
        self.write(RouteSnapshot::clear).await
    }

    /// All entries, ordered by route ID.
    pub async fn entries(&self) -> Vec<RouteEntry> {
        self.snapshot.load().entries()
    }

    /// Get the total number of routes.
    pub async fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    /// Check if the route table is empty.
    pub async fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }

    /// Run a check-then-write step atomically.
    ///
    /// `f` sees a private copy of the current routes. If it returns `Ok`
    /// the copy becomes the new snapshot; on `Err` nothing changes. Other
    /// writers wait; readers keep using the previous snapshot meanwhile.
    pub async fn try_update<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut RouteSnapshot) -> Result<T, E>,
    {
        let _guard = self.writer.lock().await;

        let mut next = RouteSnapshot::clone(&self.snapshot.load());
        let out = f(&mut next)?;
        self.snapshot.store(Arc::new(next));
        Ok(out)
    }

    async fn write<T>(&self, f: impl FnOnce(&mut RouteSnapshot) -> T) -> T {
        let Ok(out) = self.try_update(|routes| Ok::<_, Infallible>(f(routes))).await;
        out
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared route table reference.
pub type SharedRouteTable = Arc<RouteTable>;
