//! Client-facing side of the proxy.
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> RouteTable::rewrite -> Endpoint::dial -> Backend
//!                              |
//!                 ErrorResponse on no route / locked / unreachable
//!
//! Client <-> Relay (one pump per direction) <-> Backend
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let route_table = Arc::new(RouteTable::new());
//! route_table.post(RouteEntry::new("fdr", "fdr", "/var/run/postgresql/.s.PGSQL.5432")).await;
//!
//! let config = ListenerConfig::new(Endpoint::parse("127.0.0.1:6432"));
//! let listener = Arc::new(Listener::bind(config, route_table).await?);
//! listener.run().await?;
//! ```

mod endpoint;
mod listener;
mod relay;
mod router;

pub use endpoint::{Acceptor, Endpoint, Stream, DEFAULT_CONNECT_TIMEOUT};
pub use listener::{
    Listener, ListenerConfig, ListenerStats, Rejection, SessionEnd, SessionError,
    DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_CONNECTIONS,
};
pub use relay::{Direction, Relay, RelayEnd};
pub use router::{RouteEntry, RouteSnapshot, RouteTable, SharedRouteTable, DATABASE_PARAM};
