pub mod admin;
pub mod config;
pub mod exec;
pub mod proxy;

pub use admin::{bootstrap, handle_request, AdminServer, Reply, ReplyError};
pub use config::Config;
pub use exec::{execute, ExecError, ExecOutcome};
pub use proxy::{
    Endpoint, Listener, ListenerConfig, ListenerStats, Relay, RouteEntry, RouteTable,
    SharedRouteTable,
};
