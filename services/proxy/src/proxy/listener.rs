//! Client listener and per-connection dispatch.
//!
//! Each accepted client runs through:
//!
//! ```text
//! AwaitHandshake -> Routed -> Relaying -> Closed
//!        |            |
//!        +-> Rejected +-> Closed
//! ```
//!
//! - `AwaitHandshake` reads the initial packet. SSL and GSS encryption
//!   requests are declined with `N` and the client may try again.
//! - The startup's `database` is looked up and rewritten in place. No
//!   route, a locked route or a failed dial rejects the session with an
//!   ErrorResponse; no backend is dialed for an unrouted database.
//! - `Routed` dials the backend and sends it the rewritten startup first.
//! - `Relaying` hands both connections to the [`Relay`].

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dog_wire::{read_initial, write_frame, Frame, Initial, Startup, WireError, DEFAULT_MAX_FRAME_LEN};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn, Instrument};

use super::endpoint::{Acceptor, Endpoint, Stream, DEFAULT_CONNECT_TIMEOUT};
use super::relay::{Relay, RelayEnd};
use super::router::{RouteEntry, SharedRouteTable};

/// Default maximum concurrent sessions per listener.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10000;

/// Default idle timeout (none: sessions may sit idle indefinitely).
pub const DEFAULT_IDLE_TIMEOUT: Option<Duration> = None;

/// How many SSL/GSS negotiation requests a client may send before its
/// startup packet.
const MAX_NEGOTIATION_ROUNDS: usize = 2;

/// Pause after a failed accept.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// SQLSTATE invalid_catalog_name.
const SQLSTATE_NO_ROUTE: &str = "3D000";

/// SQLSTATE cannot_connect_now.
const SQLSTATE_UNAVAILABLE: &str = "57P03";

/// Configuration for a listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind to.
    pub listen: Endpoint,
    /// Maximum concurrent sessions.
    pub max_connections: usize,
    /// Backend dial timeout.
    pub connect_timeout: Duration,
    /// Per-read idle timeout while relaying.
    pub idle_timeout: Option<Duration>,
    /// Largest frame relayed in either direction.
    pub max_frame_len: usize,
}

impl ListenerConfig {
    pub fn new(listen: Endpoint) -> Self {
        Self {
            listen,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Statistics for a listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Sessions currently running.
    pub connections_active: AtomicU64,
    /// Connections dropped at accept because of the session limit.
    pub connections_rejected: AtomicU64,
    /// Failed accept calls.
    pub accept_errors: AtomicU64,
    /// Sessions that matched a route and reached a backend.
    pub routes_matched: AtomicU64,
    /// Sessions refused with an ErrorResponse.
    pub sessions_refused: AtomicU64,
    /// Backend dial failures.
    pub backend_failed: AtomicU64,
    /// Relays that ended at a frame boundary.
    pub closed_clean: AtomicU64,
    /// Relays or handshakes that ended on an error.
    pub closed_abnormal: AtomicU64,
}

/// Why a session was refused before relaying.
#[derive(Debug)]
pub enum Rejection {
    /// No route for the requested database, or no database requested.
    NoRoute { database: Option<String> },
    /// The route exists but is locked.
    Locked { route_id: String },
    /// The backend could not be reached.
    Unreachable { route_id: String, error: io::Error },
}

impl Rejection {
    fn sqlstate(&self) -> &'static str {
        match self {
            Rejection::NoRoute { .. } => SQLSTATE_NO_ROUTE,
            Rejection::Locked { .. } | Rejection::Unreachable { .. } => SQLSTATE_UNAVAILABLE,
        }
    }

    fn message(&self) -> String {
        match self {
            Rejection::NoRoute {
                database: Some(db),
            } => format!("no route for database \"{}\"", db),
            Rejection::NoRoute { database: None } => "no database requested".to_string(),
            Rejection::Locked { route_id } => format!("route \"{}\" is locked", route_id),
            Rejection::Unreachable { route_id, error } => {
                format!("backend for route \"{}\" is unreachable: {}", route_id, error)
            }
        }
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    Rejected(Rejection),
    Relayed(RelayEnd),
}

/// Session failures outside the relay itself.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("client closed before sending a startup packet")]
    ClosedEarly,

    #[error("too many encryption negotiation requests")]
    Negotiation,

    #[error("handshake: {0}")]
    Wire(#[from] WireError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A client listener for the proxy.
pub struct Listener {
    /// Listener configuration.
    config: ListenerConfig,
    /// The bound socket.
    acceptor: Acceptor,
    /// Route table for routing decisions.
    route_table: SharedRouteTable,
    /// Frame relay shared by every session.
    relay: Relay,
    /// Connection semaphore for limiting concurrent sessions.
    conn_semaphore: Arc<Semaphore>,
    /// Statistics.
    stats: Arc<ListenerStats>,
}

impl Listener {
    /// Bind a new listener.
    pub async fn bind(config: ListenerConfig, route_table: SharedRouteTable) -> io::Result<Self> {
        let acceptor = config.listen.bind().await?;
        let local = acceptor.local_endpoint()?;

        info!(
            listen = %local,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            conn_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            relay: Relay::new(config.idle_timeout, config.max_frame_len),
            acceptor,
            config,
            route_table,
            stats: Arc::new(ListenerStats::default()),
        })
    }

    /// The endpoint this listener is bound to.
    pub fn local_endpoint(&self) -> io::Result<Endpoint> {
        self.acceptor.local_endpoint()
    }

    /// Get listener statistics.
    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    /// Run the listener, accepting and handling connections.
    pub async fn run(self: Arc<Self>) -> io::Result<()> {
        let local = self.acceptor.local_endpoint()?;
        info!(listen = %local, "Listener started");

        loop {
            match self.acceptor.accept().await {
                Ok((stream, peer)) => {
                    let permit = match self.conn_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            self.stats
                                .connections_rejected
                                .fetch_add(1, Ordering::Relaxed);
                            warn!(peer = %peer, "Connection rejected: max connections reached");
                            continue;
                        }
                    };

                    self.stats
                        .connections_accepted
                        .fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .connections_active
                        .fetch_add(1, Ordering::Relaxed);

                    let listener = Arc::clone(&self);
                    let stats = Arc::clone(&self.stats);

                    tokio::spawn(
                        async move {
                            listener.finish(listener.handle_connection(stream).await);
                            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                            drop(permit);
                        }
                        .instrument(tracing::info_span!("connection", peer = %peer)),
                    );
                }
                Err(e) => {
                    self.stats.accept_errors.fetch_add(1, Ordering::Relaxed);
                    error!(error = %e, "Accept error");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    /// Handle a single connection up to its end.
    pub async fn handle_connection(&self, mut client: Stream) -> Result<SessionEnd, SessionError> {
        let mut startup = match self.await_handshake(&mut client).await? {
            Some(startup) => startup,
            None => return self.reject(&mut client, Rejection::NoRoute { database: None }).await,
        };

        let requested = startup.database().map(str::to_string);
        let route = match self.route_table.rewrite(&mut startup.params).await {
            Some(route) => route,
            None => {
                return self
                    .reject(&mut client, Rejection::NoRoute { database: requested })
                    .await
            }
        };

        if route.locked {
            return self
                .reject(&mut client, Rejection::Locked { route_id: route.id })
                .await;
        }

        let backend = match self.dial(&route, &startup).await {
            Ok(backend) => backend,
            Err(error) => {
                self.stats.backend_failed.fetch_add(1, Ordering::Relaxed);
                warn!(route_id = %route.id, addr = %route.addr, error = %error, "Backend dial failed");
                return self
                    .reject(
                        &mut client,
                        Rejection::Unreachable {
                            route_id: route.id,
                            error,
                        },
                    )
                    .await;
            }
        };

        self.stats.routes_matched.fetch_add(1, Ordering::Relaxed);
        debug!(
            route_id = %route.id,
            database = %route.dbname_out,
            addr = %route.addr,
            "Relaying"
        );

        Ok(SessionEnd::Relayed(self.relay.run(client, backend).await))
    }

    /// Read initial packets until a startup arrives.
    ///
    /// Returns `None` for cancel requests and unrecognized codes.
    async fn await_handshake(&self, client: &mut Stream) -> Result<Option<Startup>, SessionError> {
        let mut rounds = 0;
        loop {
            let initial = match read_initial(client).await {
                Ok(initial) => initial,
                Err(WireError::Closed) => return Err(SessionError::ClosedEarly),
                Err(e) => return Err(e.into()),
            };

            match initial {
                Initial::Startup(startup) => return Ok(Some(startup)),
                Initial::SslRequest | Initial::GssEncRequest if rounds == MAX_NEGOTIATION_ROUNDS => {
                    return Err(SessionError::Negotiation);
                }
                negotiation @ (Initial::SslRequest | Initial::GssEncRequest) => {
                    rounds += 1;
                    debug!(request = negotiation.describe(), rounds, "Declining encryption");
                    client.write_all(b"N").await?;
                    client.flush().await?;
                }
                other => {
                    debug!(request = other.describe(), "Not a startup packet");
                    return Ok(None);
                }
            }
        }
    }

    async fn dial(&self, route: &RouteEntry, startup: &Startup) -> io::Result<Stream> {
        let mut backend = Endpoint::parse(&route.addr)
            .dial(self.config.connect_timeout)
            .await?;
        backend.write_all(&startup.encode()).await?;
        backend.flush().await?;
        Ok(backend)
    }

    async fn reject(
        &self,
        client: &mut Stream,
        rejection: Rejection,
    ) -> Result<SessionEnd, SessionError> {
        self.stats.sessions_refused.fetch_add(1, Ordering::Relaxed);
        let frame = Frame::error_response(rejection.sqlstate(), &rejection.message());
        if let Err(e) = write_frame(client, &frame).await {
            debug!(error = %e, "Could not deliver rejection");
        }
        Ok(SessionEnd::Rejected(rejection))
    }

    fn finish(&self, result: Result<SessionEnd, SessionError>) {
        match result {
            Ok(SessionEnd::Relayed(end)) if end.is_clean() => {
                self.stats.closed_clean.fetch_add(1, Ordering::Relaxed);
                debug!(direction = %end.direction, "Session closed");
            }
            Ok(SessionEnd::Relayed(end)) => {
                self.stats.closed_abnormal.fetch_add(1, Ordering::Relaxed);
                info!(direction = %end.direction, error = %end.error, "Session closed abnormally");
            }
            Ok(SessionEnd::Rejected(rejection)) => {
                info!(reason = %rejection.message(), "Session rejected");
            }
            Err(SessionError::ClosedEarly) => {
                debug!("Client closed before startup");
            }
            Err(e) => {
                self.stats.closed_abnormal.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "Connection error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::RouteTable;

    #[test]
    fn test_listener_config_default() {
        let config = ListenerConfig::new(Endpoint::parse("127.0.0.1:6432"));
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert!(config.idle_timeout.is_none());
    }

    #[test]
    fn test_rejection_codes() {
        let no_route = Rejection::NoRoute {
            database: Some("unknown".to_string()),
        };
        assert_eq!(no_route.sqlstate(), "3D000");
        assert_eq!(no_route.message(), "no route for database \"unknown\"");

        let locked = Rejection::Locked {
            route_id: "fdr".to_string(),
        };
        assert_eq!(locked.sqlstate(), "57P03");
    }

    async fn session(listener: &Listener) -> (Stream, Stream) {
        let endpoint = listener.local_endpoint().unwrap();
        let (client, accepted) = tokio::join!(
            endpoint.dial(Duration::from_secs(2)),
            listener.acceptor.accept()
        );
        (client.unwrap(), accepted.unwrap().0)
    }

    fn ssl_request() -> Vec<u8> {
        let mut packet = 8i32.to_be_bytes().to_vec();
        packet.extend_from_slice(&dog_wire::SSL_REQUEST_CODE.to_be_bytes());
        packet
    }

    #[tokio::test]
    async fn test_negotiation_is_limited() {
        use tokio::io::AsyncReadExt;

        let table = Arc::new(RouteTable::new());
        let listener = Listener::bind(ListenerConfig::new(Endpoint::parse("127.0.0.1:0")), table)
            .await
            .unwrap();
        let (mut client, server) = session(&listener).await;

        for _ in 0..3 {
            client.write_all(&ssl_request()).await.unwrap();
        }
        let result = listener.handle_connection(server).await;
        assert!(matches!(result, Err(SessionError::Negotiation)));

        let mut answers = Vec::new();
        client.read_to_end(&mut answers).await.unwrap();
        assert_eq!(answers, b"NN");
    }

    #[tokio::test]
    async fn test_cancel_request_is_refused_as_unrouted() {
        let table = Arc::new(RouteTable::new());
        let listener = Listener::bind(ListenerConfig::new(Endpoint::parse("127.0.0.1:0")), table)
            .await
            .unwrap();
        let (mut client, server) = session(&listener).await;

        let mut packet = 16i32.to_be_bytes().to_vec();
        packet.extend_from_slice(&dog_wire::CANCEL_REQUEST_CODE.to_be_bytes());
        packet.extend_from_slice(&[0; 8]);
        client.write_all(&packet).await.unwrap();

        match listener.handle_connection(server).await {
            Ok(SessionEnd::Rejected(Rejection::NoRoute { database: None })) => {}
            other => panic!("expected an unrouted rejection, got {:?}", other),
        }
        assert_eq!(listener.stats().sessions_refused.load(Ordering::Relaxed), 1);
        assert_eq!(listener.stats().routes_matched.load(Ordering::Relaxed), 0);
    }
}
