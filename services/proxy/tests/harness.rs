//! Test harness for proxy integration tests.
//!
//! Provides a fake PostgreSQL backend (TCP or unix socket), a running
//! proxy listener, and a minimal client that speaks just enough of the
//! protocol to open a session.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dog_proxy::proxy::{Acceptor, Stream};
use dog_proxy::{Endpoint, Listener, ListenerConfig, RouteEntry, RouteTable};
use dog_wire::{
    read_frame, read_initial, write_frame, Frame, Initial, Startup, StartupParams,
    DEFAULT_MAX_FRAME_LEN,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A backend that records the startup it receives, answers with
/// AuthenticationOk + ReadyForQuery, then echoes every frame back.
#[allow(dead_code)]
pub struct FakeBackend {
    pub endpoint: Endpoint,
    pub connections: Arc<AtomicU64>,
    pub closed: Arc<AtomicU64>,
    pub databases: Arc<Mutex<Vec<String>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

#[allow(dead_code)]
impl FakeBackend {
    pub async fn spawn_tcp() -> io::Result<Self> {
        Self::spawn(Endpoint::parse("127.0.0.1:0")).await
    }

    pub async fn spawn_unix(dir: &Path) -> io::Result<Self> {
        let path = dir.join(".s.PGSQL.5432");
        Self::spawn(Endpoint::Unix(path)).await
    }

    async fn spawn(listen: Endpoint) -> io::Result<Self> {
        let acceptor = listen.bind().await?;
        let endpoint = acceptor.local_endpoint()?;
        let connections = Arc::new(AtomicU64::new(0));
        let closed = Arc::new(AtomicU64::new(0));
        let databases = Arc::new(Mutex::new(Vec::new()));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(accept_loop(
            acceptor,
            Arc::clone(&connections),
            Arc::clone(&closed),
            Arc::clone(&databases),
            shutdown_rx,
        ));

        Ok(Self {
            endpoint,
            connections,
            closed,
            databases,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn addr(&self) -> String {
        self.endpoint.to_string()
    }

    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn closed_count(&self) -> u64 {
        self.closed.load(Ordering::Relaxed)
    }

    pub fn databases_seen(&self) -> Vec<String> {
        self.databases.lock().unwrap().clone()
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn accept_loop(
    acceptor: Acceptor,
    connections: Arc<AtomicU64>,
    closed: Arc<AtomicU64>,
    databases: Arc<Mutex<Vec<String>>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            accepted = acceptor.accept() => {
                let Ok((stream, _)) = accepted else { break };
                connections.fetch_add(1, Ordering::Relaxed);
                let closed = Arc::clone(&closed);
                let databases = Arc::clone(&databases);
                tokio::spawn(async move {
                    let _ = serve_backend(stream, databases).await;
                    closed.fetch_add(1, Ordering::Relaxed);
                });
            }
            _ = &mut shutdown_rx => break,
        }
    }
}

async fn serve_backend(mut stream: Stream, databases: Arc<Mutex<Vec<String>>>) -> io::Result<()> {
    let startup = match read_initial(&mut stream).await.map_err(io::Error::other)? {
        Initial::Startup(startup) => startup,
        other => return Err(io::Error::other(format!("unexpected {}", other.describe()))),
    };
    databases
        .lock()
        .unwrap()
        .push(startup.database().unwrap_or_default().to_string());

    write_frame(&mut stream, &Frame::new(b'R', 0i32.to_be_bytes().to_vec()))
        .await
        .map_err(io::Error::other)?;
    write_frame(&mut stream, &Frame::new(b'Z', &b"I"[..]))
        .await
        .map_err(io::Error::other)?;

    loop {
        match read_frame(&mut stream, DEFAULT_MAX_FRAME_LEN).await {
            Ok(frame) => write_frame(&mut stream, &frame).await.map_err(io::Error::other)?,
            Err(e) if e.is_closed() => return Ok(()),
            Err(e) => return Err(io::Error::other(e)),
        }
    }
}

/// A running proxy listener.
#[allow(dead_code)]
pub struct ProxyHandle {
    pub endpoint: Endpoint,
    pub route_table: Arc<RouteTable>,
    pub listener: Arc<Listener>,
}

#[allow(dead_code)]
impl ProxyHandle {
    pub async fn spawn() -> io::Result<Self> {
        Self::spawn_with(|_| {}).await
    }

    pub async fn spawn_with(configure: impl FnOnce(&mut ListenerConfig)) -> io::Result<Self> {
        let route_table = Arc::new(RouteTable::new());

        let mut config = ListenerConfig::new(Endpoint::parse("127.0.0.1:0"));
        configure(&mut config);
        let listener = Arc::new(Listener::bind(config, Arc::clone(&route_table)).await?);
        let endpoint = listener.local_endpoint()?;

        let running = Arc::clone(&listener);
        tokio::spawn(async move {
            let _ = running.run().await;
        });

        Ok(Self {
            endpoint,
            route_table,
            listener,
        })
    }

    pub async fn add_route(&self, route: RouteEntry) {
        self.route_table.post(route).await;
    }

    pub async fn connect(&self) -> io::Result<Stream> {
        self.endpoint.dial(TEST_TIMEOUT).await
    }
}

/// Open a session for `database` and read the backend's greeting.
#[allow(dead_code)]
pub async fn open_session(proxy: &ProxyHandle, database: &str) -> io::Result<(Stream, Frame)> {
    let mut client = proxy.connect().await?;
    send_startup(&mut client, database).await?;
    let first = read_frame(&mut client, DEFAULT_MAX_FRAME_LEN)
        .await
        .map_err(io::Error::other)?;
    Ok((client, first))
}

#[allow(dead_code)]
pub async fn send_startup(client: &mut Stream, database: &str) -> io::Result<()> {
    let params: StartupParams = [("user", "postgres"), ("database", database)]
        .into_iter()
        .collect();
    client.write_all(&Startup::new(params).encode()).await?;
    client.flush().await
}

#[allow(dead_code)]
pub async fn send_ssl_request(client: &mut Stream) -> io::Result<u8> {
    let mut packet = 8i32.to_be_bytes().to_vec();
    packet.extend_from_slice(&dog_wire::SSL_REQUEST_CODE.to_be_bytes());
    client.write_all(&packet).await?;
    client.flush().await?;
    client.read_u8().await
}

#[allow(dead_code)]
pub async fn send_cancel_request(client: &mut Stream) -> io::Result<()> {
    let mut packet = 16i32.to_be_bytes().to_vec();
    packet.extend_from_slice(&dog_wire::CANCEL_REQUEST_CODE.to_be_bytes());
    packet.extend_from_slice(&4242i32.to_be_bytes());
    packet.extend_from_slice(&7i32.to_be_bytes());
    client.write_all(&packet).await?;
    client.flush().await
}

/// Wait until `check` holds or the test timeout passes.
#[allow(dead_code)]
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
