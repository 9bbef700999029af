//! Listen and dial addresses.
//!
//! An address containing a path separator is a unix domain socket path;
//! anything else is a `host:port` TCP endpoint. The same rule applies to
//! the client listener, the admin listener and backend addresses.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::time::timeout;
use tracing::debug;

/// Default connect timeout for backend connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Where to listen or dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(String),
    Unix(PathBuf),
}

impl Endpoint {
    pub fn parse(addr: &str) -> Self {
        if addr.contains('/') {
            Endpoint::Unix(PathBuf::from(addr))
        } else {
            Endpoint::Tcp(addr.to_string())
        }
    }

    pub async fn bind(&self) -> io::Result<Acceptor> {
        match self {
            Endpoint::Tcp(addr) => Ok(Acceptor::Tcp(TcpListener::bind(addr.as_str()).await?)),
            Endpoint::Unix(path) => Ok(Acceptor::Unix {
                listener: UnixListener::bind(path)?,
                path: path.clone(),
            }),
        }
    }

    /// Connect, giving up after `connect_timeout`.
    pub async fn dial(&self, connect_timeout: Duration) -> io::Result<Stream> {
        debug!(addr = %self, "Dialing");
        let connect = async {
            match self {
                Endpoint::Tcp(addr) => {
                    let stream = TcpStream::connect(addr.as_str()).await?;
                    stream.set_nodelay(true)?;
                    Ok(Stream::Tcp(stream))
                }
                Endpoint::Unix(path) => Ok(Stream::Unix(UnixStream::connect(path).await?)),
            }
        };

        match timeout(connect_timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timeout")),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => f.write_str(addr),
            Endpoint::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A bound listener of either transport.
pub enum Acceptor {
    Tcp(TcpListener),
    Unix { listener: UnixListener, path: PathBuf },
}

impl Acceptor {
    /// Accept one connection, returning it with a printable peer label.
    pub async fn accept(&self) -> io::Result<(Stream, String)> {
        match self {
            Acceptor::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok((Stream::Tcp(stream), peer.to_string()))
            }
            Acceptor::Unix { listener, path } => {
                let (stream, _) = listener.accept().await?;
                Ok((Stream::Unix(stream), format!("unix:{}", path.display())))
            }
        }
    }

    /// The address actually bound, usable for dialing back.
    pub fn local_endpoint(&self) -> io::Result<Endpoint> {
        match self {
            Acceptor::Tcp(listener) => Ok(Endpoint::Tcp(listener.local_addr()?.to_string())),
            Acceptor::Unix { path, .. } => Ok(Endpoint::Unix(path.clone())),
        }
    }

    fn socket_path(&self) -> Option<&Path> {
        match self {
            Acceptor::Tcp(_) => None,
            Acceptor::Unix { path, .. } => Some(path),
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        if let Some(path) = self.socket_path() {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// A connected stream of either transport.
pub enum Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Stream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            Stream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_flush(cx),
            Stream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Stream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
