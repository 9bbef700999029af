//! Frame relay between a client and its backend.
//!
//! Each direction runs as its own pump task that reads one frame from its
//! source and writes it unchanged to its destination. The first pump to
//! stop, cleanly or not, ends the whole session.

use std::fmt;
use std::io;
use std::time::Duration;

use dog_wire::{read_frame, write_frame, Frame, WireError, DEFAULT_MAX_FRAME_LEN};
use tokio::io::{split, AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tracing::trace;

/// Which way a pump moves frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToBackend,
    BackendToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToBackend => f.write_str("client->backend"),
            Direction::BackendToClient => f.write_str("backend->client"),
        }
    }
}

/// How a relay session finished.
#[derive(Debug)]
pub struct RelayEnd {
    pub direction: Direction,
    pub error: WireError,
}

impl RelayEnd {
    /// The source side closed at a frame boundary.
    pub fn is_clean(&self) -> bool {
        self.error.is_closed()
    }
}

/// Relay settings, built once at startup and shared by every session.
#[derive(Debug, Clone)]
pub struct Relay {
    idle_timeout: Option<Duration>,
    max_frame_len: usize,
}

impl Default for Relay {
    fn default() -> Self {
        Self {
            idle_timeout: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl Relay {
    pub fn new(idle_timeout: Option<Duration>, max_frame_len: usize) -> Self {
        Self {
            idle_timeout,
            max_frame_len,
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Relay frames both ways until either pump stops.
    ///
    /// Both pumps are aborted and both connections dropped before this
    /// returns.
    pub async fn run<C, B>(&self, client: C, backend: B) -> RelayEnd
    where
        C: AsyncRead + AsyncWrite + Send + 'static,
        B: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (client_rx, client_tx) = split(client);
        let (backend_rx, backend_tx) = split(backend);
        let (done_tx, mut done_rx) = mpsc::channel(2);

        let upstream = tokio::spawn(self.clone().pump(
            Direction::ClientToBackend,
            client_rx,
            backend_tx,
            done_tx.clone(),
        ));
        let downstream = tokio::spawn(self.clone().pump(
            Direction::BackendToClient,
            backend_rx,
            client_tx,
            done_tx,
        ));

        let end = done_rx.recv().await.unwrap_or_else(|| RelayEnd {
            direction: Direction::ClientToBackend,
            error: io::Error::other("relay pumps exited without reporting").into(),
        });

        upstream.abort();
        downstream.abort();
        let _ = upstream.await;
        let _ = downstream.await;

        end
    }

    async fn pump<R, W>(
        self,
        direction: Direction,
        mut src: ReadHalf<R>,
        mut dst: WriteHalf<W>,
        done: mpsc::Sender<RelayEnd>,
    ) where
        R: AsyncRead,
        W: AsyncWrite,
    {
        let error = loop {
            let frame = match self.next_frame(&mut src).await {
                Ok(frame) => frame,
                Err(e) => break e,
            };
            trace!(%direction, tag = %char::from(frame.tag), len = frame.body.len(), "Relaying frame");
            if let Err(e) = write_frame(&mut dst, &frame).await {
                break e;
            }
        };

        let _ = done.send(RelayEnd { direction, error }).await;
    }

    async fn next_frame<R: AsyncRead>(&self, src: &mut ReadHalf<R>) -> Result<Frame, WireError> {
        match self.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, read_frame(src, self.max_frame_len)).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "idle timeout").into()),
            },
            None => read_frame(src, self.max_frame_len).await,
        }
    }
}
