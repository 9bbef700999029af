//! Regular (post-startup) frames.
//!
//! Wire format:
//! - 1 byte message type
//! - 4 bytes length, inclusive of itself but not of the type byte
//! - body
//!
//! The proxy treats bodies as opaque. The only frame it builds itself is
//! an ErrorResponse for sessions it refuses.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::WireError;
use crate::read_prefix;

/// Largest frame the proxy relays by default (1 GiB, the server's own limit).
pub const DEFAULT_MAX_FRAME_LEN: usize = 1 << 30;

/// ErrorResponse message type.
pub const ERROR_RESPONSE_TAG: u8 = b'E';

/// A tagged protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: u8,
    pub body: Bytes,
}

impl Frame {
    pub fn new(tag: u8, body: impl Into<Bytes>) -> Self {
        Self {
            tag,
            body: body.into(),
        }
    }

    /// Build a FATAL ErrorResponse with the given SQLSTATE and message.
    pub fn error_response(sqlstate: &str, message: &str) -> Self {
        let mut body = BytesMut::new();
        for (field, value) in [(b'S', "FATAL"), (b'V', "FATAL"), (b'C', sqlstate), (b'M', message)] {
            body.put_u8(field);
            body.extend_from_slice(value.as_bytes());
            body.put_u8(0);
        }
        body.put_u8(0);
        Self::new(ERROR_RESPONSE_TAG, body.freeze())
    }

    /// Look up a field of an ErrorResponse or NoticeResponse body.
    pub fn error_field(&self, field: u8) -> Option<&str> {
        let mut rest = &self.body[..];
        while let Some((&code, tail)) = rest.split_first() {
            if code == 0 {
                return None;
            }
            let nul = tail.iter().position(|&b| b == 0)?;
            if code == field {
                return std::str::from_utf8(&tail[..nul]).ok();
            }
            rest = &tail[nul + 1..];
        }
        None
    }

    /// Encoded size on the wire.
    pub fn wire_len(&self) -> usize {
        1 + 4 + self.body.len()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        buf.put_u8(self.tag);
        buf.put_i32((4 + self.body.len()) as i32);
        buf.extend_from_slice(&self.body);
        buf.freeze()
    }
}

/// Read one frame.
///
/// Returns [`WireError::Closed`] if the stream ends exactly at a frame
/// boundary.
pub async fn read_frame<R: AsyncRead + Unpin>(
    r: &mut R,
    max_len: usize,
) -> Result<Frame, WireError> {
    let mut header = [0u8; 5];
    read_prefix(r, &mut header).await?;

    let tag = header[0];
    let len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if len < 4 || len as usize > max_len {
        return Err(WireError::BadLength {
            len: len.into(),
            min: 4,
            max: max_len,
        });
    }

    let mut body = vec![0u8; len as usize - 4];
    r.read_exact(&mut body).await?;

    Ok(Frame::new(tag, body))
}

/// Write one frame and flush it.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, frame: &Frame) -> Result<(), WireError> {
    w.write_all(&frame.encode()).await?;
    w.flush().await?;
    Ok(())
}
