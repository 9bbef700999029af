//! # dog-wire
//!
//! Just enough of the PostgreSQL v3 frontend/backend framing for a
//! routing proxy:
//!
//! - decode the client's initial packet (startup, SSL/GSS negotiation,
//!   cancel) and re-encode a rewritten startup packet
//! - read and write whole tagged frames without looking inside them
//! - build an ErrorResponse to refuse a session
//!
//! Reference: <https://www.postgresql.org/docs/current/protocol-message-formats.html>

mod error;
mod frame;
mod startup;

use tokio::io::{AsyncRead, AsyncReadExt};

pub use error::WireError;
pub use frame::{read_frame, write_frame, Frame, DEFAULT_MAX_FRAME_LEN, ERROR_RESPONSE_TAG};
pub use startup::{
    read_initial, Initial, Startup, StartupParams, CANCEL_REQUEST_CODE, GSSENC_REQUEST_CODE,
    MAX_STARTUP_LEN, PROTOCOL_V3, SSL_REQUEST_CODE,
};

/// Fill `buf` completely.
///
/// End of stream before the first byte is a clean close; end of stream
/// after it is a truncated frame.
pub(crate) async fn read_prefix<R: AsyncRead + Unpin>(
    r: &mut R,
    buf: &mut [u8],
) -> Result<(), WireError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(if filled == 0 {
                WireError::Closed
            } else {
                std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into()
            });
        }
        filled += n;
    }
    Ok(())
}
