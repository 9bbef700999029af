//! The initial packet a client sends.
//!
//! Wire format (no type byte, for historical reasons):
//! - 4 bytes length, inclusive of itself
//! - 4 bytes request code
//! - body
//!
//! For a startup packet (code 196608, protocol 3.0) the body is a list of
//! NUL-terminated key/value strings closed by an empty key.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::WireError;
use crate::read_prefix;

/// Protocol version 3.0.
pub const PROTOCOL_V3: i32 = 196608;

/// Request code of an SSLRequest packet.
pub const SSL_REQUEST_CODE: i32 = 80877103;

/// Request code of a GSSENCRequest packet.
pub const GSSENC_REQUEST_CODE: i32 = 80877104;

/// Request code of a CancelRequest packet.
pub const CANCEL_REQUEST_CODE: i32 = 80877102;

/// Upper bound on the initial packet, as enforced by PostgreSQL itself.
pub const MAX_STARTUP_LEN: usize = 10000;

/// Length + request code.
const MIN_STARTUP_LEN: usize = 8;

/// Startup parameters in the order the client sent them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupParams(Vec<(String, String)>);

impl StartupParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set `key` to `value`, replacing an existing entry in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StartupParams {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut params = StartupParams::new();
        for (k, v) in iter {
            params.set(k, v);
        }
        params
    }
}

/// A protocol 3 startup packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Startup {
    pub protocol: i32,
    pub params: StartupParams,
}

impl Startup {
    pub fn new(params: StartupParams) -> Self {
        Self {
            protocol: PROTOCOL_V3,
            params,
        }
    }

    /// The requested database name.
    pub fn database(&self) -> Option<&str> {
        self.params.get("database")
    }

    /// Encode back into wire form.
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::new();
        body.put_i32(self.protocol);
        for (k, v) in self.params.iter() {
            put_cstr(&mut body, k);
            put_cstr(&mut body, v);
        }
        body.put_u8(0);

        let mut buf = BytesMut::with_capacity(4 + body.len());
        buf.put_i32((4 + body.len()) as i32);
        buf.extend_from_slice(&body);
        buf.freeze()
    }

    fn decode(protocol: i32, mut body: &[u8]) -> Result<Self, WireError> {
        let mut params = StartupParams::new();
        loop {
            let key = take_cstr(&mut body)?;
            if key.is_empty() {
                break;
            }
            let value = take_cstr(&mut body)?;
            params.set(key, value);
        }
        if !body.is_empty() {
            return Err(WireError::MalformedStartup(format!(
                "{} trailing bytes after parameter list",
                body.len()
            )));
        }
        Ok(Self { protocol, params })
    }
}

/// What a client opened its session with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Initial {
    Startup(Startup),
    SslRequest,
    GssEncRequest,
    Cancel { process_id: i32, secret_key: i32 },
    Unknown { code: i32 },
}

impl Initial {
    pub fn describe(&self) -> &'static str {
        match self {
            Initial::Startup(_) => "startup",
            Initial::SslRequest => "ssl request",
            Initial::GssEncRequest => "gssenc request",
            Initial::Cancel { .. } => "cancel request",
            Initial::Unknown { .. } => "unknown initial packet",
        }
    }
}

/// Read the initial packet of a session.
///
/// Returns [`WireError::Closed`] if the stream ends before the first byte.
pub async fn read_initial<R: AsyncRead + Unpin>(r: &mut R) -> Result<Initial, WireError> {
    let mut len_buf = [0u8; 4];
    read_prefix(r, &mut len_buf).await?;

    let len = i32::from_be_bytes(len_buf);
    if len < MIN_STARTUP_LEN as i32 || len as usize > MAX_STARTUP_LEN {
        return Err(WireError::BadLength {
            len: len.into(),
            min: MIN_STARTUP_LEN,
            max: MAX_STARTUP_LEN,
        });
    }

    let mut body = vec![0u8; len as usize - 4];
    r.read_exact(&mut body).await?;

    let code = i32::from_be_bytes([body[0], body[1], body[2], body[3]]);
    let rest = &body[4..];

    Ok(match code {
        PROTOCOL_V3 => Initial::Startup(Startup::decode(code, rest)?),
        SSL_REQUEST_CODE => Initial::SslRequest,
        GSSENC_REQUEST_CODE => Initial::GssEncRequest,
        CANCEL_REQUEST_CODE if rest.len() == 8 => Initial::Cancel {
            process_id: i32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]),
            secret_key: i32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]),
        },
        code => Initial::Unknown { code },
    })
}

fn put_cstr(buf: &mut BytesMut, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.put_u8(0);
}

fn take_cstr(body: &mut &[u8]) -> Result<String, WireError> {
    let nul = body
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| WireError::MalformedStartup("unterminated string".to_string()))?;
    let s = std::str::from_utf8(&body[..nul])
        .map_err(|e| WireError::MalformedStartup(e.to_string()))?
        .to_string();
    *body = &body[nul + 1..];
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn startup(params: &[(&str, &str)]) -> Startup {
        Startup::new(params.iter().copied().collect())
    }

    #[tokio::test]
    async fn test_startup_decodes_what_encode_wrote() {
        let original = startup(&[("user", "alice"), ("database", "fdr")]);
        let bytes = original.encode();

        let mut reader = &bytes[..];
        match read_initial(&mut reader).await.unwrap() {
            Initial::Startup(decoded) => {
                assert_eq!(decoded, original);
                assert_eq!(decoded.database(), Some("fdr"));
            }
            other => panic!("expected startup, got {:?}", other),
        }
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut params: StartupParams = [("user", "a"), ("database", "x"), ("app", "y")]
            .into_iter()
            .collect();
        params.set("database", "z");
        let keys: Vec<_> = params.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["user", "database", "app"]);
        assert_eq!(params.get("database"), Some("z"));
        assert_eq!(params.len(), 3);
    }

    #[tokio::test]
    async fn test_ssl_request() {
        let bytes = [0u8, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f];
        let mut reader = &bytes[..];
        assert_eq!(read_initial(&mut reader).await.unwrap(), Initial::SslRequest);
    }

    #[tokio::test]
    async fn test_cancel_request() {
        let mut bytes = vec![0u8, 0, 0, 16];
        bytes.extend_from_slice(&CANCEL_REQUEST_CODE.to_be_bytes());
        bytes.extend_from_slice(&7i32.to_be_bytes());
        bytes.extend_from_slice(&9i32.to_be_bytes());
        let mut reader = &bytes[..];
        assert_eq!(
            read_initial(&mut reader).await.unwrap(),
            Initial::Cancel {
                process_id: 7,
                secret_key: 9
            }
        );
    }

    #[tokio::test]
    async fn test_empty_stream_is_closed() {
        let mut reader: &[u8] = &[];
        assert!(read_initial(&mut reader).await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_oversized_startup_rejected() {
        let bytes = 20000i32.to_be_bytes();
        let mut reader = &bytes[..];
        assert!(matches!(
            read_initial(&mut reader).await,
            Err(WireError::BadLength { len: 20000, .. })
        ));
    }

    #[tokio::test]
    async fn test_unterminated_param_is_malformed() {
        let mut body = PROTOCOL_V3.to_be_bytes().to_vec();
        body.extend_from_slice(b"user\0alice");
        let mut bytes = ((body.len() + 4) as i32).to_be_bytes().to_vec();
        bytes.extend_from_slice(&body);
        let mut reader = &bytes[..];
        assert!(matches!(
            read_initial(&mut reader).await,
            Err(WireError::MalformedStartup(_))
        ));
    }
}
