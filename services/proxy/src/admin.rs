//! Administrative endpoint.
//!
//! Line protocol: every line a client sends is one routing request, and
//! every request gets exactly one JSON line back:
//!
//! ```text
//! > [route 'fdr' [create [addr='/var/run/postgresql/.s.PGSQL.5432']]]
//! < {"ok":true,"result":{"route":{"id":"fdr",...}}}
//! > [route 'fdr' @ 1 [get]]
//! < {"ok":false,"error":{"kind":"target","message":"1:14: get cannot target ..."}}
//! ```
//!
//! Error kinds are `lex`, `syntax` and `target` for requests that do not
//! compile, and `exec` for directives the route table refuses. A line
//! longer than [`MAX_REQUEST_LINE`] or not valid UTF-8 gets a `request`
//! error and the connection is closed.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use dog_conf::compile;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn, Instrument};

use crate::exec::{execute, ExecOutcome};
use crate::proxy::{Acceptor, Endpoint, SharedRouteTable, Stream};

/// Longest request line the admin endpoint accepts, newline excluded.
pub const MAX_REQUEST_LINE: usize = 64 * 1024;

/// Reply to one request line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyError {
    pub kind: &'static str,
    pub message: String,
}

impl Reply {
    fn success(result: ExecOutcome) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    fn failure(kind: &'static str, message: String) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(ReplyError { kind, message }),
        }
    }
}

/// Compile and execute one request.
pub async fn handle_request(table: &SharedRouteTable, source: &str) -> Reply {
    let directive = match compile(source) {
        Ok(directive) => directive,
        Err(e) => {
            debug!(kind = e.kind(), error = %e, "Request rejected");
            return Reply::failure(e.kind(), e.to_string());
        }
    };

    let action = directive.action();
    match execute(table, directive).await {
        Ok(outcome) => Reply::success(outcome),
        Err(e) => {
            debug!(action, error = %e, "Directive failed");
            Reply::failure("exec", e.to_string())
        }
    }
}

/// Apply a file of requests, one per line. Blank lines and lines starting
/// with `#` are skipped. Stops at the first failing request.
pub async fn bootstrap(table: &SharedRouteTable, path: &Path) -> Result<usize> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read bootstrap file {}", path.display()))?;

    let mut applied = 0;
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let reply = handle_request(table, line).await;
        if let Some(err) = reply.error {
            bail!(
                "{}:{}: {} error: {}",
                path.display(),
                n + 1,
                err.kind,
                err.message
            );
        }
        applied += 1;
    }

    info!(path = %path.display(), applied, "Bootstrap requests applied");
    Ok(applied)
}

/// Listener for administrative connections.
pub struct AdminServer {
    acceptor: Acceptor,
    route_table: SharedRouteTable,
}

impl AdminServer {
    pub async fn bind(listen: &Endpoint, route_table: SharedRouteTable) -> io::Result<Self> {
        let acceptor = listen.bind().await?;
        info!(listen = %acceptor.local_endpoint()?, "Admin endpoint bound");
        Ok(Self {
            acceptor,
            route_table,
        })
    }

    pub fn local_endpoint(&self) -> io::Result<Endpoint> {
        self.acceptor.local_endpoint()
    }

    pub async fn run(self: Arc<Self>) -> io::Result<()> {
        loop {
            match self.acceptor.accept().await {
                Ok((stream, peer)) => {
                    let table = Arc::clone(&self.route_table);
                    tokio::spawn(
                        async move {
                            if let Err(e) = serve(stream, table).await {
                                warn!(error = %e, "Admin connection error");
                            }
                        }
                        .instrument(tracing::info_span!("admin", peer = %peer)),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Admin accept error");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn serve(stream: Stream, table: SharedRouteTable) -> Result<()> {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let n = (&mut reader)
            .take(MAX_REQUEST_LINE as u64 + 1)
            .read_until(b'\n', &mut buf)
            .await?;
        if n == 0 {
            break;
        }

        let reply = match request_line(&buf) {
            Ok(line) if line.is_empty() => continue,
            Ok(line) => handle_request(&table, line).await,
            Err(message) => {
                warn!(len = buf.len(), "Dropping malformed admin request");
                write_reply(&mut writer, &Reply::failure("request", message)).await?;
                break;
            }
        };
        write_reply(&mut writer, &reply).await?;
    }

    debug!("Admin connection closed");
    Ok(())
}

/// The trimmed text of one raw line, newline included if present.
fn request_line(buf: &[u8]) -> std::result::Result<&str, String> {
    let body = buf.strip_suffix(b"\n").unwrap_or(buf);
    if body.len() > MAX_REQUEST_LINE {
        return Err(format!(
            "request line exceeds {} bytes",
            MAX_REQUEST_LINE
        ));
    }
    std::str::from_utf8(body)
        .map(str::trim)
        .map_err(|_| "request line is not valid UTF-8".to_string())
}

async fn write_reply<W>(writer: &mut W, reply: &Reply) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let json = serde_json::to_string(reply).context("failed to serialize reply")?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::RouteTable;
    use std::io::Write;

    fn table() -> SharedRouteTable {
        Arc::new(RouteTable::new())
    }

    #[tokio::test]
    async fn test_reply_kinds() {
        let table = table();

        let reply = handle_request(&table, "[route 'bar' [create [addr='h:1']]]").await;
        assert!(reply.ok);

        for (source, kind) in [
            ("[route 'bar", "lex"),
            ("[route 'bar' @ 137 [delete]", "syntax"),
            ("[route 'bar' @ 137 [get]]", "target"),
            ("[route 'bar' @ 9 [delete]]", "exec"),
        ] {
            let reply = handle_request(&table, source).await;
            assert!(!reply.ok, "{source}");
            assert_eq!(reply.error.unwrap().kind, kind, "{source}");
        }
    }

    #[tokio::test]
    async fn test_reply_json_shape() {
        let table = table();
        let reply = handle_request(&table, "[route all [delete]]").await;
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            serde_json::json!({ "ok": true, "result": { "deleted": 0 } })
        );

        let reply = handle_request(&table, "[route 'x' [get]]").await;
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            serde_json::json!({
                "ok": false,
                "error": { "kind": "exec", "message": "route 'x' not found" }
            })
        );
    }

    #[tokio::test]
    async fn test_bootstrap_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# routes for the test cluster").unwrap();
        writeln!(file, "[route 'fdr' [create [addr='/var/run/postgresql/.s.PGSQL.5432']]]").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "[route 'acct' [create [addr='10.0.0.5:5432', dbnameRewritten='acct_v2']]]").unwrap();

        let table = table();
        assert_eq!(bootstrap(&table, file.path()).await.unwrap(), 2);
        assert_eq!(table.lookup("acct").await.unwrap().dbname_out, "acct_v2");
    }

    #[tokio::test]
    async fn test_bootstrap_stops_at_bad_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[route 'a' [create [addr='h:1']]]").unwrap();
        writeln!(file, "[route 'a' [create [addr='h:2']]]").unwrap();

        let table = table();
        let err = bootstrap(&table, file.path()).await.unwrap_err();
        assert!(err.to_string().contains(":2: exec error"));
    }

    #[tokio::test]
    async fn test_admin_line_protocol() {
        let table = table();
        let server = AdminServer::bind(&Endpoint::parse("127.0.0.1:0"), Arc::clone(&table))
            .await
            .unwrap();
        let endpoint = server.local_endpoint().unwrap();
        let handle = tokio::spawn(Arc::new(server).run());

        let stream = endpoint.dial(Duration::from_secs(2)).await.unwrap();
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();

        writer
            .write_all(b"[route 'fdr' [create [addr='h:1']]]\n\n[route all [get]]\n")
            .await
            .unwrap();

        let first: serde_json::Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first["ok"], true);
        assert_eq!(first["result"]["route"]["ocn"], 1);

        let second: serde_json::Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(second["result"]["routes"][0]["id"], "fdr");

        assert!(table.lookup("fdr").await.is_some());
        handle.abort();
    }

    #[test]
    fn test_request_line() {
        assert_eq!(request_line(b"  [route all [get]] \n"), Ok("[route all [get]]"));
        assert_eq!(request_line(b"\n"), Ok(""));
        assert!(request_line(&[0xff, b'\n']).is_err());
        assert!(request_line(&vec![b'x'; MAX_REQUEST_LINE]).is_ok());
        assert!(request_line(&vec![b'x'; MAX_REQUEST_LINE + 1]).is_err());
    }

    #[tokio::test]
    async fn test_admin_overlong_line_closes_connection() {
        let table = table();
        let server = AdminServer::bind(&Endpoint::parse("127.0.0.1:0"), Arc::clone(&table))
            .await
            .unwrap();
        let endpoint = server.local_endpoint().unwrap();
        let handle = tokio::spawn(Arc::new(server).run());

        let stream = endpoint.dial(Duration::from_secs(2)).await.unwrap();
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(&vec![b'['; MAX_REQUEST_LINE + 1]).await.unwrap();

        let reply: serde_json::Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["ok"], false);
        assert_eq!(reply["error"]["kind"], "request");

        // the server hangs up instead of buffering the rest of the line
        assert!(lines.next_line().await.unwrap().is_none());
        handle.abort();
    }
}
