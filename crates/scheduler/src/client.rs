//! TCP client for the actuator's control service.

use serde::Serialize;
use serde_json::Value;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Responses are a single small JSON object; anything longer is cut off and
/// fails to parse.
const MAX_RESPONSE_BYTES: u64 = 1024;

#[derive(Debug, Error)]
pub(crate) enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: String, source: io::Error },
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("actuator unresponsive after {0:?}")]
    Unresponsive(Duration),
    #[error("protocol error: {0}")]
    Protocol(String),
}

#[derive(Serialize)]
struct WaterRequest {
    request: &'static str,
    args: WaterArgs,
}

#[derive(Serialize)]
struct WaterArgs {
    duration: u64,
}

/// Anything that can carry out one watering attempt.
pub(crate) trait WateringClient {
    /// `Ok(true)` only when the actuator reports a completed cycle.
    async fn water(&self, duration_sec: u64) -> Result<bool, ClientError>;
}

pub(crate) struct ControlClient {
    addr: String,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl ControlClient {
    pub(crate) fn new(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        response_timeout: Duration,
    ) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            connect_timeout,
            response_timeout,
        }
    }

    async fn connect(&self) -> Result<TcpStream, ClientError> {
        let attempt = match timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await {
            Ok(res) => res,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no answer within {:?}", self.connect_timeout),
            )),
        };
        attempt.map_err(|source| ClientError::Connect {
            addr: self.addr.clone(),
            source,
        })
    }

    async fn exchange(&self, stream: &mut TcpStream, duration_sec: u64) -> Result<bool, ClientError> {
        let mut payload = serde_json::to_vec(&WaterRequest {
            request: "water",
            args: WaterArgs {
                duration: duration_sec,
            },
        })
        .map_err(|e| ClientError::Protocol(format!("failed to encode request: {e}")))?;
        payload.push(b'\n');

        stream.write_all(&payload).await?;
        // End of request: the service reads until we stop writing.
        stream.shutdown().await?;

        let mut buf = Vec::new();
        let mut limited = (&mut *stream).take(MAX_RESPONSE_BYTES);
        match timeout(self.response_timeout, limited.read_to_end(&mut buf)).await {
            Ok(res) => {
                res?;
            }
            Err(_) => return Err(ClientError::Unresponsive(self.response_timeout)),
        }

        debug!(response = %String::from_utf8_lossy(&buf), "actuator replied");
        parse_response(&buf)
    }
}

impl WateringClient for ControlClient {
    async fn water(&self, duration_sec: u64) -> Result<bool, ClientError> {
        let mut stream = self.connect().await?;
        self.exchange(&mut stream, duration_sec).await
    }
}

fn parse_response(buf: &[u8]) -> Result<bool, ClientError> {
    let doc: Value = serde_json::from_slice(buf)
        .map_err(|e| ClientError::Protocol(format!("response is not json: {e}")))?;
    match doc.get("success") {
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(ClientError::Protocol(format!(
            "success was not a bool: {other}"
        ))),
        None => Err(ClientError::Protocol("response has no success field".into())),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Accept one connection, capture the request, answer with `reply`.
    async fn one_shot_server(reply: &'static [u8]) -> (u16, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            conn.read_to_end(&mut request).await.unwrap();
            conn.write_all(reply).await.unwrap();
            request
        });
        (port, handle)
    }

    fn client(port: u16) -> ControlClient {
        ControlClient::new("127.0.0.1", port, Duration::from_secs(5), Duration::from_secs(5))
    }

    // -- parse_response -----------------------------------------------------

    #[test]
    fn parse_bool_success() {
        assert!(parse_response(b"{\"success\": true}").unwrap());
        assert!(!parse_response(b"{\"success\":false}").unwrap());
    }

    #[test]
    fn parse_non_bool_is_protocol_error() {
        for bad in [&b"{\"success\": 1}"[..], b"{\"success\": \"true\"}", b"{}", b"garbage", b""] {
            assert!(
                matches!(parse_response(bad), Err(ClientError::Protocol(_))),
                "{}",
                String::from_utf8_lossy(bad)
            );
        }
    }

    // -- Over TCP -----------------------------------------------------------

    #[tokio::test]
    async fn sends_newline_terminated_request_and_reads_success() {
        let (port, server) = one_shot_server(b"{\"success\": true}").await;
        assert!(client(port).water(60).await.unwrap());

        let request = server.await.unwrap();
        assert_eq!(request.last(), Some(&b'\n'));
        let v: Value = serde_json::from_slice(&request).unwrap();
        assert_eq!(v, serde_json::json!({"request": "water", "args": {"duration": 60}}));
    }

    #[tokio::test]
    async fn failure_reply_is_false() {
        let (port, _server) = one_shot_server(b"{\"success\": false}").await;
        assert!(!client(port).water(60).await.unwrap());
    }

    #[tokio::test]
    async fn non_bool_reply_is_protocol_error() {
        let (port, _server) = one_shot_server(b"{\"success\": \"yes\"}").await;
        let err = client(port).water(60).await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)), "got {err}");
    }

    #[tokio::test]
    async fn refused_connection_is_connect_error() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let err = client(port).water(60).await.unwrap_err();
        assert!(matches!(err, ClientError::Connect { .. }), "got {err}");
    }

    #[tokio::test]
    async fn silent_actuator_is_unresponsive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (conn, _) = listener.accept().await.unwrap();
            // Hold the connection open without answering.
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(conn);
        });

        let c = ControlClient::new(
            "127.0.0.1",
            port,
            Duration::from_secs(5),
            Duration::from_millis(100),
        );
        let err = c.water(60).await.unwrap_err();
        assert!(matches!(err, ClientError::Unresponsive(_)), "got {err}");
    }

    #[tokio::test]
    async fn unroutable_actuator_gives_up_after_connect_timeout() {
        // TEST-NET-1: never answers; some hosts refuse it outright instead.
        let c = ControlClient::new(
            "192.0.2.1",
            8081,
            Duration::from_millis(200),
            Duration::from_secs(60),
        );
        let res = tokio::time::timeout(Duration::from_secs(5), c.water(60)).await;
        let err = res.expect("connect should give up on its own").unwrap_err();
        assert!(matches!(err, ClientError::Connect { .. }), "got {err}");
    }
}
