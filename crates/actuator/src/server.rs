//! Single-connection TCP control service.
//!
//! One request is served at a time: the accept loop does not spawn, so a
//! watering cycle holds the loop for its whole duration and the valve/pump
//! pair never sees two callers. A second client waits in the backlog.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket};
use tracing::{debug, error, info, warn};

use crate::actions::ActionTable;
use crate::hardware::Hardware;
use crate::protocol::{self, Response, MAX_REQUEST_BYTES};
use crate::watering::Timing;

/// Pending connections beyond the one being served.
const LISTEN_BACKLOG: u32 = 1;

pub(crate) fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .context("failed to create socket")?;
    socket.set_reuseaddr(true).context("failed to set SO_REUSEADDR")?;
    socket
        .bind(addr)
        .with_context(|| format!("failed to bind {addr}"))?;
    socket
        .listen(LISTEN_BACKLOG)
        .with_context(|| format!("failed to listen on {addr}"))
}

/// Serve forever. Returns only on a fault outside action dispatch, which the
/// caller treats as fatal.
pub(crate) async fn serve<H: Hardware>(
    listener: TcpListener,
    actions: &ActionTable,
    hw: &mut H,
    timing: &Timing,
) -> Result<()> {
    info!(addr = ?listener.local_addr().ok(), "listening for connections");
    loop {
        let (stream, peer) = listener.accept().await.context("accept failed")?;
        debug!(%peer, "connection accepted");
        handle_connection(stream, actions, hw, timing)
            .await
            .with_context(|| format!("connection from {peer}"))?;
    }
}

/// Read one request, run it, answer, close. The stream is dropped (closed) on
/// every return path. Failing to read the request or to send the answer is
/// an error for the caller; anything inside dispatch is answered `false`.
pub(crate) async fn handle_connection<S, H>(
    mut stream: S,
    actions: &ActionTable,
    hw: &mut H,
    timing: &Timing,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Hardware,
{
    let payload = match read_payload(&mut stream).await {
        Ok(payload) => payload,
        Err(e) => {
            // Best effort: the peer may already be gone.
            let reply = Response { success: false }.to_bytes();
            if let Err(send_err) = stream.write_all(&reply).await {
                debug!("could not report read failure: {send_err}");
            }
            return Err(e).context("failed to read request");
        }
    };
    let success = process(&payload, actions, hw, timing).await;

    stream
        .write_all(&Response { success }.to_bytes())
        .await
        .context("failed to send response")?;
    if let Err(e) = stream.shutdown().await {
        debug!("shutdown after response failed: {e}");
    }
    Ok(())
}

/// Drain the socket until the peer closes its write side. Reads at most one
/// byte past the limit so an oversized payload is detected without buffering
/// all of it.
async fn read_payload<S: AsyncRead + Unpin>(stream: &mut S) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    stream
        .take(MAX_REQUEST_BYTES as u64 + 1)
        .read_to_end(&mut buf)
        .await?;
    Ok(buf)
}

async fn process<H: Hardware>(
    payload: &[u8],
    actions: &ActionTable,
    hw: &mut H,
    timing: &Timing,
) -> bool {
    let request = match protocol::parse_request(payload, actions) {
        Ok(r) => r,
        Err(rejection) => {
            warn!(%rejection, "received invalid payload");
            return false;
        }
    };

    let action = request.action;
    match action.invoke(request.args, hw, timing).await {
        Ok(success) => {
            info!(action = action.name(), success, "request handled");
            success
        }
        Err(e) => {
            error!(action = action.name(), "exception while processing request: {e:#}");
            false
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
