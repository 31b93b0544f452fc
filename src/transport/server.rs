//! Server-side transport: listen, accept, per-connection workers.
//!
//! One accept loop per listener, one worker per accepted connection.
//! Requests on a connection are handled strictly in order; failures on one
//! connection never touch another.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;

use super::Framer;
use crate::codec::frame::{encode_frame_with, FrameHeader, FRAME_HEAD_LEN};
use crate::context::Context;
use crate::error::{Code, NovaError, Result};

/// Turns one request envelope into one complete response frame.
///
/// The service dispatcher implements this; the transport stays ignorant of
/// envelopes and routing.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, ctx: Context, request: &[u8]) -> Result<Vec<u8>>;
}

/// Server transport configuration.
#[derive(Clone)]
pub struct ServerTransportOptions {
    /// Listen address, e.g. `127.0.0.1:8000`.
    pub address: String,
    /// `tcp`, `tcp4` or `tcp6`. Datagram networks are not supported.
    pub network: String,
    /// When set, SO_KEEPALIVE is enabled on the listener; accepted
    /// sockets inherit it.
    pub keep_alive_period: Option<Duration>,
}

impl Default for ServerTransportOptions {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:0".to_string(),
            network: "tcp".to_string(),
            keep_alive_period: None,
        }
    }
}

/// Maximum backoff after a transient accept failure.
const MAX_ACCEPT_DELAY: Duration = Duration::from_secs(1);

/// The default stream server transport.
pub struct ServerTransport {
    opts: ServerTransportOptions,
    handler: Arc<dyn RequestHandler>,
}

impl ServerTransport {
    pub fn new(opts: ServerTransportOptions, handler: Arc<dyn RequestHandler>) -> Self {
        Self { opts, handler }
    }

    /// Bind the listener and spawn the accept loop, returning the bound
    /// address immediately so callers can register shutdown hooks.
    ///
    /// Cancelling `cancel` stops the accept loop, closes the listener and
    /// unblocks connection workers at their next checkpoint.
    pub async fn listen_and_serve(&self, cancel: CancellationToken) -> Result<SocketAddr> {
        match self.opts.network.as_str() {
            "tcp" | "tcp4" | "tcp6" => {}
            other => {
                return Err(NovaError::rpc(
                    Code::NetworkNotSupported,
                    format!("network {other} is not supported"),
                ));
            }
        }

        let addr = tokio::net::lookup_host(&self.opts.address)
            .await?
            .next()
            .ok_or_else(|| {
                NovaError::rpc(
                    Code::NetworkNotSupported,
                    format!("cannot resolve listen address {}", self.opts.address),
                )
            })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        if self.opts.keep_alive_period.is_some() {
            socket.set_keepalive(true)?;
        }
        socket.bind(addr)?;
        let listener = socket.listen(1024)?;
        let local_addr = listener.local_addr()?;

        let handler = self.handler.clone();
        tokio::spawn(accept_loop(listener, handler, cancel));

        Ok(local_addr)
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn RequestHandler>,
    cancel: CancellationToken,
) {
    let mut delay = Duration::ZERO;

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((conn, peer)) => {
                delay = Duration::ZERO;
                tracing::debug!(%peer, "connection established");

                let handler = handler.clone();
                let conn_cancel = cancel.child_token();
                tokio::spawn(async move {
                    if let Err(e) = handle_conn(conn, handler, conn_cancel).await {
                        tracing::error!(%peer, error = %e, "connection worker failed");
                    }
                });
            }
            Err(e) if is_transient(&e) => {
                delay = if delay.is_zero() {
                    Duration::from_millis(5)
                } else {
                    (delay * 2).min(MAX_ACCEPT_DELAY)
                };
                tracing::warn!(error = %e, backoff_ms = delay.as_millis() as u64,
                    "transient accept error");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                break;
            }
        }
    }
    // Dropping the listener closes it.
}

/// Accept errors worth retrying after a backoff.
fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
    )
}

/// Per-connection worker: one request is processed fully before the next
/// is read. Returning (on error or EOF) drops and thereby closes the
/// connection.
async fn handle_conn(
    mut conn: TcpStream,
    handler: Arc<dyn RequestHandler>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut framer = Framer::new();

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = framer.read_frame(&mut conn) => frame?,
        };
        let Some(frame) = frame else {
            // Clean EOF between frames.
            return Ok(());
        };

        let header = FrameHeader::decode(&frame)
            .ok_or_else(|| NovaError::client_msg("frame shorter than header"))?;

        if header.is_heartbeat() {
            let pong = encode_frame_with(FrameHeader::heartbeat(), &[])?;
            conn.write_all(&pong).await?;
            continue;
        }

        let ctx = Context::with_cancellation(cancel.clone());
        let response = handler.handle(ctx, &frame[FRAME_HEAD_LEN..]).await?;

        if cancel.is_cancelled() {
            return Ok(());
        }
        // A failed write leaves the peer mid-message; close the connection.
        conn.write_all(&response).await?;
    }
}
