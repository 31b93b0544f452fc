//! Client-side transport: one request/response exchange per call.

use std::future::Future;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::Framer;
use crate::context::Context;
use crate::error::{Code, NovaError, Result};
use crate::pool::ConnectionPool;
use crate::selector::Selector;

/// Wiring the client transport needs to reach a peer.
pub struct ClientTransportOptions {
    pub network: String,
    pub pool: Arc<ConnectionPool>,
    pub selector: Arc<dyn Selector>,
}

/// Sends one complete request frame and reads one response frame.
///
/// No retries happen here: every failure surfaces to the caller, and a
/// connection that saw an I/O error is dropped instead of returned to the
/// pool.
pub struct ClientTransport {
    opts: ClientTransportOptions,
}

impl ClientTransport {
    pub fn new(opts: ClientTransportOptions) -> Self {
        Self { opts }
    }

    /// Resolve a node for the call's service, borrow a connection, write
    /// the frame, read the response frame.
    ///
    /// The context deadline bounds every step; exceeding it fails with
    /// `Timeout`.
    pub async fn send(&self, ctx: &Context, frame: &[u8]) -> Result<Vec<u8>> {
        let node = self.opts.selector.select(&ctx.call().service).await?;
        let mut conn = self.opts.pool.get(&self.opts.network, &node.address).await?;

        match Self::exchange(ctx, &mut conn, frame).await {
            Ok(response) => {
                self.opts
                    .pool
                    .put(&self.opts.network, &node.address, conn)
                    .await;
                Ok(response)
            }
            // The stream may hold half a message; dropping the connection
            // closes it.
            Err(err) => Err(err),
        }
    }

    async fn exchange(ctx: &Context, conn: &mut TcpStream, frame: &[u8]) -> Result<Vec<u8>> {
        with_deadline(ctx, conn.write_all(frame))
            .await?
            .map_err(|e| NovaError::rpc(Code::ClientNetwork, format!("write failed: {e}")))?;

        let mut framer = Framer::new();
        let response = with_deadline(ctx, framer.read_frame(conn))
            .await?
            .map_err(|e| match e {
                NovaError::Io(io) => {
                    NovaError::rpc(Code::ClientNetwork, format!("read failed: {io}"))
                }
                other => other,
            })?;

        response.ok_or_else(|| {
            NovaError::rpc(
                Code::ClientNetwork,
                "connection closed before response".to_string(),
            )
        })
    }
}

/// Bound a future by the context deadline, if one is set.
async fn with_deadline<F>(ctx: &Context, fut: F) -> Result<F::Output>
where
    F: Future,
{
    match ctx.remaining() {
        Some(remaining) => tokio::time::timeout(remaining, fut)
            .await
            .map_err(|_| NovaError::timeout("deadline exceeded")),
        None => Ok(fut.await),
    }
}
