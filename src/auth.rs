//! Authentication hooks.
//!
//! Two seams, both thin:
//!
//! - [`PerRpcAuth`] lets the client attach credentials to every outgoing
//!   request as envelope metadata.
//! - [`server_auth_interceptor`] wraps a check function into a server
//!   interceptor that rejects a call before it reaches the handler.
//!
//! Transport-level authentication (TLS and friends) is a collaborator
//! concern; the core only carries the [`TransportAuth`] hook.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::TcpStream;

use crate::context::Context;
use crate::error::Result;
use crate::interceptor::{BoxFuture, ServerChain, ServerInterceptor};

/// Per-call credentials attached by the client.
#[async_trait]
pub trait PerRpcAuth: Send + Sync {
    /// Metadata to merge into the outgoing request envelope.
    async fn metadata(&self, ctx: &Context) -> Result<HashMap<String, Vec<u8>>>;
}

/// Static bearer-token credentials: sends `authorization: Bearer <token>`.
pub struct BearerTokenAuth {
    token: String,
}

impl BearerTokenAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl PerRpcAuth for BearerTokenAuth {
    async fn metadata(&self, _ctx: &Context) -> Result<HashMap<String, Vec<u8>>> {
        let mut md = HashMap::new();
        md.insert(
            "authorization".to_string(),
            format!("Bearer {}", self.token).into_bytes(),
        );
        Ok(md)
    }
}

/// Transport-level session authentication, run once per dialed connection
/// before it is handed to a call. Concrete implementations live outside
/// the core.
#[async_trait]
pub trait TransportAuth: Send + Sync {
    async fn handshake(&self, conn: &mut TcpStream) -> Result<()>;
}

/// Server-side check run before the handler. Return a framework error to
/// reject the call; its code and message travel back in the response
/// envelope.
pub type AuthFunc = dyn Fn(&Context) -> Result<()> + Send + Sync;

struct AuthInterceptor {
    check: Box<AuthFunc>,
}

impl ServerInterceptor for AuthInterceptor {
    fn intercept<'a>(&'a self, ctx: Context, next: ServerChain<'a>) -> BoxFuture<'a, Result<Bytes>> {
        Box::pin(async move {
            (self.check)(&ctx)?;
            next.run(ctx).await
        })
    }
}

/// Build a server interceptor from an auth check function.
///
/// The check typically inspects `ctx.server_metadata()` for credentials.
pub fn server_auth_interceptor<F>(check: F) -> Arc<dyn ServerInterceptor>
where
    F: Fn(&Context) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(AuthInterceptor {
        check: Box::new(check),
    })
}
