//! Client core: options and the invoke pipeline.
//!
//! A [`Client`] is cheap to share and re-entrant: per-call state rides on
//! the [`Context`], never on the client itself. One call flows through
//! `invoke` as: apply timeout, parse the path, run the interceptor chain
//! around the terminal stage, which serializes the request, wraps it in an
//! envelope, frames it, performs the wire exchange and maps the response
//! status back to a result.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth::{PerRpcAuth, TransportAuth};
use crate::codec::frame::{decode_frame, encode_frame};
use crate::codec::serialization::SerializationType;
use crate::context::Context;
use crate::error::{Code, NovaError, Result};
use crate::interceptor::{ClientChain, ClientInterceptor, ClientTerminal};
use crate::pool::{ConnectionPool, PoolConfig};
use crate::protocol::{parse_service_path, Request, Response};
use crate::selector::{DefaultSelector, Selector};
use crate::transport::client::{ClientTransport, ClientTransportOptions};

/// Client configuration, built with `with_*` methods.
pub struct Options {
    target: String,
    network: String,
    timeout: Option<Duration>,
    serialization: SerializationType,
    interceptors: Vec<Arc<dyn ClientInterceptor>>,
    per_rpc_auth: Vec<Arc<dyn PerRpcAuth>>,
    selector: Option<Arc<dyn Selector>>,
    transport_auth: Option<Arc<dyn TransportAuth>>,
    pool: PoolConfig,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            target: String::new(),
            network: "tcp".to_string(),
            timeout: None,
            serialization: SerializationType::default(),
            interceptors: Vec::new(),
            per_rpc_auth: Vec::new(),
            selector: None,
            transport_auth: None,
            pool: PoolConfig::default(),
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Peer address, e.g. `127.0.0.1:8000`. Ignored when a custom
    /// selector is installed.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    /// Per-call deadline applied at the start of every invoke.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_serialization(mut self, serialization: SerializationType) -> Self {
        self.serialization = serialization;
        self
    }

    /// Append an interceptor; the first appended runs outermost.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn ClientInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Append per-call credentials merged into every request's metadata.
    pub fn with_per_rpc_auth(mut self, auth: Arc<dyn PerRpcAuth>) -> Self {
        self.per_rpc_auth.push(auth);
        self
    }

    /// Install a custom selector (e.g. one backed by service discovery)
    /// instead of the single-target default.
    pub fn with_selector(mut self, selector: Arc<dyn Selector>) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn with_transport_auth(mut self, auth: Arc<dyn TransportAuth>) -> Self {
        self.transport_auth = Some(auth);
        self
    }

    pub fn with_pool_config(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }
}

/// RPC client over the default stream transport.
pub struct Client {
    opts: Options,
    transport: ClientTransport,
}

impl Client {
    pub fn new(opts: Options) -> Self {
        let selector: Arc<dyn Selector> = match &opts.selector {
            Some(selector) => selector.clone(),
            None => Arc::new(DefaultSelector::new(
                opts.target.clone(),
                opts.network.clone(),
            )),
        };

        let mut pool = ConnectionPool::new(opts.pool.clone());
        if let Some(auth) = &opts.transport_auth {
            pool = pool.with_transport_auth(auth.clone());
        }

        let transport = ClientTransport::new(ClientTransportOptions {
            network: opts.network.clone(),
            pool: Arc::new(pool),
            selector,
        });

        Self { opts, transport }
    }

    /// Call `path` (of the form `/Service/Method`) with `req` and decode
    /// the response payload into `Rsp`.
    ///
    /// A non-zero `ret_code` from the peer comes back as
    /// [`NovaError::Rpc`] carrying the remote code and message.
    pub async fn invoke<Req, Rsp>(&self, ctx: Context, req: &Req, path: &str) -> Result<Rsp>
    where
        Req: Serialize + Sync,
        Rsp: DeserializeOwned,
    {
        let mut ctx = ctx;
        if let Some(timeout) = self.opts.timeout {
            ctx = ctx.with_timeout(timeout);
        }

        let (service, method) = parse_service_path(path)?;
        let ctx = ctx.with_call(service, method);

        let terminal: ClientTerminal<'_> =
            Box::new(move |ctx| Box::pin(self.invoke_terminal(ctx, req)));
        let payload = ClientChain::new(&self.opts.interceptors, terminal)
            .run(ctx)
            .await?;

        self.opts.serialization.unmarshal(&payload)
    }

    /// Innermost stage: the actual wire exchange.
    async fn invoke_terminal<Req: Serialize + Sync>(
        &self,
        ctx: Context,
        req: &Req,
    ) -> Result<Bytes> {
        let payload = self
            .opts
            .serialization
            .marshal(req)
            .map_err(|e| NovaError::client_msg(format!("request marshal failed: {e}")))?;

        let mut metadata = ctx.client_metadata().clone();
        for auth in &self.opts.per_rpc_auth {
            metadata.extend(auth.metadata(&ctx).await?);
        }

        let request = Request {
            service_path: ctx.call().service_path(),
            payload,
            metadata: metadata.into_map(),
        };

        let frame = encode_frame(&request.to_bytes())?;
        let response_frame = self.transport.send(&ctx, &frame).await?;
        let response = Response::from_bytes(decode_frame(&response_frame)?)?;

        if response.ret_code != Code::Ok.as_u32() {
            return Err(NovaError::rpc(
                Code::from_u32(response.ret_code),
                response.ret_msg,
            ));
        }
        Ok(Bytes::from(response.payload))
    }
}
