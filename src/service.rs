//! Service dispatcher: typed method registration and the pipeline between
//! envelope and user code.
//!
//! Methods are registered explicitly by name with a typed handler; there
//! is no runtime inspection of the service object. [`unary_handler`] wraps
//! a plain `async fn(Context, Req) -> Result<Rsp>` into an erased handler
//! that decodes the payload with the configured serializer, runs the
//! server interceptor chain and encodes the response.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::frame::encode_frame;
use crate::codec::serialization::SerializationType;
use crate::context::{Context, Metadata};
use crate::error::{Code, NovaError, Result};
use crate::interceptor::{BoxFuture, ServerChain, ServerInterceptor, ServerTerminal};
use crate::protocol::{parse_service_path, Request, Response};
use crate::transport::server::RequestHandler;

/// Decodes a request payload into the handler's request type.
///
/// Decoding is all-or-nothing: on failure the error is returned and no
/// destination value exists, so a handler never sees a half-filled
/// request.
pub struct RequestDecoder<'a> {
    payload: &'a [u8],
    serialization: SerializationType,
}

impl RequestDecoder<'_> {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        self.serialization
            .unmarshal(self.payload)
            .map_err(|e| NovaError::client_msg(format!("request decode failed: {e}")))
    }
}

/// Erased method handler: receives the call context, the raw payload, the
/// serializer for this server and the interceptor chain to apply.
pub type MethodHandler = Arc<
    dyn Fn(
            Context,
            Bytes,
            SerializationType,
            Arc<Vec<Arc<dyn ServerInterceptor>>>,
        ) -> BoxFuture<'static, Result<Bytes>>
        + Send
        + Sync,
>;

/// Wrap a typed unary function into a [`MethodHandler`].
pub fn unary_handler<Req, Rsp, F, Fut>(f: F) -> MethodHandler
where
    Req: DeserializeOwned + Send + 'static,
    Rsp: Serialize + Send + 'static,
    F: Fn(Context, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Rsp>> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |ctx, payload, serialization, interceptors| {
        let f = f.clone();
        let fut: BoxFuture<'static, Result<Bytes>> = Box::pin(async move {
            let decoder = RequestDecoder {
                payload: &payload,
                serialization,
            };
            let req: Req = decoder.decode()?;

            let terminal: ServerTerminal<'_> = Box::new(move |ctx| {
                Box::pin(async move {
                    let rsp = f(ctx, req).await?;
                    Ok(Bytes::from(serialization.marshal(&rsp)?))
                })
            });
            ServerChain::new(interceptors.as_slice(), terminal)
                .run(ctx)
                .await
        });
        fut
    })
}

/// A named service and its method table.
///
/// Built before `serve` and read-only afterwards. Method names are
/// case-sensitive; the routing key is the portion of the service path
/// after the final `/`.
pub struct ServiceDesc {
    service_name: String,
    methods: HashMap<String, MethodHandler>,
}

impl ServiceDesc {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            methods: HashMap::new(),
        }
    }

    /// Register a method handler under `name`.
    pub fn method(mut self, name: &str, handler: MethodHandler) -> Self {
        self.methods.insert(name.to_string(), handler);
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

/// The running dispatcher: envelope in, response frame out.
pub struct Service {
    desc: ServiceDesc,
    serialization: SerializationType,
    timeout: Option<Duration>,
    interceptors: Arc<Vec<Arc<dyn ServerInterceptor>>>,
}

impl Service {
    pub fn new(
        desc: ServiceDesc,
        serialization: SerializationType,
        timeout: Option<Duration>,
        interceptors: Vec<Arc<dyn ServerInterceptor>>,
    ) -> Self {
        Self {
            desc,
            serialization,
            timeout,
            interceptors: Arc::new(interceptors),
        }
    }

    pub fn name(&self) -> &str {
        self.desc.service_name()
    }

    /// Route one request envelope to its handler.
    async fn dispatch(&self, mut ctx: Context, inner: &[u8]) -> Result<Bytes> {
        let request = Request::from_bytes(inner)?;

        ctx.set_server_metadata(Metadata::from_map(request.metadata));
        if let Some(timeout) = self.timeout {
            ctx = ctx.with_timeout(timeout);
        }

        let (service, method) = parse_service_path(&request.service_path)?;
        ctx = ctx.with_call(service, method);

        let handler = self
            .desc
            .methods
            .get(method)
            .ok_or_else(|| NovaError::client_msg(format!("handler not found for {method}")))?
            .clone();

        // The handler runs in its own task so a panic inside user code
        // surfaces as a join error instead of tearing down the worker.
        let fut = handler(
            ctx,
            Bytes::from(request.payload),
            self.serialization,
            self.interceptors.clone(),
        );
        match tokio::spawn(fut).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                Err(NovaError::rpc(Code::ServerInternal, "handler panicked"))
            }
            Err(_) => Err(NovaError::rpc(Code::ServerInternal, "handler cancelled")),
        }
    }
}

#[async_trait]
impl RequestHandler for Service {
    /// Dispatch and wrap the outcome in a `Response` envelope inside a
    /// complete frame. Framework errors keep their code and message;
    /// everything else collapses to `ServerInternal`. Only a response
    /// that cannot be encoded at all escapes as an error, which closes
    /// the connection.
    async fn handle(&self, ctx: Context, request: &[u8]) -> Result<Vec<u8>> {
        let response = match self.dispatch(ctx, request).await {
            Ok(payload) => Response {
                payload: payload.to_vec(),
                ret_code: Code::Ok.as_u32(),
                ret_msg: "success".to_string(),
            },
            Err(err) => {
                tracing::error!(service = self.name(), error = %err, "request dispatch failed");
                match err {
                    NovaError::Rpc { code, message } => Response {
                        payload: Vec::new(),
                        ret_code: code.as_u32(),
                        ret_msg: message,
                    },
                    _ => Response {
                        payload: Vec::new(),
                        ret_code: Code::ServerInternal.as_u32(),
                        ret_msg: "internal error".to_string(),
                    },
                }
            }
        };

        encode_frame(&response.to_bytes())
    }
}
