//! Plugin registry and plugin interfaces.
//!
//! Concrete plugins (a Consul resolver, a tracing exporter) live outside
//! the core; this module defines what they look like and how a server
//! finds them. Plugins register themselves into the process-wide registry
//! at startup, before any server is built, and a server activates the
//! subset named in its options. The registry is read-only after that.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::Instrument;

use crate::context::Context;
use crate::error::Result;
use crate::interceptor::{BoxFuture, ServerChain, ServerInterceptor};
use crate::selector::Node;

/// Options handed to plugins during server startup.
#[derive(Debug, Clone, Default)]
pub struct PluginOptions {
    /// Discovery server address (resolver plugins).
    pub selector_svr_addr: String,
    /// Address this server is reachable at.
    pub svr_addr: String,
    /// Services hosted by this server.
    pub services: Vec<String>,
    /// Collector address (tracing plugins).
    pub tracing_svr_addr: String,
}

/// A named plugin. Servers activate plugins by name; the `as_*` accessors
/// expose the capabilities a plugin actually implements.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn as_resolver(&self) -> Option<&dyn ResolverPlugin> {
        None
    }

    fn as_tracing(&self) -> Option<&dyn TracingPlugin> {
        None
    }
}

/// Service-discovery plugin: registers this server's services on startup,
/// resolves peers for clients, deregisters on shutdown.
#[async_trait]
pub trait ResolverPlugin: Send + Sync {
    async fn register(&self, opts: &PluginOptions) -> Result<()>;
    async fn deregister(&self) -> Result<()>;
    async fn resolve(&self, service_name: &str) -> Result<Vec<Node>>;
}

/// Distributed-tracing plugin: initialized once at startup. The server
/// then wraps every call in a span via [`TracingInterceptor`].
pub trait TracingPlugin: Send + Sync {
    fn init(&self, opts: &PluginOptions) -> Result<()>;
}

static PLUGINS: LazyLock<RwLock<HashMap<String, Arc<dyn Plugin>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Register a plugin under its name.
pub fn register(plugin: Arc<dyn Plugin>) {
    PLUGINS
        .write()
        .expect("plugin registry poisoned")
        .insert(plugin.name().to_string(), plugin);
}

/// Look up a registered plugin by name.
pub fn get(name: &str) -> Option<Arc<dyn Plugin>> {
    PLUGINS
        .read()
        .expect("plugin registry poisoned")
        .get(name)
        .cloned()
}

/// Server interceptor that wraps each call in a tracing span carrying the
/// configured span name and the method being invoked.
pub struct TracingInterceptor {
    span_name: String,
}

impl TracingInterceptor {
    pub fn new(span_name: impl Into<String>) -> Self {
        Self {
            span_name: span_name.into(),
        }
    }
}

impl ServerInterceptor for TracingInterceptor {
    fn intercept<'a>(&'a self, ctx: Context, next: ServerChain<'a>) -> BoxFuture<'a, Result<Bytes>> {
        let span = tracing::info_span!(
            "rpc",
            span_name = %self.span_name,
            service = %ctx.call().service,
            method = %ctx.call().method,
        );
        Box::pin(next.run(ctx).instrument(span))
    }
}
