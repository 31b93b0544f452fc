//! Server core: lifecycle, registration, plugins and signal handling.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::codec::serialization::SerializationType;
use crate::error::{Code, NovaError, Result};
use crate::interceptor::ServerInterceptor;
use crate::plugin::{self, Plugin, PluginOptions, TracingInterceptor};
use crate::service::{Service, ServiceDesc};
use crate::transport::server::{ServerTransport, ServerTransportOptions};

/// Server configuration, built with `with_*` methods.
pub struct ServerOptions {
    address: String,
    network: String,
    timeout: Option<Duration>,
    serialization: SerializationType,
    selector_svr_addr: String,
    tracing_svr_addr: String,
    tracing_span_name: String,
    keep_alive_period: Option<Duration>,
    plugin_names: Vec<String>,
    interceptors: Vec<Arc<dyn ServerInterceptor>>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:0".to_string(),
            network: "tcp".to_string(),
            timeout: None,
            serialization: SerializationType::default(),
            selector_svr_addr: String::new(),
            tracing_svr_addr: String::new(),
            tracing_span_name: "server".to_string(),
            keep_alive_period: None,
            plugin_names: Vec::new(),
            interceptors: Vec::new(),
        }
    }
}

impl ServerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen address, e.g. `127.0.0.1:8000`.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    /// Per-request handler deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_serialization(mut self, serialization: SerializationType) -> Self {
        self.serialization = serialization;
        self
    }

    /// Discovery server address, required by resolver plugins.
    pub fn with_selector_svr_addr(mut self, addr: impl Into<String>) -> Self {
        self.selector_svr_addr = addr.into();
        self
    }

    /// Collector address, required by tracing plugins.
    pub fn with_tracing_svr_addr(mut self, addr: impl Into<String>) -> Self {
        self.tracing_svr_addr = addr.into();
        self
    }

    pub fn with_tracing_span_name(mut self, name: impl Into<String>) -> Self {
        self.tracing_span_name = name.into();
        self
    }

    pub fn with_keep_alive_period(mut self, period: Duration) -> Self {
        self.keep_alive_period = Some(period);
        self
    }

    /// Activate a registered plugin by name.
    pub fn with_plugin(mut self, name: impl Into<String>) -> Self {
        self.plugin_names.push(name.into());
        self
    }

    /// Append an interceptor; the first appended runs outermost.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn ServerInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }
}

/// RPC server hosting one service over the default stream transport.
pub struct Server {
    opts: ServerOptions,
    desc: Option<ServiceDesc>,
    plugins: Vec<Arc<dyn Plugin>>,
    cancel: CancellationToken,
    local_addr: Option<SocketAddr>,
    closing: bool,
}

impl Server {
    /// Build a server; plugins named in the options are looked up in the
    /// global registry now.
    pub fn new(opts: ServerOptions) -> Self {
        let mut plugins = Vec::new();
        for name in &opts.plugin_names {
            match plugin::get(name) {
                Some(plugin) => plugins.push(plugin),
                None => tracing::warn!(plugin = %name, "configured plugin is not registered"),
            }
        }

        Self {
            opts,
            desc: None,
            plugins,
            cancel: CancellationToken::new(),
            local_addr: None,
            closing: false,
        }
    }

    /// Register the service to host. The server hosts a single service;
    /// registering again replaces the previous one.
    pub fn register_service(&mut self, desc: ServiceDesc) {
        if let Some(previous) = &self.desc {
            tracing::warn!(
                previous = previous.service_name(),
                replacement = desc.service_name(),
                "replacing previously registered service"
            );
        }
        self.desc = Some(desc);
    }

    /// Token that cancels the server: handy for tests and embedding.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Bound address, available after `start`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Initialize plugins and start the accept loop.
    ///
    /// Returns the bound address; serving continues in the background
    /// until the shutdown token is cancelled.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        let desc = self.desc.take().ok_or_else(|| {
            NovaError::rpc(Code::ServerInternal, "no service registered before start")
        })?;

        let plugin_opts = PluginOptions {
            selector_svr_addr: self.opts.selector_svr_addr.clone(),
            svr_addr: self.opts.address.clone(),
            services: vec![desc.service_name().to_string()],
            tracing_svr_addr: self.opts.tracing_svr_addr.clone(),
        };

        let mut interceptors = self.opts.interceptors.clone();
        for plugin in &self.plugins {
            if let Some(resolver) = plugin.as_resolver() {
                resolver.register(&plugin_opts).await.map_err(|e| {
                    tracing::error!(plugin = plugin.name(), error = %e, "resolver init failed");
                    e
                })?;
                tracing::info!(plugin = plugin.name(), "resolver registered");
            }
            if let Some(tracer) = plugin.as_tracing() {
                tracer.init(&plugin_opts).map_err(|e| {
                    tracing::error!(plugin = plugin.name(), error = %e, "tracing init failed");
                    e
                })?;
                interceptors.push(Arc::new(TracingInterceptor::new(
                    self.opts.tracing_span_name.clone(),
                )));
            }
        }

        let service = Arc::new(Service::new(
            desc,
            self.opts.serialization,
            self.opts.timeout,
            interceptors,
        ));
        let transport = ServerTransport::new(
            ServerTransportOptions {
                address: self.opts.address.clone(),
                network: self.opts.network.clone(),
                keep_alive_period: self.opts.keep_alive_period,
            },
            service,
        );

        let addr = transport.listen_and_serve(self.cancel.clone()).await?;
        self.local_addr = Some(addr);
        tracing::info!(%addr, "server listening");
        Ok(addr)
    }

    /// Start, then block until a termination signal arrives (or the
    /// shutdown token is cancelled), then close and deregister plugins.
    pub async fn serve(mut self) -> Result<()> {
        self.start().await?;
        wait_for_shutdown(self.cancel.clone()).await;
        self.close();

        for plugin in &self.plugins {
            if let Some(resolver) = plugin.as_resolver() {
                match resolver.deregister().await {
                    Ok(()) => tracing::info!(plugin = plugin.name(), "resolver deregistered"),
                    Err(e) => {
                        // Shutdown carries on regardless.
                        tracing::warn!(plugin = plugin.name(), error = %e,
                            "resolver deregistration failed");
                    }
                }
            }
        }
        Ok(())
    }

    /// Cancel the server context: the accept loop stops and connection
    /// workers unblock at their next checkpoint.
    pub fn close(&mut self) {
        self.closing = true;
        self.cancel.cancel();
    }
}

#[cfg(unix)]
async fn wait_for_shutdown(cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut term), Ok(mut int), Ok(mut quit)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::quit()),
    ) else {
        tracing::error!("installing signal handlers failed; waiting on shutdown token only");
        cancel.cancelled().await;
        return;
    };

    tokio::select! {
        _ = term.recv() => tracing::info!("received SIGTERM, shutting down"),
        _ = int.recv() => tracing::info!("received SIGINT, shutting down"),
        _ = quit.recv() => tracing::info!("received SIGQUIT, shutting down"),
        _ = cancel.cancelled() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "ctrl-c handler failed");
            }
        }
        _ = cancel.cancelled() => {}
    }
}
