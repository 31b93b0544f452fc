//! Interceptor chains: composable around-advice on both call pipelines.
//!
//! An interceptor wraps the stage below it and may run code before and
//! after, rewrite the context, or short-circuit by not invoking `next`.
//! The chain is built from a slice: the first registered interceptor is
//! outermost, the terminal stage (the actual wire exchange on the client,
//! the user handler on the server) innermost. Exit order is the reverse of
//! entry order by virtue of stack unwinding.
//!
//! This is the single extensibility point of the framework: timeout
//! enforcement, authentication, tracing and logging are all interceptors.
//! Interceptors see the [`Context`] only; request and response payloads
//! stay opaque to them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use crate::context::Context;
use crate::error::Result;

/// Boxed future used across the erased interceptor boundary.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Innermost stage of a client call: performs the wire exchange and
/// returns the response payload bytes.
pub type ClientTerminal<'a> = Box<dyn FnOnce(Context) -> BoxFuture<'a, Result<Bytes>> + Send + 'a>;

/// Around-advice on the client pipeline.
pub trait ClientInterceptor: Send + Sync + 'static {
    fn intercept<'a>(&'a self, ctx: Context, next: ClientChain<'a>) -> BoxFuture<'a, Result<Bytes>>;
}

/// The remaining client pipeline as seen from one interceptor.
pub struct ClientChain<'a> {
    interceptors: &'a [Arc<dyn ClientInterceptor>],
    terminal: ClientTerminal<'a>,
}

impl<'a> ClientChain<'a> {
    pub fn new(interceptors: &'a [Arc<dyn ClientInterceptor>], terminal: ClientTerminal<'a>) -> Self {
        Self {
            interceptors,
            terminal,
        }
    }

    /// Run the rest of the chain.
    pub fn run(self, ctx: Context) -> BoxFuture<'a, Result<Bytes>> {
        match self.interceptors.split_first() {
            Some((head, rest)) => head.intercept(
                ctx,
                ClientChain {
                    interceptors: rest,
                    terminal: self.terminal,
                },
            ),
            None => (self.terminal)(ctx),
        }
    }
}

/// Innermost stage of a server call: invokes the user handler and returns
/// the serialized response payload.
pub type ServerTerminal<'a> = Box<dyn FnOnce(Context) -> BoxFuture<'a, Result<Bytes>> + Send + 'a>;

/// Around-advice on the server pipeline.
pub trait ServerInterceptor: Send + Sync + 'static {
    fn intercept<'a>(&'a self, ctx: Context, next: ServerChain<'a>) -> BoxFuture<'a, Result<Bytes>>;
}

/// The remaining server pipeline as seen from one interceptor.
pub struct ServerChain<'a> {
    interceptors: &'a [Arc<dyn ServerInterceptor>],
    terminal: ServerTerminal<'a>,
}

impl<'a> ServerChain<'a> {
    pub fn new(interceptors: &'a [Arc<dyn ServerInterceptor>], terminal: ServerTerminal<'a>) -> Self {
        Self {
            interceptors,
            terminal,
        }
    }

    /// Run the rest of the chain.
    pub fn run(self, ctx: Context) -> BoxFuture<'a, Result<Bytes>> {
        match self.interceptors.split_first() {
            Some((head, rest)) => head.intercept(
                ctx,
                ServerChain {
                    interceptors: rest,
                    terminal: self.terminal,
                },
            ),
            None => (self.terminal)(ctx),
        }
    }
}
