//! # novarpc
//!
//! A unary RPC framework: typed requests to named service methods over a
//! length-prefixed binary wire protocol.
//!
//! ## Architecture
//!
//! - **Wire**: a 15-byte magic-gated frame header wrapping a
//!   schema-serialized envelope ([`codec`], [`protocol`])
//! - **Client**: serialize → interceptors → frame → pooled connection →
//!   response status mapping ([`client`], [`pool`], [`selector`])
//! - **Server**: accept loop → per-connection worker → dispatcher →
//!   typed handler ([`server`], [`service`], [`transport`])
//! - **Extensibility**: composable interceptors on both sides
//!   ([`interceptor`], [`auth`]) and startup plugins ([`plugin`])
//!
//! ## Example
//!
//! ```ignore
//! use novarpc::service::unary_handler;
//! use novarpc::{Client, Context, Options, Server, ServerOptions, ServiceDesc};
//!
//! #[tokio::main]
//! async fn main() -> novarpc::Result<()> {
//!     let mut server = Server::new(ServerOptions::new().with_address("127.0.0.1:8000"));
//!     server.register_service(ServiceDesc::new("hello.Greeter").method(
//!         "SayHello",
//!         unary_handler(|_ctx, name: String| async move { Ok(format!("hello {name}")) }),
//!     ));
//!     tokio::spawn(server.serve());
//!
//!     let client = Client::new(Options::new().with_target("127.0.0.1:8000"));
//!     let reply: String = client
//!         .invoke(Context::new(), &"world".to_string(), "/hello.Greeter/SayHello")
//!         .await?;
//!     println!("{reply}");
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod codec;
pub mod context;
pub mod error;
pub mod interceptor;
pub mod plugin;
pub mod pool;
pub mod protocol;
pub mod selector;
pub mod service;
pub mod transport;

mod client;
mod server;

pub use client::{Client, Options};
pub use context::{Context, Metadata};
pub use error::{Code, NovaError, Result};
pub use server::{Server, ServerOptions};
pub use service::{unary_handler, ServiceDesc};
