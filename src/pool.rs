//! Connection pool: reuse idle connections keyed by (network, address).
//!
//! A connection is exclusively owned by one in-flight call; the pool owns
//! idle connections. `get` pops a healthy idle connection or dials a fresh
//! one within the dial timeout, `put` re-enqueues a healthy connection if
//! the idle list is below its bound and drops it otherwise. `put` never
//! blocks.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::auth::TransportAuth;
use crate::error::{Code, NovaError, Result};

/// Pool configuration.
#[derive(Clone)]
pub struct PoolConfig {
    /// Bound on idle connections kept per (network, address) key.
    pub max_idle_per_key: usize,
    /// Ceiling on how long a fresh dial may take.
    pub dial_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_key: 16,
            dial_timeout: Duration::from_secs(5),
        }
    }
}

type PoolKey = (String, String);

/// Pool of idle TCP connections.
pub struct ConnectionPool {
    idle: Mutex<HashMap<PoolKey, VecDeque<TcpStream>>>,
    config: PoolConfig,
    transport_auth: Option<Arc<dyn TransportAuth>>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            idle: Mutex::new(HashMap::new()),
            config,
            transport_auth: None,
        }
    }

    /// Run a transport-auth handshake on every freshly dialed connection.
    pub fn with_transport_auth(mut self, auth: Arc<dyn TransportAuth>) -> Self {
        self.transport_auth = Some(auth);
        self
    }

    /// Pop a healthy idle connection for the key or dial a new one.
    pub async fn get(&self, network: &str, address: &str) -> Result<TcpStream> {
        match network {
            "tcp" | "tcp4" | "tcp6" => {}
            other => {
                return Err(NovaError::rpc(
                    Code::NetworkNotSupported,
                    format!("network {other} is not supported"),
                ));
            }
        }

        {
            let mut idle = self.idle.lock().await;
            if let Some(queue) = idle.get_mut(&(network.to_string(), address.to_string())) {
                // LIFO: the most recently used connection is least likely
                // to have gone stale.
                while let Some(conn) = queue.pop_back() {
                    if is_reusable(&conn) {
                        return Ok(conn);
                    }
                    tracing::debug!(address, "discarding dead pooled connection");
                }
            }
        }

        let mut conn = tokio::time::timeout(self.config.dial_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                NovaError::rpc(
                    Code::ClientNetwork,
                    format!("connect to {address} timed out"),
                )
            })?
            .map_err(|e| {
                NovaError::rpc(
                    Code::ClientNetwork,
                    format!("connect to {address} failed: {e}"),
                )
            })?;

        if let Some(auth) = &self.transport_auth {
            auth.handshake(&mut conn).await?;
        }

        Ok(conn)
    }

    /// Return a connection after a successful call. Dead connections and
    /// overflow beyond the idle bound are dropped (which closes them).
    pub async fn put(&self, network: &str, address: &str, conn: TcpStream) {
        if !is_reusable(&conn) {
            return;
        }

        let mut idle = self.idle.lock().await;
        let queue = idle
            .entry((network.to_string(), address.to_string()))
            .or_default();
        if queue.len() < self.config.max_idle_per_key {
            queue.push_back(conn);
        }
    }

    /// Idle connections currently held for a key.
    pub async fn idle_count(&self, network: &str, address: &str) -> usize {
        let idle = self.idle.lock().await;
        idle.get(&(network.to_string(), address.to_string()))
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

/// An idle connection must have nothing to read: readable means the peer
/// closed it (EOF) or sent stray bytes, and either way it cannot carry
/// another request/response exchange.
fn is_reusable(conn: &TcpStream) -> bool {
    let mut buf = [0u8; 1];
    match conn.try_read(&mut buf) {
        Ok(0) => false,
        Ok(_) => false,
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => true,
        Err(_) => false,
    }
}
