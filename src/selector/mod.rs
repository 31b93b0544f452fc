//! Node selection: resolve a service name to a node list, pick one node.
//!
//! The [`Resolver`] half maps a service name to its live node list (a
//! service-discovery plugin implements this); the [`Selector`] half owns
//! per-service balancing state and hands out one node per call.
//!
//! Without a discovery backend the [`DefaultSelector`] is used: the node
//! list is a singleton derived from the configured target address.

mod round_robin;

pub use round_robin::{RoundRobinBalancer, DEFAULT_REFRESH_WINDOW};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Code, NovaError, Result};

/// A routable service instance.
///
/// Nodes are created by a resolver and treated as immutable snapshots by
/// readers; only the resolver replaces them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub service_name: String,
    pub address: String,
    pub network: String,
    /// Carried for weighted schemes; the round-robin balancer ignores it.
    pub weight: u32,
}

/// Maps a service name to its live node list.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, service_name: &str) -> Result<Vec<Node>>;
}

/// Picks one node for a service.
#[async_trait]
pub trait Selector: Send + Sync {
    async fn select(&self, service_name: &str) -> Result<Node>;
}

/// Selector used when no discovery plugin is configured: every call goes
/// to the single configured target.
pub struct DefaultSelector {
    target: String,
    network: String,
}

impl DefaultSelector {
    pub fn new(target: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            network: network.into(),
        }
    }
}

#[async_trait]
impl Selector for DefaultSelector {
    async fn select(&self, service_name: &str) -> Result<Node> {
        if self.target.is_empty() {
            return Err(NovaError::rpc(
                Code::NoAvailableNode,
                format!("no target configured for service {service_name}"),
            ));
        }
        Ok(Node {
            service_name: service_name.to_string(),
            address: self.target.clone(),
            network: self.network.clone(),
            weight: 0,
        })
    }
}

/// Selector backed by a resolver and the round-robin balancer.
pub struct BalancedSelector {
    resolver: Arc<dyn Resolver>,
    balancer: RoundRobinBalancer,
}

impl BalancedSelector {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        Self {
            resolver,
            balancer: RoundRobinBalancer::new(),
        }
    }

    pub fn with_balancer(resolver: Arc<dyn Resolver>, balancer: RoundRobinBalancer) -> Self {
        Self { resolver, balancer }
    }
}

#[async_trait]
impl Selector for BalancedSelector {
    async fn select(&self, service_name: &str) -> Result<Node> {
        let nodes = self.resolver.resolve(service_name).await?;
        self.balancer.pick(service_name, &nodes).ok_or_else(|| {
            NovaError::rpc(
                Code::NoAvailableNode,
                format!("no available node for service {service_name}"),
            )
        })
    }
}
