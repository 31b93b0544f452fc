//! Round-robin balancing with per-service pickers.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::Node;

/// How long picker state stays valid before the rotation restarts from the
/// first node.
pub const DEFAULT_REFRESH_WINDOW: Duration = Duration::from_secs(3 * 60);

/// Per-service rotation state.
#[derive(Debug)]
struct Picker {
    /// Node count the rotation was built against.
    length: usize,
    last_update_time: Instant,
    next_index: usize,
}

impl Picker {
    fn new(length: usize) -> Self {
        Self {
            length,
            last_update_time: Instant::now(),
            next_index: 0,
        }
    }

    fn pick<'a>(&mut self, nodes: &'a [Node], window: Duration) -> Option<&'a Node> {
        if nodes.is_empty() {
            return None;
        }

        // Stale state or a changed node set restarts the rotation.
        if self.last_update_time.elapsed() > window || nodes.len() != self.length {
            self.length = nodes.len();
            self.last_update_time = Instant::now();
            self.next_index = 0;
        }

        let index = self.next_index;
        self.next_index = (index + 1) % nodes.len();
        Some(&nodes[index])
    }
}

/// Round-robin balancer with one picker per service name.
///
/// Node weights are part of the data model but ignored here; this is not a
/// weighted scheme. Concurrent picks for the same service serialize on the
/// picker entry, so indices never collide.
pub struct RoundRobinBalancer {
    pickers: DashMap<String, Picker>,
    refresh_window: Duration,
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::with_refresh_window(DEFAULT_REFRESH_WINDOW)
    }

    pub fn with_refresh_window(refresh_window: Duration) -> Self {
        Self {
            pickers: DashMap::new(),
            refresh_window,
        }
    }

    /// Pick one node for `service_name` from the current list. Returns
    /// `None` on an empty list.
    pub fn pick(&self, service_name: &str, nodes: &[Node]) -> Option<Node> {
        if nodes.is_empty() {
            return None;
        }
        let mut picker = self
            .pickers
            .entry(service_name.to_string())
            .or_insert_with(|| Picker::new(nodes.len()));
        picker.pick(nodes, self.refresh_window).cloned()
    }
}
