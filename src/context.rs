//! Per-call context threaded through the pipeline.
//!
//! Where the call state would otherwise hide in a dynamically-typed
//! context map, [`Context`] carries it explicitly: the deadline, the
//! cancellation token, outgoing and incoming metadata, and the parsed
//! routing info. Per-call state lives here, never on the client or server
//! instance, which keeps both re-entrant.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Request metadata: lowercase ASCII names mapped to opaque bytes.
///
/// Names are normalized to lowercase on insert so lookups are
/// case-insensitive by construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    entries: HashMap<String, Vec<u8>>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: impl Into<Vec<u8>>) {
        self.entries.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge `other` into self; colliding names take the new value.
    pub fn extend(&mut self, other: HashMap<String, Vec<u8>>) {
        for (name, value) in other {
            self.set(&name, value);
        }
    }

    /// Convert into the plain map carried by the wire envelope.
    pub fn into_map(self) -> HashMap<String, Vec<u8>> {
        self.entries
    }

    pub fn from_map(map: HashMap<String, Vec<u8>>) -> Self {
        let mut metadata = Self::new();
        metadata.extend(map);
        metadata
    }
}

/// Parsed routing info for the call in flight.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Call {
    pub service: String,
    pub method: String,
}

impl Call {
    /// The wire form `/service/method`.
    pub fn service_path(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }
}

/// Explicit per-call context.
#[derive(Debug, Clone)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: CancellationToken,
    client_metadata: Metadata,
    server_metadata: Metadata,
    call: Call,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            deadline: None,
            cancel: CancellationToken::new(),
            client_metadata: Metadata::new(),
            server_metadata: Metadata::new(),
            call: Call::default(),
        }
    }

    /// A context whose cancellation follows `cancel`. Used by the server
    /// to derive per-connection contexts from the serve token.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Self::new()
        }
    }

    /// Apply a timeout relative to now. An existing earlier deadline is
    /// kept; deadlines only ever tighten.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline. `None` when no deadline is set; zero
    /// when it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn deadline_exceeded(&self) -> bool {
        matches!(self.remaining(), Some(r) if r.is_zero())
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn with_call(mut self, service: &str, method: &str) -> Self {
        self.call = Call {
            service: service.to_string(),
            method: method.to_string(),
        };
        self
    }

    pub fn call(&self) -> &Call {
        &self.call
    }

    /// Outgoing metadata attached to the request envelope by the client.
    pub fn client_metadata(&self) -> &Metadata {
        &self.client_metadata
    }

    pub fn client_metadata_mut(&mut self) -> &mut Metadata {
        &mut self.client_metadata
    }

    /// Incoming metadata, populated by the server dispatcher from the
    /// request envelope.
    pub fn server_metadata(&self) -> &Metadata {
        &self.server_metadata
    }

    pub fn set_server_metadata(&mut self, metadata: Metadata) {
        self.server_metadata = metadata;
    }
}
