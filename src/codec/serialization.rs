//! Payload serialization.
//!
//! The request and response payloads inside an envelope are serialized by a
//! named serializer. Three names ship with the core:
//!
//! - `proto` - compact binary via `postcard` (the default)
//! - `msgpack` - MessagePack via `rmp-serde` (struct-as-map, `to_vec_named`)
//! - `json` - JSON via `serde_json`
//!
//! Lookup by an unknown name falls back to the default. Dispatch is static:
//! the set of serializers is fixed at compile time, so there is no mutable
//! registry to freeze.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{NovaError, Result};

/// Wire name of the default serializer.
pub const DEFAULT_SERIALIZATION: &str = "proto";

/// Named payload serializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializationType {
    /// Compact binary (default).
    #[default]
    Proto,
    /// MessagePack, struct-as-map format.
    MsgPack,
    /// JSON.
    Json,
}

impl SerializationType {
    /// Look up a serializer by wire name. Unknown names return the
    /// default (`proto`).
    pub fn from_name(name: &str) -> Self {
        match name {
            "msgpack" => SerializationType::MsgPack,
            "json" => SerializationType::Json,
            _ => SerializationType::Proto,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SerializationType::Proto => "proto",
            SerializationType::MsgPack => "msgpack",
            SerializationType::Json => "json",
        }
    }

    /// Serialize a value to payload bytes.
    pub fn marshal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            SerializationType::Proto => Ok(postcard::to_stdvec(value)?),
            // to_vec_named keeps structs as maps so peers decode by field
            // name, not position.
            SerializationType::MsgPack => Ok(rmp_serde::to_vec_named(value)?),
            SerializationType::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    /// Deserialize payload bytes into a value.
    ///
    /// An empty payload is rejected up front: every serializer encodes
    /// even the unit value to at least one byte, so empty bytes mean the
    /// payload was lost, not that it was empty.
    pub fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        if data.is_empty() {
            return Err(NovaError::client_msg("unmarshal of empty payload"));
        }
        match self {
            SerializationType::Proto => Ok(postcard::from_bytes(data)?),
            SerializationType::MsgPack => Ok(rmp_serde::from_slice(data)?),
            SerializationType::Json => Ok(serde_json::from_slice(data)?),
        }
    }
}
