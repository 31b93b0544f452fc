//! Protocol envelopes carried inside frames.
//!
//! The bytes after the frame header are a schema-serialized protobuf
//! message. Field tags are the interoperability contract: any peer that
//! uses the same tag numbers can talk to us regardless of language.

use std::collections::HashMap;

use prost::Message;

use crate::error::{NovaError, Result};

/// Request envelope.
#[derive(Clone, PartialEq, Message)]
pub struct Request {
    /// Routing key of the form `/Service/Method` (leading slash optional).
    #[prost(string, tag = "1")]
    pub service_path: String,
    /// User request, serialized by the chosen payload serializer.
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
    /// Lowercase ASCII header name to opaque bytes.
    #[prost(map = "string, bytes", tag = "3")]
    pub metadata: HashMap<String, Vec<u8>>,
}

/// Response envelope.
#[derive(Clone, PartialEq, Message)]
pub struct Response {
    /// User response, serialized by the chosen payload serializer.
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,
    /// 0 means success; non-zero is an error code.
    #[prost(uint32, tag = "2")]
    pub ret_code: u32,
    /// Human-readable companion to `ret_code`.
    #[prost(string, tag = "3")]
    pub ret_msg: String,
}

impl Request {
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        Self::decode(buf).map_err(|e| NovaError::client_msg(format!("bad request envelope: {e}")))
    }
}

impl Response {
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        Self::decode(buf).map_err(|e| NovaError::client_msg(format!("bad response envelope: {e}")))
    }
}

/// Split a service path into `(service, method)`.
///
/// A single leading `/` is stripped, then the path is split on the last
/// `/`. Both halves must be non-empty.
pub fn parse_service_path(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    match trimmed.rsplit_once('/') {
        Some((service, method)) if !service.is_empty() && !method.is_empty() => {
            Ok((service, method))
        }
        _ => Err(NovaError::client_msg("method is invalid")),
    }
}
