//! Error types and stable RPC status codes.

use thiserror::Error;

/// Status codes carried in `Response.ret_code`.
///
/// The numeric values are part of the wire contract: a client decodes the
/// `ret_code` of a response back into a [`Code`], so they must stay stable
/// across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    /// Success.
    Ok,
    /// Malformed request: bad magic, unparseable service path, marshal
    /// failure on the client.
    ClientMsg,
    /// Connect/write/read failure attributable to the client side.
    ClientNetwork,
    /// Deadline reached before the call completed.
    Timeout,
    /// Selector produced an empty node list.
    NoAvailableNode,
    /// Unknown `network` value.
    NetworkNotSupported,
    /// Unclassified server-side failure (handler panic, encode failure).
    ServerInternal,
}

impl Code {
    pub fn as_u32(self) -> u32 {
        match self {
            Code::Ok => 0,
            Code::ClientMsg => 101,
            Code::ClientNetwork => 102,
            Code::Timeout => 103,
            Code::NoAvailableNode => 201,
            Code::NetworkNotSupported => 301,
            Code::ServerInternal => 500,
        }
    }

    /// Map a wire `ret_code` back to a [`Code`]. Values minted by a newer
    /// peer fall back to [`Code::ServerInternal`].
    pub fn from_u32(value: u32) -> Code {
        match value {
            0 => Code::Ok,
            101 => Code::ClientMsg,
            102 => Code::ClientNetwork,
            103 => Code::Timeout,
            201 => Code::NoAvailableNode,
            301 => Code::NetworkNotSupported,
            _ => Code::ServerInternal,
        }
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Code::Ok => "ok",
            Code::ClientMsg => "client message error",
            Code::ClientNetwork => "client network error",
            Code::Timeout => "timeout",
            Code::NoAvailableNode => "no available node",
            Code::NetworkNotSupported => "network not supported",
            Code::ServerInternal => "server internal error",
        };
        f.write_str(name)
    }
}

/// Main error type for all novarpc operations.
#[derive(Debug, Error)]
pub enum NovaError {
    /// Framework error carrying a wire status code. This is the only
    /// variant whose code and message survive the trip through
    /// `Response.{ret_code, ret_msg}`.
    #[error("{code}: {message}")]
    Rpc { code: Code, message: String },

    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Envelope encode error (protobuf).
    #[error("envelope encode error: {0}")]
    EnvelopeEncode(#[from] prost::EncodeError),

    /// Envelope decode error (protobuf).
    #[error("envelope decode error: {0}")]
    EnvelopeDecode(#[from] prost::DecodeError),

    /// MsgPack serialization error.
    #[error("msgpack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("msgpack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Postcard serialization/deserialization error.
    #[error("postcard error: {0}")]
    Postcard(#[from] postcard::Error),

    /// Connection closed mid-frame.
    #[error("connection closed")]
    ConnectionClosed,
}

impl NovaError {
    /// Build a framework error with an explicit code.
    pub fn rpc(code: Code, message: impl Into<String>) -> Self {
        NovaError::Rpc {
            code,
            message: message.into(),
        }
    }

    pub fn client_msg(message: impl Into<String>) -> Self {
        Self::rpc(Code::ClientMsg, message)
    }

    pub fn client_network(message: impl Into<String>) -> Self {
        Self::rpc(Code::ClientNetwork, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::rpc(Code::Timeout, message)
    }

    /// The status code a server maps this error to. Non-framework errors
    /// collapse to [`Code::ServerInternal`] so internal detail never leaks
    /// onto the wire.
    pub fn code(&self) -> Code {
        match self {
            NovaError::Rpc { code, .. } => *code,
            _ => Code::ServerInternal,
        }
    }
}

/// Result type alias using NovaError.
pub type Result<T> = std::result::Result<T, NovaError>;
