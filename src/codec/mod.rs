//! Codec module - frame headers and payload serialization.
//!
//! Two layers live here:
//!
//! - [`frame`] - the fixed 15-byte frame header that delimits messages on
//!   the wire (magic, length, type bytes)
//! - [`serialization`] - the named payload serializers (`proto`,
//!   `msgpack`, `json`) applied to user request/response types

pub mod frame;
pub mod serialization;

pub use frame::{
    decode_frame, encode_frame, encode_frame_with, FrameHeader, FRAME_HEAD_LEN, MAGIC,
    MAX_PAYLOAD_LENGTH, VERSION,
};
pub use serialization::{SerializationType, DEFAULT_SERIALIZATION};
