//! # polaredge-proto
//!
//! Wire types and framing for the polaredge manifest transport.
//!
//! The client pushes a *manifest* (an ordered batch of route descriptors,
//! encoded as a UTF-8 JSON array) to the agent over a TCP socket. A stream
//! socket gives no message-boundary guarantee, so every payload travels
//! inside an explicit frame: a 4-byte big-endian length prefix followed by
//! the payload bytes. The receiver answers a complete frame with the
//! two-byte acknowledgment literal `ok`.

mod framing;
mod manifest;

pub use framing::{read_frame, write_frame, TransportError, ACK, MAX_FRAME_LEN};
pub use manifest::{decode_manifest, encode_manifest, DecodeError, RouteDescriptor};
