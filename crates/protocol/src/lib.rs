//! Wire protocol for peershare peer-to-peer file transfers.
//!
//! Messages are JSON objects discriminated by a kebab-case `type` field with
//! camelCase payload fields. Binary chunk data travels as base64.

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

pub use constants::{
    CHUNK_PACING, CONNECT_TIMEOUT, DEFAULT_CHUNK_SIZE, KEEP_ALIVE_INTERVAL, STALE_AFTER,
    TEXT_FALLBACK_LIMIT, size_tolerance, total_chunks, within_tolerance,
};
pub use envelope::{ProtocolError, decode, encode};
pub use messages::PeerMessage;
pub use types::{FileId, FileMetadata, now_millis};
