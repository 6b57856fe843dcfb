//! Error types for the transfer pipelines.

use peershare_chunk_store::{IntegrityError, StoreError};
use peershare_connection::TransportError;
use peershare_protocol::{FileId, ProtocolError};

/// Errors from the sender pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("connection to {peer_id} is closed")]
    ConnectionClosed { peer_id: String },

    #[error("no target connections")]
    NoTargets,

    #[error("failed to read chunk at offset {offset}: {source}")]
    ChunkReadError {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("send to {peer_id} failed: {source}")]
    Transport {
        peer_id: String,
        #[source]
        source: TransportError,
    },

    #[error("file cannot be split for the wire: {0}")]
    Layout(#[from] ProtocolError),
}

impl SendError {
    /// Connection problems can be retried once the link is back.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionClosed { .. } | Self::Transport { .. })
    }
}

/// Errors from the receiver pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    /// A message for a transfer that is not in flight. Never fatal to the connection.
    #[error("protocol violation for {file_id}: {reason}")]
    ProtocolViolation { file_id: FileId, reason: String },

    #[error("transfer {file_id} failed verification: {source}")]
    Integrity {
        file_id: FileId,
        #[source]
        source: IntegrityError,
    },

    #[error("chunk store rejected {file_id}: {source}")]
    Store {
        file_id: FileId,
        #[source]
        source: StoreError,
    },
}

impl ReceiveError {
    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// Errors from delivering a reconstructed file.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// The user stopped the delivery. Chunks are untouched.
    #[error("delivery cancelled")]
    Cancelled,

    #[error("invalid file name: {0}")]
    InvalidPath(String),

    #[error("{size} bytes is too large for text delivery (limit {limit})")]
    TooLargeForText { size: u64, limit: u64 },

    #[error("no delivery strategy available")]
    NoStrategy,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeliveryError {
    /// Integrity failures need a fresh transfer; everything else can be retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Integrity(_))
    }
}
