//! Error types for peer connections.

use peershare_protocol::ProtocolError;

/// Errors from sending over an established transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("codec error: {0}")]
    Codec(#[from] ProtocolError),

    #[error("send failed: {0}")]
    Send(String),
}

/// Errors from establishing a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("connection to {peer_id} timed out")]
    Timeout { peer_id: String },

    #[error("peer {peer_id} is unreachable: {reason}")]
    Unreachable { peer_id: String, reason: String },

    #[error("cancelled")]
    Cancelled,
}

impl ConnectError {
    /// Every connection failure can be retried by the user.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}
