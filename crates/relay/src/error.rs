use peershare_connection::{ConnectError, TransportError};
use peershare_protocol::FileId;
use peershare_transfer::SendError;

/// Errors from relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The holder no longer has the content.
    #[error("{file_id} is not available")]
    NotAvailable { file_id: FileId },

    #[error("{file_id} is our own file")]
    OwnFile { file_id: FileId },

    #[error("no route to {peer_id}")]
    NoRoute { peer_id: String },

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RelayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotAvailable { .. } | Self::OwnFile { .. } => false,
            Self::NoRoute { .. } | Self::Transport(_) => true,
            Self::Connect(e) => e.is_retryable(),
            Self::Send(e) => e.is_retryable(),
        }
    }
}
