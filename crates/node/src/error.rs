use peershare_chunk_store::TierError;
use peershare_connection::{ConnectError, TransportError};
use peershare_protocol::FileId;
use peershare_relay::RelayError;
use peershare_transfer::{DeliveryError, DownloadStatus, SendError};

use crate::config::ConfigError;

/// Errors from node operations.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open chunk store: {0}")]
    Store(#[from] TierError),

    #[error("unknown file {file_id}")]
    UnknownFile { file_id: FileId },

    #[error("{file_id} cannot do that while {status:?}")]
    InvalidState {
        file_id: FileId,
        status: DownloadStatus,
    },

    #[error("peer {peer_id} is not connected")]
    NotConnected { peer_id: String },

    #[error("no connector configured")]
    NoConnector,

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Config(_) | Self::UnknownFile { .. } | Self::NoConnector => false,
            Self::Store(_) | Self::InvalidState { .. } | Self::Io(_) => false,
            Self::NotConnected { .. } | Self::Transport(_) => true,
            Self::Connect(e) => e.is_retryable(),
            Self::Send(e) => e.is_retryable(),
            Self::Relay(e) => e.is_retryable(),
            Self::Delivery(e) => e.is_retryable(),
        }
    }
}
