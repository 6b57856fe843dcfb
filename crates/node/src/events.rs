//! Events and user notifications emitted by a node.

use std::sync::{Mutex, PoisonError};

use peershare_connection::LifecycleEvent;
use peershare_protocol::{FileId, FileMetadata};
use peershare_transfer::{Direction, TransferProgress, TransferStats};
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Events emitted by a [`Node`](crate::Node).
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    PeerConnected {
        peer_id: String,
    },
    /// `notified` is set when the peer announced its departure.
    PeerDisconnected {
        peer_id: String,
        notified: bool,
    },
    /// Metadata for a file this node does not hold arrived for the first time.
    FileAnnounced {
        metadata: FileMetadata,
        from: String,
    },
    TransferStarted {
        metadata: FileMetadata,
        direction: Direction,
    },
    Progress(TransferProgress),
    TransferCompleted {
        metadata: FileMetadata,
        direction: Direction,
        stats: TransferStats,
    },
    TransferFailed {
        file_id: FileId,
        reason: String,
        retryable: bool,
    },
    Lifecycle(LifecycleEvent),
}

/// Sending half of the node event channel.
///
/// Never blocks: when the channel is full the event is dropped.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<NodeEvent>,
}

impl EventSink {
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<NodeEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub(crate) fn emit(&self, event: NodeEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(?event, "event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("event receiver gone");
            }
        }
    }
}

/// The visual category of a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
    Warning,
    Info,
}

/// A human-readable notification for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: String,
    pub message: Option<String>,
}

impl Notice {
    pub fn success(title: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            title: title.into(),
            message: None,
        }
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            title: title.into(),
            message: Some(message.into()),
        }
    }
}

/// UI notification seam. Fire-and-forget.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Notifier that only logs.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        match notice.kind {
            NoticeKind::Error => warn!(title = %notice.title, message = ?notice.message, "notice"),
            _ => tracing::info!(title = %notice.title, message = ?notice.message, "notice"),
        }
    }
}

/// Notifier that keeps every notice in memory.
#[derive(Debug, Default)]
pub struct NoticeQueue {
    notices: Mutex<Vec<Notice>>,
}

impl NoticeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn errors(&self) -> Vec<Notice> {
        self.notices()
            .into_iter()
            .filter(|n| n.kind == NoticeKind::Error)
            .collect()
    }

    pub fn clear(&self) {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Notifier for NoticeQueue {
    fn notify(&self, notice: Notice) {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notice);
    }
}
