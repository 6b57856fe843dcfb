use std::collections::HashMap;

use peershare_protocol::FileId;

/// Per-file download state shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    /// Metadata known, content not requested.
    Available,
    Requested,
    Receiving { percent: u8 },
    /// All chunks stored and verified; ready to download.
    Ready,
    Delivering,
    Delivered,
    Failed { reason: String, retryable: bool },
}

impl DownloadStatus {
    /// Whether the user can start (or restart) a download from this state.
    pub fn can_request(&self) -> bool {
        match self {
            Self::Available => true,
            Self::Failed { retryable, .. } => *retryable,
            _ => false,
        }
    }

    pub fn can_deliver(&self) -> bool {
        matches!(self, Self::Ready | Self::Delivered)
    }
}

/// Download status per file id, with rollback for cancelled deliveries.
#[derive(Debug, Default)]
pub struct DownloadTracker {
    statuses: HashMap<FileId, DownloadStatus>,
    before_delivery: HashMap<FileId, DownloadStatus>,
}

impl DownloadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, file_id: &FileId) -> Option<&DownloadStatus> {
        self.statuses.get(file_id)
    }

    pub fn set(&mut self, file_id: &FileId, status: DownloadStatus) {
        self.statuses.insert(file_id.clone(), status);
    }

    /// Marks a newly announced file as available unless it is already tracked.
    pub fn announce(&mut self, file_id: &FileId) {
        self.statuses
            .entry(file_id.clone())
            .or_insert(DownloadStatus::Available);
    }

    /// Enters `Delivering`, remembering the current status.
    pub fn begin_delivery(&mut self, file_id: &FileId) {
        let previous = self
            .statuses
            .insert(file_id.clone(), DownloadStatus::Delivering)
            .unwrap_or(DownloadStatus::Ready);
        self.before_delivery.insert(file_id.clone(), previous);
    }

    pub fn finish_delivery(&mut self, file_id: &FileId) {
        self.before_delivery.remove(file_id);
        self.set(file_id, DownloadStatus::Delivered);
    }

    /// Restores the status held before [`begin_delivery`](Self::begin_delivery).
    pub fn cancel_delivery(&mut self, file_id: &FileId) -> DownloadStatus {
        let previous = self
            .before_delivery
            .remove(file_id)
            .unwrap_or(DownloadStatus::Ready);
        self.set(file_id, previous.clone());
        previous
    }

    pub fn fail(&mut self, file_id: &FileId, reason: impl Into<String>, retryable: bool) {
        self.before_delivery.remove(file_id);
        self.set(
            file_id,
            DownloadStatus::Failed {
                reason: reason.into(),
                retryable,
            },
        );
    }

    pub fn remove(&mut self, file_id: &FileId) {
        self.statuses.remove(file_id);
        self.before_delivery.remove(file_id);
    }
}
