use std::collections::HashSet;

use peershare_protocol::{FileId, FileMetadata};

use crate::progress::Direction;

/// One row of the shared-files listing.
#[derive(Debug, Clone, PartialEq)]
pub struct FileHistoryEntry {
    pub file_id: FileId,
    pub direction: Direction,
    pub metadata: FileMetadata,
    /// Peer the file came from (or our own id for sent files).
    pub shared_by: String,
}

/// Sent and received files, each file id recorded at most once.
///
/// Relay forwarding can deliver the same metadata over several paths; the
/// file id is the de-duplication key across both directions.
#[derive(Debug, Default)]
pub struct FileHistory {
    entries: Vec<FileHistoryEntry>,
    seen: HashSet<FileId>,
}

impl FileHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `entry`. Returns `false` if its file id is already present.
    pub fn record(&mut self, entry: FileHistoryEntry) -> bool {
        if !self.seen.insert(entry.file_id.clone()) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn contains(&self, file_id: &FileId) -> bool {
        self.seen.contains(file_id)
    }

    pub fn get(&self, file_id: &FileId) -> Option<&FileHistoryEntry> {
        self.entries.iter().find(|e| &e.file_id == file_id)
    }

    /// Entries in recording order.
    pub fn entries(&self) -> &[FileHistoryEntry] {
        &self.entries
    }

    pub fn by_direction(&self, direction: Direction) -> impl Iterator<Item = &FileHistoryEntry> {
        self.entries.iter().filter(move |e| e.direction == direction)
    }
}
