use std::collections::HashMap;
use std::sync::Arc;

use peershare_protocol::{FileId, FileMetadata};
use tokio::sync::RwLock;
use tracing::debug;

use crate::source::ByteSource;

/// A file this node offers, with the handle needed to stream it again.
#[derive(Clone)]
pub struct SentFile {
    pub metadata: FileMetadata,
    pub source: Arc<dyn ByteSource>,
}

/// Sender-side registry of offered files.
///
/// Entries live for the whole session unless evicted.
#[derive(Default)]
pub struct SentFileRegistry {
    files: RwLock<HashMap<FileId, SentFile>>,
}

impl SentFileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, metadata: FileMetadata, source: Arc<dyn ByteSource>) {
        debug!(file_id = %metadata.file_id, name = %metadata.name, "file registered");
        self.files
            .write()
            .await
            .insert(metadata.file_id.clone(), SentFile { metadata, source });
    }

    pub async fn get(&self, file_id: &FileId) -> Option<SentFile> {
        self.files.read().await.get(file_id).cloned()
    }

    pub async fn contains(&self, file_id: &FileId) -> bool {
        self.files.read().await.contains_key(file_id)
    }

    pub async fn evict(&self, file_id: &FileId) -> bool {
        self.files.write().await.remove(file_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }
}
