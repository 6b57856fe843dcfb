use std::collections::{BTreeMap, HashMap};

use peershare_protocol::FileId;
use tokio::sync::RwLock;

use crate::chunk::{Chunk, ChunkMeta};
use crate::tier::{ChunkTier, TierFuture};

/// In-process tier. Never fails; contents are lost when the process exits.
#[derive(Default)]
pub struct MemoryTier {
    files: RwLock<HashMap<FileId, BTreeMap<u32, Chunk>>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if any chunk is held for `file_id`.
    pub async fn contains(&self, file_id: &FileId) -> bool {
        self.files
            .read()
            .await
            .get(file_id)
            .is_some_and(|chunks| !chunks.is_empty())
    }
}

impl ChunkTier for MemoryTier {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn put(&self, chunk: Chunk) -> TierFuture<'_, ()> {
        Box::pin(async move {
            let mut files = self.files.write().await;
            files
                .entry(chunk.file_id.clone())
                .or_default()
                .insert(chunk.index, chunk);
            Ok(())
        })
    }

    fn get<'a>(&'a self, file_id: &'a FileId, index: u32) -> TierFuture<'a, Option<Chunk>> {
        Box::pin(async move {
            let files = self.files.read().await;
            Ok(files.get(file_id).and_then(|chunks| chunks.get(&index)).cloned())
        })
    }

    fn get_all<'a>(&'a self, file_id: &'a FileId) -> TierFuture<'a, Vec<Chunk>> {
        Box::pin(async move {
            let files = self.files.read().await;
            Ok(files
                .get(file_id)
                .map(|chunks| chunks.values().cloned().collect())
                .unwrap_or_default())
        })
    }

    fn list<'a>(&'a self, file_id: &'a FileId) -> TierFuture<'a, Vec<ChunkMeta>> {
        Box::pin(async move {
            let files = self.files.read().await;
            Ok(files
                .get(file_id)
                .map(|chunks| chunks.values().map(Chunk::meta).collect())
                .unwrap_or_default())
        })
    }

    fn delete<'a>(&'a self, file_id: &'a FileId) -> TierFuture<'a, ()> {
        Box::pin(async move {
            self.files.write().await.remove(file_id);
            Ok(())
        })
    }

    fn delete_chunk<'a>(&'a self, file_id: &'a FileId, index: u32) -> TierFuture<'a, ()> {
        Box::pin(async move {
            let mut files = self.files.write().await;
            if let Some(chunks) = files.get_mut(file_id) {
                chunks.remove(&index);
                if chunks.is_empty() {
                    files.remove(file_id);
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[tokio::test]
    async fn put_overwrites_same_index() {
        let tier = MemoryTier::new();
        let id = FileId::new("f");
        tier.put(Chunk::new(id.clone(), 0, Bytes::from_static(b"old")))
            .await
            .unwrap();
        tier.put(Chunk::new(id.clone(), 0, Bytes::from_static(b"newer")))
            .await
            .unwrap();

        let chunks = tier.get_all(&id).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data, Bytes::from_static(b"newer"));
    }

    #[tokio::test]
    async fn delete_chunk_drops_empty_file() {
        let tier = MemoryTier::new();
        let id = FileId::new("f");
        tier.put(Chunk::new(id.clone(), 3, Bytes::from_static(b"x")))
            .await
            .unwrap();
        assert!(tier.contains(&id).await);

        tier.delete_chunk(&id, 3).await.unwrap();
        assert!(!tier.contains(&id).await);
        // Deleting again is fine.
        tier.delete_chunk(&id, 3).await.unwrap();
        tier.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn list_reports_lengths() {
        let tier = MemoryTier::new();
        let id = FileId::new("f");
        tier.put(Chunk::new(id.clone(), 1, Bytes::from_static(b"abcd")))
            .await
            .unwrap();
        let metas = tier.list(&id).await.unwrap();
        assert_eq!(
            metas,
            vec![ChunkMeta {
                index: 1,
                byte_length: Some(4)
            }]
        );
        assert!(tier.list(&FileId::new("other")).await.unwrap().is_empty());
    }
}
