use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use peershare_protocol::FileId;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::StoreError;
use crate::chunk::{Chunk, ChunkMeta};
use crate::integrity::verify_layout;
use crate::memory::MemoryTier;
use crate::tier::ChunkTier;

/// Counters that make storage degradation observable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Chunks written to the durable tier.
    pub durable_writes: u64,
    /// Chunks written to the memory tier instead of the durable tier.
    pub fallback_writes: u64,
    /// Durable tier write errors.
    pub durable_failures: u64,
}

#[derive(Default)]
struct Counters {
    durable_writes: AtomicU64,
    fallback_writes: AtomicU64,
    durable_failures: AtomicU64,
}

/// Chunk storage shared by every receiver on a node.
///
/// Read precedence, per chunk index: hot cache, durable tier, memory tier.
pub struct TieredChunkStore {
    hot: RwLock<HashMap<FileId, BTreeMap<u32, Chunk>>>,
    durable: Option<Arc<dyn ChunkTier>>,
    memory: MemoryTier,
    counters: Counters,
}

impl TieredChunkStore {
    /// Creates a store. Without a durable tier every write lands in memory.
    pub fn new(durable: Option<Arc<dyn ChunkTier>>) -> Self {
        match &durable {
            Some(tier) => info!(tier = tier.name(), "chunk store using durable tier"),
            None => info!("chunk store has no durable tier, using memory only"),
        }
        Self {
            hot: RwLock::new(HashMap::new()),
            durable,
            memory: MemoryTier::new(),
            counters: Counters::default(),
        }
    }

    /// Memory-only store.
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Starts caching writes for a file that is actively receiving.
    pub async fn open_hot(&self, file_id: &FileId) {
        self.hot.write().await.entry(file_id.clone()).or_default();
    }

    /// Drops the hot cache for a file. The other tiers keep their chunks.
    pub async fn close_hot(&self, file_id: &FileId) {
        self.hot.write().await.remove(file_id);
    }

    /// Stores one chunk, replacing any chunk with the same index.
    ///
    /// A durable tier failure is logged and counted, and the chunk goes to
    /// memory instead. Only an empty file id is rejected.
    pub async fn put(&self, file_id: &FileId, index: u32, data: Bytes) -> Result<(), StoreError> {
        if file_id.is_empty() {
            return Err(StoreError::EmptyFileId);
        }
        let chunk = Chunk::new(file_id.clone(), index, data);

        if let Some(slot) = self.hot.write().await.get_mut(file_id) {
            slot.insert(index, chunk.clone());
        }

        let Some(durable) = &self.durable else {
            self.write_fallback(chunk).await;
            return Ok(());
        };

        match durable.put(chunk.clone()).await {
            Ok(()) => {
                self.counters.durable_writes.fetch_add(1, Ordering::Relaxed);
                // An older fallback copy must not outlive the durable one.
                if let Err(e) = self.memory.delete_chunk(file_id, index).await {
                    warn!(file_id = %file_id, chunk_index = index, error = %e, "stale fallback chunk not removed");
                }
            }
            Err(e) => {
                self.counters.durable_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    file_id = %file_id,
                    chunk_index = index,
                    tier = durable.name(),
                    error = %e,
                    "store degraded, writing chunk to memory"
                );
                // A stale durable copy would shadow the fallback on read.
                if let Err(e) = durable.delete_chunk(file_id, index).await {
                    debug!(file_id = %file_id, chunk_index = index, error = %e, "stale durable chunk not removed");
                }
                self.write_fallback(chunk).await;
            }
        }
        Ok(())
    }

    async fn write_fallback(&self, chunk: Chunk) {
        self.counters.fallback_writes.fetch_add(1, Ordering::Relaxed);
        let (file_id, index) = (chunk.file_id.clone(), chunk.index);
        if let Err(e) = self.memory.put(chunk).await {
            error!(file_id = %file_id, chunk_index = index, error = %e, "memory tier write failed");
        }
    }

    /// Returns every chunk for `file_id`, sorted by index.
    ///
    /// Never fails: an unreadable tier is logged and skipped.
    pub async fn get_all(&self, file_id: &FileId) -> Vec<Chunk> {
        let mut merged: BTreeMap<u32, Chunk> = BTreeMap::new();

        match self.memory.get_all(file_id).await {
            Ok(chunks) => merged.extend(chunks.into_iter().map(|c| (c.index, c))),
            Err(e) => warn!(file_id = %file_id, error = %e, "memory tier read failed"),
        }
        if let Some(durable) = &self.durable {
            match durable.get_all(file_id).await {
                Ok(chunks) => merged.extend(chunks.into_iter().map(|c| (c.index, c))),
                Err(e) => warn!(
                    file_id = %file_id,
                    tier = durable.name(),
                    error = %e,
                    "durable tier read failed"
                ),
            }
        }
        if let Some(hot) = self.hot.read().await.get(file_id) {
            merged.extend(hot.iter().map(|(i, c)| (*i, c.clone())));
        }

        merged.into_values().collect()
    }

    /// Returns one chunk, with the same tier precedence as
    /// [`get_all`](Self::get_all). `None` if no tier holds it.
    pub async fn get_chunk(&self, file_id: &FileId, index: u32) -> Option<Chunk> {
        if let Some(chunk) = self
            .hot
            .read()
            .await
            .get(file_id)
            .and_then(|hot| hot.get(&index))
        {
            return Some(chunk.clone());
        }
        if let Some(durable) = &self.durable {
            match durable.get(file_id, index).await {
                Ok(Some(chunk)) => return Some(chunk),
                Ok(None) => {}
                Err(e) => warn!(
                    file_id = %file_id,
                    chunk_index = index,
                    tier = durable.name(),
                    error = %e,
                    "durable tier read failed"
                ),
            }
        }
        match self.memory.get(file_id, index).await {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(file_id = %file_id, chunk_index = index, error = %e, "memory tier read failed");
                None
            }
        }
    }

    /// Index and length of every stored chunk, sorted by index.
    pub async fn list(&self, file_id: &FileId) -> Vec<ChunkMeta> {
        let mut merged: BTreeMap<u32, ChunkMeta> = BTreeMap::new();

        if let Ok(metas) = self.memory.list(file_id).await {
            merged.extend(metas.into_iter().map(|m| (m.index, m)));
        }
        if let Some(durable) = &self.durable {
            match durable.list(file_id).await {
                Ok(metas) => merged.extend(metas.into_iter().map(|m| (m.index, m))),
                Err(e) => warn!(
                    file_id = %file_id,
                    tier = durable.name(),
                    error = %e,
                    "durable tier list failed"
                ),
            }
        }
        if let Some(hot) = self.hot.read().await.get(file_id) {
            merged.extend(hot.values().map(|c| (c.index, c.meta())));
        }

        merged.into_values().collect()
    }

    /// Returns `true` if any chunk is stored for `file_id`.
    pub async fn contains(&self, file_id: &FileId) -> bool {
        !self.list(file_id).await.is_empty()
    }

    /// Removes `file_id` from every tier. Deleting an unknown id succeeds.
    pub async fn delete(&self, file_id: &FileId) -> Result<(), StoreError> {
        self.hot.write().await.remove(file_id);
        if let Err(e) = self.memory.delete(file_id).await {
            warn!(file_id = %file_id, error = %e, "memory tier delete failed");
        }
        if let Some(durable) = &self.durable {
            durable
                .delete(file_id)
                .await
                .map_err(|source| StoreError::Delete {
                    tier: durable.name(),
                    source,
                })?;
        }
        debug!(file_id = %file_id, "chunks deleted");
        Ok(())
    }

    /// Checks that the stored chunks cover the file without loading them.
    pub async fn validate(&self, file_id: &FileId, expected_size: u64) -> bool {
        self.validate_layout(file_id, expected_size, None).await
    }

    /// Like [`validate`](Self::validate), also requiring `expected_chunks` indices.
    pub async fn validate_layout(
        &self,
        file_id: &FileId,
        expected_size: u64,
        expected_chunks: Option<u32>,
    ) -> bool {
        let metas = self.list(file_id).await;
        verify_layout(&metas, expected_size, expected_chunks).is_ok()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            durable_writes: self.counters.durable_writes.load(Ordering::Relaxed),
            fallback_writes: self.counters.fallback_writes.load(Ordering::Relaxed),
            durable_failures: self.counters.durable_failures.load(Ordering::Relaxed),
        }
    }

    pub fn has_durable_tier(&self) -> bool {
        self.durable.is_some()
    }
}
