//! Tier doubles for exercising fallback paths.

use std::sync::atomic::{AtomicU64, Ordering};

use peershare_protocol::FileId;
use tokio::sync::Semaphore;

use crate::chunk::{Chunk, ChunkMeta};
use crate::memory::MemoryTier;
use crate::tier::{ChunkTier, TierError, TierFuture};

/// A durable tier that is permanently unavailable.
///
/// Writes and reads fail; deletes succeed so cleanup paths stay quiet.
#[derive(Default)]
pub struct FailingTier {
    attempts: AtomicU64,
}

impl FailingTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put` calls received.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }
}

impl ChunkTier for FailingTier {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn put(&self, _chunk: Chunk) -> TierFuture<'_, ()> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        Box::pin(async { Err(TierError::Unavailable("simulated outage".into())) })
    }

    fn get<'a>(&'a self, _file_id: &'a FileId, _index: u32) -> TierFuture<'a, Option<Chunk>> {
        Box::pin(async { Err(TierError::Unavailable("simulated outage".into())) })
    }

    fn get_all<'a>(&'a self, _file_id: &'a FileId) -> TierFuture<'a, Vec<Chunk>> {
        Box::pin(async { Err(TierError::Unavailable("simulated outage".into())) })
    }

    fn list<'a>(&'a self, _file_id: &'a FileId) -> TierFuture<'a, Vec<ChunkMeta>> {
        Box::pin(async { Err(TierError::Unavailable("simulated outage".into())) })
    }

    fn delete<'a>(&'a self, _file_id: &'a FileId) -> TierFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn delete_chunk<'a>(&'a self, _file_id: &'a FileId, _index: u32) -> TierFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// A working tier whose single-chunk reads wait for a permit.
///
/// Lets a test hold a streaming read between two chunks. Bulk reads,
/// listing and writes pass straight through.
pub struct GatedTier {
    inner: MemoryTier,
    gate: Semaphore,
    arrivals: Semaphore,
}

impl Default for GatedTier {
    fn default() -> Self {
        Self::new()
    }
}

impl GatedTier {
    /// Starts closed: every `get` waits.
    pub fn new() -> Self {
        Self {
            inner: MemoryTier::new(),
            gate: Semaphore::new(0),
            arrivals: Semaphore::new(0),
        }
    }

    /// Lets `reads` more single-chunk reads through.
    pub fn release(&self, reads: usize) {
        self.gate.add_permits(reads);
    }

    /// Resolves once `reads` more single-chunk reads have reached the gate.
    pub async fn wait_for_reads(&self, reads: u32) {
        if let Ok(permit) = self.arrivals.acquire_many(reads).await {
            permit.forget();
        }
    }
}

impl ChunkTier for GatedTier {
    fn name(&self) -> &'static str {
        "gated"
    }

    fn put(&self, chunk: Chunk) -> TierFuture<'_, ()> {
        self.inner.put(chunk)
    }

    fn get<'a>(&'a self, file_id: &'a FileId, index: u32) -> TierFuture<'a, Option<Chunk>> {
        Box::pin(async move {
            self.arrivals.add_permits(1);
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| TierError::Unavailable("gate closed".into()))?;
            permit.forget();
            self.inner.get(file_id, index).await
        })
    }

    fn get_all<'a>(&'a self, file_id: &'a FileId) -> TierFuture<'a, Vec<Chunk>> {
        self.inner.get_all(file_id)
    }

    fn list<'a>(&'a self, file_id: &'a FileId) -> TierFuture<'a, Vec<ChunkMeta>> {
        self.inner.list(file_id)
    }

    fn delete<'a>(&'a self, file_id: &'a FileId) -> TierFuture<'a, ()> {
        self.inner.delete(file_id)
    }

    fn delete_chunk<'a>(&'a self, file_id: &'a FileId, index: u32) -> TierFuture<'a, ()> {
        self.inner.delete_chunk(file_id, index)
    }
}
