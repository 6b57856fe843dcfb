//! Tiered storage for received file chunks.
//!
//! Chunks are addressed by `(FileId, chunk index)`. Writes go to a durable
//! tier when one is configured and fall back to memory when it fails; reads
//! merge an in-process hot cache, the durable tier and the memory tier.

mod chunk;
mod disk;
mod integrity;
mod memory;
mod store;
pub mod testing;
mod tier;

pub use chunk::{Chunk, ChunkMeta};
pub use disk::DiskTier;
pub use integrity::{IntegrityError, MISSING_REPORT_LIMIT, verify_layout};
pub use memory::MemoryTier;
pub use store::{StoreStats, TieredChunkStore};
pub use tier::{ChunkTier, TierError, TierFuture};

/// Errors returned by [`TieredChunkStore`] operations.
///
/// Durable tier failures during `put` are not errors: the store degrades to
/// memory and records the failure in [`StoreStats`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("file id must not be empty")]
    EmptyFileId,

    #[error("{tier} tier failed to delete chunks: {source}")]
    Delete {
        tier: &'static str,
        #[source]
        source: TierError,
    },
}
