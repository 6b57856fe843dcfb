use std::future::Future;
use std::pin::Pin;

use peershare_protocol::FileId;

use crate::chunk::{Chunk, ChunkMeta};

/// Boxed future returned by [`ChunkTier`] methods.
pub type TierFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TierError>> + Send + 'a>>;

/// Errors produced by a single storage tier.
#[derive(Debug, thiserror::Error)]
pub enum TierError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tier unavailable: {0}")]
    Unavailable(String),
}

/// A key-value backend for chunks keyed by `(FileId, index)`.
///
/// `list` is the enumerate-by-prefix primitive: it returns every chunk stored
/// under one file id without loading the bytes.
pub trait ChunkTier: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Stores `chunk`, replacing any chunk with the same index.
    fn put(&self, chunk: Chunk) -> TierFuture<'_, ()>;

    /// Returns one chunk, `None` if it is not stored.
    fn get<'a>(&'a self, file_id: &'a FileId, index: u32) -> TierFuture<'a, Option<Chunk>>;

    /// Returns every chunk stored for `file_id`, in any order.
    fn get_all<'a>(&'a self, file_id: &'a FileId) -> TierFuture<'a, Vec<Chunk>>;

    /// Returns index and length of every chunk stored for `file_id`.
    fn list<'a>(&'a self, file_id: &'a FileId) -> TierFuture<'a, Vec<ChunkMeta>>;

    /// Removes every chunk stored for `file_id`. Succeeds if none exist.
    fn delete<'a>(&'a self, file_id: &'a FileId) -> TierFuture<'a, ()>;

    /// Removes one chunk. Succeeds if it does not exist.
    fn delete_chunk<'a>(&'a self, file_id: &'a FileId, index: u32) -> TierFuture<'a, ()>;
}
