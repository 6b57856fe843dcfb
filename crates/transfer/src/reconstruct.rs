//! Reconstruction engine: validates stored chunks and delivers the file.
//!
//! Delivery strategies, by preference: stream to a file (bounded memory),
//! one in-memory buffer, or base64 text for small files only.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{Bytes, BytesMut};
use peershare_chunk_store::{Chunk, ChunkMeta, IntegrityError, TieredChunkStore, verify_layout};
use peershare_protocol::{FileId, FileMetadata, TEXT_FALLBACK_LIMIT};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DeliveryError;
use crate::progress::{Direction, ProgressCallback, TransferProgress};

/// Longest name, in bytes, that one path component may carry.
const MAX_NAME_LEN: usize = 255;

/// Checks that a peer-supplied name is a single plain file name.
///
/// The name is joined onto the download directory as is, so separators of
/// any platform and the `.`/`..` entries are refused outright.
pub fn validate_file_name(name: &str) -> Result<(), DeliveryError> {
    let reason = if name.is_empty() {
        "empty name"
    } else if name == "." || name == ".." {
        "not a file name"
    } else if name.contains(['/', '\\', ':']) {
        "path separators not allowed"
    } else if name.chars().any(char::is_control) {
        "control characters not allowed"
    } else if name.len() > MAX_NAME_LEN {
        "name too long"
    } else {
        return Ok(());
    };
    Err(DeliveryError::InvalidPath(format!("{reason}: {name:?}")))
}

/// How a reconstructed file is handed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStrategy {
    /// Write chunk by chunk into `dir`, never holding the whole file.
    File { dir: PathBuf },
    /// One contiguous in-memory buffer.
    Buffer,
    /// Base64 text, for files below the text limit.
    Text,
}

/// What the environment can do, used to pick a [`DeliveryStrategy`].
#[derive(Debug, Clone)]
pub struct DeliveryCapabilities {
    pub download_dir: Option<PathBuf>,
    pub buffer: bool,
    pub text: bool,
    /// Files at or above this size never use the text strategy.
    pub text_limit: u64,
}

impl Default for DeliveryCapabilities {
    fn default() -> Self {
        Self {
            download_dir: None,
            buffer: true,
            text: true,
            text_limit: TEXT_FALLBACK_LIMIT,
        }
    }
}

impl DeliveryCapabilities {
    /// Best available strategy for a file of `size` bytes.
    pub fn select(&self, size: u64) -> Option<DeliveryStrategy> {
        if let Some(dir) = &self.download_dir {
            return Some(DeliveryStrategy::File { dir: dir.clone() });
        }
        if self.buffer {
            return Some(DeliveryStrategy::Buffer);
        }
        if self.text && size < self.text_limit {
            return Some(DeliveryStrategy::Text);
        }
        None
    }
}

/// A successfully delivered file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivered {
    File(PathBuf),
    Buffer(Bytes),
    Text(String),
}

/// Reads chunks back from the store and turns them into deliverable output.
#[derive(Clone)]
pub struct ReconstructionEngine {
    store: Arc<TieredChunkStore>,
    text_limit: u64,
    progress: Option<ProgressCallback>,
}

impl ReconstructionEngine {
    pub fn new(store: Arc<TieredChunkStore>) -> Self {
        Self {
            store,
            text_limit: TEXT_FALLBACK_LIMIT,
            progress: None,
        }
    }

    pub fn with_text_limit(mut self, limit: u64) -> Self {
        self.text_limit = limit;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Reassembles `file_id` into one byte sequence.
    pub async fn reconstruct(&self, file_id: &FileId, expected_size: u64) -> Result<Bytes, IntegrityError> {
        self.reconstruct_layout(file_id, expected_size, None).await
    }

    /// Like [`reconstruct`](Self::reconstruct), also requiring `expected_chunks` indices.
    pub async fn reconstruct_layout(
        &self,
        file_id: &FileId,
        expected_size: u64,
        expected_chunks: Option<u32>,
    ) -> Result<Bytes, IntegrityError> {
        let chunks = self.verified_chunks(file_id, expected_size, expected_chunks).await?;
        let total: usize = chunks.iter().map(|c| c.data.len()).sum();
        let mut out = BytesMut::with_capacity(total);
        for chunk in &chunks {
            out.extend_from_slice(&chunk.data);
        }
        self.report(file_id, total as u64);
        Ok(out.freeze())
    }

    /// Fetches, validates and index-sorts the chunks of `file_id`.
    async fn verified_chunks(
        &self,
        file_id: &FileId,
        expected_size: u64,
        expected_chunks: Option<u32>,
    ) -> Result<Vec<Chunk>, IntegrityError> {
        let mut chunks = self.store.get_all(file_id).await;
        if chunks.is_empty() {
            return Err(IntegrityError::NoChunksFound);
        }
        let metas: Vec<_> = chunks.iter().map(Chunk::meta).collect();
        verify_layout(&metas, expected_size, expected_chunks).inspect_err(|e| {
            warn!(file_id = %file_id, error = %e, "reconstruction rejected");
        })?;
        chunks.sort_by_key(|c| c.index);
        Ok(chunks)
    }

    /// Validates the stored layout of `file_id` from chunk metadata alone.
    async fn verified_layout(
        &self,
        file_id: &FileId,
        expected_size: u64,
        expected_chunks: Option<u32>,
    ) -> Result<Vec<ChunkMeta>, IntegrityError> {
        let metas = self.store.list(file_id).await;
        verify_layout(&metas, expected_size, expected_chunks).inspect_err(|e| {
            warn!(file_id = %file_id, error = %e, "reconstruction rejected");
        })?;
        Ok(metas)
    }

    /// Delivers `metadata`'s file using `strategy`.
    ///
    /// The file strategy reads one chunk at a time. A cancelled delivery
    /// removes any partial output and leaves the stored chunks untouched.
    pub async fn deliver(
        &self,
        metadata: &FileMetadata,
        expected_chunks: Option<u32>,
        strategy: &DeliveryStrategy,
        cancel: &CancellationToken,
    ) -> Result<Delivered, DeliveryError> {
        if let DeliveryStrategy::Text = strategy
            && metadata.total_size >= self.text_limit
        {
            return Err(DeliveryError::TooLargeForText {
                size: metadata.total_size,
                limit: self.text_limit,
            });
        }
        if let DeliveryStrategy::File { .. } = strategy {
            validate_file_name(&metadata.name)?;
        }

        let file_id = &metadata.file_id;
        let delivered = match strategy {
            DeliveryStrategy::File { dir } => {
                let metas = self
                    .verified_layout(file_id, metadata.total_size, expected_chunks)
                    .await?;
                debug!(file_id = %file_id, chunks = metas.len(), ?strategy, "delivering");
                Delivered::File(self.write_file(metadata, &metas, dir, cancel).await?)
            }
            DeliveryStrategy::Buffer | DeliveryStrategy::Text => {
                let chunks = self
                    .verified_chunks(file_id, metadata.total_size, expected_chunks)
                    .await?;
                debug!(file_id = %file_id, chunks = chunks.len(), ?strategy, "delivering");
                let bytes = self.collect(metadata, &chunks, cancel).await?;
                match strategy {
                    DeliveryStrategy::Text => Delivered::Text(STANDARD.encode(&bytes)),
                    _ => Delivered::Buffer(bytes),
                }
            }
        };
        info!(file_id = %metadata.file_id, name = %metadata.name, "file delivered");
        Ok(delivered)
    }

    async fn collect(
        &self,
        metadata: &FileMetadata,
        chunks: &[Chunk],
        cancel: &CancellationToken,
    ) -> Result<Bytes, DeliveryError> {
        let total: usize = chunks.iter().map(|c| c.data.len()).sum();
        let mut out = BytesMut::with_capacity(total);
        for chunk in chunks {
            tokio::task::yield_now().await;
            if cancel.is_cancelled() {
                info!(file_id = %metadata.file_id, "delivery cancelled");
                return Err(DeliveryError::Cancelled);
            }
            out.extend_from_slice(&chunk.data);
        }
        self.report(&metadata.file_id, total as u64);
        Ok(out.freeze())
    }

    async fn write_file(
        &self,
        metadata: &FileMetadata,
        metas: &[ChunkMeta],
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, DeliveryError> {
        let target = dir.join(&metadata.name);
        let partial = part_path(&target);
        tokio::fs::create_dir_all(dir).await?;

        match self.write_chunks(&metadata.file_id, metas, &partial, cancel).await {
            Ok(written) => {
                tokio::fs::rename(&partial, &target).await?;
                self.report(&metadata.file_id, written);
                Ok(target)
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&partial).await {
                    debug!(path = %partial.display(), error = %rm, "partial file not removed");
                }
                if matches!(e, DeliveryError::Cancelled) {
                    info!(file_id = %metadata.file_id, "delivery cancelled, partial file removed");
                }
                Err(e)
            }
        }
    }

    /// Streams the chunks named by `metas` into a new file at `path`.
    async fn write_chunks(
        &self,
        file_id: &FileId,
        metas: &[ChunkMeta],
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, DeliveryError> {
        let mut file = tokio::fs::File::create(path).await?;
        let mut written = 0u64;
        for meta in metas {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DeliveryError::Cancelled),
                chunk = self.store.get_chunk(file_id, meta.index) => chunk,
            };
            // The layout was checked up front. A chunk can still vanish or
            // fail its digest on the way back.
            let chunk = chunk.ok_or(IntegrityError::MissingChunks {
                missing: vec![meta.index],
                count: 1,
            })?;
            if chunk.byte_length().is_none() {
                return Err(IntegrityError::CorruptChunk { index: meta.index }.into());
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DeliveryError::Cancelled),
                r = file.write_all(&chunk.data) => r?,
            }
            written += chunk.data.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }

    fn report(&self, file_id: &FileId, bytes: u64) {
        if let Some(cb) = &self.progress {
            cb(TransferProgress {
                file_id: file_id.clone(),
                direction: Direction::Received,
                percent: 100,
                bytes,
                total: bytes,
                bytes_per_second: 0.0,
            });
        }
    }
}

fn part_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str, size: u64) -> FileMetadata {
        FileMetadata {
            file_id: FileId::new(format!("{name}-{size}")),
            name: name.into(),
            mime_type: "application/octet-stream".into(),
            total_size: size,
            original_sender_id: "a".into(),
            created_at: 1,
        }
    }

    async fn stored(meta: &FileMetadata, chunks: &[(u32, &[u8])]) -> ReconstructionEngine {
        let store = Arc::new(TieredChunkStore::in_memory());
        for (index, data) in chunks {
            store
                .put(&meta.file_id, *index, Bytes::copy_from_slice(data))
                .await
                .unwrap();
        }
        ReconstructionEngine::new(store)
    }

    #[tokio::test]
    async fn reconstruct_orders_by_index() {
        let m = meta("a.txt", 9);
        let engine = stored(&m, &[(2, b"ghi"), (0, b"abc"), (1, b"def")]).await;
        let bytes = engine.reconstruct(&m.file_id, 9).await.unwrap();
        assert_eq!(&bytes[..], b"abcdefghi");
    }

    #[tokio::test]
    async fn reconstruct_nothing_stored() {
        let m = meta("a.txt", 9);
        let engine = stored(&m, &[]).await;
        assert_eq!(
            engine.reconstruct(&m.file_id, 9).await,
            Err(IntegrityError::NoChunksFound)
        );
    }

    #[tokio::test]
    async fn reconstruct_reports_missing() {
        let m = meta("a.txt", 9);
        let engine = stored(&m, &[(0, b"abc"), (3, b"jkl")]).await;
        assert_eq!(
            engine.reconstruct(&m.file_id, 9).await,
            Err(IntegrityError::MissingChunks {
                missing: vec![1, 2],
                count: 2,
            })
        );
    }

    #[tokio::test]
    async fn final_progress_is_100() {
        let m = meta("a.txt", 3);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let engine = stored(&m, &[(0, b"abc")])
            .await
            .with_progress(Arc::new(move |p| s.lock().unwrap().push(p.percent)));
        engine.reconstruct(&m.file_id, 3).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![100]);
    }

    #[tokio::test]
    async fn deliver_to_file_renames_part() {
        let dir = tempfile::TempDir::new().unwrap();
        let m = meta("out.bin", 6);
        let engine = stored(&m, &[(1, b"def"), (0, b"abc")]).await;

        let strategy = DeliveryStrategy::File {
            dir: dir.path().to_path_buf(),
        };
        let delivered = engine
            .deliver(&m, None, &strategy, &CancellationToken::new())
            .await
            .unwrap();

        let path = dir.path().join("out.bin");
        assert_eq!(delivered, Delivered::File(path.clone()));
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
        assert!(!dir.path().join("out.bin.part").exists());
    }

    #[tokio::test]
    async fn cancelled_file_delivery_leaves_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let m = meta("out.bin", 6);
        let engine = stored(&m, &[(0, b"abc"), (1, b"def")]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let strategy = DeliveryStrategy::File {
            dir: dir.path().to_path_buf(),
        };
        let err = engine.deliver(&m, None, &strategy, &cancel).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Cancelled));
        assert!(err.is_retryable());
        assert!(!dir.path().join("out.bin").exists());
        assert!(!dir.path().join("out.bin.part").exists());

        // Chunks survive, so a second attempt works.
        let delivered = engine
            .deliver(&m, None, &strategy, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(delivered, Delivered::File(_)));
    }

    #[tokio::test]
    async fn file_delivery_reads_chunks_one_at_a_time() {
        use peershare_chunk_store::testing::GatedTier;

        let dir = tempfile::TempDir::new().unwrap();
        let gate = Arc::new(GatedTier::new());
        let store = Arc::new(TieredChunkStore::new(Some(gate.clone())));
        let m = meta("big.bin", 9);
        for (index, data) in [(0u32, b"abc"), (1, b"def"), (2, b"ghi")] {
            store
                .put(&m.file_id, index, Bytes::from_static(data))
                .await
                .unwrap();
        }
        let engine = ReconstructionEngine::new(store);
        let strategy = DeliveryStrategy::File {
            dir: dir.path().to_path_buf(),
        };

        gate.release(1);
        let cancel = CancellationToken::new();
        let delivery = {
            let (engine, m, strategy, cancel) = (engine.clone(), m.clone(), strategy.clone(), cancel.clone());
            tokio::spawn(async move { engine.deliver(&m, None, &strategy, &cancel).await })
        };
        // One chunk went through; the second read is held at the gate.
        gate.wait_for_reads(2).await;
        assert!(!delivery.is_finished());
        assert!(dir.path().join("big.bin.part").exists());

        gate.release(2);
        let delivered = delivery.await.unwrap().unwrap();
        assert_eq!(delivered, Delivered::File(dir.path().join("big.bin")));
        assert_eq!(std::fs::read(dir.path().join("big.bin")).unwrap(), b"abcdefghi");
    }

    #[tokio::test]
    async fn traversal_name_is_rejected_for_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let m = meta("../escape.bin", 3);
        let engine = stored(&m, &[(0, b"abc")]).await;
        let strategy = DeliveryStrategy::File {
            dir: dir.path().to_path_buf(),
        };
        let err = engine
            .deliver(&m, None, &strategy, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn text_strategy_encodes_and_respects_limit() {
        let m = meta("a.txt", 5);
        let engine = stored(&m, &[(0, b"Hello")]).await;
        let delivered = engine
            .deliver(&m, None, &DeliveryStrategy::Text, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(delivered, Delivered::Text("SGVsbG8=".into()));

        let engine = engine.with_text_limit(5);
        let err = engine
            .deliver(&m, None, &DeliveryStrategy::Text, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::TooLargeForText { size: 5, limit: 5 }));
    }

    #[tokio::test]
    async fn corrupt_delivery_is_not_retryable() {
        let m = meta("a.txt", 5000);
        let engine = stored(&m, &[(0, b"tiny")]).await;
        let err = engine
            .deliver(&m, None, &DeliveryStrategy::Buffer, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Integrity(IntegrityError::SizeMismatch { .. })));
        assert!(!err.is_retryable());
    }

    #[test]
    fn file_names_must_be_one_plain_component() {
        for bad in ["", ".", "..", "../escape", "a/b.txt", "a\\b.txt", "C:evil", "/etc/passwd"] {
            assert!(
                matches!(validate_file_name(bad), Err(DeliveryError::InvalidPath(_))),
                "{bad:?} accepted"
            );
        }
        assert!(validate_file_name("line\nbreak.txt").is_err());
        assert!(validate_file_name(&"x".repeat(256)).is_err());

        for good in ["holiday.jpg", ".bashrc", "no extension", "résumé.pdf", "...."] {
            assert!(validate_file_name(good).is_ok(), "{good:?} rejected");
        }
        assert!(validate_file_name(&"x".repeat(255)).is_ok());
    }

    #[test]
    fn capability_selection_order() {
        let caps = DeliveryCapabilities {
            download_dir: Some(PathBuf::from("/downloads")),
            ..Default::default()
        };
        assert!(matches!(caps.select(1), Some(DeliveryStrategy::File { .. })));

        let caps = DeliveryCapabilities::default();
        assert_eq!(caps.select(1), Some(DeliveryStrategy::Buffer));

        let caps = DeliveryCapabilities {
            buffer: false,
            ..Default::default()
        };
        assert_eq!(caps.select(1024), Some(DeliveryStrategy::Text));
        assert_eq!(caps.select(TEXT_FALLBACK_LIMIT), None);
    }
}
