//! Durable tier backed by the local filesystem.
//!
//! Layout: `<root>/<storage key>/<index:08>.chunk`. The storage key is derived
//! from the file id, so ids never reach the filesystem as paths.
//!
//! Record format: `[u64 BE length][32-byte SHA-256][data]`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use peershare_protocol::FileId;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::chunk::{Chunk, ChunkMeta};
use crate::tier::{ChunkTier, TierError, TierFuture};

const HEADER_LEN: usize = 8 + 32;
const EXTENSION: &str = "chunk";

/// Filesystem tier. Survives process restarts but makes no promise to.
pub struct DiskTier {
    root: PathBuf,
}

impl DiskTier {
    /// Opens (creating if needed) a tier rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, TierError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_dir(&self, file_id: &FileId) -> PathBuf {
        self.root.join(file_id.storage_key())
    }

    fn chunk_path(&self, file_id: &FileId, index: u32) -> PathBuf {
        self.file_dir(file_id).join(format!("{index:08}.{EXTENSION}"))
    }

    /// Lists `(index, path)` for every chunk record of `file_id`.
    async fn entries(&self, file_id: &FileId) -> Result<Vec<(u32, PathBuf)>, TierError> {
        let dir = self.file_dir(file_id);
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if let Some(index) = parse_index(&path) {
                entries.push((index, path));
            }
        }
        entries.sort_by_key(|(index, _)| *index);
        Ok(entries)
    }
}

impl ChunkTier for DiskTier {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn put(&self, chunk: Chunk) -> TierFuture<'_, ()> {
        Box::pin(async move {
            let dir = self.file_dir(&chunk.file_id);
            tokio::fs::create_dir_all(&dir).await?;

            let path = self.chunk_path(&chunk.file_id, chunk.index);
            let tmp = path.with_extension("tmp");
            tokio::fs::write(&tmp, encode_record(&chunk.data)).await?;
            tokio::fs::rename(&tmp, &path).await?;
            debug!(
                file_id = %chunk.file_id,
                chunk_index = chunk.index,
                bytes = chunk.data.len(),
                "chunk written to disk"
            );
            Ok(())
        })
    }

    fn get<'a>(&'a self, file_id: &'a FileId, index: u32) -> TierFuture<'a, Option<Chunk>> {
        Box::pin(async move { read_chunk(file_id, index, &self.chunk_path(file_id, index)).await })
    }

    fn get_all<'a>(&'a self, file_id: &'a FileId) -> TierFuture<'a, Vec<Chunk>> {
        Box::pin(async move {
            let mut chunks = Vec::new();
            for (index, path) in self.entries(file_id).await? {
                // `None` means removed between listing and reading.
                if let Some(chunk) = read_chunk(file_id, index, &path).await? {
                    chunks.push(chunk);
                }
            }
            Ok(chunks)
        })
    }

    /// Reads record headers only. A digest mismatch is detected by `get_all`.
    fn list<'a>(&'a self, file_id: &'a FileId) -> TierFuture<'a, Vec<ChunkMeta>> {
        Box::pin(async move {
            let mut metas = Vec::new();
            for (index, path) in self.entries(file_id).await? {
                let mut file = match tokio::fs::File::open(&path).await {
                    Ok(f) => f,
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };
                let file_len = file.metadata().await?.len();
                let mut len_buf = [0u8; 8];
                let byte_length = match file.read_exact(&mut len_buf).await {
                    Ok(_) => {
                        let declared = u64::from_be_bytes(len_buf);
                        (file_len == HEADER_LEN as u64 + declared).then_some(declared)
                    }
                    Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
                    Err(e) => return Err(e.into()),
                };
                metas.push(ChunkMeta { index, byte_length });
            }
            Ok(metas)
        })
    }

    fn delete<'a>(&'a self, file_id: &'a FileId) -> TierFuture<'a, ()> {
        Box::pin(async move {
            match tokio::fs::remove_dir_all(self.file_dir(file_id)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn delete_chunk<'a>(&'a self, file_id: &'a FileId, index: u32) -> TierFuture<'a, ()> {
        Box::pin(async move {
            match tokio::fs::remove_file(self.chunk_path(file_id, index)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}

/// Reads one record. A record that fails verification comes back as a
/// corrupt chunk.
async fn read_chunk(file_id: &FileId, index: u32, path: &Path) -> Result<Option<Chunk>, TierError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(match decode_record(&raw) {
        Some(data) => Chunk::new(file_id.clone(), index, data),
        None => {
            warn!(file_id = %file_id, chunk_index = index, "corrupt chunk record on disk");
            Chunk::corrupt(file_id.clone(), index, Bytes::from(raw))
        }
    }))
}

fn parse_index(path: &Path) -> Option<u32> {
    if path.extension()? != EXTENSION {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

fn encode_record(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + data.len());
    out.extend_from_slice(&(data.len() as u64).to_be_bytes());
    out.extend_from_slice(&Sha256::digest(data));
    out.extend_from_slice(data);
    out
}

/// Returns the payload if the length and digest match.
fn decode_record(raw: &[u8]) -> Option<Bytes> {
    if raw.len() < HEADER_LEN {
        return None;
    }
    let (header, data) = raw.split_at(HEADER_LEN);
    let mut len_buf = [0u8; 8];
    len_buf.copy_from_slice(&header[..8]);
    if u64::from_be_bytes(len_buf) != data.len() as u64 {
        return None;
    }
    if Sha256::digest(data).as_slice() != &header[8..] {
        return None;
    }
    Some(Bytes::copy_from_slice(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_tier() -> (TempDir, DiskTier) {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::open(dir.path().join("chunks")).await.unwrap();
        (dir, tier)
    }

    #[tokio::test]
    async fn put_and_get_all() {
        let (_dir, tier) = open_tier().await;
        let id = FileId::new("report.pdf-1700000000000");
        tier.put(Chunk::new(id.clone(), 1, Bytes::from_static(b"world")))
            .await
            .unwrap();
        tier.put(Chunk::new(id.clone(), 0, Bytes::from_static(b"hello ")))
            .await
            .unwrap();

        let chunks = tier.get_all(&id).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].data, Bytes::from_static(b"hello "));
        assert_eq!(chunks[1].byte_length(), Some(5));
    }

    #[tokio::test]
    async fn unknown_file_is_empty() {
        let (_dir, tier) = open_tier().await;
        let id = FileId::new("missing");
        assert!(tier.get_all(&id).await.unwrap().is_empty());
        assert!(tier.list(&id).await.unwrap().is_empty());
        tier.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn tampered_record_is_corrupt() {
        let (_dir, tier) = open_tier().await;
        let id = FileId::new("f");
        tier.put(Chunk::new(id.clone(), 0, Bytes::from_static(b"payload")))
            .await
            .unwrap();

        let path = tier.chunk_path(&id, 0);
        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        std::fs::write(&path, raw).unwrap();

        let chunks = tier.get_all(&id).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].byte_length(), None);
        let single = tier.get(&id, 0).await.unwrap().unwrap();
        assert_eq!(single.byte_length(), None);
    }

    #[tokio::test]
    async fn get_reads_one_record() {
        let (_dir, tier) = open_tier().await;
        let id = FileId::new("f");
        tier.put(Chunk::new(id.clone(), 3, Bytes::from_static(b"three")))
            .await
            .unwrap();

        let chunk = tier.get(&id, 3).await.unwrap().unwrap();
        assert_eq!(chunk.data, Bytes::from_static(b"three"));
        assert!(tier.get(&id, 4).await.unwrap().is_none());
        assert!(tier.get(&FileId::new("other"), 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_record_lists_without_length() {
        let (_dir, tier) = open_tier().await;
        let id = FileId::new("f");
        tier.put(Chunk::new(id.clone(), 2, Bytes::from_static(b"0123456789")))
            .await
            .unwrap();

        let path = tier.chunk_path(&id, 2);
        let raw = std::fs::read(&path).unwrap();
        std::fs::write(&path, &raw[..raw.len() - 3]).unwrap();

        let metas = tier.list(&id).await.unwrap();
        assert_eq!(
            metas,
            vec![ChunkMeta {
                index: 2,
                byte_length: None
            }]
        );
    }

    #[tokio::test]
    async fn delete_removes_directory() {
        let (_dir, tier) = open_tier().await;
        let id = FileId::new("f");
        tier.put(Chunk::new(id.clone(), 0, Bytes::from_static(b"x")))
            .await
            .unwrap();
        assert!(tier.file_dir(&id).exists());

        tier.delete(&id).await.unwrap();
        assert!(!tier.file_dir(&id).exists());
        tier.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn stray_files_are_ignored() {
        let (_dir, tier) = open_tier().await;
        let id = FileId::new("f");
        tier.put(Chunk::new(id.clone(), 0, Bytes::from_static(b"x")))
            .await
            .unwrap();
        std::fs::write(tier.file_dir(&id).join("notes.txt"), b"hi").unwrap();
        std::fs::write(tier.file_dir(&id).join("00000001.tmp"), b"partial").unwrap();

        assert_eq!(tier.list(&id).await.unwrap().len(), 1);
    }
}
