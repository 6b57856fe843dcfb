use bytes::Bytes;
use peershare_protocol::FileId;

/// One stored slice of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub file_id: FileId,
    pub index: u32,
    pub data: Bytes,
    byte_length: Option<u64>,
}

impl Chunk {
    pub fn new(file_id: FileId, index: u32, data: Bytes) -> Self {
        let byte_length = Some(data.len() as u64);
        Self {
            file_id,
            index,
            data,
            byte_length,
        }
    }

    /// A chunk whose stored record failed verification.
    ///
    /// Its length is unknown, so reconstruction rejects it.
    pub fn corrupt(file_id: FileId, index: u32, data: Bytes) -> Self {
        Self {
            file_id,
            index,
            data,
            byte_length: None,
        }
    }

    /// Verified length in bytes, `None` if the record is corrupt.
    pub fn byte_length(&self) -> Option<u64> {
        self.byte_length
    }

    pub fn meta(&self) -> ChunkMeta {
        ChunkMeta {
            index: self.index,
            byte_length: self.byte_length,
        }
    }
}

/// Index and length of a stored chunk, without its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkMeta {
    pub index: u32,
    pub byte_length: Option<u64>,
}
