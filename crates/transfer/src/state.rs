use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use peershare_chunk_store::ChunkMeta;
use peershare_protocol::{FileId, FileMetadata, total_chunks};

use crate::progress::{ProgressThrottle, SpeedCalculator, percent_of};

/// Receiver-side bookkeeping for one in-flight transfer.
///
/// Slots record each chunk's length; the bytes live in the chunk store's
/// hot cache while the transfer is open.
pub struct TransferState {
    pub metadata: FileMetadata,
    /// Peer the transfer arrives from.
    pub from: String,
    pub expected_chunks: Option<u32>,
    pub chunk_size: usize,
    /// Indices at or above this cannot belong to a file of the declared size.
    pub chunk_limit: u32,
    slots: BTreeMap<u32, u64>,
    received: u64,
    throttle: ProgressThrottle,
    pub(crate) speed: SpeedCalculator,
    pub(crate) started: Instant,
}

impl TransferState {
    pub fn new(
        metadata: FileMetadata,
        from: impl Into<String>,
        expected_chunks: Option<u32>,
        chunk_size: usize,
    ) -> Self {
        let chunk_limit = chunk_limit(metadata.total_size, chunk_size);
        Self {
            metadata,
            from: from.into(),
            expected_chunks: expected_chunks.map(|n| n.min(chunk_limit)),
            chunk_size,
            chunk_limit,
            slots: BTreeMap::new(),
            received: 0,
            throttle: ProgressThrottle::new(),
            speed: SpeedCalculator::default(),
            started: Instant::now(),
        }
    }

    pub fn accepts_index(&self, index: u32) -> bool {
        index < self.chunk_limit
    }

    /// Fills a slot. A repeated index replaces the earlier length.
    pub fn record_chunk(&mut self, index: u32, len: u64) {
        if let Some(old) = self.slots.insert(index, len) {
            self.received -= old;
        }
        self.received += len;
        self.speed.add_sample(len);
    }

    pub fn received_bytes(&self) -> u64 {
        self.received
    }

    pub fn chunk_count(&self) -> usize {
        self.slots.len()
    }

    pub fn percent(&self) -> u8 {
        percent_of(self.received, self.metadata.total_size)
    }

    /// Returns the percentage if it crossed a one-point threshold.
    pub fn progress_due(&mut self) -> Option<u8> {
        let percent = self.percent();
        self.throttle.update(percent)
    }

    pub fn slot_metas(&self) -> Vec<ChunkMeta> {
        self.slots
            .iter()
            .map(|(&index, &len)| ChunkMeta {
                index,
                byte_length: Some(len),
            })
            .collect()
    }
}

/// In-flight transfers keyed by file id.
#[derive(Default)]
pub struct TransferStateTable {
    states: HashMap<FileId, TransferState>,
}

impl TransferStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a state, returning one it replaced.
    pub fn begin(&mut self, state: TransferState) -> Option<TransferState> {
        self.states.insert(state.metadata.file_id.clone(), state)
    }

    pub fn get_mut(&mut self, file_id: &FileId) -> Option<&mut TransferState> {
        self.states.get_mut(file_id)
    }

    pub fn contains(&self, file_id: &FileId) -> bool {
        self.states.contains_key(file_id)
    }

    pub fn take(&mut self, file_id: &FileId) -> Option<TransferState> {
        self.states.remove(file_id)
    }

    /// Removes every transfer arriving from `peer_id`.
    pub fn take_from_peer(&mut self, peer_id: &str) -> Vec<TransferState> {
        let ids: Vec<FileId> = self
            .states
            .iter()
            .filter(|(_, s)| s.from == peer_id)
            .map(|(id, _)| id.clone())
            .collect();
        ids.iter().filter_map(|id| self.states.remove(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Chunk count of a `total_size` byte file, at least one for the empty file.
fn chunk_limit(total_size: u64, chunk_size: usize) -> u32 {
    total_chunks(total_size, chunk_size).unwrap_or(u32::MAX).max(1)
}
