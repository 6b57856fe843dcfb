//! Receiver pipeline.
//!
//! Per file id: header opens a transfer, chunks (in any order) fill it, and
//! the completion message verifies it. Success and failure both clear the
//! transfer state; the chunk store keeps verified chunks for reconstruction.

use std::sync::Arc;

use peershare_chunk_store::{TieredChunkStore, verify_layout};
use peershare_protocol::messages::{FileChunk, FileComplete, FileHeader, StreamingError};
use peershare_protocol::{DEFAULT_CHUNK_SIZE, FileId, FileMetadata, PeerMessage};
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::error::ReceiveError;
use crate::history::{FileHistory, FileHistoryEntry};
use crate::progress::{Direction, ProgressCallback, TransferProgress, TransferStats};
use crate::state::{TransferState, TransferStateTable};

/// What a handled transfer message did.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiveOutcome {
    Started {
        metadata: FileMetadata,
    },
    ChunkStored {
        file_id: FileId,
        chunk_index: u32,
        /// Set when progress crossed a one-point threshold.
        percent: Option<u8>,
    },
    Completed {
        metadata: FileMetadata,
        stats: TransferStats,
        /// `false` if the file id was already in the history.
        recorded: bool,
        expected_chunks: Option<u32>,
    },
    /// The sender reported an error. `in_flight` tells whether a transfer was open.
    Aborted {
        file_id: FileId,
        reason: String,
        in_flight: bool,
    },
}

/// Handles header/chunk/complete/error messages for every incoming transfer.
pub struct Receiver {
    store: Arc<TieredChunkStore>,
    history: Arc<Mutex<FileHistory>>,
    states: Mutex<TransferStateTable>,
    chunk_size: usize,
    progress: Option<ProgressCallback>,
}

impl Receiver {
    /// `chunk_size` derives indices for legacy chunks that omit one.
    pub fn new(
        store: Arc<TieredChunkStore>,
        history: Arc<Mutex<FileHistory>>,
        chunk_size: usize,
    ) -> Self {
        Self {
            store,
            history,
            states: Mutex::new(TransferStateTable::new()),
            chunk_size: if chunk_size == 0 {
                DEFAULT_CHUNK_SIZE
            } else {
                chunk_size
            },
            progress: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn store(&self) -> &Arc<TieredChunkStore> {
        &self.store
    }

    /// Routes a transfer message. Returns `Ok(None)` for other message types.
    pub async fn handle(
        &self,
        from: &str,
        msg: &PeerMessage,
    ) -> Result<Option<ReceiveOutcome>, ReceiveError> {
        trace!(peer = %from, msg_type = msg.type_name(), "receiver dispatch");
        let outcome = match msg {
            PeerMessage::FileHeader(h) => self.on_header(from, h).await,
            PeerMessage::FileChunk(c) => self.on_chunk(c).await?,
            PeerMessage::FileComplete(c) => self.on_complete(c).await?,
            PeerMessage::StreamingError(e) => self.on_error(e).await,
            _ => return Ok(None),
        };
        Ok(Some(outcome))
    }

    /// Opens a transfer. A second header for the same id restarts it.
    pub async fn on_header(&self, from: &str, header: &FileHeader) -> ReceiveOutcome {
        let metadata = header.metadata(from);
        let chunk_size = header
            .chunk_size
            .map(|s| s as usize)
            .filter(|s| *s > 0)
            .unwrap_or(self.chunk_size);
        let state = TransferState::new(metadata.clone(), from, header.total_chunks, chunk_size);
        if state.expected_chunks != header.total_chunks {
            warn!(
                file_id = %metadata.file_id,
                declared = ?header.total_chunks,
                limit = state.chunk_limit,
                "declared chunk count exceeds file size, clamped"
            );
        }

        let replaced = self.states.lock().await.begin(state);
        if replaced.is_some() {
            warn!(file_id = %metadata.file_id, "header for a transfer already in flight, restarting");
            if let Err(e) = self.store.delete(&metadata.file_id).await {
                warn!(file_id = %metadata.file_id, error = %e, "stale chunks not removed");
            }
        }
        self.store.open_hot(&metadata.file_id).await;

        info!(
            file_id = %metadata.file_id,
            name = %metadata.name,
            bytes = metadata.total_size,
            peer = %from,
            "receiving file"
        );
        ReceiveOutcome::Started { metadata }
    }

    /// Stores a chunk. Chunks for unknown transfers are protocol violations.
    pub async fn on_chunk(&self, chunk: &FileChunk) -> Result<ReceiveOutcome, ReceiveError> {
        let (index, percent, report) = {
            let mut states = self.states.lock().await;
            let Some(state) = states.get_mut(&chunk.file_id) else {
                return Err(ReceiveError::ProtocolViolation {
                    file_id: chunk.file_id.clone(),
                    reason: "chunk for a transfer that is not in flight".into(),
                });
            };
            let index = chunk.resolved_index(state.chunk_size).map_err(|e| {
                ReceiveError::ProtocolViolation {
                    file_id: chunk.file_id.clone(),
                    reason: e.to_string(),
                }
            })?;
            if !state.accepts_index(index) {
                return Err(ReceiveError::ProtocolViolation {
                    file_id: chunk.file_id.clone(),
                    reason: format!(
                        "chunk index {index} outside the {} chunks of a {} byte file",
                        state.chunk_limit, state.metadata.total_size
                    ),
                });
            }
            state.record_chunk(index, chunk.data.len() as u64);
            let percent = state.progress_due();
            let report = percent.map(|percent| TransferProgress {
                file_id: chunk.file_id.clone(),
                direction: Direction::Received,
                percent,
                bytes: state.received_bytes(),
                total: state.metadata.total_size,
                bytes_per_second: state.speed.bytes_per_second(),
            });
            (index, percent, report)
        };

        self.store
            .put(&chunk.file_id, index, chunk.data.clone())
            .await
            .map_err(|source| ReceiveError::Store {
                file_id: chunk.file_id.clone(),
                source,
            })?;
        debug!(file_id = %chunk.file_id, chunk_index = index, bytes = chunk.data.len(), "chunk stored");

        if let (Some(cb), Some(report)) = (&self.progress, report) {
            cb(report);
        }
        Ok(ReceiveOutcome::ChunkStored {
            file_id: chunk.file_id.clone(),
            chunk_index: index,
            percent,
        })
    }

    /// Verifies a finished transfer and records it in the history.
    pub async fn on_complete(&self, complete: &FileComplete) -> Result<ReceiveOutcome, ReceiveError> {
        let Some(state) = self.states.lock().await.take(&complete.file_id) else {
            return Err(ReceiveError::ProtocolViolation {
                file_id: complete.file_id.clone(),
                reason: "completion for a transfer that is not in flight".into(),
            });
        };
        let file_id = state.metadata.file_id.clone();
        self.store.close_hot(&file_id).await;

        if let Err(source) = verify_layout(
            &state.slot_metas(),
            state.metadata.total_size,
            state.expected_chunks,
        ) {
            error!(file_id = %file_id, error = %source, "transfer failed verification");
            if let Err(e) = self.store.delete(&file_id).await {
                warn!(file_id = %file_id, error = %e, "failed transfer chunks not removed");
            }
            return Err(ReceiveError::Integrity { file_id, source });
        }

        let stats = TransferStats::new(state.received_bytes(), state.started.elapsed());
        let recorded = self.history.lock().await.record(FileHistoryEntry {
            file_id: file_id.clone(),
            direction: Direction::Received,
            metadata: state.metadata.clone(),
            shared_by: state.metadata.original_sender_id.clone(),
        });

        info!(
            file_id = %file_id,
            bytes = stats.bytes,
            chunks = state.chunk_count(),
            bytes_per_second = format_args!("{:.0}", stats.bytes_per_second),
            "file received"
        );
        Ok(ReceiveOutcome::Completed {
            metadata: state.metadata,
            stats,
            recorded,
            expected_chunks: state.expected_chunks,
        })
    }

    /// Drops a transfer the sender gave up on.
    pub async fn on_error(&self, err: &StreamingError) -> ReceiveOutcome {
        let state = self.states.lock().await.take(&err.file_id);
        let in_flight = state.is_some();
        if in_flight {
            warn!(file_id = %err.file_id, reason = %err.error, "sender aborted transfer");
            self.discard(&err.file_id).await;
        } else {
            warn!(file_id = %err.file_id, reason = %err.error, "content request failed");
        }
        ReceiveOutcome::Aborted {
            file_id: err.file_id.clone(),
            reason: err.error.clone(),
            in_flight,
        }
    }

    /// Drops every transfer arriving from `peer_id` (its connection closed).
    pub async fn abort_peer(&self, peer_id: &str) -> Vec<FileId> {
        let states = self.states.lock().await.take_from_peer(peer_id);
        let mut aborted = Vec::with_capacity(states.len());
        for state in states {
            let file_id = state.metadata.file_id;
            warn!(file_id = %file_id, peer = %peer_id, "connection lost mid-transfer");
            self.discard(&file_id).await;
            aborted.push(file_id);
        }
        aborted
    }

    pub async fn in_flight(&self, file_id: &FileId) -> bool {
        self.states.lock().await.contains(file_id)
    }

    async fn discard(&self, file_id: &FileId) {
        self.store.close_hot(file_id).await;
        if let Err(e) = self.store.delete(file_id).await {
            warn!(file_id = %file_id, error = %e, "aborted transfer chunks not removed");
        }
    }
}
