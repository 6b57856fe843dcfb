//! Sender pipeline: header, paced chunk stream, completion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use peershare_connection::Transport;
use peershare_protocol::messages::{FileChunk, FileComplete, FileHeader, StreamingError};
use peershare_protocol::{
    CHUNK_PACING, DEFAULT_CHUNK_SIZE, FileMetadata, PeerMessage, ProtocolError, total_chunks,
};
use tracing::{debug, error, info, warn};

use crate::error::SendError;
use crate::progress::{
    Direction, ProgressCallback, ProgressThrottle, SpeedCalculator, TransferProgress,
    TransferStats, percent_of,
};
use crate::source::ByteSource;

/// Sender tuning.
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub chunk_size: usize,
    /// Delay between chunk sends, standing in for transport backpressure.
    pub pacing: Duration,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            pacing: CHUNK_PACING,
        }
    }
}

/// Streams `source` to every transport in `targets`.
///
/// Each chunk is read once and sent to all targets. Any failure aborts the
/// stream and sends `streaming-error` to the targets that are still open.
pub async fn send_file(
    source: &dyn ByteSource,
    metadata: &FileMetadata,
    targets: &[Arc<dyn Transport>],
    options: &SendOptions,
    progress: Option<&ProgressCallback>,
) -> Result<TransferStats, SendError> {
    if targets.is_empty() {
        return Err(SendError::NoTargets);
    }
    if let Some(closed) = targets.iter().find(|t| !t.is_open()) {
        return Err(SendError::ConnectionClosed {
            peer_id: closed.peer_id().to_string(),
        });
    }

    let result = stream(source, metadata, targets, options, progress).await;
    if let Err(e) = &result {
        error!(file_id = %metadata.file_id, error = %e, "send aborted");
        let notice = PeerMessage::StreamingError(StreamingError::new(
            metadata.file_id.clone(),
            e.to_string(),
        ));
        for target in targets.iter().filter(|t| t.is_open()) {
            if let Err(e) = target.send(notice.clone()) {
                debug!(peer = %target.peer_id(), error = %e, "abort notice not delivered");
            }
        }
    }
    result
}

async fn stream(
    source: &dyn ByteSource,
    metadata: &FileMetadata,
    targets: &[Arc<dyn Transport>],
    options: &SendOptions,
    progress: Option<&ProgressCallback>,
) -> Result<TransferStats, SendError> {
    let chunk_size = if options.chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        options.chunk_size
    };
    let total_size = metadata.total_size;
    // An empty file still travels as one empty chunk.
    let chunk_count = total_chunks(total_size, chunk_size)?.max(1);
    let wire_chunk_size = u32::try_from(chunk_size)
        .map_err(|_| ProtocolError::LayoutOverflow(chunk_size as u64))?;
    let started = Instant::now();

    info!(
        file_id = %metadata.file_id,
        name = %metadata.name,
        bytes = total_size,
        chunks = chunk_count,
        peers = targets.len(),
        "sending file"
    );

    let header = FileHeader::from_metadata(metadata).with_layout(chunk_count, wire_chunk_size);
    broadcast(targets, PeerMessage::FileHeader(header))?;

    let mut throttle = ProgressThrottle::new();
    let mut speed = SpeedCalculator::default();

    for index in 0..chunk_count {
        let offset = u64::from(index) * chunk_size as u64;
        let len = total_size.saturating_sub(offset).min(chunk_size as u64) as usize;
        let data = source
            .slice(offset, len)
            .await
            .map_err(|source| SendError::ChunkReadError { offset, source })?;

        broadcast(
            targets,
            PeerMessage::FileChunk(FileChunk {
                file_id: metadata.file_id.clone(),
                data,
                chunk_index: Some(index),
                offset,
                total: total_size,
            }),
        )?;
        debug!(file_id = %metadata.file_id, chunk_index = index, bytes = len, "chunk sent");

        let sent = offset + len as u64;
        speed.add_sample(len as u64);
        if let (Some(cb), Some(percent)) = (progress, throttle.update(percent_of(sent, total_size))) {
            cb(TransferProgress {
                file_id: metadata.file_id.clone(),
                direction: Direction::Sent,
                percent,
                bytes: sent,
                total: total_size,
                bytes_per_second: speed.bytes_per_second(),
            });
        }

        if !options.pacing.is_zero() {
            tokio::time::sleep(options.pacing).await;
        }
    }

    broadcast(
        targets,
        PeerMessage::FileComplete(FileComplete::from_metadata(metadata)),
    )?;

    let stats = TransferStats::new(total_size, started.elapsed());
    info!(
        file_id = %metadata.file_id,
        bytes = stats.bytes,
        secs = format_args!("{:.2}", stats.duration.as_secs_f64()),
        "file sent"
    );
    Ok(stats)
}

fn broadcast(targets: &[Arc<dyn Transport>], msg: PeerMessage) -> Result<(), SendError> {
    for target in targets {
        if !target.is_open() {
            warn!(peer = %target.peer_id(), msg_type = msg.type_name(), "target closed mid-stream");
            return Err(SendError::ConnectionClosed {
                peer_id: target.peer_id().to_string(),
            });
        }
        target
            .send(msg.clone())
            .map_err(|source| SendError::Transport {
                peer_id: target.peer_id().to_string(),
                source,
            })?;
    }
    Ok(())
}
