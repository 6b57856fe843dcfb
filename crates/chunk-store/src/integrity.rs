use peershare_protocol::size_tolerance;

use crate::chunk::ChunkMeta;

/// Most missing indices named in a [`IntegrityError::MissingChunks`] report.
pub const MISSING_REPORT_LIMIT: usize = 32;

/// Reasons a set of stored chunks cannot be reassembled.
///
/// All of these require a fresh transfer; none is retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    #[error("no chunks found")]
    NoChunksFound,

    /// `missing` lists at most [`MISSING_REPORT_LIMIT`] indices, lowest first.
    #[error("missing {count} chunks, first {missing:?}")]
    MissingChunks { missing: Vec<u32>, count: u64 },

    #[error("chunk {index} is corrupt")]
    CorruptChunk { index: u32 },

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
}

impl IntegrityError {
    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// Checks coverage, per-chunk lengths and total size of a chunk set.
///
/// The required index set is `0..N` where `N` is the larger of the highest
/// stored index plus one and `expected_chunks`. Returns the summed length.
pub fn verify_layout(
    metas: &[ChunkMeta],
    expected_size: u64,
    expected_chunks: Option<u32>,
) -> Result<u64, IntegrityError> {
    if metas.is_empty() {
        return Err(IntegrityError::NoChunksFound);
    }

    let mut indices: Vec<u32> = metas.iter().map(|m| m.index).collect();
    indices.sort_unstable();
    indices.dedup();

    let highest = indices.last().copied().unwrap_or(0);
    let required = u64::from(highest) + 1;
    let required = required.max(u64::from(expected_chunks.unwrap_or(0)));

    // Indices are distinct and all below `required`.
    let count = required - indices.len() as u64;
    if count > 0 {
        return Err(IntegrityError::MissingChunks {
            missing: first_gaps(&indices, required),
            count,
        });
    }

    let mut actual: u64 = 0;
    for meta in metas {
        let len = meta
            .byte_length
            .ok_or(IntegrityError::CorruptChunk { index: meta.index })?;
        actual += len;
    }

    if actual.abs_diff(expected_size) > size_tolerance(expected_size) {
        return Err(IntegrityError::SizeMismatch {
            expected: expected_size,
            actual,
        });
    }
    Ok(actual)
}

/// Lowest indices in `0..required` absent from the sorted `present` list,
/// stopping at [`MISSING_REPORT_LIMIT`].
fn first_gaps(present: &[u32], required: u64) -> Vec<u32> {
    let mut gaps = Vec::new();
    let mut next: u64 = 0;
    let bounds = present.iter().map(|&i| u64::from(i)).chain([required]);
    for bound in bounds {
        while next < bound && gaps.len() < MISSING_REPORT_LIMIT {
            gaps.push(next as u32);
            next += 1;
        }
        if gaps.len() == MISSING_REPORT_LIMIT {
            break;
        }
        next = bound + 1;
    }
    gaps
}
