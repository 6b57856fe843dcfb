use std::time::Duration;

use crate::envelope::ProtocolError;

/// Fixed chunk size agreed by the protocol (256 KiB).
///
/// Also the divisor used to derive a chunk index from an offset when a
/// legacy sender omits `chunkIndex`.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Delay between consecutive chunk sends.
///
/// Stands in for backpressure on transports that do not signal it.
pub const CHUNK_PACING: Duration = Duration::from_millis(1);

/// How often keep-alive messages go out to each open connection.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// A peer that has sent nothing for this long is reported stale.
pub const STALE_AFTER: Duration = Duration::from_secs(60);

/// Window for establishing an on-demand connection to a content holder.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Files at or above this size never use the text-encoded delivery fallback (100 MiB).
pub const TEXT_FALLBACK_LIMIT: u64 = 100 * 1024 * 1024;

/// Lower bound of the size tolerance in bytes.
pub const MIN_SIZE_TOLERANCE: u64 = 1024;

/// Returns the accepted absolute difference between received and declared size:
/// `max(1024, total_size / 100)`.
pub fn size_tolerance(total_size: u64) -> u64 {
    (total_size / 100).max(MIN_SIZE_TOLERANCE)
}

/// Returns `true` if `actual` is within [`size_tolerance`] of `expected`.
pub fn within_tolerance(actual: u64, expected: u64) -> bool {
    actual.abs_diff(expected) <= size_tolerance(expected)
}

/// Number of chunks a file of `total_size` bytes is split into.
///
/// Fails when the count does not fit the wire's `totalChunks` field.
pub fn total_chunks(total_size: u64, chunk_size: usize) -> Result<u32, ProtocolError> {
    if chunk_size == 0 {
        return Ok(0);
    }
    let count = total_size.div_ceil(chunk_size as u64);
    u32::try_from(count).map_err(|_| ProtocolError::LayoutOverflow(count))
}
