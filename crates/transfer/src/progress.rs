use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use peershare_protocol::FileId;

/// Which side of a transfer a progress report comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Sent,
    Received,
}

/// Integer-percent progress of one transfer or delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    pub file_id: FileId,
    pub direction: Direction,
    pub percent: u8,
    pub bytes: u64,
    pub total: u64,
    /// Sliding-window speed estimate in bytes/second.
    pub bytes_per_second: f64,
}

/// Callback invoked with progress reports. Fire-and-forget.
pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Integer percentage of `done` over `total`. An empty total counts as done.
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) as u128 * 100) / total as u128) as u8
}

/// Emits a percentage only when it advanced by at least one point.
#[derive(Debug, Default, Clone)]
pub struct ProgressThrottle {
    last: Option<u8>,
}

impl ProgressThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `Some(percent)` if it should be reported.
    pub fn update(&mut self, percent: u8) -> Option<u8> {
        let due = match self.last {
            None => true,
            Some(last) => percent > last,
        };
        if due {
            self.last = Some(percent);
            Some(percent)
        } else {
            None
        }
    }

    pub fn last(&self) -> Option<u8> {
        self.last
    }
}

/// Summary of a finished transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferStats {
    pub bytes: u64,
    pub duration: Duration,
    pub bytes_per_second: f64,
}

impl TransferStats {
    pub fn new(bytes: u64, duration: Duration) -> Self {
        let secs = duration.as_secs_f64();
        let bytes_per_second = if secs > 0.0 { bytes as f64 / secs } else { 0.0 };
        Self {
            bytes,
            duration,
            bytes_per_second,
        }
    }
}

/// Sliding-window throughput estimate over recent chunk writes.
#[derive(Debug, Clone)]
pub struct SpeedCalculator {
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
    capacity: usize,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::with_window(Duration::from_secs(5), 100)
    }
}

impl SpeedCalculator {
    /// Keeps at most `capacity` samples no older than `window`.
    pub fn with_window(window: Duration, capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(128)),
            window,
            capacity: capacity.max(2),
        }
    }

    /// Records `bytes` moved just now.
    pub fn add_sample(&mut self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    fn record_at(&mut self, at: Instant, bytes: u64) {
        self.samples.push_back((at, bytes));
        while let Some(&(oldest, _)) = self.samples.front()
            && (at.duration_since(oldest) > self.window || self.samples.len() > self.capacity)
        {
            self.samples.pop_front();
        }
    }

    /// Bytes per second across the window, 0.0 until two samples exist.
    ///
    /// The first sample only marks the window start; its bytes were moved
    /// before it.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(&(first, _)), Some(&(last, _))) = (self.samples.front(), self.samples.back())
        else {
            return 0.0;
        };
        let elapsed = last.duration_since(first);
        if elapsed.is_zero() {
            return 0.0;
        }
        let moved: u64 = self.samples.iter().skip(1).map(|&(_, bytes)| bytes).sum();
        moved as f64 / elapsed.as_secs_f64()
    }
}
