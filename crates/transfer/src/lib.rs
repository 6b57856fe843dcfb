//! Chunked file transfer: sender and receiver pipelines, reconstruction and
//! delivery, plus the sender registry, file history and download status
//! tables that sit around them.

mod error;
mod history;
mod progress;
mod receiver;
mod reconstruct;
mod registry;
mod sender;
mod source;
mod state;
mod status;

pub use error::{DeliveryError, ReceiveError, SendError};
pub use history::{FileHistory, FileHistoryEntry};
pub use progress::{
    Direction, ProgressCallback, ProgressThrottle, SpeedCalculator, TransferProgress,
    TransferStats, percent_of,
};
pub use receiver::{ReceiveOutcome, Receiver};
pub use reconstruct::{
    Delivered, DeliveryCapabilities, DeliveryStrategy, ReconstructionEngine, validate_file_name,
};
pub use registry::{SentFile, SentFileRegistry};
pub use sender::{SendOptions, send_file};
pub use source::{ByteSource, FileSource, MemorySource, SliceFuture, mime_from_name};
pub use state::{TransferState, TransferStateTable};
pub use status::{DownloadStatus, DownloadTracker};
