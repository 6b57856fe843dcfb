use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::envelope::ProtocolError;
use crate::types::{FileId, FileMetadata, now_millis};

/// Every message exchanged between peers.
///
/// Serialized as a flat JSON object whose `type` field selects the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PeerMessage {
    // Chunked transfer
    #[serde(rename = "file-header")]
    FileHeader(FileHeader),
    #[serde(rename = "file-chunk")]
    FileChunk(FileChunk),
    #[serde(rename = "file-complete")]
    FileComplete(FileComplete),

    // Metadata announce and on-demand content
    #[serde(rename = "file-info")]
    FileInfo(FileInfo),
    #[serde(rename = "streaming-request", alias = "content-request")]
    ContentRequest(ContentRequest),
    #[serde(rename = "streaming-error")]
    StreamingError(StreamingError),
    #[serde(rename = "content-forward")]
    ContentForward(ContentForward),
    #[serde(rename = "content-response")]
    ContentResponse(ContentResponse),

    // Connection lifecycle
    #[serde(rename = "keep-alive")]
    KeepAlive(KeepAlive),
    #[serde(rename = "keep-alive-response")]
    KeepAliveResponse(KeepAlive),
    #[serde(rename = "disconnect-notification")]
    DisconnectNotification(DisconnectNotification),
}

impl PeerMessage {
    /// Wire name of the message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::FileHeader(_) => "file-header",
            Self::FileChunk(_) => "file-chunk",
            Self::FileComplete(_) => "file-complete",
            Self::FileInfo(_) => "file-info",
            Self::ContentRequest(_) => "streaming-request",
            Self::StreamingError(_) => "streaming-error",
            Self::ContentForward(_) => "content-forward",
            Self::ContentResponse(_) => "content-response",
            Self::KeepAlive(_) => "keep-alive",
            Self::KeepAliveResponse(_) => "keep-alive-response",
            Self::DisconnectNotification(_) => "disconnect-notification",
        }
    }

    /// The file this message refers to, if any.
    pub fn file_id(&self) -> Option<&FileId> {
        match self {
            Self::FileHeader(m) => Some(&m.file_id),
            Self::FileChunk(m) => Some(&m.file_id),
            Self::FileComplete(m) => Some(&m.file_id),
            Self::FileInfo(m) => Some(&m.file_id),
            Self::ContentRequest(m) => Some(&m.file_id),
            Self::StreamingError(m) => Some(&m.file_id),
            Self::ContentForward(m) => Some(&m.file_id),
            Self::ContentResponse(m) => m.message.file_id(),
            Self::KeepAlive(_) | Self::KeepAliveResponse(_) | Self::DisconnectNotification(_) => {
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Chunked transfer payloads
// ---------------------------------------------------------------------------

/// Opens a transfer and carries the file metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileHeader {
    pub file_id: FileId,
    pub file_name: String,
    #[serde(default)]
    pub file_type: String,
    pub file_size: u64,
    #[serde(default)]
    pub original_sender: String,
    #[serde(default)]
    pub timestamp: i64,
    /// Number of chunks that follow (absent from older senders).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
    /// Chunk size used by the sender (absent from older senders).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u32>,
}

impl FileHeader {
    /// Builds a header without a layout hint.
    pub fn from_metadata(meta: &FileMetadata) -> Self {
        Self {
            file_id: meta.file_id.clone(),
            file_name: meta.name.clone(),
            file_type: meta.mime_type.clone(),
            file_size: meta.total_size,
            original_sender: meta.original_sender_id.clone(),
            timestamp: meta.created_at,
            total_chunks: None,
            chunk_size: None,
        }
    }

    /// Attaches the chunk layout the sender is about to use.
    pub fn with_layout(mut self, total_chunks: u32, chunk_size: u32) -> Self {
        self.total_chunks = Some(total_chunks);
        self.chunk_size = Some(chunk_size);
        self
    }

    /// Metadata carried by this header.
    ///
    /// `fallback_sender` fills an empty `originalSender`.
    pub fn metadata(&self, fallback_sender: &str) -> FileMetadata {
        FileMetadata {
            file_id: self.file_id.clone(),
            name: self.file_name.clone(),
            mime_type: self.file_type.clone(),
            total_size: self.file_size,
            original_sender_id: non_empty_or(&self.original_sender, fallback_sender),
            created_at: self.timestamp,
        }
    }
}

/// One slice of file data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunk {
    pub file_id: FileId,
    #[serde(with = "base64_bytes")]
    pub data: Bytes,
    /// Explicit chunk index. Legacy senders omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    pub offset: u64,
    /// Total file size in bytes.
    pub total: u64,
}

impl FileChunk {
    /// Returns the explicit index, or derives it from the offset.
    ///
    /// A legacy offset whose derived index overflows 32 bits is rejected.
    pub fn resolved_index(&self, chunk_size: usize) -> Result<u32, ProtocolError> {
        match self.chunk_index {
            Some(index) => Ok(index),
            None if chunk_size == 0 => Ok(0),
            None => {
                let index = self.offset / chunk_size as u64;
                u32::try_from(index).map_err(|_| ProtocolError::LayoutOverflow(index))
            }
        }
    }
}

/// Closes a transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileComplete {
    pub file_id: FileId,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_type: String,
    pub file_size: u64,
    #[serde(default)]
    pub timestamp: i64,
}

impl FileComplete {
    pub fn from_metadata(meta: &FileMetadata) -> Self {
        Self {
            file_id: meta.file_id.clone(),
            file_name: meta.name.clone(),
            file_type: meta.mime_type.clone(),
            file_size: meta.total_size,
            timestamp: meta.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Metadata announce and content request payloads
// ---------------------------------------------------------------------------

/// Metadata-only announcement of a shared file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub file_id: FileId,
    pub file_name: String,
    #[serde(default)]
    pub file_type: String,
    pub file_size: u64,
    #[serde(default)]
    pub original_sender: String,
    #[serde(default)]
    pub timestamp: i64,
    /// `true` when the announcing peer holds the content itself.
    #[serde(default, skip_serializing_if = "is_false")]
    pub direct_download: bool,
}

impl FileInfo {
    pub fn from_metadata(meta: &FileMetadata, direct_download: bool) -> Self {
        Self {
            file_id: meta.file_id.clone(),
            file_name: meta.name.clone(),
            file_type: meta.mime_type.clone(),
            file_size: meta.total_size,
            original_sender: meta.original_sender_id.clone(),
            timestamp: meta.created_at,
            direct_download,
        }
    }

    pub fn metadata(&self, fallback_sender: &str) -> FileMetadata {
        FileMetadata {
            file_id: self.file_id.clone(),
            name: self.file_name.clone(),
            mime_type: self.file_type.clone(),
            total_size: self.file_size,
            original_sender_id: non_empty_or(&self.original_sender, fallback_sender),
            created_at: self.timestamp,
        }
    }
}

/// Asks a content holder to stream a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRequest {
    pub file_id: FileId,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub file_size: u64,
}

impl ContentRequest {
    pub fn from_metadata(meta: &FileMetadata) -> Self {
        Self {
            file_id: meta.file_id.clone(),
            file_name: meta.name.clone(),
            file_type: meta.mime_type.clone(),
            file_size: meta.total_size,
        }
    }
}

/// Reports that a transfer or content request failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingError {
    pub file_id: FileId,
    pub error: String,
}

impl StreamingError {
    pub fn new(file_id: FileId, error: impl Into<String>) -> Self {
        Self {
            file_id,
            error: error.into(),
        }
    }
}

/// Content request brokered through an intermediary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentForward {
    pub file_id: FileId,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub file_size: u64,
    /// Peer that wants the content.
    pub requester_id: String,
    /// Peer that holds the content.
    pub original_sender: String,
}

impl ContentForward {
    pub fn from_metadata(meta: &FileMetadata, requester_id: impl Into<String>) -> Self {
        Self {
            file_id: meta.file_id.clone(),
            file_name: meta.name.clone(),
            file_type: meta.mime_type.clone(),
            file_size: meta.total_size,
            requester_id: requester_id.into(),
            original_sender: meta.original_sender_id.clone(),
        }
    }

    pub fn metadata(&self) -> FileMetadata {
        FileMetadata {
            file_id: self.file_id.clone(),
            name: self.file_name.clone(),
            mime_type: self.file_type.clone(),
            total_size: self.file_size,
            original_sender_id: self.original_sender.clone(),
            created_at: 0,
        }
    }

    pub fn request(&self) -> ContentRequest {
        ContentRequest {
            file_id: self.file_id.clone(),
            file_name: self.file_name.clone(),
            file_type: self.file_type.clone(),
            file_size: self.file_size,
        }
    }
}

/// A transfer message travelling back through a broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentResponse {
    /// Final recipient of `message`.
    pub requester_id: String,
    pub message: Box<PeerMessage>,
}

// ---------------------------------------------------------------------------
// Connection lifecycle payloads
// ---------------------------------------------------------------------------

/// Heartbeat and its response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeepAlive {
    pub timestamp: i64,
    pub peer_id: String,
}

impl KeepAlive {
    pub fn now(peer_id: impl Into<String>) -> Self {
        Self {
            timestamp: now_millis(),
            peer_id: peer_id.into(),
        }
    }
}

/// Sent before a peer goes away on purpose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectNotification {
    pub peer_id: String,
    #[serde(default)]
    pub timestamp: i64,
}

impl DisconnectNotification {
    pub fn now(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            timestamp: now_millis(),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_false(v: &bool) -> bool {
    !v
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

/// Binary payloads travel as standard base64 inside JSON.
mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD
            .decode(&s)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
