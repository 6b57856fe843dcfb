use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identifier of one logical file transfer, shared by every participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier for content offered to several peers at once.
    ///
    /// The same name and size always produce the same id.
    pub fn from_name_and_size(name: &str, size: u64) -> Self {
        Self(format!("{name}-{size}"))
    }

    /// Identifier for a freshly queued send.
    pub fn for_queued(name: &str, timestamp_millis: i64) -> Self {
        Self(format!("{name}-{timestamp_millis}"))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the identifier is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Filesystem-safe key derived from the identifier.
    ///
    /// Uses the first 16 bytes of SHA-256 (32 hex characters).
    pub fn storage_key(&self) -> String {
        let hash = Sha256::digest(self.0.as_bytes());
        hex::encode(&hash[..16])
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FileId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Immutable description of a shared file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub file_id: FileId,
    pub name: String,
    pub mime_type: String,
    pub total_size: u64,
    pub original_sender_id: String,
    /// Unix milliseconds.
    pub created_at: i64,
}

impl FileMetadata {
    /// Builds metadata stamped with the current time.
    pub fn new(
        file_id: FileId,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        total_size: u64,
        original_sender_id: impl Into<String>,
    ) -> Self {
        Self {
            file_id,
            name: name.into(),
            mime_type: mime_type.into(),
            total_size,
            original_sender_id: original_sender_id.into(),
            created_at: now_millis(),
        }
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
