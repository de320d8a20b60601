use serde::{Deserialize, Serialize};

use crate::endpoint::TransferEndpoint;

/// Who moves the bytes of a registered file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    /// The caller uploads to a server-provided endpoint.
    Push,
    /// The server fetches from a caller-supplied URI.
    Pull,
}

/// Digest algorithm of a [`Checksum`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ChecksumAlgorithm {
    Sha256,
}

/// Content digest attached to a file registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    /// Lowercase hex digest.
    pub value: String,
}

impl Checksum {
    pub fn sha256(value: impl Into<String>) -> Self {
        Self {
            algorithm: ChecksumAlgorithm::Sha256,
            value: value.into(),
        }
    }
}

/// Registration request for one file of an upload session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFileSpec {
    /// Unique within the session.
    pub name: String,
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
    /// Where the server fetches a PULL file from. Always `None` for PUSH.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_endpoint: Option<TransferEndpoint>,
}

impl AddFileSpec {
    /// A file the caller streams itself.
    pub fn push(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type: SourceType::Push,
            size: None,
            checksum: None,
            source_endpoint: None,
        }
    }

    /// A file the server fetches from `uri`.
    pub fn pull(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type: SourceType::Pull,
            size: None,
            checksum: None,
            source_endpoint: Some(TransferEndpoint::new(uri)),
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }
}

/// A file registered with an upload session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
    /// Endpoint for a single full-content PUT. Present for PUSH files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_endpoint: Option<TransferEndpoint>,
}

/// Server-side staging status of a download file.
///
/// Moves monotonically `UNPREPARED -> PREPARING -> {PREPARED | ERROR}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrepareStatus {
    Unprepared,
    Preparing,
    Prepared,
    Error,
}

impl PrepareStatus {
    /// `true` for PREPARED and ERROR.
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Prepared | Self::Error)
    }

    /// Whether reporting `next` after `self` respects monotonicity.
    pub fn can_advance_to(self, next: PrepareStatus) -> bool {
        match self {
            Self::Unprepared => true,
            Self::Preparing => next != Self::Unprepared,
            Self::Prepared | Self::Error => next == self,
        }
    }
}

/// Per-file record of a download session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadFileInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub status: PrepareStatus,
    /// Populated only once the file is PREPARED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_endpoint: Option<TransferEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl DownloadFileInfo {
    pub fn new(name: impl Into<String>, status: PrepareStatus) -> Self {
        Self {
            name: name.into(),
            size: None,
            status,
            download_endpoint: None,
            error_message: None,
        }
    }
}
