//! Byte movement for transfer sessions.
//!
//! Everything here is session-agnostic: a [`Transport`] moves exactly one
//! file's bytes to or from one resolved endpoint, and the archive cursor
//! hands out one entry's byte range at a time from a read-once stream.
//! The session crate decides when each of these runs.

mod archive;
mod bounded;
mod checksum;
mod endpoint;
mod http;
mod local_path;
mod transport;

pub use archive::{ArchiveEntry, EntryReader, TarStreamReader};
pub use bounded::BoundedReader;
pub use checksum::{checksum_bytes, file_checksum};
pub use endpoint::{download_url, parse_endpoint, upload_url};
pub use http::{HttpTransport, TrustPolicy};
pub use local_path::{resolve_local_path, validate_file_name};
pub use reqwest::Url;
pub use transport::{DownloadSink, Transport, TransportFuture, UploadSource};

/// Default size of one streamed body chunk: 256 KiB.
pub const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;

/// Errors produced while moving bytes.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint {url} answered {status}")]
    Status { status: u16, url: String },

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("length mismatch: declared {expected} bytes, streamed {actual}")]
    LengthMismatch { expected: u64, actual: u64 },

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("archive error: {0}")]
    Archive(String),
}
