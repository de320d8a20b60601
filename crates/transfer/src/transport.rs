//! Transport seam between session workflows and the network.
//!
//! Workflows only see this trait, so tests can substitute a recording
//! transport and the HTTP implementation stays free of session logic.

use std::future::Future;
use std::pin::Pin;

use reqwest::Url;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::TransferError;

/// Boxed future returned by [`Transport`] methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransferError>> + Send + 'a>>;

/// Byte source for a PUT. Read forward only, never rewound.
pub type UploadSource<'a> = &'a mut (dyn AsyncRead + Unpin + Send);

/// Byte sink for a GET.
pub type DownloadSink<'a> = &'a mut (dyn AsyncWrite + Unpin + Send);

/// Moves one file's content to or from one endpoint.
pub trait Transport: Send + Sync {
    /// Streams `source` to `url` in a single PUT.
    ///
    /// With `length = Some(n)` the request declares `n` bytes and fails
    /// with [`TransferError::LengthMismatch`] if the source yields a
    /// different count. With `None` the body is sent until the source hits
    /// EOF. Returns the number of bytes sent.
    fn put<'a>(
        &'a self,
        url: &'a Url,
        source: UploadSource<'a>,
        length: Option<u64>,
    ) -> TransportFuture<'a, u64>;

    /// Streams the body served at `url` into `sink`. Returns bytes written.
    fn get<'a>(&'a self, url: &'a Url, sink: DownloadSink<'a>) -> TransportFuture<'a, u64>;
}
