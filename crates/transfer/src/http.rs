//! HTTPS implementation of [`Transport`] on top of reqwest.
//!
//! Uploads are a single streamed PUT per file: the source is read in
//! `buffer_size` chunks and fed to the request body through a small
//! channel, so a borrowed, non-`'static` reader (an archive entry, say)
//! can back the body while the request is in flight.

use std::io;
use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use itemxfer_settings::{HttpSettings, TrustMode};
use reqwest::Url;
use reqwest::header::CONTENT_LENGTH;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::transport::{DownloadSink, Transport, TransportFuture, UploadSource};
use crate::{DEFAULT_BUFFER_SIZE, TransferError};

/// Chunks buffered between the source reader and the request body.
const BODY_CHANNEL_DEPTH: usize = 4;

/// Certificate trust for outgoing connections.
#[derive(Debug, Clone, Default)]
pub enum TrustPolicy {
    /// Publicly trusted roots only.
    #[default]
    System,
    /// Public roots plus these PEM-encoded certificates.
    Pinned(Vec<Vec<u8>>),
    /// Skip certificate verification entirely.
    AcceptInvalid,
}

impl TrustPolicy {
    /// Builds a policy from settings, reading pinned PEM files from disk.
    pub fn from_settings(settings: &HttpSettings) -> Result<Self, TransferError> {
        match settings.trust {
            TrustMode::System => Ok(Self::System),
            TrustMode::AcceptInvalid => Ok(Self::AcceptInvalid),
            TrustMode::Pinned => {
                let pems = settings
                    .pinned_certificates
                    .iter()
                    .map(|path| read_pem(path))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Pinned(pems))
            }
        }
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TransferError> {
    std::fs::read(path)
        .map_err(|e| TransferError::Tls(format!("cannot read {}: {e}", path.display())))
}

/// Streaming PUT/GET transport.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    buffer_size: usize,
}

impl HttpTransport {
    /// Transport with default timeouts and buffer size.
    pub fn new(trust: TrustPolicy) -> Result<Self, TransferError> {
        let defaults = HttpSettings::default();
        Self::build(
            trust,
            defaults.connect_timeout(),
            &defaults.user_agent,
            DEFAULT_BUFFER_SIZE,
        )
    }

    pub fn from_settings(settings: &HttpSettings) -> Result<Self, TransferError> {
        let trust = TrustPolicy::from_settings(settings)?;
        Self::build(
            trust,
            settings.connect_timeout(),
            &settings.user_agent,
            settings.buffer_size,
        )
    }

    fn build(
        trust: TrustPolicy,
        connect_timeout: Duration,
        user_agent: &str,
        buffer_size: usize,
    ) -> Result<Self, TransferError> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(connect_timeout)
            .user_agent(user_agent);

        match trust {
            TrustPolicy::System => {}
            TrustPolicy::Pinned(pems) => {
                for pem in pems {
                    let cert = reqwest::Certificate::from_pem(&pem)
                        .map_err(|e| TransferError::Tls(format!("invalid PEM certificate: {e}")))?;
                    builder = builder.add_root_certificate(cert);
                }
            }
            TrustPolicy::AcceptInvalid => {
                warn!("TLS certificate verification disabled");
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        let client = builder
            .build()
            .map_err(|e| TransferError::Tls(e.to_string()))?;

        Ok(Self {
            client,
            buffer_size: buffer_size.max(1),
        })
    }

    async fn put_inner(
        &self,
        url: &Url,
        source: UploadSource<'_>,
        length: Option<u64>,
    ) -> Result<u64, TransferError> {
        let (tx, rx) = mpsc::channel::<io::Result<Vec<u8>>>(BODY_CHANNEL_DEPTH);
        let body = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        });

        let mut request = self
            .client
            .put(url.clone())
            .body(reqwest::Body::wrap_stream(body));
        if let Some(length) = length {
            request = request.header(CONTENT_LENGTH, length);
        }

        debug!(%url, ?length, "PUT started");
        let (pumped, response) = tokio::join!(
            pump(source, tx, self.buffer_size, length),
            request.send()
        );

        // Source-side failures explain a broken request better than the
        // request error they cause.
        let pumped = pumped?;
        let response = response?;
        check_status(&response)?;

        let sent = pumped.ok_or_else(|| {
            TransferError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "endpoint stopped reading the request body",
            ))
        })?;
        debug!(%url, bytes = sent, "PUT finished");
        Ok(sent)
    }

    async fn get_inner(&self, url: &Url, sink: DownloadSink<'_>) -> Result<u64, TransferError> {
        debug!(%url, "GET started");
        let response = self.client.get(url.clone()).send().await?;
        check_status(&response)?;
        let expected = response.content_length();

        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        sink.flush().await?;

        if let Some(expected) = expected {
            if expected != written {
                return Err(TransferError::LengthMismatch {
                    expected,
                    actual: written,
                });
            }
        }
        debug!(%url, bytes = written, "GET finished");
        Ok(written)
    }
}

impl Transport for HttpTransport {
    fn put<'a>(
        &'a self,
        url: &'a Url,
        source: UploadSource<'a>,
        length: Option<u64>,
    ) -> TransportFuture<'a, u64> {
        Box::pin(self.put_inner(url, source, length))
    }

    fn get<'a>(&'a self, url: &'a Url, sink: DownloadSink<'a>) -> TransportFuture<'a, u64> {
        Box::pin(self.get_inner(url, sink))
    }
}

fn check_status(response: &reqwest::Response) -> Result<(), TransferError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(TransferError::Status {
            status: status.as_u16(),
            url: response.url().to_string(),
        })
    }
}

/// Copies `source` into the body channel.
///
/// Returns `Ok(None)` when the request side hung up before the source was
/// drained. A read error or a length mismatch is also pushed into the body
/// so the request aborts instead of completing short.
async fn pump(
    source: UploadSource<'_>,
    tx: mpsc::Sender<io::Result<Vec<u8>>>,
    buffer_size: usize,
    length: Option<u64>,
) -> Result<Option<u64>, TransferError> {
    let mut sent = 0u64;
    loop {
        let mut buf = vec![0u8; buffer_size];
        let n = match source.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                let _ = tx.send(Err(io::Error::new(e.kind(), e.to_string()))).await;
                return Err(TransferError::Io(e));
            }
        };
        if n == 0 {
            break;
        }

        if length.is_some_and(|expected| sent + n as u64 > expected) {
            let err = TransferError::LengthMismatch {
                expected: length.unwrap_or_default(),
                actual: sent + n as u64,
            };
            let _ = tx.send(Err(io::Error::other(err.to_string()))).await;
            return Err(err);
        }

        buf.truncate(n);
        if tx.send(Ok(buf)).await.is_err() {
            return Ok(None);
        }
        sent += n as u64;
    }

    match length {
        Some(expected) if expected != sent => {
            let err = TransferError::LengthMismatch {
                expected,
                actual: sent,
            };
            let _ = tx.send(Err(io::Error::other(err.to_string()))).await;
            Err(err)
        }
        _ => Ok(Some(sent)),
    }
}
