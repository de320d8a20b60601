use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, ReadBuf};

/// Reader with a hard byte ceiling.
///
/// Yields at most `limit` bytes from `inner` and never polls it once the
/// ceiling is reached, so the inner cursor stops exactly at `limit`.
/// EOF from `inner` before the ceiling is an `UnexpectedEof` error rather
/// than a short read.
#[derive(Debug)]
pub struct BoundedReader<R> {
    inner: R,
    limit: u64,
    remaining: u64,
}

impl<R> BoundedReader<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            limit,
            remaining: limit,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn consumed(&self) -> u64 {
        self.limit - self.remaining
    }

    /// `true` once all `limit` bytes were read.
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for BoundedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.remaining == 0 || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let max = usize::try_from(this.remaining)
            .unwrap_or(usize::MAX)
            .min(buf.remaining());
        let dst = buf.initialize_unfilled_to(max);
        let mut limited = ReadBuf::new(dst);
        ready!(Pin::new(&mut this.inner).poll_read(cx, &mut limited))?;

        let n = limited.filled().len();
        if n == 0 {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "source ended after {} of {} bytes",
                    this.limit - this.remaining,
                    this.limit
                ),
            )));
        }

        buf.advance(n);
        this.remaining -= n as u64;
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn stops_at_limit() {
        let data = b"0123456789";
        let mut src: &[u8] = data;
        let mut bounded = BoundedReader::new(&mut src, 4);

        let mut out = Vec::new();
        bounded.read_to_end(&mut out).await.unwrap();
        assert_eq!(&out, b"0123");
        assert!(bounded.is_exhausted());
        assert_eq!(bounded.consumed(), 4);

        // Inner cursor sits right after the bounded range.
        assert_eq!(src, b"456789");
    }

    #[tokio::test]
    async fn small_reads_never_cross_limit() {
        let data = b"abcdefgh";
        let mut src: &[u8] = data;
        let mut bounded = BoundedReader::new(&mut src, 5);

        let mut buf = [0u8; 3];
        let n1 = bounded.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n1], b"abc");
        let n2 = bounded.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n2], b"de");
        assert_eq!(bounded.read(&mut buf).await.unwrap(), 0);
        assert_eq!(src, b"fgh");
    }

    #[tokio::test]
    async fn early_eof_is_an_error() {
        let mut src: &[u8] = b"abc";
        let mut bounded = BoundedReader::new(&mut src, 10);

        let mut out = Vec::new();
        let err = bounded.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(bounded.consumed(), 3);
    }

    #[tokio::test]
    async fn zero_limit_reads_nothing() {
        let mut src: &[u8] = b"abc";
        let mut bounded = BoundedReader::new(&mut src, 0);
        let mut out = Vec::new();
        assert_eq!(bounded.read_to_end(&mut out).await.unwrap(), 0);
        assert_eq!(src, b"abc");
    }
}
