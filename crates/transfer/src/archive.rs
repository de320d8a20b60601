//! Forward-only tar cursor over a read-once stream.
//!
//! An OVA is a plain tar. Its members are uploaded one by one straight
//! from the stream, so the cursor must hand out each member's bytes
//! exactly: no read-ahead into the next header, no unread tail left
//! behind. [`TarStreamReader::entry_reader`] bounds reads to the current
//! member and [`TarStreamReader::finish_entry`] refuses to move on until
//! the member was consumed completely.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tracing::trace;

use crate::TransferError;
use crate::bounded::BoundedReader;

const BLOCK_SIZE: u64 = 512;

/// Upper bound for GNU long-name and PAX header payloads.
const MAX_META_SIZE: u64 = 1024 * 1024;

/// One regular-file member of the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub size: u64,
    /// Stream offset of the member's first header block.
    pub header_offset: u64,
    /// Stream offset of the member's first content byte.
    pub data_offset: u64,
}

impl ArchiveEntry {
    /// Offset right after the member's padded content.
    ///
    /// Entries handed out by [`TarStreamReader`] always fit the stream.
    pub fn end_offset(&self) -> u64 {
        member_bounds(self.data_offset, self.size).map_or(u64::MAX, |(_, end)| end)
    }
}

#[derive(Debug)]
struct Current {
    data_end: u64,
    padded_end: u64,
}

/// Sequential tar reader that tracks its exact stream position.
pub struct TarStreamReader<R> {
    inner: R,
    position: u64,
    current: Option<Current>,
    done: bool,
}

impl<R: AsyncRead + Unpin> TarStreamReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            position: 0,
            current: None,
            done: false,
        }
    }

    /// Bytes consumed from the underlying stream so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Advances to the next regular-file member.
    ///
    /// Directories and other non-file members are skipped. GNU long names
    /// and PAX `path`/`size` records are applied to the member they
    /// precede. Returns `None` at the end-of-archive marker or at EOF on a
    /// block boundary.
    pub async fn next_entry(&mut self) -> Result<Option<ArchiveEntry>, TransferError> {
        if self.current.is_some() {
            return Err(TransferError::Archive(
                "previous entry was not finished".into(),
            ));
        }
        if self.done {
            return Ok(None);
        }

        let mut long_name: Option<String> = None;
        let mut pax_path: Option<String> = None;
        let mut pax_size: Option<u64> = None;

        loop {
            let header_offset = self.position;
            let mut block = [0u8; BLOCK_SIZE as usize];
            if !self.read_block(&mut block).await? {
                self.done = true;
                return Ok(None);
            }
            if block.iter().all(|b| *b == 0) {
                trace!(offset = header_offset, "end-of-archive marker");
                self.done = true;
                return Ok(None);
            }

            verify_checksum(&block)?;
            let header = tar::Header::from_byte_slice(&block);
            let entry_type = header.entry_type();
            let header_size = header
                .entry_size()
                .map_err(|e| TransferError::Archive(format!("bad size field: {e}")))?;

            if entry_type.is_gnu_longname() {
                let data = self.read_meta(header_size).await?;
                long_name = Some(trim_nul(&data));
                continue;
            }
            if entry_type.is_pax_local_extensions() {
                let data = self.read_meta(header_size).await?;
                for (key, value) in parse_pax(&data)? {
                    match key.as_str() {
                        "path" => pax_path = Some(value),
                        "size" => {
                            pax_size = Some(value.parse().map_err(|_| {
                                TransferError::Archive(format!("bad PAX size: {value}"))
                            })?)
                        }
                        _ => {}
                    }
                }
                continue;
            }

            let size = pax_size.take().unwrap_or(header_size);
            let data_offset = self.position;
            let (data_end, padded_end) = member_bounds(data_offset, size)?;

            if !(entry_type.is_file() || entry_type.is_contiguous()) {
                trace!(offset = header_offset, kind = ?entry_type, "skipping non-file member");
                long_name = None;
                pax_path = None;
                self.skip(padded_end - data_offset).await?;
                continue;
            }

            let raw_name = match pax_path.take().or(long_name.take()) {
                Some(name) => name,
                None => String::from_utf8_lossy(&header.path_bytes()).into_owned(),
            };
            let name = normalize_name(&raw_name);
            if name.is_empty() {
                return Err(TransferError::Archive(format!(
                    "member at offset {header_offset} has an empty name"
                )));
            }

            self.current = Some(Current {
                data_end,
                padded_end,
            });

            return Ok(Some(ArchiveEntry {
                name,
                size,
                header_offset,
                data_offset,
            }));
        }
    }

    /// Reader over the rest of the current member's content.
    ///
    /// The ceiling is whatever remains of the member, so calling this again
    /// after a partial read resumes where the previous reader stopped.
    pub fn entry_reader(&mut self) -> Result<EntryReader<'_, R>, TransferError> {
        let Some(current) = &self.current else {
            return Err(TransferError::Archive("no current entry".into()));
        };
        let remaining = current.data_end - self.position;
        Ok(BoundedReader::new(
            Positioned {
                inner: &mut self.inner,
                position: &mut self.position,
            },
            remaining,
        ))
    }

    /// Verifies the current member was read to its last byte, then skips
    /// the block padding so the cursor sits on the next header.
    pub async fn finish_entry(&mut self) -> Result<(), TransferError> {
        let Some(current) = self.current.take() else {
            return Err(TransferError::Archive("no current entry".into()));
        };
        if self.position != current.data_end {
            let missing = current.data_end - self.position;
            self.current = Some(current);
            return Err(TransferError::Archive(format!(
                "entry under-read: {missing} bytes left unconsumed"
            )));
        }
        self.skip(current.padded_end - current.data_end).await
    }

    /// Discards the rest of the current member and its padding.
    pub async fn skip_entry(&mut self) -> Result<(), TransferError> {
        let Some(current) = self.current.take() else {
            return Err(TransferError::Archive("no current entry".into()));
        };
        self.skip(current.padded_end - self.position).await
    }

    /// Reads one header block. `Ok(false)` on clean EOF before any byte.
    async fn read_block(&mut self, block: &mut [u8]) -> Result<bool, TransferError> {
        let mut filled = 0;
        while filled < block.len() {
            let n = self.inner.read(&mut block[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(TransferError::Archive(format!(
                    "truncated header at offset {}",
                    self.position
                )));
            }
            filled += n;
            self.position += n as u64;
        }
        Ok(true)
    }

    async fn read_meta(&mut self, size: u64) -> Result<Vec<u8>, TransferError> {
        if size > MAX_META_SIZE {
            return Err(TransferError::Archive(format!(
                "extension header of {size} bytes exceeds limit"
            )));
        }
        let mut data = vec![0u8; size as usize];
        self.inner.read_exact(&mut data).await.map_err(truncated)?;
        self.position += size;
        self.skip(size.next_multiple_of(BLOCK_SIZE) - size).await?;
        Ok(data)
    }

    async fn skip(&mut self, mut count: u64) -> Result<(), TransferError> {
        let mut scratch = [0u8; BLOCK_SIZE as usize];
        while count > 0 {
            let want = count.min(BLOCK_SIZE) as usize;
            let n = self.inner.read(&mut scratch[..want]).await?;
            if n == 0 {
                return Err(TransferError::Archive(format!(
                    "archive truncated at offset {}",
                    self.position
                )));
            }
            count -= n as u64;
            self.position += n as u64;
        }
        Ok(())
    }
}

/// Bounded reader over the current member.
pub type EntryReader<'a, R> = BoundedReader<Positioned<'a, R>>;

/// Inner reader that advances the cursor position as bytes go by.
pub struct Positioned<'a, R> {
    inner: &'a mut R,
    position: &'a mut u64,
}

impl<R: AsyncRead + Unpin> AsyncRead for Positioned<'_, R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut *this.inner).poll_read(cx, buf))?;
        *this.position += (buf.filled().len() - before) as u64;
        Poll::Ready(Ok(()))
    }
}

/// Content size rounded up to whole blocks, or `None` on overflow.
fn padded(size: u64) -> Option<u64> {
    size.checked_next_multiple_of(BLOCK_SIZE)
}

/// Stream offsets of a member's last content byte and of its padding end.
fn member_bounds(data_offset: u64, size: u64) -> Result<(u64, u64), TransferError> {
    padded(size)
        .and_then(|padded| Some((data_offset.checked_add(size)?, data_offset.checked_add(padded)?)))
        .ok_or_else(|| TransferError::Archive("entry size overflows stream offset".into()))
}

fn truncated(e: io::Error) -> TransferError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        TransferError::Archive("archive truncated inside extension header".into())
    } else {
        TransferError::Io(e)
    }
}

fn verify_checksum(block: &[u8; BLOCK_SIZE as usize]) -> Result<(), TransferError> {
    let header = tar::Header::from_byte_slice(block);
    let stored = header
        .cksum()
        .map_err(|e| TransferError::Archive(format!("bad checksum field: {e}")))?;
    let computed: u32 = block
        .iter()
        .enumerate()
        .map(|(i, b)| if (148..156).contains(&i) { 32 } else { u32::from(*b) })
        .sum();
    if stored != computed {
        return Err(TransferError::Archive(format!(
            "header checksum mismatch: stored {stored}, computed {computed}"
        )));
    }
    Ok(())
}

fn trim_nul(data: &[u8]) -> String {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

fn normalize_name(name: &str) -> String {
    let mut name = name;
    while let Some(rest) = name.strip_prefix("./") {
        name = rest;
    }
    name.to_string()
}

/// Parses `"<len> <key>=<value>\n"` records.
fn parse_pax(data: &[u8]) -> Result<Vec<(String, String)>, TransferError> {
    let mut records = Vec::new();
    let mut rest = data;
    while !rest.is_empty() && rest[0] != 0 {
        let space = rest
            .iter()
            .position(|b| *b == b' ')
            .ok_or_else(|| TransferError::Archive("malformed PAX record".into()))?;
        let len: usize = std::str::from_utf8(&rest[..space])
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|len| *len > space && *len <= rest.len())
            .ok_or_else(|| TransferError::Archive("malformed PAX record length".into()))?;
        let record = &rest[space + 1..len];
        let record = record.strip_suffix(b"\n").unwrap_or(record);
        if let Some(eq) = record.iter().position(|b| *b == b'=') {
            records.push((
                String::from_utf8_lossy(&record[..eq]).into_owned(),
                String::from_utf8_lossy(&record[eq + 1..]).into_owned(),
            ));
        }
        rest = &rest[len..];
    }
    Ok(records)
}
