//! Byte count and checksum collected while media data streams through a copy.
//!
//! [`StreamStatFilter`] exposes the three hooks a stream host drives
//! (`on_open`, `filter`, `on_close`). [`StatWriter`], [`StatReader`] and
//! [`copy_with_stat`] wire those hooks into `std::io`. A detached filter
//! forwards bytes and does nothing else.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::digest::{DigestAccumulator, DigestAlgorithm};

/// Copy buffer size; memory use of a copy is bounded by this, not by the file.
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("stream filter used before it was opened")]
    NotOpened,

    #[error("stream filter is already closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Statistics of one stream. `checksum` stays `None` until the stream closes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStat {
    pub bytes: u64,
    pub checksum: Option<String>,
}

/// Pass-through stage that accounts for every byte it forwards.
pub struct StreamStatFilter {
    algorithm: Option<DigestAlgorithm>,
    stat: Option<StreamStat>,
    accumulator: Option<DigestAccumulator>,
    closed: bool,
}

impl StreamStatFilter {
    /// Filter that collects a [`StreamStat`] using `algorithm`.
    pub fn attached(algorithm: DigestAlgorithm) -> Self {
        Self {
            algorithm: Some(algorithm),
            stat: Some(StreamStat::default()),
            accumulator: None,
            closed: false,
        }
    }

    /// Like [`attached`](Self::attached) but with a configured algorithm name.
    pub fn attached_named(name: &str) -> Result<Self, StreamError> {
        Ok(Self::attached(name.parse()?))
    }

    /// Plain pass-through, no hashing.
    pub fn detached() -> Self {
        Self {
            algorithm: None,
            stat: None,
            accumulator: None,
            closed: false,
        }
    }

    pub fn on_open(&mut self) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        if let (Some(algorithm), Some(stat)) = (self.algorithm, self.stat.as_mut()) {
            stat.bytes = 0;
            stat.checksum = None;
            self.accumulator = Some(DigestAccumulator::open(algorithm));
        }
        Ok(())
    }

    /// Account for `chunk` and hand it back unchanged for the downstream side.
    pub fn filter<'a>(&mut self, chunk: &'a [u8]) -> Result<&'a [u8], StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        if let Some(stat) = self.stat.as_mut() {
            let accumulator = self.accumulator.as_mut().ok_or(StreamError::NotOpened)?;
            accumulator.update(chunk);
            stat.bytes += chunk.len() as u64;
        }
        Ok(chunk)
    }

    /// Finalize the checksum. Runs once; the stat is immutable afterwards.
    pub fn on_close(&mut self) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        self.closed = true;
        if let Some(stat) = self.stat.as_mut() {
            let accumulator = self.accumulator.take().ok_or(StreamError::NotOpened)?;
            debug_assert_eq!(accumulator.bytes(), stat.bytes);
            stat.checksum = Some(accumulator.finalize());
        }
        Ok(())
    }

    pub fn stat(&self) -> Option<&StreamStat> {
        self.stat.as_ref()
    }

    pub fn into_stat(self) -> Option<StreamStat> {
        self.stat
    }
}

/// Writer adapter driving a [`StreamStatFilter`].
///
/// Only the bytes the inner writer reports as written are fed to the filter,
/// so short writes are accounted for correctly.
pub struct StatWriter<W: Write> {
    inner: W,
    filter: StreamStatFilter,
}

impl<W: Write> StatWriter<W> {
    pub fn new(inner: W, mut filter: StreamStatFilter) -> Result<Self, StreamError> {
        filter.on_open()?;
        Ok(Self { inner, filter })
    }

    /// Running stat; the checksum is only set after [`finish`](Self::finish).
    pub fn stat(&self) -> Option<&StreamStat> {
        self.filter.stat()
    }

    /// Flush, close the filter and return the writer with the final stat.
    pub fn finish(mut self) -> Result<(W, Option<StreamStat>), StreamError> {
        self.inner.flush()?;
        self.filter.on_close()?;
        Ok((self.inner, self.filter.into_stat()))
    }
}

impl<W: Write> Write for StatWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.filter.filter(&buf[..n]).map_err(io::Error::other)?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader adapter driving a [`StreamStatFilter`].
pub struct StatReader<R: Read> {
    inner: R,
    filter: StreamStatFilter,
}

impl<R: Read> StatReader<R> {
    pub fn new(inner: R, mut filter: StreamStatFilter) -> Result<Self, StreamError> {
        filter.on_open()?;
        Ok(Self { inner, filter })
    }

    pub fn finish(mut self) -> Result<(R, Option<StreamStat>), StreamError> {
        self.filter.on_close()?;
        Ok((self.inner, self.filter.into_stat()))
    }
}

impl<R: Read> Read for StatReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.filter.filter(&buf[..n]).map_err(io::Error::other)?;
        Ok(n)
    }
}

/// Copy `reader` into `writer` through `filter`, returning the final stat
/// (`None` for a detached filter).
pub fn copy_with_stat<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    filter: StreamStatFilter,
) -> Result<Option<StreamStat>, StreamError> {
    let mut out = StatWriter::new(writer, filter)?;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        out.write_all(&buf[..n])?;
    }
    let (_, stat) = out.finish()?;
    Ok(stat)
}

/// Checksum a file on disk without keeping it in memory.
pub fn checksum_file(path: &Path, algorithm: DigestAlgorithm) -> Result<StreamStat, StreamError> {
    let mut file = File::open(path)?;
    let stat = copy_with_stat(&mut file, &mut io::sink(), StreamStatFilter::attached(algorithm))?;
    stat.ok_or(StreamError::NotOpened)
}
