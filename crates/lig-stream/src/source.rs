//! Byte sources a block stream can read from.
//!
//! All three present one logical byte sequence with an absolute position.
//! Only the memfile source can report which byte ranges are unchanged since
//! the previous snapshot.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use flate2::read::GzDecoder;

/// Uniform access to a container's bytes.
pub trait BlockSource: Send {
    /// Read up to `buf.len()` bytes, returning how many were read.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Move to an absolute offset.
    fn seek(&mut self, pos: u64) -> io::Result<()>;

    /// Current absolute offset.
    fn position(&self) -> u64;

    /// Whether backward seeks are supported.
    fn is_seekable(&self) -> bool;

    /// Whether every byte of `offset..offset + len` is unchanged from the
    /// previous snapshot.
    fn range_identical(&self, _offset: u64, _len: u64) -> bool {
        false
    }

    /// Fill `buf` completely. Returns the number of bytes read, which is
    /// less than `buf.len()` only at end of input.
    fn read_full(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

/// Uncompressed bytes from any seekable reader.
pub struct PlainSource<R> {
    inner: R,
    pos: u64,
}

impl<R: Read + Seek + Send> PlainSource<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let pos = inner.stream_position()?;
        Ok(Self { inner, pos })
    }
}

impl<R: Read + Seek + Send> BlockSource for PlainSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.pos = self.inner.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

/// Gzip-wrapped container, inflated on the fly.
///
/// Forward seeks discard inflated bytes; backward seeks fail.
pub struct CompressedSource<R: Read> {
    inner: GzDecoder<R>,
    pos: u64,
}

impl<R: Read + Send> CompressedSource<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: GzDecoder::new(inner),
            pos: 0,
        }
    }
}

impl<R: Read + Send> BlockSource for CompressedSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        if pos < self.pos {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("cannot seek back from {} to {pos} in a compressed stream", self.pos),
            ));
        }
        let skip = pos - self.pos;
        let copied = io::copy(&mut (&mut self.inner).take(skip), &mut io::sink())?;
        self.pos += copied;
        if copied < skip {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn is_seekable(&self) -> bool {
        false
    }
}

/// One chunk of an in-memory snapshot.
#[derive(Clone, Debug)]
pub struct MemChunk {
    pub bytes: Arc<[u8]>,
    /// Equal to the chunk at the same position in the previous snapshot.
    pub identical: bool,
    pub(crate) fingerprint: u32,
}

impl MemChunk {
    pub fn new(bytes: impl Into<Arc<[u8]>>, identical: bool) -> Self {
        let bytes = bytes.into();
        let fingerprint = crc32fast::hash(&bytes);
        Self {
            bytes,
            identical,
            fingerprint,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// An in-memory snapshot: an ordered list of chunks read as one stream.
#[derive(Clone, Debug, Default)]
pub struct MemFile {
    chunks: Vec<MemChunk>,
    starts: Vec<u64>,
    len: u64,
}

impl MemFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_chunks(chunks: Vec<MemChunk>) -> Self {
        let mut file = Self::new();
        for chunk in chunks {
            file.push(chunk);
        }
        file
    }

    pub fn push(&mut self, chunk: MemChunk) {
        self.starts.push(self.len);
        self.len += chunk.len() as u64;
        self.chunks.push(chunk);
    }

    pub fn chunks(&self) -> &[MemChunk] {
        &self.chunks
    }

    /// Total length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Share of bytes held in identical chunks, 0.0 to 1.0.
    pub fn identical_ratio(&self) -> f64 {
        if self.len == 0 {
            return 0.0;
        }
        let same: usize = self
            .chunks
            .iter()
            .filter(|c| c.identical)
            .map(MemChunk::len)
            .sum();
        same as f64 / self.len as f64
    }

    /// Concatenated bytes of every chunk.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len as usize);
        for chunk in &self.chunks {
            out.extend_from_slice(&chunk.bytes);
        }
        out
    }

    fn chunk_at(&self, offset: u64) -> Option<usize> {
        if offset >= self.len {
            return None;
        }
        match self.starts.binary_search(&offset) {
            Ok(mut i) => {
                // Skip empty chunks sharing the same start.
                while self.chunks[i].is_empty() {
                    i += 1;
                }
                Some(i)
            }
            Err(i) => Some(i - 1),
        }
    }

    /// Whether `offset..offset + len` lies entirely in identical chunks.
    pub fn range_identical(&self, offset: u64, len: u64) -> bool {
        let end = offset.saturating_add(len.max(1));
        if end > self.len {
            return false;
        }
        let Some(mut i) = self.chunk_at(offset) else {
            return false;
        };
        loop {
            if !self.chunks[i].identical {
                return false;
            }
            let chunk_end = self.starts[i] + self.chunks[i].len() as u64;
            if chunk_end >= end {
                return true;
            }
            i += 1;
        }
    }
}

/// Reader over a shared [`MemFile`].
pub struct MemfileSource {
    file: Arc<MemFile>,
    pos: u64,
}

impl MemfileSource {
    pub fn new(file: Arc<MemFile>) -> Self {
        Self { file, pos: 0 }
    }
}

impl BlockSource for MemfileSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(i) = self.file.chunk_at(self.pos) else {
            return Ok(0);
        };
        let chunk = &self.file.chunks[i];
        let within = (self.pos - self.file.starts[i]) as usize;
        let n = buf.len().min(chunk.len() - within);
        buf[..n].copy_from_slice(&chunk.bytes[within..within + n]);
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        if pos > self.file.len {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        self.pos = pos;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn range_identical(&self, offset: u64, len: u64) -> bool {
        self.file.range_identical(offset, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn memfile() -> MemFile {
        MemFile::from_chunks(vec![
            MemChunk::new(b"abcd".to_vec(), true),
            MemChunk::new(Vec::new(), false),
            MemChunk::new(b"efg".to_vec(), false),
            MemChunk::new(b"hij".to_vec(), true),
        ])
    }

    #[test]
    fn memfile_reads_across_chunks() {
        let mut src = MemfileSource::new(Arc::new(memfile()));
        let mut buf = [0u8; 10];
        assert_eq!(src.read_full(&mut buf).unwrap(), 10);
        assert_eq!(&buf, b"abcdefghij");
        assert_eq!(src.read(&mut buf).unwrap(), 0);

        src.seek(3).unwrap();
        let mut two = [0u8; 2];
        src.read_full(&mut two).unwrap();
        assert_eq!(&two, b"de");
    }

    #[test]
    fn identical_ranges() {
        let file = memfile();
        assert!(file.range_identical(0, 4));
        assert!(file.range_identical(1, 2));
        assert!(!file.range_identical(2, 4));
        assert!(file.range_identical(7, 3));
        assert!(!file.range_identical(7, 4));
        assert!((file.identical_ratio() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn compressed_source_only_seeks_forward() {
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        enc.write_all(b"0123456789").unwrap();
        let bytes = enc.finish().unwrap();

        let mut src = CompressedSource::new(Cursor::new(bytes));
        assert!(!src.is_seekable());
        src.seek(4).unwrap();
        let mut buf = [0u8; 3];
        src.read_full(&mut buf).unwrap();
        assert_eq!(&buf, b"456");
        assert!(src.seek(0).is_err());
        assert!(src.seek(20).is_err());
    }

    #[test]
    fn plain_source_tracks_position() {
        let mut src = PlainSource::new(Cursor::new(b"xyz".to_vec())).unwrap();
        let mut buf = [0u8; 2];
        src.read_full(&mut buf).unwrap();
        assert_eq!(src.position(), 2);
        src.seek(0).unwrap();
        assert_eq!(src.position(), 0);
    }
}
