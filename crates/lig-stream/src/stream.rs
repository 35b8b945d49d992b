//! Sequential block reading.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use lig_schema::{IdLayout, Schema, SchemaError};
use lig_types::{BlockCode, PointerWidth};
use tracing::{debug, trace};

use crate::block::{Block, BlockHeader, FileHeader, Group, Payload, GZIP_MAGIC};
use crate::error::{StreamError, StreamResult};
use crate::source::{BlockSource, CompressedSource, MemFile, MemfileSource, PlainSource};

/// Caller-supplied cancellation check, polled between blocks.
///
/// Shared so the same check can be installed on every document a load
/// opens.
pub type InterruptFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Options for opening a stream.
#[derive(Clone, Copy, Debug)]
pub struct ReadOptions {
    /// Raw blocks at least this long are left in the source until
    /// [`BlockStream::materialize`] is called. `None` reads everything.
    pub defer_threshold: Option<usize>,
    /// Width addresses are converted to on read.
    pub address_width: PointerWidth,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            defer_threshold: None,
            address_width: PointerWidth::native(),
        }
    }
}

/// Header-level reader shared by the stream and its constructor.
struct RawReader {
    source: Box<dyn BlockSource>,
    header: FileHeader,
    options: ReadOptions,
    finished: bool,
}

/// A container opened for reading, positioned after its schema.
pub struct BlockStream {
    raw: RawReader,
    schema: Arc<Schema>,
    id_layout: Option<IdLayout>,
    pending: VecDeque<Block>,
    interrupt: Option<InterruptFn>,
}

impl std::fmt::Debug for BlockStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStream")
            .field("header", &self.raw.header)
            .field("position", &self.raw.source.position())
            .field("finished", &self.raw.finished)
            .finish()
    }
}

impl BlockStream {
    /// Open a stream on an arbitrary source.
    ///
    /// Reads the file header and every block up to and including the `DNA1`
    /// schema block. Blocks that precede the schema are kept and returned
    /// first by [`next_block`](Self::next_block).
    pub fn open(mut source: Box<dyn BlockSource>, options: ReadOptions) -> StreamResult<Self> {
        let mut magic = [0u8; FileHeader::SIZE];
        let n = source.read_full(&mut magic)?;
        let header = FileHeader::parse(&magic[..n])?;
        let mut raw = RawReader {
            source,
            header,
            options,
            finished: false,
        };

        let mut pending = VecDeque::new();
        let schema = loop {
            let block = raw.read_block(false)?.ok_or_else(|| {
                SchemaError::Malformed("no DNA1 block before end of stream".into())
            })?;
            if block.header.code == BlockCode::DNA1 {
                let bytes = block.payload.bytes().unwrap_or_default();
                break Schema::parse(bytes, header.layout())?;
            }
            pending.push_back(block);
        };
        debug!(
            pointer = header.pointer.bytes(),
            endian = ?header.endian,
            structs = schema.structs().len(),
            "opened block stream"
        );
        Ok(Self {
            raw,
            id_layout: IdLayout::from_schema(&schema).ok(),
            schema: Arc::new(schema),
            pending,
            interrupt: None,
        })
    }

    /// Open an in-memory container, plain or gzip-wrapped.
    pub fn from_bytes(bytes: Vec<u8>, options: ReadOptions) -> StreamResult<Self> {
        let source: Box<dyn BlockSource> = if bytes.starts_with(&GZIP_MAGIC) {
            Box::new(CompressedSource::new(Cursor::new(bytes)))
        } else {
            Box::new(PlainSource::new(Cursor::new(bytes))?)
        };
        Self::open(source, options)
    }

    /// Open a container on disk, plain or gzip-wrapped.
    pub fn from_path(path: &Path, options: ReadOptions) -> StreamResult<Self> {
        let mut file = File::open(path)?;
        let mut magic = [0u8; 2];
        let n = file.read(&mut magic)?;
        file.seek(SeekFrom::Start(0))?;
        let source: Box<dyn BlockSource> = if n == 2 && magic == GZIP_MAGIC {
            debug!(path = %path.display(), "reading gzip-wrapped document");
            Box::new(CompressedSource::new(BufReader::new(file)))
        } else {
            Box::new(PlainSource::new(BufReader::new(file))?)
        };
        Self::open(source, options)
    }

    /// Open an in-memory snapshot.
    pub fn from_memfile(file: Arc<MemFile>, options: ReadOptions) -> StreamResult<Self> {
        Self::open(Box::new(MemfileSource::new(file)), options)
    }

    /// Install a cancellation check polled before every block.
    pub fn set_interrupt(&mut self, check: InterruptFn) {
        self.interrupt = Some(check);
    }

    pub fn header(&self) -> FileHeader {
        self.raw.header
    }

    /// The file's schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Layout of the `ID` header under the file's schema, if it declares one.
    pub fn id_layout(&self) -> Option<&IdLayout> {
        self.id_layout.as_ref()
    }

    pub fn options(&self) -> ReadOptions {
        self.raw.options
    }

    /// Whether the underlying source supports backward seeks.
    pub fn is_seekable(&self) -> bool {
        self.raw.source.is_seekable()
    }

    /// Whether the given byte range is unchanged from the previous snapshot.
    pub fn range_identical(&self, offset: u64, len: u64) -> bool {
        self.raw.source.range_identical(offset, len)
    }

    /// Next block, or `None` at `ENDB` or a clean end of input.
    pub fn next_block(&mut self) -> StreamResult<Option<Block>> {
        if let Some(block) = self.pending.pop_front() {
            return Ok(Some(block));
        }
        if let Some(check) = &self.interrupt {
            if check() {
                return Err(StreamError::Interrupted);
            }
        }
        let deferrable =
            self.raw.source.is_seekable() && self.raw.options.defer_threshold.is_some();
        self.raw.read_block(deferrable)
    }

    /// Next block together with the `DATA` blocks that follow it.
    pub fn next_group(&mut self) -> StreamResult<Option<Group>> {
        let Some(block) = self.next_block()? else {
            return Ok(None);
        };
        let mut data = Vec::new();
        while let Some(next) = self.next_block()? {
            if next.header.code == BlockCode::DATA {
                data.push(next);
            } else {
                self.pending.push_front(next);
                break;
            }
        }
        Ok(Some(Group { block, data }))
    }

    /// Read a deferred payload.
    pub fn materialize(&mut self, payload: &Payload) -> StreamResult<Vec<u8>> {
        match payload {
            Payload::Resident(bytes) => Ok(bytes.clone()),
            Payload::Deferred { offset, len } => {
                let source = &mut self.raw.source;
                if !source.is_seekable() {
                    return Err(StreamError::NotSeekable(*offset));
                }
                let resume = source.position();
                source.seek(*offset)?;
                let mut buf = vec![0u8; *len as usize];
                let n = source.read_full(&mut buf)?;
                source.seek(resume)?;
                if n < buf.len() {
                    return Err(StreamError::Truncated {
                        offset: *offset,
                        needed: *len,
                    });
                }
                trace!(offset, len, "materialized deferred payload");
                Ok(buf)
            }
        }
    }
}

impl RawReader {
    fn read_block(&mut self, deferrable: bool) -> StreamResult<Option<Block>> {
        if self.finished {
            return Ok(None);
        }
        let start = self.source.position();
        let size = BlockHeader::size(self.header.pointer);
        let mut buf = vec![0u8; size];
        let n = self.source.read_full(&mut buf)?;
        if n == 0 {
            self.finished = true;
            return Ok(None);
        }
        if n < size {
            return Err(StreamError::Truncated {
                offset: start,
                needed: size as u64,
            });
        }
        let header = BlockHeader::decode(&buf, &self.header, self.options.address_width, start)?;
        if header.code == BlockCode::ENDB {
            self.finished = true;
            return Ok(None);
        }

        let offset = start + size as u64;
        let len = header.len as u64;
        let defer = deferrable
            && header.is_raw()
            && self
                .options
                .defer_threshold
                .is_some_and(|t| header.len as usize >= t);
        let payload = if defer {
            self.source.seek(offset + len).map_err(|_| StreamError::Truncated {
                offset,
                needed: len,
            })?;
            Payload::Deferred { offset, len }
        } else {
            let mut bytes = vec![0u8; header.len as usize];
            let got = self.source.read_full(&mut bytes)?;
            if got < bytes.len() {
                return Err(StreamError::Truncated {
                    offset,
                    needed: len,
                });
            }
            Payload::Resident(bytes)
        };
        trace!(code = %header.code, len = header.len, address = header.address, "block");
        Ok(Some(Block {
            header,
            payload,
            start,
            end: offset + len,
        }))
    }
}
