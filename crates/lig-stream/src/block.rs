//! Container header and block records.

use lig_schema::{ByteReader, ByteWriter, Layout};
use lig_types::{BlockCode, Endianness, PointerWidth};

use crate::error::{StreamError, StreamResult};

/// Magic at offset zero of every container.
pub const MAGIC: &[u8; 6] = b"LIGDOC";

/// Gzip member signature.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// The eight-byte file header: magic, pointer marker, endian marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileHeader {
    pub pointer: PointerWidth,
    pub endian: Endianness,
}

impl FileHeader {
    pub const SIZE: usize = 8;

    pub fn new(layout: Layout) -> Self {
        Self {
            pointer: layout.pointer,
            endian: layout.endian,
        }
    }

    pub fn layout(&self) -> Layout {
        Layout::new(self.pointer, self.endian)
    }

    pub fn parse(bytes: &[u8]) -> StreamResult<Self> {
        if bytes.len() < Self::SIZE || &bytes[..6] != MAGIC {
            let shown = &bytes[..bytes.len().min(6)];
            return Err(StreamError::UnrecognizedFormat(format!(
                "expected {:?}, found {:?}",
                String::from_utf8_lossy(MAGIC),
                String::from_utf8_lossy(shown)
            )));
        }
        Ok(Self {
            pointer: PointerWidth::from_marker(bytes[6])?,
            endian: Endianness::from_marker(bytes[7])?,
        })
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..6].copy_from_slice(MAGIC);
        out[6] = self.pointer.marker();
        out[7] = self.endian.marker();
        out
    }
}

/// Fixed part of every block.
///
/// `address` holds the as-written address already converted to the
/// reader's pointer width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub code: BlockCode,
    pub len: i32,
    /// Index into the file schema's struct table; `-1` for raw bytes.
    pub struct_index: i32,
    pub count: i32,
    pub address: u64,
}

impl BlockHeader {
    /// Struct index of raw payload-only blocks.
    pub const RAW: i32 = -1;

    /// Encoded size for a given pointer width.
    pub fn size(width: PointerWidth) -> usize {
        16 + width.bytes()
    }

    pub fn is_raw(&self) -> bool {
        self.struct_index == Self::RAW
    }

    /// Decode from exactly [`BlockHeader::size`] bytes.
    pub(crate) fn decode(
        bytes: &[u8],
        file: &FileHeader,
        address_width: PointerWidth,
        offset: u64,
    ) -> StreamResult<Self> {
        let mut r = ByteReader::new(bytes, file.endian);
        let short = || StreamError::Truncated {
            offset,
            needed: Self::size(file.pointer) as u64,
        };
        let code: [u8; 4] = r.take(4).ok_or_else(short)?.try_into().map_err(|_| short())?;
        let len = r.i32().ok_or_else(short)?;
        let struct_index = r.i32().ok_or_else(short)?;
        let count = r.i32().ok_or_else(short)?;
        let raw = r.address(file.pointer).ok_or_else(short)?;
        if len < 0 {
            return Err(StreamError::CorruptBlock {
                offset,
                reason: format!("negative length {len}"),
            });
        }
        if count < 0 || struct_index < Self::RAW {
            return Err(StreamError::CorruptBlock {
                offset,
                reason: format!("bad struct index {struct_index} or count {count}"),
            });
        }
        Ok(Self {
            code: BlockCode(code),
            len,
            struct_index,
            count,
            address: file.pointer.convert(raw, address_width),
        })
    }

    pub(crate) fn encode(&self, w: &mut ByteWriter, width: PointerWidth) {
        w.bytes(&self.code.0);
        w.i32(self.len);
        w.i32(self.struct_index);
        w.i32(self.count);
        w.address(self.address, width);
    }
}

/// Block payload: in memory, or left in the source to be read on demand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Resident(Vec<u8>),
    Deferred { offset: u64, len: u64 },
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Self::Resident(bytes) => bytes.len(),
            Self::Deferred { len, .. } => *len as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Resident(bytes) => Some(bytes),
            Self::Deferred { .. } => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred { .. })
    }
}

/// One block as read from a stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub payload: Payload,
    /// Stream offset of the block header.
    pub start: u64,
    /// Stream offset just past the payload.
    pub end: u64,
}

/// A block plus the `DATA` blocks that immediately follow it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Group {
    pub block: Block,
    pub data: Vec<Block>,
}

impl Group {
    pub fn start(&self) -> u64 {
        self.block.start
    }

    pub fn end(&self) -> u64 {
        self.data.last().map_or(self.block.end, |b| b.end)
    }

    pub fn code(&self) -> BlockCode {
        self.block.header.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_markers() {
        let header = FileHeader {
            pointer: PointerWidth::Four,
            endian: Endianness::Big,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes, b"LIGDOC_V");
        assert_eq!(FileHeader::parse(&bytes).unwrap(), header);
    }

    #[test]
    fn foreign_magic_is_unrecognized() {
        let err = FileHeader::parse(b"BLENDER-v").unwrap_err();
        assert!(matches!(err, StreamError::UnrecognizedFormat(_)));
        assert!(FileHeader::parse(b"LIG").is_err());
    }

    #[test]
    fn block_header_narrows_addresses() {
        let file = FileHeader {
            pointer: PointerWidth::Eight,
            endian: Endianness::Little,
        };
        let header = BlockHeader {
            code: BlockCode::DATA,
            len: 12,
            struct_index: 3,
            count: 1,
            address: 0x7f00_0000_1000,
        };
        let mut w = ByteWriter::new(file.endian);
        header.encode(&mut w, file.pointer);
        let bytes = w.into_inner();
        assert_eq!(bytes.len(), BlockHeader::size(PointerWidth::Eight));

        let same = BlockHeader::decode(&bytes, &file, PointerWidth::Eight, 0).unwrap();
        assert_eq!(same, header);
        let narrow = BlockHeader::decode(&bytes, &file, PointerWidth::Four, 0).unwrap();
        assert_eq!(narrow.address, ((0x7f00_0000_1000u64 >> 3) as u32) as u64);
    }

    #[test]
    fn negative_length_is_corrupt() {
        let file = FileHeader {
            pointer: PointerWidth::Four,
            endian: Endianness::Little,
        };
        let mut w = ByteWriter::new(file.endian);
        BlockHeader {
            code: BlockCode::DATA,
            len: -4,
            struct_index: 0,
            count: 1,
            address: 8,
        }
        .encode(&mut w, file.pointer);
        let err = BlockHeader::decode(&w.into_inner(), &file, PointerWidth::Four, 64).unwrap_err();
        assert!(matches!(err, StreamError::CorruptBlock { offset: 64, .. }));
    }
}
