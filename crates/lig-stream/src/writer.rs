//! Writing containers and in-memory snapshots.
//!
//! The writer has no policy of its own: callers choose addresses, block
//! order, and which values go where. It exists so fixtures and snapshots
//! can be produced in the format the reader consumes.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use lig_schema::{
    encode_array, make_id_name, ByteWriter, Schema, SchemaError, StructValue, Value,
    ID_FLAG_WEAK_LINK,
};
use lig_types::{BlockCode, TypeCode};
use tracing::debug;

use crate::block::{BlockHeader, FileHeader};
use crate::error::StreamResult;
use crate::source::{MemChunk, MemFile};

/// Serializes blocks with the layout of one schema.
///
/// Every object, library, placeholder and globals block starts a new chunk
/// boundary; plain data blocks stay in the chunk of the block before them.
#[derive(Debug)]
pub struct DocumentWriter {
    schema: Schema,
    header: FileHeader,
    out: ByteWriter,
    boundaries: Vec<usize>,
}

impl DocumentWriter {
    /// Start a document: file header and schema block.
    pub fn new(schema: &Schema) -> Self {
        let header = FileHeader::new(schema.layout());
        let mut out = ByteWriter::new(header.endian);
        out.bytes(&header.to_bytes());
        let dna = schema.to_bytes();
        BlockHeader {
            code: BlockCode::DNA1,
            len: dna.len() as i32,
            struct_index: 0,
            count: 1,
            address: 0,
        }
        .encode(&mut out, header.pointer);
        out.bytes(&dna);
        Self {
            schema: schema.clone(),
            header,
            out,
            boundaries: vec![0],
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.out.len()
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    /// Start a new snapshot chunk at the current offset.
    pub fn begin_chunk(&mut self) {
        let at = self.out.len();
        if self.boundaries.last() != Some(&at) {
            self.boundaries.push(at);
        }
    }

    /// Write one block holding `values`, all of the same struct.
    pub fn write_block(&mut self, code: BlockCode, address: u64, values: &[StructValue]) -> StreamResult<()> {
        let first = values.first().ok_or_else(|| SchemaError::Unencodable {
            field: code.to_string(),
            reason: "block without values".into(),
        })?;
        let index = self
            .schema
            .struct_index(&first.name)
            .ok_or_else(|| SchemaError::UnknownStruct(first.name.to_string()))?;
        let payload = encode_array(&self.schema, index, values)?;
        BlockHeader {
            code,
            len: payload.len() as i32,
            struct_index: index as i32,
            count: values.len() as i32,
            address,
        }
        .encode(&mut self.out, self.header.pointer);
        self.out.bytes(&payload);
        Ok(())
    }

    /// Write a raw block with no struct interpretation.
    pub fn write_raw(&mut self, code: BlockCode, address: u64, bytes: &[u8]) {
        BlockHeader {
            code,
            len: bytes.len() as i32,
            struct_index: BlockHeader::RAW,
            count: 1,
            address,
        }
        .encode(&mut self.out, self.header.pointer);
        self.out.bytes(bytes);
    }

    /// Write a top-level object block.
    pub fn write_object(&mut self, code: TypeCode, address: u64, body: &StructValue) -> StreamResult<()> {
        self.begin_chunk();
        self.write_block(code.block_code(), address, std::slice::from_ref(body))
    }

    /// Write a plain data block owned by the preceding object.
    pub fn write_data(&mut self, address: u64, values: &[StructValue]) -> StreamResult<()> {
        self.write_block(BlockCode::DATA, address, values)
    }

    /// Write raw bytes owned by the preceding object.
    pub fn write_raw_data(&mut self, address: u64, bytes: &[u8]) {
        self.write_raw(BlockCode::DATA, address, bytes);
    }

    /// Write the globals record.
    pub fn write_globals(&mut self, globals: &StructValue) -> StreamResult<()> {
        self.begin_chunk();
        self.write_block(BlockCode::GLOB, 0, std::slice::from_ref(globals))
    }

    /// Declare a library. Placeholders written after it live in it.
    pub fn write_library(&mut self, address: u64, name: &str, path: &str) -> StreamResult<()> {
        let index = self
            .schema
            .struct_index("Library")
            .ok_or_else(|| SchemaError::UnknownStruct("Library".into()))?;
        let path_len = self.schema.structs()[index]
            .field("filepath")
            .map_or(0, |f| f.array_len);
        let mut lib = StructValue::zeroed(&self.schema, index);
        lib.set_path("id.name", self.id_name(TypeCode::LIBRARY, name)?);
        lib.set("filepath", Value::chars(path, path_len));
        self.begin_chunk();
        self.write_block(BlockCode::LIBRARY, address, &[lib])
    }

    /// Write a link placeholder for an object of the last declared library.
    pub fn write_link_placeholder(
        &mut self,
        code: TypeCode,
        address: u64,
        name: &str,
        weak: bool,
    ) -> StreamResult<()> {
        let index = self
            .schema
            .struct_index("ID")
            .ok_or_else(|| SchemaError::UnknownStruct("ID".into()))?;
        let mut id = StructValue::zeroed(&self.schema, index);
        id.set("name", self.id_name(code, name)?);
        if weak {
            id.set("flag", Value::Short(ID_FLAG_WEAK_LINK));
        }
        self.begin_chunk();
        self.write_block(BlockCode::LINK_PLACEHOLDER, address, &[id])
    }

    fn id_name(&self, code: TypeCode, name: &str) -> StreamResult<Value> {
        let len = self
            .schema
            .struct_named("ID")
            .and_then(|id| id.field("name"))
            .map(|f| f.array_len)
            .ok_or_else(|| SchemaError::UnknownStruct("ID".into()))?;
        Ok(Value::chars(&make_id_name(code, name), len))
    }

    fn finish_inner(mut self) -> (Vec<u8>, Vec<usize>) {
        self.begin_chunk();
        BlockHeader {
            code: BlockCode::ENDB,
            len: 0,
            struct_index: 0,
            count: 0,
            address: 0,
        }
        .encode(&mut self.out, self.header.pointer);
        (self.out.into_inner(), self.boundaries)
    }

    /// Terminate and return the plain container bytes.
    pub fn finish(self) -> Vec<u8> {
        self.finish_inner().0
    }

    /// Terminate and return the container wrapped in gzip.
    pub fn finish_gzip(self) -> StreamResult<Vec<u8>> {
        let bytes = self.finish();
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&bytes)?;
        Ok(enc.finish()?)
    }

    /// Terminate and split into snapshot chunks, comparing each chunk with
    /// the one at the same position in `previous`.
    pub fn finish_memfile(self, previous: Option<&MemFile>) -> MemFile {
        let (bytes, boundaries) = self.finish_inner();
        let mut builder = MemFileBuilder::new(previous);
        for (i, &start) in boundaries.iter().enumerate() {
            let end = boundaries.get(i + 1).copied().unwrap_or(bytes.len());
            builder.push(bytes[start..end].to_vec());
        }
        builder.finish()
    }
}

/// Assembles a snapshot chunk by chunk.
#[derive(Debug)]
pub struct MemFileBuilder<'a> {
    previous: Option<&'a MemFile>,
    file: MemFile,
}

impl<'a> MemFileBuilder<'a> {
    pub fn new(previous: Option<&'a MemFile>) -> Self {
        Self {
            previous,
            file: MemFile::new(),
        }
    }

    /// Append a chunk. Returns whether it matched the previous snapshot's
    /// chunk at the same position; matching chunks share that chunk's bytes.
    pub fn push(&mut self, bytes: Vec<u8>) -> bool {
        let position = self.file.chunks().len();
        let fingerprint = crc32fast::hash(&bytes);
        let same = self
            .previous
            .and_then(|prev| prev.chunks().get(position))
            .filter(|prev| prev.fingerprint == fingerprint && *prev.bytes == *bytes);
        match same {
            Some(prev) => {
                self.file.push(MemChunk {
                    bytes: prev.bytes.clone(),
                    identical: true,
                    fingerprint,
                });
                true
            }
            None => {
                self.file.push(MemChunk {
                    bytes: bytes.into(),
                    identical: false,
                    fingerprint,
                });
                false
            }
        }
    }

    pub fn finish(self) -> MemFile {
        debug!(
            chunks = self.file.chunks().len(),
            bytes = self.file.len(),
            identical = self.file.identical_ratio(),
            "built memfile"
        );
        self.file
    }
}
