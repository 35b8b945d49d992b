//! Block stream reader and writer for Ligature containers.
//!
//! A container is an eight-byte header followed by blocks. Each block has a
//! four-byte code, a length, a struct index into the embedded schema, an
//! element count, and the address the writer's memory had for it. The
//! schema block (`DNA1`) precedes the blocks it describes and `ENDB` ends
//! the stream.
//!
//! # Key Types
//!
//! - [`BlockStream`] -- Sequential reader over any [`BlockSource`]
//! - [`BlockIndex`] -- Whole-document index by address and by object name
//! - [`MemFile`] -- In-memory snapshot made of [`MemChunk`]s
//! - [`DocumentWriter`] / [`MemFileBuilder`] -- Producing containers and snapshots

pub mod block;
pub mod error;
pub mod index;
pub mod source;
pub mod stream;
pub mod writer;

pub use block::{Block, BlockHeader, FileHeader, Group, Payload, GZIP_MAGIC, MAGIC};
pub use error::{StreamError, StreamResult};
pub use index::{BlockIndex, BlockRef};
pub use source::{BlockSource, CompressedSource, MemChunk, MemFile, MemfileSource, PlainSource};
pub use stream::{BlockStream, InterruptFn, ReadOptions};
pub use writer::{DocumentWriter, MemFileBuilder};
