//! Schema registry for Ligature.
//!
//! Every document embeds a description of the structs it was written with.
//! This crate parses that description, compares it with the running
//! program's own schema, and turns struct payloads into value trees shaped
//! for the runtime.
//!
//! # Key Types
//!
//! - [`Schema`] -- Parsed struct table with computed field offsets
//! - [`SchemaBuilder`] -- Declares the runtime schema in code
//! - [`Compatibility`] -- Per-file-struct [`Compat`] flags against the runtime
//! - [`StructValue`] / [`Value`] -- Decoded records
//! - [`IdLayout`] -- Peeks object identity without a full decode

pub mod builder;
pub mod bytes;
pub mod codec;
pub mod compat;
pub mod desc;
pub mod error;
pub mod id;
pub mod reconcile;
pub mod value;

pub use builder::{SchemaBuilder, ID_NAME_LEN, LIBRARY_PATH_LEN};
pub use bytes::{ByteReader, ByteWriter};
pub use codec::{decode_array, decode_struct, encode_array, encode_struct};
pub use compat::{Compat, Compatibility};
pub use desc::{FieldDesc, FieldKind, Layout, Primitive, Schema, StructDesc, TypeDesc};
pub use error::{SchemaError, SchemaResult};
pub use id::{make_id_name, split_id_name, IdHeader, IdLayout, ID_FLAG_WEAK_LINK};
pub use reconcile::{reconcile, MigrateContext, MigrateFn};
pub use value::{DataIndex, Field, Link, Pointer, StructValue, Value};
