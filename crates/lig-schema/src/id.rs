//! Peeking at the `ID` header every object struct starts with.
//!
//! Identity (type, name, session uid) and the weak-link flag are needed
//! before an object is decoded: the linker finds library objects by name
//! and incremental reads match objects by session uid. Peeking reads just
//! those fields out of the raw payload.

use lig_types::{PointerWidth, TypeCode};

use crate::bytes::ByteReader;
use crate::desc::{Layout, Schema};
use crate::error::{SchemaError, SchemaResult};
use crate::value::{StructValue, Value};

/// `ID.flag` bit: the placeholder may be dropped if its library lacks it.
pub const ID_FLAG_WEAK_LINK: i16 = 1 << 0;

/// Header fields of one object, read without decoding the struct.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdHeader {
    pub name: String,
    /// As-written address of the owning `Library`, 0 for local objects.
    pub lib: u64,
    pub flag: i16,
    pub session_uid: u32,
}

impl IdHeader {
    pub fn is_weak_link(&self) -> bool {
        self.flag & ID_FLAG_WEAK_LINK != 0
    }
}

/// Offsets of the `ID` fields under one schema.
///
/// Fields missing from an old schema read as zero.
#[derive(Clone, Debug)]
pub struct IdLayout {
    layout: Layout,
    name: Option<(usize, usize)>,
    lib: Option<usize>,
    flag: Option<usize>,
    session_uid: Option<usize>,
    size: usize,
}

impl IdLayout {
    pub fn from_schema(schema: &Schema) -> SchemaResult<Self> {
        let id = schema
            .struct_named("ID")
            .ok_or_else(|| SchemaError::UnknownStruct("ID".into()))?;
        let offset = |name: &str| id.field(name).map(|f| f.offset);
        Ok(Self {
            layout: schema.layout(),
            name: id.field("name").map(|f| (f.offset, f.size)),
            lib: offset("lib"),
            flag: offset("flag"),
            session_uid: offset("session_uid"),
            size: id.size,
        })
    }

    /// Byte size of the header.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Read the header at the start of an object payload.
    ///
    /// Returns `None` if the payload is shorter than the header.
    pub fn peek(&self, payload: &[u8], address_width: PointerWidth) -> Option<IdHeader> {
        if payload.len() < self.size {
            return None;
        }
        let mut r = ByteReader::new(payload, self.layout.endian);
        let name = match self.name {
            Some((offset, len)) => {
                let bytes = &payload[offset..offset + len];
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(len);
                String::from_utf8_lossy(&bytes[..end]).into_owned()
            }
            None => String::new(),
        };
        let lib = match self.lib {
            Some(offset) => {
                r.seek(offset)?;
                let raw = r.address(self.layout.pointer)?;
                self.layout.pointer.convert(raw, address_width)
            }
            None => 0,
        };
        let flag = match self.flag {
            Some(offset) => {
                r.seek(offset)?;
                r.i16()?
            }
            None => 0,
        };
        let session_uid = match self.session_uid {
            Some(offset) => {
                r.seek(offset)?;
                r.u32()?
            }
            None => 0,
        };
        Some(IdHeader {
            name,
            lib,
            flag,
            session_uid,
        })
    }
}

/// Stored `ID.name`: the two-character type code followed by the name.
pub fn make_id_name(code: TypeCode, name: &str) -> String {
    format!("{code}{name}")
}

/// Split a stored `ID.name` into type code and bare name.
pub fn split_id_name(raw: &str) -> Option<(TypeCode, &str)> {
    let prefix = raw.get(..2)?;
    let code = TypeCode::parse(prefix).ok()?;
    Some((code, &raw[2..]))
}

/// Stored `ID.name` from a decoded body.
pub fn object_name(body: &StructValue) -> String {
    body.path("id.name")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// Session uid from a decoded body.
pub fn session_uid(body: &StructValue) -> u32 {
    body.path("id.session_uid")
        .and_then(Value::as_i64)
        .unwrap_or(0) as u32
}

/// `ID.flag` from a decoded body.
pub fn id_flag(body: &StructValue) -> i16 {
    body.path("id.flag").and_then(Value::as_i64).unwrap_or(0) as i16
}

/// Library file path from a decoded `Library` body.
pub fn library_path(body: &StructValue) -> String {
    body.get("filepath")
        .and_then(Value::as_str)
        .unwrap_or_default()
}
