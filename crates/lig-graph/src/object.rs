//! Loaded objects and the data blocks they own.

use std::sync::Arc;

use lig_schema::{Link, Pointer, StructValue};
use lig_types::{DocumentId, Endianness, ObjectStatus, TypeCode};

/// What a plain data block holds.
#[derive(Clone, Debug, PartialEq)]
pub enum DataContents {
    /// Decoded struct elements, reshaped for the runtime schema.
    Structs(Vec<StructValue>),
    /// Bytes with no struct interpretation, in the file's byte order.
    Raw { bytes: Vec<u8>, endian: Endianness },
    /// A large raw block left in the source.
    Deferred { offset: u64, len: u64 },
}

/// A plain data block owned by one object.
#[derive(Clone, Debug, PartialEq)]
pub struct DataBlock {
    /// As-written address.
    pub address: u64,
    pub contents: DataContents,
}

impl DataBlock {
    pub fn structs(&self) -> Option<&[StructValue]> {
        match &self.contents {
            DataContents::Structs(values) => Some(values),
            _ => None,
        }
    }

    pub fn raw(&self) -> Option<&[u8]> {
        match &self.contents {
            DataContents::Raw { bytes, .. } => Some(bytes),
            _ => None,
        }
    }
}

/// A top-level (or embedded) object.
#[derive(Clone, Debug, PartialEq)]
pub struct Object {
    pub code: TypeCode,
    /// Name without the type prefix.
    pub name: String,
    pub session_uid: u32,
    /// Document the object was read from.
    pub origin: DocumentId,
    /// Strong references from other objects, recomputed after linking.
    pub users: u32,
    pub status: ObjectStatus,
    /// Placeholder that may be dropped if its library lacks the object.
    pub weak: bool,
    pub body: StructValue,
    pub data: Vec<DataBlock>,
    /// Sub-objects owned by this one (never shared).
    pub embedded: Vec<Object>,
    /// As-written address of the object block.
    pub address: u64,
}

impl Object {
    /// A stand-in for an object that lives in another document.
    pub fn placeholder(code: TypeCode, name: &str, origin: DocumentId, weak: bool) -> Self {
        Self {
            code,
            name: name.to_string(),
            session_uid: 0,
            origin,
            users: 0,
            status: ObjectStatus::Placeholder,
            weak,
            body: StructValue {
                name: Arc::from("ID"),
                fields: Vec::new(),
            },
            data: Vec::new(),
            embedded: Vec::new(),
            address: 0,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.status.is_placeholder()
    }

    /// Every link in the body, data blocks and embedded objects.
    pub fn for_each_link(&self, f: &mut dyn FnMut(&Link)) {
        self.body.for_each_link(f);
        for block in &self.data {
            if let DataContents::Structs(values) = &block.contents {
                values.iter().for_each(|v| v.for_each_link(f));
            }
        }
        for sub in &self.embedded {
            sub.for_each_link(f);
        }
    }

    /// Every link, mutably.
    pub fn for_each_link_mut(&mut self, f: &mut dyn FnMut(&mut Link)) {
        self.body.for_each_link_mut(f);
        for block in &mut self.data {
            if let DataContents::Structs(values) = &mut block.contents {
                values.iter_mut().for_each(|v| v.for_each_link_mut(f));
            }
        }
        for sub in &mut self.embedded {
            sub.for_each_link_mut(f);
        }
    }

    /// Rewrite stale pointers equal to `address` in this object (not its
    /// embedded objects).
    pub(crate) fn replace_stale(&mut self, address: u64, ptr: Pointer) -> usize {
        let mut count = 0;
        let mut rewrite = |link: &mut Link| {
            if link.ptr == Pointer::Stale(address) {
                link.ptr = ptr;
                count += 1;
            }
        };
        self.body.for_each_link_mut(&mut rewrite);
        for block in &mut self.data {
            if let DataContents::Structs(values) = &mut block.contents {
                values.iter_mut().for_each(|v| v.for_each_link_mut(&mut rewrite));
            }
        }
        count
    }
}
