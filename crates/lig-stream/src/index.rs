//! Random-access view of a whole document.
//!
//! Library documents are not read front to back: the linker asks for the
//! object at an address, or the object with a given type and name. The index
//! scans the document once and answers both.

use std::collections::HashMap;
use std::sync::Arc;

use lig_schema::{split_id_name, IdHeader, Schema};
use lig_types::{BlockCode, TypeCode};
use tracing::debug;

use crate::block::{FileHeader, Group};
use crate::error::StreamResult;
use crate::stream::BlockStream;

/// Position of a block inside the index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockRef {
    /// Group index.
    pub group: usize,
    /// `None` for the group's leading block, `Some(i)` for its i-th data block.
    pub data: Option<usize>,
}

/// Every group of a document with address and name lookups.
#[derive(Debug)]
pub struct BlockIndex {
    header: FileHeader,
    schema: Arc<Schema>,
    groups: Vec<Group>,
    ids: Vec<Option<IdHeader>>,
    by_address: HashMap<u64, BlockRef>,
    by_name: HashMap<(TypeCode, String), usize>,
}

impl BlockIndex {
    /// Read the rest of `stream` into an index.
    pub fn build(mut stream: BlockStream) -> StreamResult<Self> {
        let width = stream.options().address_width;
        let mut groups = Vec::new();
        let mut ids = Vec::new();
        let mut by_address = HashMap::new();
        let mut by_name = HashMap::new();

        while let Some(mut group) = stream.next_group()? {
            let g = groups.len();
            by_address.insert(group.block.header.address, BlockRef { group: g, data: None });
            for (i, block) in group.data.iter_mut().enumerate() {
                // A random-access index keeps everything resident.
                if block.payload.is_deferred() {
                    block.payload = crate::block::Payload::Resident(stream.materialize(&block.payload)?);
                }
                by_address
                    .entry(block.header.address)
                    .or_insert(BlockRef { group: g, data: Some(i) });
            }

            let code = group.code();
            let id = if code.is_object() {
                stream
                    .id_layout()
                    .zip(group.block.payload.bytes())
                    .and_then(|(layout, bytes)| layout.peek(bytes, width))
            } else {
                None
            };
            if let (Some(tc), Some(id)) = (code.type_code(), &id) {
                let bare = match split_id_name(&id.name) {
                    Some((prefix, bare)) if prefix == tc => bare.to_string(),
                    _ => id.name.clone(),
                };
                by_name.entry((tc, bare)).or_insert(g);
            }
            ids.push(id);
            groups.push(group);
        }

        debug!(
            groups = groups.len(),
            named = by_name.len(),
            "indexed document"
        );
        Ok(Self {
            header: stream.header(),
            schema: stream.schema().clone(),
            groups,
            ids,
            by_address,
            by_name,
        })
    }

    pub fn header(&self) -> FileHeader {
        self.header
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group(&self, index: usize) -> Option<&Group> {
        self.groups.get(index)
    }

    /// Peeked `ID` header of an object group.
    pub fn id(&self, index: usize) -> Option<&IdHeader> {
        self.ids.get(index).and_then(Option::as_ref)
    }

    /// Block registered at an as-written address.
    pub fn by_address(&self, address: u64) -> Option<BlockRef> {
        self.by_address.get(&address).copied()
    }

    /// Group of the real object block with the given type and bare name.
    pub fn by_name(&self, code: TypeCode, name: &str) -> Option<usize> {
        self.by_name.get(&(code, name.to_string())).copied()
    }

    /// Groups whose leading block has the given code.
    pub fn groups_with_code(&self, code: BlockCode) -> impl Iterator<Item = (usize, &Group)> {
        self.groups
            .iter()
            .enumerate()
            .filter(move |(_, g)| g.code() == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::ReadOptions;
    use crate::writer::DocumentWriter;
    use lig_schema::{make_id_name, Layout, SchemaBuilder, StructValue, Value};

    const ME: TypeCode = TypeCode::new(*b"ME");

    #[test]
    fn lookups_by_address_and_name() {
        let schema = SchemaBuilder::new(Layout::native())
            .with_core_types()
            .add_struct("Mesh", &[("ID", "id"), ("int", "totvert")])
            .build()
            .unwrap();
        let mut w = DocumentWriter::new(&schema);
        for (i, name) in ["Cube", "Sphere"].iter().enumerate() {
            let mut me = StructValue::zeroed(&schema, schema.struct_index("Mesh").unwrap());
            me.set_path("id.name", Value::chars(&make_id_name(ME, name), 64));
            w.write_object(ME, 0x100 * (i as u64 + 1), &me).unwrap();
            w.write_raw_data(0x1000 + i as u64, &[i as u8; 4]);
        }
        w.write_library(0x40, "lib", "//lib.lig").unwrap();
        w.write_link_placeholder(ME, 0x50, "Torus", false).unwrap();

        let stream = BlockStream::from_bytes(w.finish(), ReadOptions::default()).unwrap();
        let index = BlockIndex::build(stream).unwrap();
        assert_eq!(index.groups().len(), 4);

        assert_eq!(index.by_name(ME, "Sphere"), Some(1));
        assert_eq!(index.by_name(ME, "Torus"), None);
        assert_eq!(index.id(3).map(|id| id.name.as_str()), Some("METorus"));
        assert_eq!(
            index.by_address(0x1001),
            Some(BlockRef { group: 1, data: Some(0) })
        );
        assert_eq!(index.by_address(0x50), Some(BlockRef { group: 3, data: None }));
        assert_eq!(index.groups_with_code(BlockCode::LIBRARY).count(), 1);
    }
}
