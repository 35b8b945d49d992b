//! Turning block groups into objects.
//!
//! A [`Builder`] reads one document. Each group (a block plus the `DATA`
//! blocks after it) becomes at most one object: the payload is decoded with
//! the file's schema, reshaped for the runtime schema if the layouts differ,
//! data pointers are resolved to indices into the object's own data blocks,
//! and the object's as-written address is registered so that other objects'
//! pointers can be patched later.
//!
//! Object lifecycle, as traced: `Unread → Allocated → FieldsReconstructed →
//! PlaceholderIfExternal | NeedsExpansion → Linked`.

use std::sync::Arc;

use lig_reloc::{RelocMap, Tag};
use lig_schema::{
    decode_array, id, reconcile, split_id_name, Compat, Compatibility, DataIndex, IdHeader,
    IdLayout, MigrateContext, Pointer, Schema, StructValue, Value,
};
use lig_stream::{Block, BlockStream, Group, Payload};
use lig_types::{BlockCode, DocumentId, Endianness, Handle, ObjectStatus, PointerWidth, TypeCode};
use tracing::{debug, trace};

use crate::database::Forest;
use crate::error::{GraphError, GraphResult};
use crate::object::{DataBlock, DataContents, Object};
use crate::registry::TypeRegistry;
use crate::report::{LoadReport, ReportEntry};

/// What reading one group produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A top-level object (new, or read into an existing placeholder).
    Object(Handle),
    /// A sub-object attached to the object before it.
    Embedded { parent: Handle, index: usize },
    /// A library declaration.
    Library { owner: Handle, library: DocumentId },
    /// A link placeholder in the current library's database.
    Placeholder(Handle),
    /// The globals record.
    Globals,
    /// Nothing usable; any problem has been reported.
    Skipped,
}

/// Per-document reading state.
#[derive(Debug)]
pub struct Builder {
    registry: Arc<TypeRegistry>,
    doc: DocumentId,
    file: Arc<Schema>,
    compat: Compatibility,
    id_layout: Option<IdLayout>,
    address_width: PointerWidth,
    endian: Endianness,
    file_version: u32,
    data_map: RelocMap<DataIndex>,
    objects: RelocMap<Handle>,
    current_library: Option<DocumentId>,
    last_object: Option<Handle>,
}

impl Builder {
    pub fn new(
        registry: Arc<TypeRegistry>,
        doc: DocumentId,
        file: Arc<Schema>,
        address_width: PointerWidth,
    ) -> Self {
        let compat = Compatibility::compute(&file, registry.schema());
        Self {
            id_layout: IdLayout::from_schema(&file).ok(),
            endian: file.layout().endian,
            registry,
            doc,
            compat,
            file,
            address_width,
            file_version: 0,
            data_map: RelocMap::new(),
            objects: RelocMap::new(),
            current_library: None,
            last_object: None,
        }
    }

    /// A builder for the document behind `stream`.
    pub fn for_stream(registry: Arc<TypeRegistry>, doc: DocumentId, stream: &BlockStream) -> Self {
        Self::new(
            registry,
            doc,
            stream.schema().clone(),
            stream.options().address_width,
        )
    }

    pub fn document(&self) -> DocumentId {
        self.doc
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn file_schema(&self) -> &Arc<Schema> {
        &self.file
    }

    pub fn compatibility(&self) -> &Compatibility {
        &self.compat
    }

    /// As-written object addresses of this document.
    pub fn objects(&self) -> &RelocMap<Handle> {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut RelocMap<Handle> {
        &mut self.objects
    }

    pub fn into_objects(self) -> RelocMap<Handle> {
        self.objects
    }

    /// Register an object address by hand (reused incremental objects).
    pub fn register(&mut self, address: u64, handle: Handle, code: TypeCode) {
        self.objects.insert(address, handle, Tag::Type(code));
        self.last_object = Some(handle);
    }

    /// Take the file version from a globals record read earlier instead of
    /// decoding the `GLOB` block again.
    pub fn adopt_globals(&mut self, globals: &StructValue) {
        if let Some(version) = globals.get("version").and_then(Value::as_i64) {
            self.file_version = version as u32;
        }
    }

    /// Make `library` the database that following link placeholders live
    /// in, as if its declaration had just been read.
    pub fn enter_library(&mut self, library: DocumentId) {
        self.current_library = Some(library);
    }

    /// Identity fields of an object or placeholder block, without decoding.
    pub fn peek_id(&self, block: &Block) -> Option<IdHeader> {
        let layout = self.id_layout.as_ref()?;
        layout.peek(block.payload.bytes()?, self.address_width)
    }

    /// Read one group into `forest`.
    pub fn read_group(
        &mut self,
        group: &Group,
        forest: &mut Forest,
        report: &mut LoadReport,
    ) -> GraphResult<ReadOutcome> {
        let code = group.code();
        if code == BlockCode::GLOB {
            return self.read_globals(group, forest, report);
        }
        if code == BlockCode::LIBRARY {
            return self.read_library(group, forest, report);
        }
        if code == BlockCode::LINK_PLACEHOLDER {
            return self.read_placeholder(group, forest, report);
        }
        let Some(type_code) = code.type_code() else {
            trace!(code = %code, "skipping non-object group");
            return Ok(ReadOutcome::Skipped);
        };
        let Some(caps) = self.registry.get(type_code) else {
            report.push(ReportEntry::UnknownType {
                document: self.doc,
                code: type_code.to_string(),
                address: group.block.header.address,
            });
            return Ok(ReadOutcome::Skipped);
        };
        let embedded = caps.embedded;

        let Some(object) = self.decode_object(group, report) else {
            return Ok(ReadOutcome::Skipped);
        };

        if embedded {
            return Ok(self.attach_embedded(object, forest, report));
        }

        let existing = forest
            .database(self.doc)
            .ok_or(GraphError::UnknownDocument(self.doc))?
            .lookup(object.code, &object.name)
            .filter(|h| forest.get(*h).is_some_and(Object::is_placeholder));
        let handle = match existing {
            Some(placeholder) => {
                trace!(name = %object.name, "reading into existing placeholder");
                self.replace_placeholder(placeholder, object, forest);
                report.stats.placeholders_resolved += 1;
                placeholder
            }
            None => forest
                .insert(self.doc, object)
                .ok_or(GraphError::UnknownDocument(self.doc))?,
        };
        self.register(group.block.header.address, handle, type_code);
        let state = if self.doc.is_main() {
            "FieldsReconstructed"
        } else {
            "NeedsExpansion"
        };
        trace!(%handle, state, "object registered");
        Ok(ReadOutcome::Object(handle))
    }

    /// Read an object group into the slot of an existing placeholder.
    ///
    /// Returns `false` (leaving the placeholder alone) if the group could
    /// not be decoded.
    pub fn read_into(
        &mut self,
        group: &Group,
        forest: &mut Forest,
        target: Handle,
        report: &mut LoadReport,
    ) -> GraphResult<bool> {
        let Some(type_code) = group.code().type_code() else {
            return Ok(false);
        };
        if self.registry.get(type_code).is_none() {
            report.push(ReportEntry::UnknownType {
                document: self.doc,
                code: type_code.to_string(),
                address: group.block.header.address,
            });
            return Ok(false);
        }
        let Some(object) = self.decode_object(group, report) else {
            return Ok(false);
        };
        if !forest.arena.contains(target) {
            return Ok(false);
        }
        self.replace_placeholder(target, object, forest);
        self.register(group.block.header.address, target, type_code);
        report.stats.placeholders_resolved += 1;
        Ok(true)
    }

    /// Decode an object group without touching the forest.
    pub fn decode_object(&mut self, group: &Group, report: &mut LoadReport) -> Option<Object> {
        let block = &group.block;
        let address = block.header.address;
        let code = block.header.code.type_code()?;
        trace!(%code, address, state = "Unread", "object block");

        let Some(bytes) = block.payload.bytes() else {
            report.push(ReportEntry::UndecodableObject {
                document: self.doc,
                address,
                reason: "object payload is not resident".into(),
            });
            return None;
        };
        let body = match self.decode_values(block.header.struct_index, bytes, 1, report) {
            Ok(mut values) => values.pop()?,
            Err(entry) => {
                report.push(self.entry_for(entry, address));
                return None;
            }
        };
        trace!(%code, address, state = "Allocated", "object decoded");

        let mut data = Vec::with_capacity(group.data.len());
        for block in &group.data {
            let contents = match (&block.payload, block.header.is_raw()) {
                (Payload::Deferred { offset, len }, _) => {
                    report.stats.deferred_blocks += 1;
                    DataContents::Deferred {
                        offset: *offset,
                        len: *len,
                    }
                }
                (Payload::Resident(bytes), true) => DataContents::Raw {
                    bytes: bytes.clone(),
                    endian: self.endian,
                },
                (Payload::Resident(bytes), false) => {
                    let count = block.header.count.max(0) as usize;
                    match self.decode_values(block.header.struct_index, bytes, count, report) {
                        Ok(values) => DataContents::Structs(values),
                        Err(reason) => {
                            trace!(address = block.header.address, ?reason, "dropping undecodable data block");
                            report.stats.data_blocks_dropped += 1;
                            continue;
                        }
                    }
                }
            };
            self.data_map
                .insert(block.header.address, data.len(), Tag::Uses(0));
            data.push(DataBlock {
                address: block.header.address,
                contents,
            });
        }

        let raw_name = id::object_name(&body);
        let name = match split_id_name(&raw_name) {
            Some((prefix, bare)) if prefix == code => bare.to_string(),
            _ => raw_name.clone(),
        };
        let mut object = Object {
            code,
            name,
            session_uid: id::session_uid(&body),
            origin: self.doc,
            users: 0,
            status: ObjectStatus::Normal,
            weak: false,
            body,
            data,
            embedded: Vec::new(),
            address,
        };
        self.resolve_data(&mut object, report);
        report.stats.objects_read += 1;
        trace!(%code, name = %object.name, state = "FieldsReconstructed", "object built");
        Some(object)
    }

    // ---------------------------------------------------------------
    // Decoding
    // ---------------------------------------------------------------

    fn decode_values(
        &self,
        struct_index: i32,
        bytes: &[u8],
        count: usize,
        report: &mut LoadReport,
    ) -> Result<Vec<StructValue>, DecodeFailure> {
        let desc = self
            .file
            .checked_struct(struct_index as i64)
            .map_err(|e| DecodeFailure::Undecodable(e.to_string()))?;
        let index = struct_index as usize;
        let compat = self.compat.get(index).unwrap_or(Compat::RemovedType);
        if compat == Compat::RemovedType {
            return Err(DecodeFailure::Removed(desc.name.to_string()));
        }
        let mut values = decode_array(&self.file, index, bytes, count, self.address_width)
            .map_err(|e| DecodeFailure::Undecodable(e.to_string()))?;
        report.stats.decoded_structs += values.len();
        if compat == Compat::Identical {
            return Ok(values);
        }

        let runtime_index = self
            .compat
            .runtime_index(index)
            .ok_or_else(|| DecodeFailure::Removed(desc.name.to_string()))?;
        let ctx = MigrateContext {
            file_version: self.file_version,
            struct_name: desc.name.to_string(),
        };
        let migrate = self.registry.migration(&desc.name);
        for value in &mut values {
            if let Some(f) = migrate {
                f(value, &ctx);
            }
            *value = reconcile(value, self.registry.schema(), runtime_index);
        }
        report.stats.reconstructed += values.len();
        Ok(values)
    }

    fn entry_for(&self, failure: DecodeFailure, address: u64) -> ReportEntry {
        match failure {
            DecodeFailure::Removed(struct_name) => ReportEntry::RemovedType {
                document: self.doc,
                struct_name,
                address,
            },
            DecodeFailure::Undecodable(reason) => ReportEntry::UndecodableObject {
                document: self.doc,
                address,
                reason,
            },
        }
    }

    /// Point data pointers at data indices, then drop data blocks nothing
    /// points to. The data map only lives for one object.
    fn resolve_data(&mut self, object: &mut Object, report: &mut LoadReport) {
        let map = &mut self.data_map;
        object.for_each_link_mut(&mut |link| {
            if let Pointer::Stale(addr) = link.ptr {
                if let Some(index) = map.lookup(addr) {
                    link.ptr = Pointer::Data(index);
                }
            }
        });

        let unused = map.remove_unused();
        map.clear();
        if unused.is_empty() {
            return;
        }
        report.stats.data_blocks_dropped += unused.len();
        let mut dropped = vec![false; object.data.len()];
        for index in unused {
            if let Some(flag) = dropped.get_mut(index) {
                *flag = true;
            }
        }
        let mut remap: Vec<Option<DataIndex>> = Vec::with_capacity(object.data.len());
        let mut next = 0;
        for &gone in &dropped {
            if gone {
                remap.push(None);
            } else {
                remap.push(Some(next));
                next += 1;
            }
        }
        let mut i = 0;
        object.data.retain(|_| {
            let keep = remap[i].is_some();
            i += 1;
            keep
        });
        object.for_each_link_mut(&mut |link| {
            if let Pointer::Data(old) = link.ptr {
                link.ptr = remap
                    .get(old)
                    .copied()
                    .flatten()
                    .map_or(Pointer::Null, Pointer::Data);
            }
        });
    }

    // ---------------------------------------------------------------
    // Special blocks
    // ---------------------------------------------------------------

    fn read_globals(
        &mut self,
        group: &Group,
        forest: &mut Forest,
        report: &mut LoadReport,
    ) -> GraphResult<ReadOutcome> {
        let block = &group.block;
        let Some(bytes) = block.payload.bytes() else {
            return Ok(ReadOutcome::Skipped);
        };
        match self.decode_values(block.header.struct_index, bytes, 1, report) {
            Ok(mut values) => {
                let globals = values.pop();
                if let Some(version) = globals
                    .as_ref()
                    .and_then(|g| g.get("version"))
                    .and_then(Value::as_i64)
                {
                    self.file_version = version as u32;
                }
                debug!(document = %self.doc, version = self.file_version, "read globals");
                forest
                    .database_mut(self.doc)
                    .ok_or(GraphError::UnknownDocument(self.doc))?
                    .globals = globals;
                Ok(ReadOutcome::Globals)
            }
            Err(failure) => {
                trace!(?failure, "globals not decodable");
                Ok(ReadOutcome::Skipped)
            }
        }
    }

    fn read_library(
        &mut self,
        group: &Group,
        forest: &mut Forest,
        report: &mut LoadReport,
    ) -> GraphResult<ReadOutcome> {
        let Some(object) = self.decode_object(group, report) else {
            return Ok(ReadOutcome::Skipped);
        };
        let path = id::library_path(&object.body);
        let library = forest.library(&path);
        let owner = match forest
            .database(self.doc)
            .and_then(|db| db.lookup(TypeCode::LIBRARY, &object.name))
            .filter(|h| forest.database(library).and_then(|db| db.owner) == Some(*h))
        {
            Some(existing) => existing,
            None => forest
                .insert(self.doc, object)
                .ok_or(GraphError::UnknownDocument(self.doc))?,
        };
        if let Some(db) = forest.database_mut(library) {
            db.owner.get_or_insert(owner);
        }
        self.objects
            .insert(group.block.header.address, owner, Tag::Type(TypeCode::LIBRARY));
        self.current_library = Some(library);
        debug!(%library, path, "library declared");
        Ok(ReadOutcome::Library { owner, library })
    }

    fn read_placeholder(
        &mut self,
        group: &Group,
        forest: &mut Forest,
        report: &mut LoadReport,
    ) -> GraphResult<ReadOutcome> {
        let address = group.block.header.address;
        let doc = self.doc;
        let undecodable = |reason: &str| ReportEntry::UndecodableObject {
            document: doc,
            address,
            reason: reason.to_string(),
        };
        let Some(library) = self.current_library else {
            report.push(undecodable("link placeholder before any library"));
            return Ok(ReadOutcome::Skipped);
        };
        let Some(header) = self.peek_id(&group.block) else {
            report.push(undecodable("link placeholder without ID header"));
            return Ok(ReadOutcome::Skipped);
        };
        let Some((code, name)) = split_id_name(&header.name) else {
            report.push(undecodable("link placeholder name has no type prefix"));
            return Ok(ReadOutcome::Skipped);
        };
        let db = forest
            .database(library)
            .ok_or(GraphError::UnknownDocument(library))?;
        let handle = match db.lookup(code, name) {
            Some(existing) => {
                if let Some(object) = forest.get_mut(existing) {
                    object.weak &= header.is_weak_link();
                }
                existing
            }
            None => {
                let placeholder = Object::placeholder(code, name, library, header.is_weak_link());
                forest
                    .insert(library, placeholder)
                    .ok_or(GraphError::UnknownDocument(library))?
            }
        };
        self.objects.insert(address, handle, Tag::Type(code));
        trace!(%code, name, %library, state = "PlaceholderIfExternal", "link placeholder");
        Ok(ReadOutcome::Placeholder(handle))
    }

    fn attach_embedded(&mut self, object: Object, forest: &mut Forest, report: &mut LoadReport) -> ReadOutcome {
        let address = object.address;
        let Some(parent) = self.last_object.and_then(|h| forest.get_mut(h).map(|p| (h, p))) else {
            report.push(ReportEntry::UndecodableObject {
                document: self.doc,
                address,
                reason: "embedded object with no owner".into(),
            });
            return ReadOutcome::Skipped;
        };
        let (handle, owner) = parent;
        let index = owner.embedded.len();
        owner.embedded.push(object);
        owner.replace_stale(address, Pointer::Embedded(index));
        ReadOutcome::Embedded {
            parent: handle,
            index,
        }
    }

    fn replace_placeholder(&self, target: Handle, mut object: Object, forest: &mut Forest) {
        let Some(previous) = forest.get(target) else {
            return;
        };
        let (old_code, old_name, origin) = (previous.code, previous.name.clone(), previous.origin);
        object.origin = origin;
        object.status = ObjectStatus::Normal;
        let (code, name) = (object.code, object.name.clone());
        forest.arena.replace(target, object);
        if old_code != code || old_name != name {
            if let Some(db) = forest.database_mut(origin) {
                db.remove(old_code, &old_name, target);
                db.insert(code, &name, target);
            }
        }
    }
}

/// Why a payload could not be turned into values.
#[derive(Clone, Debug, PartialEq, Eq)]
enum DecodeFailure {
    Removed(String),
    Undecodable(String),
}
