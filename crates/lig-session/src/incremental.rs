//! Re-reading a snapshot on top of the forest an earlier snapshot produced.
//!
//! Objects are matched to their previous counterpart by type code and
//! session uid. A group whose bytes sit in chunks flagged identical is not
//! decoded at all; the previous object is kept as is. A changed group is
//! decoded into the previous object's handle so references held elsewhere
//! stay valid. Previous main-document objects that no longer appear are
//! freed. Library databases carry over unchanged.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use lig_graph::{Builder, DataContents, Forest, LoadReport, Object, ReadOutcome, TypeRegistry};
use lig_stream::{Group, MemFile, Payload};
use lig_types::{BlockCode, DocumentId, Handle, ObjectStatus, TypeCode};
use tracing::{debug, info, trace};

use crate::config::LoadConfig;
use crate::error::LoadResult;
use crate::session::{DocumentSource, LoadSession, Loaded};

/// Read `memfile` against the forest of the previous snapshot.
///
/// Libraries are resolved relative to the previous main document's path.
pub fn read_incremental(
    memfile: Arc<MemFile>,
    previous: Forest,
    registry: Arc<TypeRegistry>,
    config: LoadConfig,
) -> LoadResult<Loaded> {
    let name = PathBuf::from(&previous.main().path);
    LoadSession::open_document(DocumentSource::memfile(name, memfile), registry, config)?
        .load_incremental(previous)
}

/// Previous owner whose embedded objects are being walked.
struct EmbeddedRun {
    owner: Handle,
    next: usize,
}

/// Bookkeeping for one incremental read.
struct Reuse {
    /// Previous main objects by identity.
    by_identity: HashMap<(TypeCode, u32), Handle>,
    previous: Vec<Handle>,
    seen: HashSet<Handle>,
    created: Vec<Handle>,
    globals: Option<lig_schema::StructValue>,
    run: Option<EmbeddedRun>,
}

impl Reuse {
    fn new(forest: &Forest) -> Self {
        let mut by_identity = HashMap::new();
        let mut previous = Vec::new();
        forest.for_each_object(DocumentId::MAIN, |handle, object| {
            if !object.origin.is_main() {
                return;
            }
            previous.push(handle);
            if object.session_uid != 0 && !object.is_placeholder() {
                by_identity.insert((object.code, object.session_uid), handle);
            }
        });
        Self {
            by_identity,
            previous,
            seen: HashSet::new(),
            created: Vec::new(),
            globals: forest.main().globals.clone(),
            run: None,
        }
    }

    /// Previous counterpart of an object group, if it has not been taken.
    fn counterpart(&self, builder: &Builder, group: &Group, code: TypeCode) -> Option<Handle> {
        let uid = builder.peek_id(&group.block)?.session_uid;
        if uid == 0 {
            return None;
        }
        self.by_identity
            .get(&(code, uid))
            .copied()
            .filter(|h| !self.seen.contains(h))
    }

    /// Drop embedded objects past the last one the snapshot still has.
    fn close_run(&mut self, forest: &mut Forest) {
        if let Some(run) = self.run.take() {
            if let Some(owner) = forest.get_mut(run.owner) {
                owner.embedded.truncate(run.next);
            }
        }
    }
}

impl LoadSession {
    /// Read this snapshot reusing what `previous` already holds.
    ///
    /// Objects taken over unchanged get [`ObjectStatus::ReusedFromPrevious`],
    /// objects with no counterpart [`ObjectStatus::NewlyCreated`]; changed
    /// objects keep their handle and become `Normal`.
    pub fn load_incremental(mut self, previous: Forest) -> LoadResult<Loaded> {
        let mut forest = previous;
        let mut report = LoadReport::new();
        report.stats.documents_opened = 1;
        let mut builder =
            Builder::for_stream(self.registry.clone(), DocumentId::MAIN, &self.stream);
        let mut reuse = Reuse::new(&forest);
        debug!(
            previous = reuse.previous.len(),
            identities = reuse.by_identity.len(),
            "incremental read started"
        );

        while let Some(group) = self.stream.next_group()? {
            let identical = self
                .stream
                .range_identical(group.start(), group.end() - group.start());
            let code = group.code();

            if code == BlockCode::GLOB {
                reuse.close_run(&mut forest);
                match (&reuse.globals, identical) {
                    (Some(globals), true) => builder.adopt_globals(globals),
                    _ => {
                        builder.read_group(&group, &mut forest, &mut report)?;
                    }
                }
                continue;
            }
            if code == BlockCode::LIBRARY {
                reuse.close_run(&mut forest);
                read_library(&group, identical, &mut builder, &mut forest, &mut reuse, &mut report)?;
                continue;
            }

            let Some(type_code) = code.type_code() else {
                builder.read_group(&group, &mut forest, &mut report)?;
                continue;
            };
            let embedded = self
                .registry
                .get(type_code)
                .is_some_and(|caps| caps.embedded);
            if embedded && reuse.run.is_some() {
                read_embedded(&group, identical, &mut builder, &mut forest, &mut reuse, &mut report);
                continue;
            }
            reuse.close_run(&mut forest);

            match reuse.counterpart(&builder, &group, type_code) {
                Some(previous) if identical => {
                    if let Some(object) = forest.get_mut(previous) {
                        object.status = ObjectStatus::ReusedFromPrevious;
                        rebase_deferred(object, &group);
                    }
                    builder.register(group.block.header.address, previous, type_code);
                    reuse.seen.insert(previous);
                    reuse.run = Some(EmbeddedRun {
                        owner: previous,
                        next: 0,
                    });
                    report.stats.reused += 1;
                    trace!(%previous, code = %type_code, "reused unchanged object");
                }
                Some(previous) => {
                    reuse.seen.insert(previous);
                    let Some(fresh) = builder.decode_object(&group, &mut report) else {
                        continue;
                    };
                    swap_into(&mut forest, previous, fresh);
                    builder.register(group.block.header.address, previous, type_code);
                    report.stats.swapped += 1;
                    trace!(%previous, code = %type_code, "re-read changed object");
                }
                None => {
                    if let ReadOutcome::Object(handle) =
                        builder.read_group(&group, &mut forest, &mut report)?
                    {
                        if let Some(object) = forest.get_mut(handle) {
                            object.status = ObjectStatus::NewlyCreated;
                        }
                        reuse.seen.insert(handle);
                        reuse.created.push(handle);
                        report.stats.created += 1;
                    }
                }
            }
        }
        reuse.close_run(&mut forest);

        for handle in &reuse.previous {
            if !reuse.seen.contains(handle) && forest.free(*handle).is_some() {
                report.stats.freed += 1;
            }
        }
        // A created object may share its name with one just freed.
        for handle in &reuse.created {
            if let Some(object) = forest.get(*handle) {
                let (code, name) = (object.code, object.name.clone());
                if forest.main().lookup(code, &name).is_none() {
                    forest.main_mut().index_name(code, &name, *handle);
                }
            }
        }

        info!(
            reused = report.stats.reused,
            swapped = report.stats.swapped,
            created = report.stats.created,
            freed = report.stats.freed,
            "incremental read finished"
        );
        self.finish(forest, builder, report)
    }
}

/// Library declaration; an unchanged one re-enters its previous database.
fn read_library(
    group: &Group,
    identical: bool,
    builder: &mut Builder,
    forest: &mut Forest,
    reuse: &mut Reuse,
    report: &mut LoadReport,
) -> LoadResult<()> {
    let previous = reuse
        .counterpart(builder, group, TypeCode::LIBRARY)
        .filter(|_| identical);
    let library = previous.and_then(|owner| {
        forest
            .libraries()
            .find(|db| db.owner == Some(owner))
            .map(|db| (owner, db.id))
    });
    match library {
        Some((owner, library)) => {
            builder.register(group.block.header.address, owner, TypeCode::LIBRARY);
            builder.enter_library(library);
            if let Some(object) = forest.get_mut(owner) {
                object.status = ObjectStatus::ReusedFromPrevious;
            }
            reuse.seen.insert(owner);
            report.stats.reused += 1;
        }
        None => {
            if let ReadOutcome::Library { owner, .. } = builder.read_group(group, forest, report)? {
                reuse.seen.insert(owner);
            }
        }
    }
    Ok(())
}

/// Embedded group following a reused owner.
fn read_embedded(
    group: &Group,
    identical: bool,
    builder: &mut Builder,
    forest: &mut Forest,
    reuse: &mut Reuse,
    report: &mut LoadReport,
) {
    let Some(run) = reuse.run.as_mut() else {
        return;
    };
    let index = run.next;
    let have = forest.get(run.owner).map_or(0, |o| o.embedded.len());
    if identical && index < have {
        run.next += 1;
        return;
    }
    let Some(object) = builder.decode_object(group, report) else {
        return;
    };
    let Some(owner) = forest.get_mut(run.owner) else {
        return;
    };
    if index < owner.embedded.len() {
        owner.embedded[index] = object;
    } else {
        owner.embedded.push(object);
    }
    run.next += 1;
    trace!(owner = %run.owner, index, "re-read embedded object");
}

/// Point deferred data of a reused object at its position in this snapshot.
///
/// Identical chunks may sit at different offsets once earlier chunks change
/// length.
fn rebase_deferred(object: &mut Object, group: &Group) {
    for data in &mut object.data {
        let DataContents::Deferred { offset, .. } = &mut data.contents else {
            continue;
        };
        let moved = group
            .data
            .iter()
            .find(|block| block.header.address == data.address)
            .map(|block| &block.payload);
        if let Some(Payload::Deferred { offset: now, .. }) = moved {
            *offset = *now;
        }
    }
}

/// Put `fresh` into the slot of `previous`, keeping the name index right.
///
/// The fresh object goes into a new slot first; the slots are then swapped
/// and the new slot, now holding the stale content, is released.
fn swap_into(forest: &mut Forest, previous: Handle, mut fresh: Object) {
    fresh.origin = DocumentId::MAIN;
    fresh.status = ObjectStatus::Normal;
    let (code, name) = (fresh.code, fresh.name.clone());
    let slot = forest.arena.insert(fresh);
    if !forest.arena.swap(previous, slot) {
        forest.arena.remove(slot);
        return;
    }
    let Some(old) = forest.arena.remove(slot) else {
        return;
    };
    if old.code != code || old.name != name {
        let main = forest.main_mut();
        main.remove(old.code, &old.name, previous);
        main.insert(code, &name, previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use lig_link::MemoryResolver;
    use lig_schema::{Pointer, Value};
    use lig_stream::DocumentWriter;

    fn snapshot(
        build: impl FnOnce(&mut DocumentWriter, &lig_schema::Schema),
        previous: Option<&MemFile>,
    ) -> Arc<MemFile> {
        let s = schema();
        let mut w = DocumentWriter::new(&s);
        w.write_globals(&globals(&s, 3)).unwrap();
        build(&mut w, &s);
        Arc::new(w.finish_memfile(previous))
    }

    fn first_load(file: Arc<MemFile>) -> Loaded {
        LoadSession::open_document(DocumentSource::memfile("mem/scene.lig", file), registry(), LoadConfig::default())
            .unwrap()
            .load()
            .unwrap()
    }

    fn cube_and_steel(w: &mut DocumentWriter, s: &lig_schema::Schema) {
        let mut cube = object_with_uid(s, "Cube", 1, 1);
        cube.set("mat", ptr("Material", 0x200));
        cube.set("verts", ptr("Vec3", 0x110));
        w.write_object(OB, 0x100, &cube).unwrap();
        w.write_data(0x110, &[vec3(s, 1.0), vec3(s, 2.0)]).unwrap();
        let mut steel = material(s, "Steel", 0.5);
        steel.set_path("id.session_uid", Value::UInt(2));
        w.write_object(MA, 0x200, &steel).unwrap();
    }

    #[test]
    fn unchanged_snapshot_decodes_nothing() {
        let first = snapshot(cube_and_steel, None);
        let loaded = first_load(first.clone());
        let cube = loaded.handle(OB, "Cube").unwrap();
        let steel = loaded.handle(MA, "Steel").unwrap();

        let second = snapshot(cube_and_steel, Some(first.as_ref()));
        assert_eq!(second.identical_ratio(), 1.0);
        let again = read_incremental(second, loaded.forest, registry(), LoadConfig::default()).unwrap();

        let stats = &again.report.stats;
        assert_eq!(stats.decoded_structs, 0);
        assert_eq!(stats.reused, 2);
        assert_eq!((stats.swapped, stats.created, stats.freed), (0, 0, 0));
        assert_eq!(again.handle(OB, "Cube"), Some(cube));
        assert_eq!(again.handle(MA, "Steel"), Some(steel));
        let cube_object = again.forest.get(cube).unwrap();
        assert_eq!(cube_object.status, ObjectStatus::ReusedFromPrevious);
        assert_eq!(
            cube_object.body.get("mat").and_then(Value::as_link).unwrap().ptr,
            Pointer::Object(steel)
        );
        assert_eq!(again.forest.get(steel).unwrap().users, 1);
        assert_eq!(again.forest.main().globals.as_ref().unwrap().get("version"), Some(&Value::Int(3)));
    }

    #[test]
    fn changed_removed_and_new_objects() {
        let first = snapshot(cube_and_steel, None);
        let loaded = first_load(first.clone());
        let cube = loaded.handle(OB, "Cube").unwrap();
        let steel = loaded.handle(MA, "Steel").unwrap();

        let second = snapshot(
            |w, s| {
                let mut cube = object_with_uid(s, "Cube", 42, 1);
                cube.set("mat", ptr("Material", 0x200));
                w.write_object(OB, 0x100, &cube).unwrap();
                let mut scene = lig_schema::StructValue::zeroed(s, s.struct_index("Scene").unwrap());
                scene.set_path("id.name", Value::chars("SCMain", lig_schema::ID_NAME_LEN));
                scene.set_path("id.session_uid", Value::UInt(5));
                w.write_object(SC, 0x300, &scene).unwrap();
            },
            Some(first.as_ref()),
        );
        let again = read_incremental(second, loaded.forest, registry(), LoadConfig::default()).unwrap();

        let stats = &again.report.stats;
        assert_eq!((stats.swapped, stats.created, stats.freed), (1, 1, 1));
        assert_eq!(again.handle(OB, "Cube"), Some(cube));
        let cube_object = again.forest.get(cube).unwrap();
        assert_eq!(cube_object.status, ObjectStatus::Normal);
        assert_eq!(cube_object.body.get("flag"), Some(&Value::Int(42)));
        assert!(cube_object.data.is_empty());
        assert_eq!(
            cube_object.body.get("mat").and_then(Value::as_link).unwrap().ptr,
            Pointer::Null
        );
        assert!(again.forest.get(steel).is_none());
        assert!(again.handle(MA, "Steel").is_none());
        assert_eq!(again.lookup_object(SC, "Main").unwrap().status, ObjectStatus::NewlyCreated);
    }

    #[test]
    fn embedded_objects_follow_their_owner() {
        let with_tree = |nodes: i32| {
            move |w: &mut DocumentWriter, s: &lig_schema::Schema| {
                let mut cube = object_with_uid(s, "Cube", 1, 1);
                cube.set("tree", ptr("Tree", 0x150));
                w.write_object(OB, 0x100, &cube).unwrap();
                w.write_object(NT, 0x150, &tree(s, nodes)).unwrap();
            }
        };
        let first = snapshot(with_tree(3), None);
        let loaded = first_load(first.clone());
        let cube = loaded.handle(OB, "Cube").unwrap();

        let second = snapshot(with_tree(4), Some(first.as_ref()));
        let again = read_incremental(second, loaded.forest, registry(), LoadConfig::default()).unwrap();

        assert_eq!(again.report.stats.reused, 1);
        assert_eq!(again.report.stats.decoded_structs, 1);
        let cube_object = again.forest.get(cube).unwrap();
        assert_eq!(cube_object.embedded.len(), 1);
        assert_eq!(cube_object.embedded[0].body.get("nodes"), Some(&Value::Int(4)));
        assert_eq!(
            cube_object.body.get("tree").and_then(Value::as_link).unwrap().ptr,
            Pointer::Embedded(0)
        );
    }

    #[test]
    fn deferred_data_of_reused_objects_moves_with_its_chunk() {
        let payload: Vec<u8> = (0..2048u32).map(|i| (i % 13) as u8).collect();
        let scene = |lamp_bytes: usize| {
            let payload = payload.clone();
            move |w: &mut DocumentWriter, s: &lig_schema::Schema| {
                let mut lamp = object_with_uid(s, "Lamp", 0, 1);
                lamp.set("verts", ptr("Vec3", 0x110));
                w.write_object(OB, 0x100, &lamp).unwrap();
                w.write_raw_data(0x110, &vec![7u8; lamp_bytes]);
                let mut cube = object_with_uid(s, "Cube", 0, 2);
                cube.set("verts", ptr("Vec3", 0x210));
                w.write_object(OB, 0x200, &cube).unwrap();
                w.write_raw_data(0x210, &payload);
            }
        };
        let config = LoadConfig {
            defer_threshold: Some(1024),
            ..Default::default()
        };
        let first = snapshot(scene(16), None);
        let loaded = LoadSession::open_document(
            DocumentSource::memfile("mem/scene.lig", first.clone()),
            registry(),
            config.clone(),
        )
        .unwrap()
        .load()
        .unwrap();
        let cube = loaded.handle(OB, "Cube").unwrap();
        let DataContents::Deferred { offset: before, .. } = loaded.forest.get(cube).unwrap().data[0].contents
        else {
            panic!("cube data should be deferred");
        };

        // The lamp's data grows, so the unchanged cube chunk starts later.
        let second = snapshot(scene(48), Some(first.as_ref()));
        let again = read_incremental(second, loaded.forest, registry(), config).unwrap();
        let cube_object = again.forest.get(cube).unwrap();
        assert_eq!(cube_object.status, ObjectStatus::ReusedFromPrevious);
        let block = &cube_object.data[0];
        let DataContents::Deferred { offset: after, .. } = block.contents else {
            panic!("cube data should stay deferred");
        };
        assert_eq!(after, before + 32);
        assert_eq!(again.materialize(block).unwrap(), payload);
    }

    #[test]
    fn libraries_carry_over_without_reopening() {
        let s = schema();
        let mut lib = DocumentWriter::new(&s);
        lib.write_object(MA, 0x500, &material(&s, "Gold", 1.0)).unwrap();
        let resolver = MemoryResolver::new().with("mem/mat.lig", lib.finish());

        let scene = |w: &mut DocumentWriter, s: &lig_schema::Schema| {
            w.write_library(0x10, "mat", "//mat.lig").unwrap();
            w.write_link_placeholder(MA, 0x11, "Gold", false).unwrap();
            let mut ring = object_with_uid(s, "Ring", 0, 9);
            ring.set("mat", ptr("Material", 0x11));
            w.write_object(OB, 0x100, &ring).unwrap();
        };
        let first = snapshot(scene, None);
        let loaded = LoadSession::open_document(
            DocumentSource::memfile("mem/scene.lig", first.clone()),
            registry(),
            LoadConfig::default(),
        )
        .unwrap()
        .with_resolver(resolver)
        .load()
        .unwrap();
        let gold = loaded.handle(MA, "Gold").unwrap();

        // No documents to open: a second open would be reported.
        let second = snapshot(scene, Some(first.as_ref()));
        let again = LoadSession::open_document(
            DocumentSource::memfile("mem/scene.lig", second),
            registry(),
            LoadConfig::default(),
        )
        .unwrap()
        .with_resolver(MemoryResolver::new())
        .load_incremental(loaded.forest)
        .unwrap();

        assert!(again.report.is_clean(), "{:?}", again.report.entries);
        assert_eq!(again.report.stats.documents_opened, 1);
        assert_eq!(again.handle(MA, "Gold"), Some(gold));
        let ring = again.lookup_object(OB, "Ring").unwrap();
        assert_eq!(ring.status, ObjectStatus::ReusedFromPrevious);
        assert_eq!(ring.body.get("mat").and_then(Value::as_link).unwrap().ptr, Pointer::Object(gold));
        assert_eq!(again.forest.get(gold).unwrap().users, 1);
    }
}
