//! Pointer patching once every document has been read.
//!
//! Each object's stale pointers are looked up in the address map of the
//! document the object came from. Pointers that resolve become handles;
//! the rest become null. Then each kind's link hook runs, and user counts
//! are recomputed from the strong references that remain.

use std::collections::{HashMap, HashSet};

use lig_reloc::{RelocMap, Tag};
use lig_schema::Pointer;
use lig_types::{DocumentId, Handle};
use tracing::{debug, trace};

use crate::database::Forest;
use crate::registry::TypeRegistry;
use crate::report::{LoadReport, ReportEntry};

/// Address maps of every document read so far.
#[derive(Clone, Debug, Default)]
pub struct ObjectMaps {
    maps: HashMap<DocumentId, RelocMap<Handle>>,
}

impl ObjectMaps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the map of one document, replacing any previous one.
    pub fn insert(&mut self, doc: DocumentId, map: RelocMap<Handle>) {
        self.maps.insert(doc, map);
    }

    pub fn get(&self, doc: DocumentId) -> Option<&RelocMap<Handle>> {
        self.maps.get(&doc)
    }

    pub fn get_mut(&mut self, doc: DocumentId) -> Option<&mut RelocMap<Handle>> {
        self.maps.get_mut(&doc)
    }

    /// Map of `doc`, created empty on first use.
    pub fn entry(&mut self, doc: DocumentId) -> &mut RelocMap<Handle> {
        self.maps.entry(doc).or_default()
    }

    /// Point every entry that resolves to `old`, in every document, at `new`.
    pub fn retarget(&mut self, old: Handle, new: Handle) -> usize {
        self.maps.values_mut().map(|m| m.retarget(&old, new)).sum()
    }

    pub fn documents(&self) -> impl Iterator<Item = DocumentId> + '_ {
        self.maps.keys().copied()
    }
}

/// Patch pointers, run link hooks, recount users.
pub fn link_forest(
    forest: &mut Forest,
    maps: &mut ObjectMaps,
    registry: &TypeRegistry,
    report: &mut LoadReport,
) {
    let patched = relink(forest, maps, registry, report);
    run_link_hooks(forest, registry);
    recount_users(forest, registry);
    debug!(patched, objects = forest.arena.len(), state = "Linked", "forest linked");
}

/// Replace stale and dangling pointers. Returns the number of pointers
/// that now refer to a live object.
pub fn relink(
    forest: &mut Forest,
    maps: &mut ObjectMaps,
    registry: &TypeRegistry,
    report: &mut LoadReport,
) -> usize {
    let live: HashSet<Handle> = forest.arena.handles().into_iter().collect();
    let mut patched = 0;
    let mut mismatches = Vec::new();

    for handle in forest.arena.handles() {
        let Some(object) = forest.arena.get_mut(handle) else {
            continue;
        };
        let origin = object.origin;
        let mut map = maps.get_mut(origin);
        object.for_each_link_mut(&mut |link| match link.ptr {
            Pointer::Stale(address) => {
                let Some(map) = map.as_deref_mut() else {
                    link.ptr = Pointer::Null;
                    return;
                };
                let want = registry.code_for_struct(&link.target);
                let found = map.get(address).map(|e| (e.live, e.tag));
                link.ptr = match found {
                    Some((target, Tag::Type(code))) if want.is_some_and(|w| w != code) => {
                        mismatches.push(ReportEntry::TypeMismatch {
                            document: origin,
                            address,
                            expected: link.target.to_string(),
                            found: code.to_string(),
                        });
                        trace!(%target, "pointer type mismatch");
                        Pointer::Null
                    }
                    Some(_) => match map.lookup_typed(address, want) {
                        Some(target) if live.contains(&target) => {
                            patched += 1;
                            Pointer::Object(target)
                        }
                        _ => Pointer::Null,
                    },
                    None => Pointer::Null,
                };
            }
            Pointer::Object(target) if !live.contains(&target) => link.ptr = Pointer::Null,
            Pointer::Object(_) => patched += 1,
            _ => {}
        });
    }

    for entry in mismatches {
        report.push(entry);
    }
    patched
}

/// Run every registered kind's link hook over its objects.
pub fn run_link_hooks(forest: &mut Forest, registry: &TypeRegistry) {
    for handle in forest.arena.handles() {
        let Some(object) = forest.arena.get_mut(handle) else {
            continue;
        };
        if object.is_placeholder() {
            continue;
        }
        if let Some(hook) = registry.get(object.code).and_then(|c| c.link) {
            hook(object);
        }
    }
}

/// Recompute every object's user count from strong references.
pub fn recount_users(forest: &mut Forest, registry: &TypeRegistry) {
    let mut counts: HashMap<Handle, u32> = HashMap::new();
    for (_, object) in forest.arena.iter() {
        registry.visit_references(object, &mut |r| {
            if let (Pointer::Object(target), false) = (r.ptr, r.weak) {
                *counts.entry(target).or_default() += 1;
            }
        });
    }
    for handle in forest.arena.handles() {
        if let Some(object) = forest.arena.get_mut(handle) {
            object.users = counts.get(&handle).copied().unwrap_or(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use lig_schema::{Layout, Link, SchemaBuilder, StructValue, Value};
    use lig_types::{ObjectStatus, TypeCode};

    use crate::object::Object;
    use crate::registry::Capabilities;

    const OB: TypeCode = TypeCode::new(*b"OB");
    const MA: TypeCode = TypeCode::new(*b"MA");

    fn registry() -> TypeRegistry {
        let schema = SchemaBuilder::new(Layout::native())
            .with_core_types()
            .add_struct("Material", &[("ID", "id"), ("int", "linked")])
            .add_struct(
                "Object",
                &[("ID", "id"), ("Object", "*parent"), ("Material", "*mat"), ("Object", "*track")],
            )
            .build()
            .unwrap();
        fn mark(ob: &mut Object) {
            ob.body.set("linked", Value::Int(1));
        }
        TypeRegistry::new(Arc::new(schema))
            .with(OB, Capabilities::new("Object").with_weak_field("track"))
            .unwrap()
            .with(MA, Capabilities::new("Material").with_link(mark))
            .unwrap()
    }

    fn object(registry: &TypeRegistry, code: TypeCode, struct_name: &str, name: &str) -> Object {
        let schema = registry.schema();
        let mut ob = Object::placeholder(code, name, DocumentId::MAIN, false);
        ob.status = ObjectStatus::Normal;
        ob.body = StructValue::zeroed(schema, schema.struct_index(struct_name).unwrap());
        ob
    }

    fn ptr(target: &str, address: u64) -> Value {
        Value::Ptr(Link::new(target, Pointer::Stale(address)))
    }

    fn field(forest: &Forest, handle: Handle, name: &str) -> Pointer {
        forest.get(handle).unwrap().body.get(name).and_then(Value::as_link).unwrap().ptr
    }

    #[test]
    fn patches_pointers_and_counts_users() {
        let registry = registry();
        let mut forest = Forest::new("main.lig");
        let mut a = object(&registry, OB, "Object", "A");
        a.body.set("parent", ptr("Object", 0x200));
        a.body.set("mat", ptr("Material", 0x300));
        a.body.set("track", ptr("Object", 0x200));
        let mut b = object(&registry, OB, "Object", "B");
        b.body.set("parent", ptr("Object", 0x200));
        b.body.set("mat", ptr("Material", 0x999));
        let a = forest.insert(DocumentId::MAIN, a).unwrap();
        let b = forest.insert(DocumentId::MAIN, b).unwrap();
        let m = forest
            .insert(DocumentId::MAIN, object(&registry, MA, "Material", "M"))
            .unwrap();

        let mut maps = ObjectMaps::new();
        let map = maps.entry(DocumentId::MAIN);
        map.insert(0x100, a, Tag::Type(OB));
        map.insert(0x200, b, Tag::Type(OB));
        map.insert(0x300, m, Tag::Type(MA));

        let mut report = LoadReport::new();
        link_forest(&mut forest, &mut maps, &registry, &mut report);
        assert!(report.is_clean());

        assert_eq!(field(&forest, a, "parent"), Pointer::Object(b));
        assert_eq!(field(&forest, a, "mat"), Pointer::Object(m));
        assert_eq!(field(&forest, b, "parent"), Pointer::Object(b));
        assert_eq!(field(&forest, b, "mat"), Pointer::Null);

        // a.parent and b.parent are strong; a.track is weak.
        assert_eq!(forest.get(b).unwrap().users, 2);
        assert_eq!(forest.get(m).unwrap().users, 1);
        assert_eq!(forest.get(a).unwrap().users, 0);
        assert_eq!(forest.get(m).unwrap().body.get("linked"), Some(&Value::Int(1)));
    }

    #[test]
    fn type_mismatch_and_dead_handles_become_null() {
        let registry = registry();
        let mut forest = Forest::new("main.lig");
        let mut a = object(&registry, OB, "Object", "A");
        a.body.set("mat", ptr("Material", 0x100));
        let a = forest.insert(DocumentId::MAIN, a).unwrap();
        let gone = forest.insert(DocumentId::MAIN, object(&registry, OB, "Object", "Gone")).unwrap();
        forest
            .get_mut(a)
            .unwrap()
            .body
            .set("parent", Value::Ptr(Link::new("Object", Pointer::Object(gone))));
        forest.free(gone);

        let mut maps = ObjectMaps::new();
        maps.entry(DocumentId::MAIN).insert(0x100, a, Tag::Type(OB));
        let mut report = LoadReport::new();
        link_forest(&mut forest, &mut maps, &registry, &mut report);

        assert_eq!(report.count("type_mismatch"), 1);
        assert_eq!(field(&forest, a, "mat"), Pointer::Null);
        assert_eq!(field(&forest, a, "parent"), Pointer::Null);
    }

    #[test]
    fn retarget_spans_documents() {
        let mut forest = Forest::new("main.lig");
        let a = forest
            .insert(DocumentId::MAIN, Object::placeholder(OB, "A", DocumentId::MAIN, false))
            .unwrap();
        let b = forest
            .insert(DocumentId::MAIN, Object::placeholder(OB, "B", DocumentId::MAIN, false))
            .unwrap();
        let mut maps = ObjectMaps::new();
        maps.entry(DocumentId::MAIN).insert(0x10, a, Tag::Type(OB));
        maps.entry(DocumentId(1)).insert(0x20, a, Tag::Type(OB));
        assert_eq!(maps.retarget(a, b), 2);
        assert_eq!(maps.get(DocumentId(1)).unwrap().get(0x20).unwrap().live, b);
    }
}
