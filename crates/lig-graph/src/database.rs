//! Document databases and the forest that owns every loaded object.
//!
//! # Invariants
//!
//! - `databases[0]` is the main document.
//! - Every handle listed in a database is live in the forest's arena.
//! - A handle appears in at most one database.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use lig_schema::StructValue;
use lig_types::{Arena, DocumentId, Handle, TypeCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::object::Object;

/// Whether a database holds the opened document or one it links to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatabaseKind {
    Main,
    Library,
}

/// Objects of one document, grouped per type in load order.
#[derive(Clone, Debug)]
pub struct Database {
    pub id: DocumentId,
    pub kind: DatabaseKind,
    /// Path as written in the referencing document (`//lib.lig`), or the
    /// opened path for the main document.
    pub path: String,
    /// Path the resolver found, once the document has been opened.
    pub resolved: Option<PathBuf>,
    /// The `LI` object that declared this library.
    pub owner: Option<Handle>,
    pub globals: Option<StructValue>,
    collections: BTreeMap<TypeCode, Vec<Handle>>,
    name_index: HashMap<(TypeCode, String), Handle>,
}

impl Database {
    pub fn new(id: DocumentId, kind: DatabaseKind, path: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            path: path.into(),
            resolved: None,
            owner: None,
            globals: None,
            collections: BTreeMap::new(),
            name_index: HashMap::new(),
        }
    }

    /// Append a handle to its type's collection and index its name.
    pub fn insert(&mut self, code: TypeCode, name: &str, handle: Handle) {
        self.collections.entry(code).or_default().push(handle);
        self.name_index
            .entry((code, name.to_string()))
            .or_insert(handle);
    }

    /// Remove a handle from its collection and the name index.
    pub fn remove(&mut self, code: TypeCode, name: &str, handle: Handle) -> bool {
        let key = (code, name.to_string());
        if self.name_index.get(&key) == Some(&handle) {
            self.name_index.remove(&key);
        }
        let Some(list) = self.collections.get_mut(&code) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| *h != handle);
        let removed = list.len() != before;
        if list.is_empty() {
            self.collections.remove(&code);
        }
        removed
    }

    /// Point the name index at `handle`, replacing any earlier entry.
    pub fn index_name(&mut self, code: TypeCode, name: &str, handle: Handle) {
        self.name_index.insert((code, name.to_string()), handle);
    }

    /// Handle of the object with this type and name.
    pub fn lookup(&self, code: TypeCode, name: &str) -> Option<Handle> {
        self.name_index.get(&(code, name.to_string())).copied()
    }

    /// Handles of one type, in load order.
    pub fn collection(&self, code: TypeCode) -> &[Handle] {
        self.collections.get(&code).map_or(&[], Vec::as_slice)
    }

    /// Type codes present, in code order.
    pub fn codes(&self) -> impl Iterator<Item = TypeCode> + '_ {
        self.collections.keys().copied()
    }

    /// Every handle, grouped by type code.
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.collections.values().flatten().copied()
    }

    pub fn len(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    fn take_collections(&mut self) -> BTreeMap<TypeCode, Vec<Handle>> {
        std::mem::take(&mut self.collections)
    }
}

/// Every loaded object plus the databases that list them.
#[derive(Clone, Debug)]
pub struct Forest {
    pub arena: Arena<Object>,
    databases: Vec<Database>,
}

impl Forest {
    /// A forest with an empty main database.
    pub fn new(main_path: impl Into<String>) -> Self {
        Self {
            arena: Arena::new(),
            databases: vec![Database::new(DocumentId::MAIN, DatabaseKind::Main, main_path)],
        }
    }

    pub fn main(&self) -> &Database {
        &self.databases[0]
    }

    pub fn main_mut(&mut self) -> &mut Database {
        &mut self.databases[0]
    }

    pub fn databases(&self) -> &[Database] {
        &self.databases
    }

    pub fn database(&self, id: DocumentId) -> Option<&Database> {
        self.databases.get(id.index())
    }

    pub fn database_mut(&mut self, id: DocumentId) -> Option<&mut Database> {
        self.databases.get_mut(id.index())
    }

    /// Library database for a path as written, created on first use.
    pub fn library(&mut self, path: &str) -> DocumentId {
        if let Some(db) = self
            .databases
            .iter()
            .find(|db| db.kind == DatabaseKind::Library && db.path == path)
        {
            return db.id;
        }
        let id = DocumentId(self.databases.len() as u32);
        debug!(%id, path, "new library database");
        self.databases.push(Database::new(id, DatabaseKind::Library, path));
        id
    }

    /// Library databases, in declaration order.
    pub fn libraries(&self) -> impl Iterator<Item = &Database> {
        self.databases.iter().filter(|db| db.kind == DatabaseKind::Library)
    }

    pub fn get(&self, handle: Handle) -> Option<&Object> {
        self.arena.get(handle)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Object> {
        self.arena.get_mut(handle)
    }

    /// Add an object to the arena and list it in database `db`.
    pub fn insert(&mut self, db: DocumentId, object: Object) -> Option<Handle> {
        let (code, name) = (object.code, object.name.clone());
        let database = self.databases.get_mut(db.index())?;
        let handle = self.arena.insert(object);
        database.insert(code, &name, handle);
        Some(handle)
    }

    /// Remove an object from the arena and from whichever database lists it.
    pub fn free(&mut self, handle: Handle) -> Option<Object> {
        let object = self.arena.remove(handle)?;
        for db in &mut self.databases {
            db.remove(object.code, &object.name, handle);
        }
        Some(object)
    }

    /// Find an object by type and name, main document first.
    pub fn lookup_object(&self, code: TypeCode, name: &str) -> Option<Handle> {
        self.databases.iter().find_map(|db| db.lookup(code, name))
    }

    /// Visit every object listed in database `db`.
    pub fn for_each_object(&self, db: DocumentId, mut f: impl FnMut(Handle, &Object)) {
        let Some(database) = self.database(db) else {
            return;
        };
        for handle in database.handles() {
            if let Some(object) = self.arena.get(handle) {
                f(handle, object);
            }
        }
    }

    /// Move every object listed in a database other than its origin into
    /// its origin's database.
    pub fn split(&mut self) -> usize {
        let mut moves = Vec::new();
        for db in &self.databases {
            for handle in db.handles() {
                if let Some(object) = self.arena.get(handle) {
                    if object.origin != db.id && self.databases.len() > object.origin.index() {
                        moves.push((db.id, object.origin, handle, object.code, object.name.clone()));
                    }
                }
            }
        }
        for (from, to, handle, code, name) in &moves {
            self.databases[from.index()].remove(*code, name, *handle);
            self.databases[to.index()].insert(*code, name, *handle);
        }
        debug!(moved = moves.len(), "split forest by origin");
        moves.len()
    }

    /// Append every library collection to the main database.
    ///
    /// Library databases stay (with their paths and name indexes) but list
    /// no objects afterwards.
    pub fn join(&mut self) {
        let mut moved = 0usize;
        for i in 1..self.databases.len() {
            let collections = self.databases[i].take_collections();
            for (code, handles) in collections {
                moved += handles.len();
                self.databases[0]
                    .collections
                    .entry(code)
                    .or_default()
                    .extend(handles);
            }
        }
        debug!(moved, "joined library objects into main database");
    }
}
