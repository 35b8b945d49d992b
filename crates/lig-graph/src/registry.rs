//! Runtime type table: which object kinds exist and what each can do.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use lig_schema::{Link, MigrateFn, Pointer, Schema};
use lig_types::TypeCode;

use crate::error::{GraphError, GraphResult};
use crate::object::{DataContents, Object};

/// One outgoing reference of an object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reference {
    /// Field the reference was found in.
    pub field: Arc<str>,
    pub ptr: Pointer,
    /// Type of the referenced object, from the field's declared pointee.
    pub target: TypeCode,
    /// Weak references do not keep their target alive.
    pub weak: bool,
}

/// Enumerates an object's references.
pub type VisitFn = fn(&TypeRegistry, &Object, &mut dyn FnMut(Reference));

/// Per-type fix-up run after every pointer is patched.
pub type LinkFn = fn(&mut Object);

/// What one object kind supports.
#[derive(Clone, Debug)]
pub struct Capabilities {
    /// Runtime struct the object block decodes to.
    pub struct_name: String,
    /// Migration applied to file-layout values before reconciliation.
    pub reconstruct: Option<MigrateFn>,
    /// Reference enumeration; the default walks every pointer to a
    /// registered type outside the `id` header.
    pub visit_references: Option<VisitFn>,
    pub link: Option<LinkFn>,
    /// Sub-object owned by the object block before it.
    pub embedded: bool,
    /// Fields whose references are weak.
    pub weak_fields: Vec<String>,
}

impl Capabilities {
    pub fn new(struct_name: impl Into<String>) -> Self {
        Self {
            struct_name: struct_name.into(),
            reconstruct: None,
            visit_references: None,
            link: None,
            embedded: false,
            weak_fields: Vec::new(),
        }
    }

    pub fn with_reconstruct(mut self, f: MigrateFn) -> Self {
        self.reconstruct = Some(f);
        self
    }

    pub fn with_visitor(mut self, f: VisitFn) -> Self {
        self.visit_references = Some(f);
        self
    }

    pub fn with_link(mut self, f: LinkFn) -> Self {
        self.link = Some(f);
        self
    }

    pub fn embedded(mut self) -> Self {
        self.embedded = true;
        self
    }

    pub fn with_weak_field(mut self, field: impl Into<String>) -> Self {
        self.weak_fields.push(field.into());
        self
    }
}

/// The runtime schema plus the capability table.
#[derive(Clone, Debug)]
pub struct TypeRegistry {
    schema: Arc<Schema>,
    capabilities: BTreeMap<TypeCode, Capabilities>,
    by_struct: HashMap<String, TypeCode>,
    migrations: HashMap<String, MigrateFn>,
}

impl TypeRegistry {
    /// A registry over `schema`. `LI` is registered when the schema has a
    /// `Library` struct.
    pub fn new(schema: Arc<Schema>) -> Self {
        let mut registry = Self {
            schema,
            capabilities: BTreeMap::new(),
            by_struct: HashMap::new(),
            migrations: HashMap::new(),
        };
        if registry.schema.struct_index("Library").is_some() {
            registry.by_struct.insert("Library".into(), TypeCode::LIBRARY);
            registry
                .capabilities
                .insert(TypeCode::LIBRARY, Capabilities::new("Library"));
        }
        registry
    }

    /// Register an object kind.
    pub fn register(&mut self, code: TypeCode, caps: Capabilities) -> GraphResult<()> {
        if self.schema.struct_index(&caps.struct_name).is_none() {
            return Err(GraphError::UnregisteredStruct {
                code,
                struct_name: caps.struct_name,
            });
        }
        if let Some(f) = caps.reconstruct {
            self.migrations.insert(caps.struct_name.clone(), f);
        }
        self.by_struct.insert(caps.struct_name.clone(), code);
        self.capabilities.insert(code, caps);
        Ok(())
    }

    /// Chaining form of [`register`](Self::register).
    pub fn with(mut self, code: TypeCode, caps: Capabilities) -> GraphResult<Self> {
        self.register(code, caps)?;
        Ok(self)
    }

    /// Register a migration for a struct that is not an object kind
    /// (elements of data blocks, nested structs).
    pub fn register_migration(&mut self, struct_name: impl Into<String>, f: MigrateFn) {
        self.migrations.insert(struct_name.into(), f);
    }

    /// A permissive registry for inspecting a document with no runtime of
    /// its own: the file schema doubles as the runtime schema and every
    /// `(code, struct)` pair seen in the document is registered.
    pub fn introspect(
        schema: Arc<Schema>,
        kinds: impl IntoIterator<Item = (TypeCode, String)>,
    ) -> Self {
        let mut registry = Self::new(schema);
        for (code, struct_name) in kinds {
            if registry.capabilities.contains_key(&code) {
                continue;
            }
            // Unknown struct names are skipped; the document reports them.
            let _ = registry.register(code, Capabilities::new(struct_name));
        }
        registry
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn get(&self, code: TypeCode) -> Option<&Capabilities> {
        self.capabilities.get(&code)
    }

    pub fn codes(&self) -> impl Iterator<Item = TypeCode> + '_ {
        self.capabilities.keys().copied()
    }

    /// Object kind whose block decodes to `struct_name`.
    pub fn code_for_struct(&self, struct_name: &str) -> Option<TypeCode> {
        self.by_struct.get(struct_name).copied()
    }

    pub fn migration(&self, struct_name: &str) -> Option<MigrateFn> {
        self.migrations.get(struct_name).copied()
    }

    /// Enumerate an object's references using its kind's visitor.
    pub fn visit_references(&self, object: &Object, f: &mut dyn FnMut(Reference)) {
        match self.get(object.code).and_then(|c| c.visit_references) {
            Some(visit) => visit(self, object, f),
            None => default_visitor(self, object, f),
        }
    }

    /// References of an object collected into a vector.
    pub fn references(&self, object: &Object) -> Vec<Reference> {
        let mut refs = Vec::new();
        self.visit_references(object, &mut |r| refs.push(r));
        refs
    }
}

/// Every pointer to a registered object kind, in the body (outside `id`),
/// in struct data blocks, and in embedded objects.
pub fn default_visitor(registry: &TypeRegistry, object: &Object, f: &mut dyn FnMut(Reference)) {
    let weak_fields = registry
        .get(object.code)
        .map(|c| c.weak_fields.as_slice())
        .unwrap_or_default();
    let mut emit = |field: &Arc<str>, link: &Link| {
        if let Some(target) = registry.code_for_struct(&link.target) {
            if !link.ptr.is_null() {
                f(Reference {
                    field: field.clone(),
                    ptr: link.ptr,
                    target,
                    weak: weak_fields.iter().any(|w| **w == **field),
                });
            }
        }
    };
    for field in &object.body.fields {
        if &*field.name == "id" {
            continue;
        }
        field.value.for_each_link(&mut |link| emit(&field.name, link));
    }
    for block in &object.data {
        if let DataContents::Structs(values) = &block.contents {
            for value in values {
                for field in &value.fields {
                    field.value.for_each_link(&mut |link| emit(&field.name, link));
                }
            }
        }
    }
    for sub in &object.embedded {
        registry.visit_references(sub, &mut |r| f(r));
    }
}
