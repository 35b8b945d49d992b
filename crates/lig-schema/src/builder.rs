//! Declaring a schema in code.
//!
//! The running program describes its own record layouts with a
//! [`SchemaBuilder`]; the result is the runtime schema that file schemas are
//! compared against.

use std::collections::HashMap;

use crate::desc::{parse_declarator, FieldKind, Layout, Primitive, RawStruct, Schema};
use crate::error::{SchemaError, SchemaResult};

/// Size of the `ID.name` character array.
pub const ID_NAME_LEN: usize = 64;
/// Size of the `Library.filepath` character array.
pub const LIBRARY_PATH_LEN: usize = 1024;

/// Incremental schema construction.
///
/// Structs must be added after every struct they embed by value. Pointer
/// targets may be declared later (or never; they stay opaque).
#[derive(Clone, Debug)]
pub struct SchemaBuilder {
    layout: Layout,
    names: Vec<String>,
    name_index: HashMap<String, u16>,
    types: Vec<(String, usize)>,
    type_index: HashMap<String, u16>,
    structs: Vec<RawStruct>,
    error: Option<SchemaError>,
}

impl SchemaBuilder {
    /// Start a schema with all primitive types registered.
    pub fn new(layout: Layout) -> Self {
        let mut builder = Self {
            layout,
            names: Vec::new(),
            name_index: HashMap::new(),
            types: Vec::new(),
            type_index: HashMap::new(),
            structs: Vec::new(),
            error: None,
        };
        for (name, prim) in Primitive::all() {
            builder.intern_type(name, prim.size());
        }
        builder
    }

    /// Add the `ID` header and `Library` structs every document uses.
    ///
    /// ```text
    /// struct ID      { char name[64]; Library *lib; int us; short flag; short pad; uint session_uid; }
    /// struct Library { ID id; char filepath[1024]; }
    /// ```
    pub fn with_core_types(self) -> Self {
        let name = format!("name[{ID_NAME_LEN}]");
        let path = format!("filepath[{LIBRARY_PATH_LEN}]");
        self.add_struct(
            "ID",
            &[
                ("char", name.as_str()),
                ("Library", "*lib"),
                ("int", "us"),
                ("short", "flag"),
                ("short", "pad"),
                ("uint", "session_uid"),
            ],
        )
        .add_struct("Library", &[("ID", "id"), ("char", path.as_str())])
    }

    /// Declare a struct from `(type, declarator)` pairs.
    pub fn add_struct(mut self, name: &str, fields: &[(&str, &str)]) -> Self {
        if self.error.is_some() {
            return self;
        }
        if let Err(e) = self.try_add_struct(name, fields) {
            self.error = Some(e);
        }
        self
    }

    fn try_add_struct(&mut self, name: &str, fields: &[(&str, &str)]) -> SchemaResult<()> {
        if Primitive::from_name(name).is_some() {
            return Err(SchemaError::Malformed(format!(
                "cannot redeclare primitive {name}"
            )));
        }
        let struct_type = self.intern_type(name, 0);
        if self
            .structs
            .iter()
            .any(|s| s.type_index == struct_type)
        {
            return Err(SchemaError::Malformed(format!("struct {name} declared twice")));
        }

        let mut size = 0usize;
        let mut raw_fields = Vec::with_capacity(fields.len());
        for &(ty, decl) in fields {
            let (_, kind, count) = parse_declarator(decl)?;
            let t = self.intern_type(ty, 0);
            let element = match kind {
                FieldKind::Pointer | FieldKind::FunctionPointer => self.layout.pointer.bytes(),
                FieldKind::Value => {
                    let declared = self
                        .structs
                        .iter()
                        .any(|s| s.type_index == t)
                        || Primitive::from_name(ty).is_some_and(|p| p != Primitive::Void);
                    if !declared {
                        return Err(SchemaError::UnknownType {
                            struct_name: name.to_string(),
                            type_name: ty.to_string(),
                        });
                    }
                    self.types[t as usize].1
                }
            };
            size = element
                .checked_mul(count)
                .and_then(|n| size.checked_add(n))
                .ok_or_else(|| SchemaError::Malformed(format!("struct {name} is too large")))?;
            let n = self.intern_name(decl);
            raw_fields.push((t, n));
        }
        self.types[struct_type as usize].1 = size;
        self.structs.push(RawStruct {
            type_index: struct_type,
            fields: raw_fields,
        });
        Ok(())
    }

    /// Finish and validate.
    pub fn build(self) -> SchemaResult<Schema> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Schema::from_parts(self.layout, self.names, self.types, self.structs)
    }

    fn intern_type(&mut self, name: &str, size: usize) -> u16 {
        if let Some(&i) = self.type_index.get(name) {
            return i;
        }
        let i = self.types.len() as u16;
        self.types.push((name.to_string(), size));
        self.type_index.insert(name.to_string(), i);
        i
    }

    fn intern_name(&mut self, decl: &str) -> u16 {
        if let Some(&i) = self.name_index.get(decl) {
            return i;
        }
        let i = self.names.len() as u16;
        self.names.push(decl.to_string());
        self.name_index.insert(decl.to_string(), i);
        i
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lig_types::{Endianness, PointerWidth};

    #[test]
    fn core_types_layout() {
        let schema = SchemaBuilder::new(Layout::new(PointerWidth::Eight, Endianness::Little))
            .with_core_types()
            .build()
            .unwrap();
        let id = schema.struct_named("ID").unwrap();
        assert_eq!(id.field("name").unwrap().offset, 0);
        assert_eq!(id.field("lib").unwrap().offset, ID_NAME_LEN);
        assert_eq!(id.field("session_uid").unwrap().offset, ID_NAME_LEN + 8 + 4 + 2 + 2);
        assert_eq!(id.size, ID_NAME_LEN + 8 + 4 + 2 + 2 + 4);

        let lib = schema.struct_named("Library").unwrap();
        assert_eq!(lib.size, id.size + LIBRARY_PATH_LEN);
    }

    #[test]
    fn value_field_of_undeclared_struct_fails() {
        let err = SchemaBuilder::new(Layout::native())
            .add_struct("Mesh", &[("Vertex", "verts[4]")])
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownType { .. }));
    }

    #[test]
    fn cloned_builder_keeps_its_error() {
        let failed = SchemaBuilder::new(Layout::native()).add_struct("Mesh", &[("Vertex", "verts")]);
        let copy = failed.clone();
        assert!(matches!(failed.build(), Err(SchemaError::UnknownType { .. })));
        assert!(matches!(copy.build(), Err(SchemaError::UnknownType { .. })));

        let base = SchemaBuilder::new(Layout::native()).add_struct("Vec3", &[("float", "co[3]")]);
        let a = base.clone().add_struct("A", &[("Vec3", "v")]).build().unwrap();
        let b = base.build().unwrap();
        assert!(a.struct_named("A").is_some());
        assert!(b.struct_named("A").is_none());
    }

    #[test]
    fn pointer_to_undeclared_struct_is_opaque() {
        let schema = SchemaBuilder::new(Layout::native())
            .add_struct("Mesh", &[("Vertex", "*verts"), ("int", "totvert")])
            .build()
            .unwrap();
        let mesh = schema.struct_named("Mesh").unwrap();
        assert!(mesh.field("verts").unwrap().is_pointer());
        assert!(schema.struct_named("Vertex").is_none());
    }

    #[test]
    fn duplicate_struct_fails() {
        let err = SchemaBuilder::new(Layout::native())
            .add_struct("A", &[("int", "x")])
            .add_struct("A", &[("int", "y")])
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::Malformed(_)));
    }
}
