//! Shared schema and values for the session tests.

use std::sync::Arc;

use lig_graph::{Capabilities, TypeRegistry};
use lig_schema::{make_id_name, Layout, Link, Pointer, Schema, SchemaBuilder, StructValue, Value, ID_NAME_LEN};
use lig_types::TypeCode;

pub const OB: TypeCode = TypeCode::new(*b"OB");
pub const MA: TypeCode = TypeCode::new(*b"MA");
pub const SC: TypeCode = TypeCode::new(*b"SC");
pub const NT: TypeCode = TypeCode::new(*b"NT");

pub fn schema() -> Schema {
    SchemaBuilder::new(Layout::native())
        .with_core_types()
        .add_struct("Vec3", &[("float", "co[3]")])
        .add_struct("Material", &[("ID", "id"), ("float", "alpha")])
        .add_struct("Tree", &[("ID", "id"), ("int", "nodes")])
        .add_struct(
            "Object",
            &[
                ("ID", "id"),
                ("Object", "*parent"),
                ("Material", "*mat"),
                ("Vec3", "*verts"),
                ("Tree", "*tree"),
                ("int", "flag"),
            ],
        )
        .add_struct("Scene", &[("ID", "id"), ("int", "frame")])
        .add_struct("Globals", &[("int", "version"), ("Scene", "*scene")])
        .build()
        .unwrap()
}

pub fn registry() -> Arc<TypeRegistry> {
    Arc::new(
        TypeRegistry::new(Arc::new(schema()))
            .with(OB, Capabilities::new("Object"))
            .unwrap()
            .with(MA, Capabilities::new("Material"))
            .unwrap()
            .with(SC, Capabilities::new("Scene"))
            .unwrap()
            .with(NT, Capabilities::new("Tree").embedded())
            .unwrap(),
    )
}

fn named(schema: &Schema, struct_name: &str, code: TypeCode, name: &str) -> StructValue {
    let mut value = StructValue::zeroed(schema, schema.struct_index(struct_name).unwrap());
    value.set_path("id.name", Value::chars(&make_id_name(code, name), ID_NAME_LEN));
    value
}

pub fn object(schema: &Schema, name: &str, flag: i32) -> StructValue {
    let mut ob = named(schema, "Object", OB, name);
    ob.set("flag", Value::Int(flag));
    ob
}

/// An object carrying an identity that survives between snapshots.
pub fn object_with_uid(schema: &Schema, name: &str, flag: i32, uid: u32) -> StructValue {
    let mut ob = object(schema, name, flag);
    ob.set_path("id.session_uid", Value::UInt(uid));
    ob
}

pub fn material(schema: &Schema, name: &str, alpha: f32) -> StructValue {
    let mut ma = named(schema, "Material", MA, name);
    ma.set("alpha", Value::Float(alpha));
    ma
}

pub fn tree(schema: &Schema, nodes: i32) -> StructValue {
    let mut nt = named(schema, "Tree", NT, "Tree");
    nt.set("nodes", Value::Int(nodes));
    nt
}

pub fn vec3(schema: &Schema, x: f32) -> StructValue {
    let mut v = StructValue::zeroed(schema, schema.struct_index("Vec3").unwrap());
    v.set("co", Value::Array(vec![Value::Float(x); 3]));
    v
}

pub fn globals(schema: &Schema, version: i32) -> StructValue {
    let mut g = StructValue::zeroed(schema, schema.struct_index("Globals").unwrap());
    g.set("version", Value::Int(version));
    g
}

pub fn ptr(target: &str, address: u64) -> Value {
    Value::Ptr(Link::new(target, Pointer::Stale(address)))
}
