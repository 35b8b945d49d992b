//! Reshaping values decoded with an older or newer layout into the runtime
//! layout.
//!
//! Fields are matched by name. Matching scalars are cast, arrays are
//! truncated or zero-extended, nested structs are reconciled recursively and
//! fields the runtime added are zero filled. A field whose kind changed
//! (scalar to struct, pointer to value) is zeroed.

use crate::desc::{FieldDesc, FieldKind, Primitive, Schema};
use crate::value::{Field, Link, Pointer, StructValue, Value};

/// What a migrate callback knows about the value it is fixing up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrateContext {
    /// Version recorded in the document's globals (0 if absent).
    pub file_version: u32,
    /// Struct name as written in the file.
    pub struct_name: String,
}

/// Per-type hook run on a file-layout value before reconciliation.
pub type MigrateFn = fn(&mut StructValue, &MigrateContext);

/// Rebuild `value` with the runtime struct at `runtime_index`.
pub fn reconcile(value: &StructValue, runtime: &Schema, runtime_index: usize) -> StructValue {
    let desc = &runtime.structs()[runtime_index];
    let fields = desc
        .fields
        .iter()
        .map(|field| Field {
            name: field.name.clone(),
            value: match value.get(&field.name) {
                Some(old) => convert_field(old, runtime, field),
                None => Value::zero_for(runtime, field),
            },
        })
        .collect();
    StructValue {
        name: desc.name.clone(),
        fields,
    }
}

fn convert_field(old: &Value, runtime: &Schema, field: &FieldDesc) -> Value {
    let is_char = matches!(
        Primitive::from_name(&field.type_name),
        Some(Primitive::Char | Primitive::UChar)
    );

    if field.kind == FieldKind::Value && is_char && field.array_len > 1 {
        let mut bytes = match old {
            Value::Chars(bytes) => bytes.clone(),
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_i64().unwrap_or(0) as u8)
                .collect(),
            scalar => match scalar.as_i64() {
                Some(v) => vec![v as u8],
                None => return Value::zero_for(runtime, field),
            },
        };
        bytes.resize(field.array_len, 0);
        return Value::Chars(bytes);
    }

    let elements: Vec<Value> = match old {
        Value::Array(items) => items.clone(),
        Value::Chars(bytes) if is_char => bytes.iter().map(|&b| Value::Char(b)).collect(),
        Value::Chars(bytes) => bytes.iter().map(|&b| Value::UChar(b)).collect(),
        other => vec![other.clone()],
    };

    if field.array_len > 1 {
        let mut items: Vec<Value> = elements
            .iter()
            .take(field.array_len)
            .map(|v| convert_element(v, runtime, field))
            .collect();
        items.resize(field.array_len, Value::zero_element(runtime, field));
        return Value::Array(items);
    }

    match elements.first() {
        Some(first) => convert_element(first, runtime, field),
        None => Value::zero_element(runtime, field),
    }
}

fn convert_element(old: &Value, runtime: &Schema, field: &FieldDesc) -> Value {
    match field.kind {
        FieldKind::Pointer => match old {
            Value::Ptr(link) => Value::Ptr(Link::new(field.type_name.clone(), link.ptr)),
            _ => Value::zero_element(runtime, field),
        },
        FieldKind::FunctionPointer => {
            Value::Ptr(Link::new(field.type_name.clone(), Pointer::Null))
        }
        FieldKind::Value => match Primitive::from_name(&field.type_name) {
            Some(prim) => old
                .cast(prim)
                .unwrap_or_else(|| Value::zero_primitive(prim)),
            None => match (old, runtime.struct_for_type(field.type_index)) {
                (Value::Struct(inner), Some(index)) => {
                    Value::Struct(reconcile(inner, runtime, index))
                }
                _ => Value::zero_element(runtime, field),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SchemaBuilder;
    use crate::codec::{decode_struct, encode_struct};
    use crate::desc::Layout;

    fn runtime() -> Schema {
        SchemaBuilder::new(Layout::native())
            .with_core_types()
            .add_struct("Vec3", &[("float", "co[3]")])
            .add_struct(
                "Thing",
                &[
                    ("ID", "id"),
                    ("Vec3", "loc"),
                    ("double", "size"),
                    ("int", "layers[4]"),
                    ("char", "label[8]"),
                    ("Thing", "*parent"),
                    ("int", "added"),
                ],
            )
            .build()
            .unwrap()
    }

    fn old_file() -> Schema {
        SchemaBuilder::new(Layout::native())
            .with_core_types()
            .add_struct("Vec3", &[("float", "co[2]")])
            .add_struct(
                "Thing",
                &[
                    ("ID", "id"),
                    ("float", "size"),
                    ("Vec3", "loc"),
                    ("short", "layers[6]"),
                    ("char", "label[4]"),
                    ("Thing", "*parent"),
                    ("int", "dropped"),
                ],
            )
            .build()
            .unwrap()
    }

    #[test]
    fn skewed_fields_are_reshaped() {
        let file = old_file();
        let rt = runtime();
        let fi = file.struct_index("Thing").unwrap();

        let mut old = StructValue::zeroed(&file, fi);
        old.set("size", Value::Float(2.5));
        old.set_path("loc.co", Value::Array(vec![Value::Float(1.0), Value::Float(2.0)]));
        old.set("layers", Value::Array((1..=6).map(Value::Short).collect()));
        old.set("label", Value::chars("abc", 4));
        old.set("parent", Value::Ptr(Link::new("Thing", Pointer::Stale(0x80))));
        old.set("dropped", Value::Int(77));

        let bytes = encode_struct(&file, fi, &old).unwrap();
        let decoded = decode_struct(&file, fi, &bytes, file.layout().pointer).unwrap();
        let new = reconcile(&decoded, &rt, rt.struct_index("Thing").unwrap());

        assert_eq!(new.get("size"), Some(&Value::Double(2.5)));
        assert_eq!(
            new.path("loc.co"),
            Some(&Value::Array(vec![Value::Float(1.0), Value::Float(2.0), Value::Float(0.0)]))
        );
        assert_eq!(
            new.get("layers"),
            Some(&Value::Array((1..=4).map(Value::Int).collect()))
        );
        assert_eq!(new.get("label").and_then(Value::as_str).as_deref(), Some("abc"));
        assert_eq!(new.get("label"), Some(&Value::Chars(b"abc\0\0\0\0\0".to_vec())));
        assert_eq!(
            new.get("parent").and_then(Value::as_link).map(|l| l.ptr),
            Some(Pointer::Stale(0x80))
        );
        assert_eq!(new.get("added"), Some(&Value::Int(0)));
        assert!(new.get("dropped").is_none());

        // The result encodes cleanly with the runtime layout.
        encode_struct(&rt, rt.struct_index("Thing").unwrap(), &new).unwrap();
    }

    proptest::proptest! {
        #[test]
        fn arrays_keep_their_prefix(values in proptest::collection::vec(-1000i32..1000, 1..12)) {
            let rt = runtime();
            let ti = rt.struct_index("Thing").unwrap();
            let mut old = StructValue::zeroed(&rt, ti);
            old.set("layers", Value::Array(values.iter().copied().map(Value::Int).collect()));
            let new = reconcile(&old, &rt, ti);
            let layers = new.get("layers").and_then(Value::as_array).unwrap();
            proptest::prop_assert_eq!(layers.len(), 4);
            for (i, v) in layers.iter().enumerate() {
                let expected = values.get(i).copied().unwrap_or(0);
                proptest::prop_assert_eq!(v, &Value::Int(expected));
            }
        }
    }

    #[test]
    fn kind_change_zeroes_field() {
        let rt = runtime();
        let ti = rt.struct_index("Thing").unwrap();
        let mut old = StructValue::zeroed(&rt, ti);
        old.set("loc", Value::Int(5));
        old.set("parent", Value::Float(1.0));
        let new = reconcile(&old, &rt, ti);
        assert_eq!(new.get("loc"), StructValue::zeroed(&rt, ti).get("loc"));
        assert!(new.get("parent").and_then(Value::as_link).unwrap().ptr.is_null());
    }
}
