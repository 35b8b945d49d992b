//! Decoded record values.
//!
//! Records are held as self-describing value trees instead of raw memory
//! images. Pointer fields become [`Link`]s whose [`Pointer`] starts out as
//! the address the writer saw and is rewritten to an arena handle or a data
//! block index once the target is known.

use std::sync::Arc;

use lig_types::Handle;
use serde::{Deserialize, Serialize};

use crate::desc::{FieldDesc, FieldKind, Primitive, Schema};

/// Index of a plain data block inside its owning object.
pub type DataIndex = usize;

/// Where a pointer field points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pointer {
    #[default]
    Null,
    /// Address as written; not yet relocated.
    Stale(u64),
    /// A plain data block owned by the same object.
    Data(DataIndex),
    /// An embedded sub-object owned by the same object.
    Embedded(usize),
    /// A top-level object.
    Object(Handle),
}

impl Pointer {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Stale address, if not yet relocated.
    pub fn stale(&self) -> Option<u64> {
        match self {
            Self::Stale(addr) => Some(*addr),
            _ => None,
        }
    }

    /// Target handle, if this points at a top-level object.
    pub fn handle(&self) -> Option<Handle> {
        match self {
            Self::Object(h) => Some(*h),
            _ => None,
        }
    }
}

/// A pointer field value: the declared pointee type and the pointer itself.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Link {
    /// Declared pointee type name (`Material` for `Material *mat`).
    pub target: Arc<str>,
    pub ptr: Pointer,
}

impl Link {
    pub fn new(target: impl Into<Arc<str>>, ptr: Pointer) -> Self {
        Self {
            target: target.into(),
            ptr,
        }
    }
}

/// A decoded field value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Char(u8),
    UChar(u8),
    Short(i16),
    UShort(u16),
    Int(i32),
    UInt(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    /// Character array (strings, fixed-size names).
    Chars(Vec<u8>),
    Array(Vec<Value>),
    Struct(StructValue),
    Ptr(Link),
}

impl Value {
    /// Zero value of a primitive.
    pub fn zero_primitive(prim: Primitive) -> Value {
        match prim {
            Primitive::Char => Value::Char(0),
            Primitive::UChar => Value::UChar(0),
            Primitive::Short => Value::Short(0),
            Primitive::UShort => Value::UShort(0),
            Primitive::Int => Value::Int(0),
            Primitive::UInt => Value::UInt(0),
            Primitive::Int64 => Value::Int64(0),
            Primitive::UInt64 => Value::UInt64(0),
            Primitive::Float => Value::Float(0.0),
            Primitive::Double => Value::Double(0.0),
            Primitive::Void => Value::UChar(0),
        }
    }

    /// Zero value of one element of a field.
    pub fn zero_element(schema: &Schema, field: &FieldDesc) -> Value {
        match field.kind {
            FieldKind::Pointer | FieldKind::FunctionPointer => {
                Value::Ptr(Link::new(field.type_name.clone(), Pointer::Null))
            }
            FieldKind::Value => match Primitive::from_name(&field.type_name) {
                Some(prim) => Value::zero_primitive(prim),
                None => match schema.struct_for_type(field.type_index) {
                    Some(index) => Value::Struct(StructValue::zeroed(schema, index)),
                    None => Value::UChar(0),
                },
            },
        }
    }

    /// Zero value of a whole field (array fields zero every element).
    pub fn zero_for(schema: &Schema, field: &FieldDesc) -> Value {
        let is_char = matches!(
            Primitive::from_name(&field.type_name),
            Some(Primitive::Char | Primitive::UChar)
        );
        if field.kind == FieldKind::Value && is_char && field.array_len > 1 {
            return Value::Chars(vec![0; field.array_len]);
        }
        if field.array_len > 1 {
            let element = Value::zero_element(schema, field);
            return Value::Array(vec![element; field.array_len]);
        }
        Value::zero_element(schema, field)
    }

    /// Numeric view as `i64` (floats are truncated).
    pub fn as_i64(&self) -> Option<i64> {
        Some(match *self {
            Value::Char(v) | Value::UChar(v) => v as i64,
            Value::Short(v) => v as i64,
            Value::UShort(v) => v as i64,
            Value::Int(v) => v as i64,
            Value::UInt(v) => v as i64,
            Value::Int64(v) => v,
            Value::UInt64(v) => v as i64,
            Value::Float(v) => v as i64,
            Value::Double(v) => v as i64,
            _ => return None,
        })
    }

    /// Numeric view as `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        Some(match *self {
            Value::Float(v) => v as f64,
            Value::Double(v) => v,
            _ => self.as_i64()? as f64,
        })
    }

    /// Character array up to the first NUL.
    pub fn as_str(&self) -> Option<String> {
        match self {
            Value::Chars(bytes) => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
            _ => None,
        }
    }

    pub fn as_link(&self) -> Option<&Link> {
        match self {
            Value::Ptr(link) => Some(link),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Fixed-length character array holding `s` (truncated, NUL padded).
    pub fn chars(s: &str, len: usize) -> Value {
        let mut bytes = vec![0u8; len];
        let n = s.len().min(len.saturating_sub(1));
        bytes[..n].copy_from_slice(&s.as_bytes()[..n]);
        Value::Chars(bytes)
    }

    /// Cast a scalar to the given primitive, C style.
    pub fn cast(&self, prim: Primitive) -> Option<Value> {
        if let (Value::Float(_) | Value::Double(_), Primitive::Float | Primitive::Double) =
            (self, prim)
        {
            let f = self.as_f64()?;
            return Some(match prim {
                Primitive::Float => Value::Float(f as f32),
                _ => Value::Double(f),
            });
        }
        let is_float = matches!(self, Value::Float(_) | Value::Double(_));
        let f = self.as_f64()?;
        let i = self.as_i64()?;
        Some(match prim {
            Primitive::Char => Value::Char(i as u8),
            Primitive::UChar | Primitive::Void => Value::UChar(i as u8),
            Primitive::Short => Value::Short(i as i16),
            Primitive::UShort => Value::UShort(i as u16),
            Primitive::Int => Value::Int(i as i32),
            Primitive::UInt => Value::UInt(i as u32),
            Primitive::Int64 => Value::Int64(i),
            Primitive::UInt64 => Value::UInt64(if is_float { f as u64 } else { i as u64 }),
            Primitive::Float => Value::Float(f as f32),
            Primitive::Double => Value::Double(f),
        })
    }

    /// Visit every link in this value, depth first.
    pub fn for_each_link(&self, f: &mut dyn FnMut(&Link)) {
        match self {
            Value::Ptr(link) => f(link),
            Value::Array(items) => items.iter().for_each(|v| v.for_each_link(f)),
            Value::Struct(s) => s.for_each_link(f),
            _ => {}
        }
    }

    /// Visit every link in this value mutably, depth first.
    pub fn for_each_link_mut(&mut self, f: &mut dyn FnMut(&mut Link)) {
        match self {
            Value::Ptr(link) => f(link),
            Value::Array(items) => items.iter_mut().for_each(|v| v.for_each_link_mut(f)),
            Value::Struct(s) => s.for_each_link_mut(f),
            _ => {}
        }
    }
}

/// One named field of a struct value.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub name: Arc<str>,
    pub value: Value,
}

/// A decoded struct instance.
#[derive(Clone, Debug, PartialEq)]
pub struct StructValue {
    /// Struct type name.
    pub name: Arc<str>,
    pub fields: Vec<Field>,
}

impl StructValue {
    /// An instance with every field zeroed.
    pub fn zeroed(schema: &Schema, struct_index: usize) -> StructValue {
        let desc = &schema.structs()[struct_index];
        StructValue {
            name: desc.name.clone(),
            fields: desc
                .fields
                .iter()
                .map(|f| Field {
                    name: f.name.clone(),
                    value: Value::zero_for(schema, f),
                })
                .collect(),
        }
    }

    /// Field value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|f| &*f.name == name)
            .map(|f| &f.value)
    }

    /// Mutable field value by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|f| &*f.name == name)
            .map(|f| &mut f.value)
    }

    /// Field value by dotted path through nested structs (`id.name`).
    pub fn path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut value = self.get(parts.next()?)?;
        for part in parts {
            value = value.as_struct()?.get(part)?;
        }
        Some(value)
    }

    /// Mutable field value by dotted path.
    pub fn path_mut(&mut self, path: &str) -> Option<&mut Value> {
        let mut parts = path.split('.');
        let mut value = self.get_mut(parts.next()?)?;
        for part in parts {
            value = match value {
                Value::Struct(s) => s.get_mut(part)?,
                _ => return None,
            };
        }
        Some(value)
    }

    /// Replace a field's value. Returns `false` if there is no such field.
    pub fn set(&mut self, name: &str, value: Value) -> bool {
        match self.get_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Replace a value by dotted path. Returns `false` if the path is absent.
    pub fn set_path(&mut self, path: &str, value: Value) -> bool {
        match self.path_mut(path) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Rename a field in place (used by migrate callbacks).
    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        match self.fields.iter_mut().find(|f| &*f.name == from) {
            Some(field) => {
                field.name = Arc::from(to);
                true
            }
            None => false,
        }
    }

    pub fn for_each_link(&self, f: &mut dyn FnMut(&Link)) {
        for field in &self.fields {
            field.value.for_each_link(f);
        }
    }

    pub fn for_each_link_mut(&mut self, f: &mut dyn FnMut(&mut Link)) {
        for field in &mut self.fields {
            field.value.for_each_link_mut(f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SchemaBuilder;
    use crate::desc::Layout;

    #[test]
    fn zeroed_struct_has_every_field() {
        let schema = SchemaBuilder::new(Layout::native())
            .with_core_types()
            .add_struct("Camera", &[("ID", "id"), ("float", "lens"), ("int", "flags[2]")])
            .build()
            .unwrap();
        let index = schema.struct_index("Camera").unwrap();
        let cam = StructValue::zeroed(&schema, index);
        assert_eq!(cam.get("lens"), Some(&Value::Float(0.0)));
        assert_eq!(
            cam.get("flags"),
            Some(&Value::Array(vec![Value::Int(0), Value::Int(0)]))
        );
        assert_eq!(cam.path("id.name").and_then(Value::as_str).as_deref(), Some(""));
        let lib = cam.path("id.lib").and_then(Value::as_link).unwrap();
        assert_eq!(&*lib.target, "Library");
        assert!(lib.ptr.is_null());
    }

    #[test]
    fn chars_truncates_and_terminates() {
        let v = Value::chars("abcdef", 4);
        assert_eq!(v, Value::Chars(b"abc\0".to_vec()));
        assert_eq!(v.as_str().as_deref(), Some("abc"));
    }

    #[test]
    fn casts_follow_c_rules() {
        assert_eq!(Value::Float(3.9).cast(Primitive::Int), Some(Value::Int(3)));
        assert_eq!(Value::Int(-1).cast(Primitive::UShort), Some(Value::UShort(u16::MAX)));
        assert_eq!(Value::Short(7).cast(Primitive::Double), Some(Value::Double(7.0)));
        assert_eq!(Value::Double(0.5).cast(Primitive::Float), Some(Value::Float(0.5)));
        assert_eq!(Value::Chars(vec![1]).cast(Primitive::Int), None);
    }

    #[test]
    fn set_path_reaches_nested_fields() {
        let schema = SchemaBuilder::new(Layout::native())
            .with_core_types()
            .build()
            .unwrap();
        let mut lib = StructValue::zeroed(&schema, schema.struct_index("Library").unwrap());
        assert!(lib.set_path("id.us", Value::Int(3)));
        assert_eq!(lib.path("id.us"), Some(&Value::Int(3)));
        assert!(!lib.set_path("id.missing", Value::Int(1)));
    }

    #[test]
    fn link_visitor_reaches_nested_pointers() {
        let schema = SchemaBuilder::new(Layout::native())
            .with_core_types()
            .add_struct("Node", &[("Node", "*next"), ("Node", "*links[2]")])
            .build()
            .unwrap();
        let mut node = StructValue::zeroed(&schema, schema.struct_index("Node").unwrap());
        let mut count = 0;
        node.for_each_link_mut(&mut |link| {
            count += 1;
            link.ptr = Pointer::Stale(0x10 * count);
        });
        assert_eq!(count, 3);
        let mut seen = Vec::new();
        node.for_each_link(&mut |link| seen.push(link.ptr));
        assert_eq!(
            seen,
            vec![Pointer::Stale(0x10), Pointer::Stale(0x20), Pointer::Stale(0x30)]
        );
    }
}
