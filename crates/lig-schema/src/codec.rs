//! Converting struct payloads to value trees and back.
//!
//! Decoding reads with the layout of the schema that describes the bytes.
//! Addresses found in pointer fields are converted to the reader's pointer
//! width so that they compare equal to block addresses converted the same
//! way.

use lig_types::PointerWidth;

use crate::bytes::{ByteReader, ByteWriter};
use crate::desc::{FieldDesc, FieldKind, Primitive, Schema, StructDesc};
use crate::error::{SchemaError, SchemaResult};
use crate::value::{Field, Link, Pointer, StructValue, Value};

/// Decode one struct instance from the start of `bytes`.
pub fn decode_struct(
    schema: &Schema,
    index: usize,
    bytes: &[u8],
    address_width: PointerWidth,
) -> SchemaResult<StructValue> {
    let desc = struct_desc(schema, index)?;
    check_len(desc, bytes.len(), 1)?;
    let mut r = ByteReader::new(bytes, schema.layout().endian);
    Decoder {
        schema,
        address_width,
    }
    .read_struct(desc, &mut r)
}

/// Decode `count` consecutive instances of the same struct.
pub fn decode_array(
    schema: &Schema,
    index: usize,
    bytes: &[u8],
    count: usize,
    address_width: PointerWidth,
) -> SchemaResult<Vec<StructValue>> {
    let desc = struct_desc(schema, index)?;
    check_len(desc, bytes.len(), count)?;
    let mut r = ByteReader::new(bytes, schema.layout().endian);
    let decoder = Decoder {
        schema,
        address_width,
    };
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        r.seek(i * desc.size).ok_or_else(|| too_short(desc, bytes.len(), count))?;
        out.push(decoder.read_struct(desc, &mut r)?);
    }
    Ok(out)
}

/// Encode a struct value with the layout of `schema`.
///
/// Fields are matched by name; fields absent from `value` are written as
/// zeros. Pointers must be null or still carry their as-written address.
pub fn encode_struct(schema: &Schema, index: usize, value: &StructValue) -> SchemaResult<Vec<u8>> {
    let desc = struct_desc(schema, index)?;
    let mut w = ByteWriter::new(schema.layout().endian);
    Encoder { schema }.write_struct(desc, value, &mut w)?;
    Ok(w.into_inner())
}

/// Encode several instances back to back.
pub fn encode_array(schema: &Schema, index: usize, values: &[StructValue]) -> SchemaResult<Vec<u8>> {
    let desc = struct_desc(schema, index)?;
    let mut w = ByteWriter::new(schema.layout().endian);
    let encoder = Encoder { schema };
    for value in values {
        encoder.write_struct(desc, value, &mut w)?;
    }
    Ok(w.into_inner())
}

fn struct_desc(schema: &Schema, index: usize) -> SchemaResult<&StructDesc> {
    schema
        .struct_at(index)
        .ok_or(SchemaError::StructIndexOutOfRange {
            index: index as i64,
            count: schema.structs().len(),
        })
}

fn too_short(desc: &StructDesc, available: usize, count: usize) -> SchemaError {
    SchemaError::PayloadTooShort {
        struct_name: desc.name.to_string(),
        needed: desc.size.saturating_mul(count),
        available,
    }
}

fn check_len(desc: &StructDesc, available: usize, count: usize) -> SchemaResult<()> {
    if desc.size == 0 && count > 1 {
        return Err(SchemaError::Malformed(format!(
            "{count} instances of empty struct {}",
            desc.name
        )));
    }
    match desc.size.checked_mul(count) {
        Some(needed) if needed <= available => Ok(()),
        _ => Err(too_short(desc, available, count)),
    }
}

fn is_char(field: &FieldDesc) -> bool {
    matches!(
        Primitive::from_name(&field.type_name),
        Some(Primitive::Char | Primitive::UChar)
    )
}

struct Decoder<'a> {
    schema: &'a Schema,
    address_width: PointerWidth,
}

impl Decoder<'_> {
    fn read_struct(&self, desc: &StructDesc, r: &mut ByteReader<'_>) -> SchemaResult<StructValue> {
        let base = r.position();
        let mut fields = Vec::with_capacity(desc.fields.len());
        for field in &desc.fields {
            r.seek(base + field.offset)
                .ok_or_else(|| too_short(desc, r.position(), 1))?;
            let value = self.read_field(field, r).ok_or_else(|| too_short(desc, base + field.offset, 1))??;
            fields.push(Field {
                name: field.name.clone(),
                value,
            });
        }
        Ok(StructValue {
            name: desc.name.clone(),
            fields,
        })
    }

    fn read_field(&self, field: &FieldDesc, r: &mut ByteReader<'_>) -> Option<SchemaResult<Value>> {
        if field.kind == FieldKind::Value && is_char(field) && field.array_len > 1 {
            return Some(Ok(Value::Chars(r.take(field.array_len)?.to_vec())));
        }
        if field.array_len > 1 {
            let mut items = Vec::with_capacity(field.array_len);
            for _ in 0..field.array_len {
                match self.read_element(field, r)? {
                    Ok(v) => items.push(v),
                    Err(e) => return Some(Err(e)),
                }
            }
            return Some(Ok(Value::Array(items)));
        }
        self.read_element(field, r)
    }

    fn read_element(&self, field: &FieldDesc, r: &mut ByteReader<'_>) -> Option<SchemaResult<Value>> {
        let file_width = self.schema.layout().pointer;
        let value = match field.kind {
            FieldKind::Pointer => {
                let addr = r.address(file_width)?;
                let ptr = match file_width.convert(addr, self.address_width) {
                    0 => Pointer::Null,
                    a => Pointer::Stale(a),
                };
                Value::Ptr(Link::new(field.type_name.clone(), ptr))
            }
            FieldKind::FunctionPointer => {
                r.address(file_width)?;
                Value::Ptr(Link::new(field.type_name.clone(), Pointer::Null))
            }
            FieldKind::Value => match Primitive::from_name(&field.type_name) {
                Some(prim) => read_primitive(prim, r)?,
                None => {
                    let Some(index) = self.schema.struct_for_type(field.type_index) else {
                        return Some(Err(SchemaError::UnknownType {
                            struct_name: field.decl.to_string(),
                            type_name: field.type_name.to_string(),
                        }));
                    };
                    let nested = &self.schema.structs()[index];
                    let start = r.position();
                    r.take(nested.size)?;
                    r.seek(start)?;
                    let value = match self.read_struct(nested, r) {
                        Ok(v) => v,
                        Err(e) => return Some(Err(e)),
                    };
                    r.seek(start + nested.size)?;
                    Value::Struct(value)
                }
            },
        };
        Some(Ok(value))
    }
}

fn read_primitive(prim: Primitive, r: &mut ByteReader<'_>) -> Option<Value> {
    Some(match prim {
        Primitive::Char => Value::Char(r.u8()?),
        Primitive::UChar => Value::UChar(r.u8()?),
        Primitive::Short => Value::Short(r.i16()?),
        Primitive::UShort => Value::UShort(r.u16()?),
        Primitive::Int => Value::Int(r.i32()?),
        Primitive::UInt => Value::UInt(r.u32()?),
        Primitive::Int64 => Value::Int64(r.i64()?),
        Primitive::UInt64 => Value::UInt64(r.u64()?),
        Primitive::Float => Value::Float(r.f32()?),
        Primitive::Double => Value::Double(r.f64()?),
        Primitive::Void => return None,
    })
}

struct Encoder<'a> {
    schema: &'a Schema,
}

impl Encoder<'_> {
    fn write_struct(&self, desc: &StructDesc, value: &StructValue, w: &mut ByteWriter) -> SchemaResult<()> {
        for field in &desc.fields {
            match value.get(&field.name) {
                Some(v) => self.write_field(field, v, w)?,
                None => w.bytes(&vec![0u8; field.size]),
            }
        }
        Ok(())
    }

    fn write_field(&self, field: &FieldDesc, value: &Value, w: &mut ByteWriter) -> SchemaResult<()> {
        if field.array_len == 1 {
            return self.write_element(field, value, w);
        }
        match value {
            Value::Chars(bytes) => {
                let mut padded = bytes.clone();
                padded.resize(field.size, 0);
                w.bytes(&padded);
            }
            Value::Array(items) => {
                for i in 0..field.array_len {
                    match items.get(i) {
                        Some(item) => self.write_element(field, item, w)?,
                        None => w.bytes(&vec![0u8; field.element_size()]),
                    }
                }
            }
            other => return Err(mismatch(field, other)),
        }
        Ok(())
    }

    fn write_element(&self, field: &FieldDesc, value: &Value, w: &mut ByteWriter) -> SchemaResult<()> {
        let width = self.schema.layout().pointer;
        match (field.kind, value) {
            (FieldKind::Pointer | FieldKind::FunctionPointer, Value::Ptr(link)) => {
                let addr = match link.ptr {
                    Pointer::Null => 0,
                    Pointer::Stale(addr) => addr,
                    other => {
                        return Err(SchemaError::Unencodable {
                            field: field.name.to_string(),
                            reason: format!("pointer {other:?} has no address"),
                        })
                    }
                };
                w.address(addr, width);
            }
            (FieldKind::Value, Value::Struct(inner)) => {
                let index = self
                    .schema
                    .struct_for_type(field.type_index)
                    .ok_or_else(|| mismatch(field, value))?;
                self.write_struct(&self.schema.structs()[index], inner, w)?;
            }
            (FieldKind::Value, scalar) => {
                let prim = Primitive::from_name(&field.type_name).ok_or_else(|| mismatch(field, value))?;
                match scalar.cast(prim).ok_or_else(|| mismatch(field, value))? {
                    Value::Char(v) | Value::UChar(v) => w.u8(v),
                    Value::Short(v) => w.i16(v),
                    Value::UShort(v) => w.u16(v),
                    Value::Int(v) => w.i32(v),
                    Value::UInt(v) => w.u32(v),
                    Value::Int64(v) => w.i64(v),
                    Value::UInt64(v) => w.u64(v),
                    Value::Float(v) => w.f32(v),
                    Value::Double(v) => w.f64(v),
                    other => return Err(mismatch(field, &other)),
                }
            }
            (_, other) => return Err(mismatch(field, other)),
        }
        Ok(())
    }
}

fn mismatch(field: &FieldDesc, value: &Value) -> SchemaError {
    SchemaError::Unencodable {
        field: field.name.to_string(),
        reason: format!("value {value:?} does not fit declaration {}", field.decl),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SchemaBuilder;
    use crate::desc::Layout;
    use lig_types::Endianness;

    fn schema(layout: Layout) -> Schema {
        SchemaBuilder::new(layout)
            .with_core_types()
            .add_struct("Vec3", &[("float", "co[3]")])
            .add_struct(
                "Object",
                &[
                    ("ID", "id"),
                    ("Vec3", "loc"),
                    ("Object", "*parent"),
                    ("void", "(*callback)()"),
                    ("short", "flag"),
                    ("short", "pad"),
                    ("double", "weight"),
                ],
            )
            .build()
            .unwrap()
    }

    fn sample(schema: &Schema) -> StructValue {
        let index = schema.struct_index("Object").unwrap();
        let mut obj = StructValue::zeroed(schema, index);
        obj.set_path("id.name", Value::chars("OBCube", 64));
        obj.set_path("id.session_uid", Value::UInt(9));
        obj.set(
            "loc",
            Value::Struct(StructValue {
                name: "Vec3".into(),
                fields: vec![Field {
                    name: "co".into(),
                    value: Value::Array(vec![Value::Float(1.0), Value::Float(2.0), Value::Float(3.0)]),
                }],
            }),
        );
        obj.set("parent", Value::Ptr(Link::new("Object", Pointer::Stale(0x40))));
        obj.set("flag", Value::Short(-3));
        obj.set("weight", Value::Double(0.25));
        obj
    }

    #[test]
    fn decode_reads_what_encode_wrote() {
        for layout in [
            Layout::new(PointerWidth::Eight, Endianness::Little),
            Layout::new(PointerWidth::Four, Endianness::Big),
        ] {
            let schema = schema(layout);
            let index = schema.struct_index("Object").unwrap();
            let obj = sample(&schema);
            let bytes = encode_struct(&schema, index, &obj).unwrap();
            assert_eq!(bytes.len(), schema.structs()[index].size);
            let back = decode_struct(&schema, index, &bytes, layout.pointer).unwrap();
            assert_eq!(back, obj);
        }
    }

    #[test]
    fn pointers_narrow_to_reader_width() {
        let schema = schema(Layout::new(PointerWidth::Eight, Endianness::Little));
        let index = schema.struct_index("Object").unwrap();
        let bytes = encode_struct(&schema, index, &sample(&schema)).unwrap();
        let back = decode_struct(&schema, index, &bytes, PointerWidth::Four).unwrap();
        let parent = back.get("parent").and_then(Value::as_link).unwrap();
        assert_eq!(parent.ptr, Pointer::Stale(0x40 >> 3));
    }

    #[test]
    fn function_pointers_decode_null() {
        let schema = schema(Layout::native());
        let index = schema.struct_index("Object").unwrap();
        let mut obj = sample(&schema);
        obj.set("callback", Value::Ptr(Link::new("void", Pointer::Stale(0xdead))));
        let bytes = encode_struct(&schema, index, &obj).unwrap();
        let back = decode_struct(&schema, index, &bytes, PointerWidth::native()).unwrap();
        assert!(back.get("callback").and_then(Value::as_link).unwrap().ptr.is_null());
    }

    #[test]
    fn short_payload_is_rejected() {
        let schema = schema(Layout::native());
        let index = schema.struct_index("Object").unwrap();
        let err = decode_struct(&schema, index, &[0u8; 8], PointerWidth::native()).unwrap_err();
        assert!(matches!(err, SchemaError::PayloadTooShort { .. }));
    }

    #[test]
    fn many_empty_structs_are_rejected() {
        let schema = SchemaBuilder::new(Layout::native())
            .add_struct("Empty", &[])
            .build()
            .unwrap();
        let index = schema.struct_index("Empty").unwrap();
        assert_eq!(schema.struct_at(index).unwrap().size, 0);
        let err = decode_array(&schema, index, &[], i32::MAX as usize, PointerWidth::native())
            .unwrap_err();
        assert!(matches!(err, SchemaError::Malformed(_)));
        assert_eq!(
            decode_array(&schema, index, &[], 1, PointerWidth::native()).unwrap().len(),
            1
        );
    }

    #[test]
    fn arrays_of_structs() {
        let schema = schema(Layout::native());
        let index = schema.struct_index("Vec3").unwrap();
        let values: Vec<StructValue> = (0..3)
            .map(|i| {
                let mut v = StructValue::zeroed(&schema, index);
                v.set("co", Value::Array(vec![Value::Float(i as f32); 3]));
                v
            })
            .collect();
        let bytes = encode_array(&schema, index, &values).unwrap();
        assert_eq!(bytes.len(), 36);
        let back = decode_array(&schema, index, &bytes, 3, PointerWidth::native()).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn resolved_pointers_cannot_be_encoded() {
        let schema = schema(Layout::native());
        let index = schema.struct_index("Object").unwrap();
        let mut obj = sample(&schema);
        obj.set("parent", Value::Ptr(Link::new("Object", Pointer::Data(0))));
        let err = encode_struct(&schema, index, &obj).unwrap_err();
        assert!(matches!(err, SchemaError::Unencodable { .. }));
    }
}
