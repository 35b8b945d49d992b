//! Struct tables: the self-description embedded in every document and the
//! one compiled into the running program.
//!
//! A schema is four tables. `NAME` holds field declarators (`*next`,
//! `co[3]`, `(*func)()`), `TYPE` holds type names, `TLEN` the byte size of
//! each type, and `STRC` lists structs as a type plus `(type, name)` pairs.
//! Field offsets are not stored; they are the running sum of field sizes,
//! so writers must spell out any padding as explicit fields.

use std::collections::HashMap;
use std::sync::Arc;

use lig_types::{Endianness, PointerWidth};
use tracing::debug;

use crate::bytes::{ByteReader, ByteWriter};
use crate::error::{SchemaError, SchemaResult};

/// Pointer width and byte order a schema's layouts are computed for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Layout {
    pub pointer: PointerWidth,
    pub endian: Endianness,
}

impl Layout {
    pub fn new(pointer: PointerWidth, endian: Endianness) -> Self {
        Self { pointer, endian }
    }

    /// Layout of the running program.
    pub fn native() -> Self {
        Self {
            pointer: PointerWidth::native(),
            endian: Endianness::native(),
        }
    }
}

/// Primitive scalar kinds understood by the codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Int64,
    UInt64,
    Float,
    Double,
    Void,
}

impl Primitive {
    /// Recognise a primitive by its type name.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "char" => Self::Char,
            "uchar" => Self::UChar,
            "short" => Self::Short,
            "ushort" => Self::UShort,
            "int" => Self::Int,
            "uint" => Self::UInt,
            "int64_t" => Self::Int64,
            "uint64_t" => Self::UInt64,
            "float" => Self::Float,
            "double" => Self::Double,
            "void" => Self::Void,
            _ => return None,
        })
    }

    /// Byte size of one element.
    pub fn size(&self) -> usize {
        match self {
            Self::Char | Self::UChar => 1,
            Self::Short | Self::UShort => 2,
            Self::Int | Self::UInt | Self::Float => 4,
            Self::Int64 | Self::UInt64 | Self::Double => 8,
            Self::Void => 0,
        }
    }

    /// All primitives with their canonical names, in table order.
    pub fn all() -> [(&'static str, Primitive); 11] {
        [
            ("char", Self::Char),
            ("uchar", Self::UChar),
            ("short", Self::Short),
            ("ushort", Self::UShort),
            ("int", Self::Int),
            ("uint", Self::UInt),
            ("int64_t", Self::Int64),
            ("uint64_t", Self::UInt64),
            ("float", Self::Float),
            ("double", Self::Double),
            ("void", Self::Void),
        ]
    }
}

/// How a field stores its value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Inline primitive or nested struct.
    Value,
    /// Data pointer (`*name`, `**name`).
    Pointer,
    /// Function pointer (`(*name)()`); stored as an address, never followed.
    FunctionPointer,
}

/// One entry of the `TYPE`/`TLEN` tables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDesc {
    pub name: Arc<str>,
    pub size: usize,
}

/// One field of a struct, with its computed placement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDesc {
    /// Bare field name (`co` for `co[3]`).
    pub name: Arc<str>,
    /// Declarator as written in the `NAME` table.
    pub decl: Arc<str>,
    /// Index into the schema's type table.
    pub type_index: usize,
    /// Declared type name.
    pub type_name: Arc<str>,
    pub kind: FieldKind,
    /// Number of elements (product of all array dimensions, 1 for scalars).
    pub array_len: usize,
    /// Byte offset inside the containing struct.
    pub offset: usize,
    /// Total byte size of the field.
    pub size: usize,
}

impl FieldDesc {
    /// Byte size of a single element.
    pub fn element_size(&self) -> usize {
        self.size / self.array_len.max(1)
    }

    pub fn is_pointer(&self) -> bool {
        !matches!(self.kind, FieldKind::Value)
    }
}

/// One entry of the `STRC` table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructDesc {
    pub name: Arc<str>,
    pub type_index: usize,
    pub size: usize,
    pub fields: Vec<FieldDesc>,
}

impl StructDesc {
    /// Find a field by bare name.
    pub fn field(&self, name: &str) -> Option<&FieldDesc> {
        self.fields.iter().find(|f| &*f.name == name)
    }
}

/// Raw struct table entry: type index plus `(type, name)` index pairs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RawStruct {
    pub type_index: u16,
    pub fields: Vec<(u16, u16)>,
}

/// A parsed, validated schema.
#[derive(Clone, Debug)]
pub struct Schema {
    layout: Layout,
    names: Vec<Arc<str>>,
    types: Vec<TypeDesc>,
    raw_structs: Vec<RawStruct>,
    structs: Vec<StructDesc>,
    struct_by_name: HashMap<Arc<str>, usize>,
    struct_by_type: HashMap<usize, usize>,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.layout == other.layout
            && self.names == other.names
            && self.types == other.types
            && self.raw_structs == other.raw_structs
    }
}

/// Split a declarator into bare name, kind, and element count.
pub(crate) fn parse_declarator(decl: &str) -> SchemaResult<(String, FieldKind, usize)> {
    let malformed = || SchemaError::Malformed(format!("bad field declarator {decl:?}"));

    if let Some(rest) = decl.strip_prefix("(*") {
        let end = rest.find(')').ok_or_else(malformed)?;
        let name = &rest[..end];
        if name.is_empty() {
            return Err(malformed());
        }
        return Ok((name.to_string(), FieldKind::FunctionPointer, 1));
    }

    let trimmed = decl.trim_start_matches('*');
    let kind = if trimmed.len() != decl.len() {
        FieldKind::Pointer
    } else {
        FieldKind::Value
    };

    let (name, mut dims) = match trimmed.find('[') {
        Some(pos) => (&trimmed[..pos], &trimmed[pos..]),
        None => (trimmed, ""),
    };
    if name.is_empty() {
        return Err(malformed());
    }

    let mut count = 1usize;
    while let Some(rest) = dims.strip_prefix('[') {
        let end = rest.find(']').ok_or_else(malformed)?;
        let n: usize = rest[..end].parse().map_err(|_| malformed())?;
        if n == 0 {
            return Err(malformed());
        }
        count = count.checked_mul(n).ok_or_else(malformed)?;
        dims = &rest[end + 1..];
    }
    if !dims.is_empty() {
        return Err(malformed());
    }
    Ok((name.to_string(), kind, count))
}

fn expect_tag(r: &mut ByteReader<'_>, tag: &[u8; 4]) -> SchemaResult<()> {
    match r.take(4) {
        Some(found) if found == tag => Ok(()),
        Some(found) => Err(SchemaError::Malformed(format!(
            "expected section {:?}, found {:?}",
            String::from_utf8_lossy(tag),
            String::from_utf8_lossy(found)
        ))),
        None => Err(SchemaError::Malformed(format!(
            "missing section {:?}",
            String::from_utf8_lossy(tag)
        ))),
    }
}

fn truncated(section: &str) -> SchemaError {
    SchemaError::Malformed(format!("{section} section truncated"))
}

impl Schema {
    /// Parse the payload of a `DNA1` block.
    ///
    /// Fails with [`SchemaError::Malformed`] if any section is missing,
    /// truncated, or internally inconsistent.
    pub fn parse(bytes: &[u8], layout: Layout) -> SchemaResult<Self> {
        let mut r = ByteReader::new(bytes, layout.endian);
        expect_tag(&mut r, b"SDNA")?;

        expect_tag(&mut r, b"NAME")?;
        let name_count = r.u32().ok_or_else(|| truncated("NAME"))? as usize;
        let mut names = Vec::with_capacity(name_count.min(bytes.len()));
        for _ in 0..name_count {
            names.push(r.cstr().ok_or_else(|| truncated("NAME"))?);
        }
        r.align4().ok_or_else(|| truncated("NAME"))?;

        expect_tag(&mut r, b"TYPE")?;
        let type_count = r.u32().ok_or_else(|| truncated("TYPE"))? as usize;
        let mut type_names = Vec::with_capacity(type_count.min(bytes.len()));
        for _ in 0..type_count {
            type_names.push(r.cstr().ok_or_else(|| truncated("TYPE"))?);
        }
        r.align4().ok_or_else(|| truncated("TYPE"))?;

        expect_tag(&mut r, b"TLEN")?;
        let mut types = Vec::with_capacity(type_count);
        for name in type_names {
            let size = r.u16().ok_or_else(|| truncated("TLEN"))? as usize;
            types.push((name, size));
        }
        r.align4().ok_or_else(|| truncated("TLEN"))?;

        expect_tag(&mut r, b"STRC")?;
        let struct_count = r.u32().ok_or_else(|| truncated("STRC"))? as usize;
        let mut structs = Vec::with_capacity(struct_count.min(bytes.len()));
        for _ in 0..struct_count {
            let type_index = r.u16().ok_or_else(|| truncated("STRC"))?;
            let field_count = r.u16().ok_or_else(|| truncated("STRC"))?;
            let mut fields = Vec::with_capacity(field_count as usize);
            for _ in 0..field_count {
                let t = r.u16().ok_or_else(|| truncated("STRC"))?;
                let n = r.u16().ok_or_else(|| truncated("STRC"))?;
                fields.push((t, n));
            }
            structs.push(RawStruct { type_index, fields });
        }

        let schema = Self::from_parts(layout, names, types, structs)?;
        debug!(
            structs = schema.structs.len(),
            types = schema.types.len(),
            "parsed schema"
        );
        Ok(schema)
    }

    /// Build and validate a schema from raw tables.
    ///
    /// Type sizes given for struct types must match the sum of their field
    /// sizes under `layout`.
    pub(crate) fn from_parts(
        layout: Layout,
        names: Vec<String>,
        types: Vec<(String, usize)>,
        raw_structs: Vec<RawStruct>,
    ) -> SchemaResult<Self> {
        let names: Vec<Arc<str>> = names.into_iter().map(Arc::from).collect();
        let types: Vec<TypeDesc> = types
            .into_iter()
            .map(|(name, size)| TypeDesc {
                name: Arc::from(name),
                size,
            })
            .collect();

        let mut struct_by_name = HashMap::new();
        let mut struct_by_type = HashMap::new();
        for (i, raw) in raw_structs.iter().enumerate() {
            let type_index = raw.type_index as usize;
            let ty = types.get(type_index).ok_or_else(|| {
                SchemaError::Malformed(format!("struct {i} has type index {type_index} out of range"))
            })?;
            if Primitive::from_name(&ty.name).is_some() {
                return Err(SchemaError::Malformed(format!(
                    "primitive type {} declared as struct",
                    ty.name
                )));
            }
            if struct_by_type.insert(type_index, i).is_some() {
                return Err(SchemaError::Malformed(format!(
                    "struct {} declared twice",
                    ty.name
                )));
            }
            struct_by_name.insert(ty.name.clone(), i);
        }

        let pointer_size = layout.pointer.bytes();
        let mut structs = Vec::with_capacity(raw_structs.len());
        for raw in &raw_structs {
            let sty = &types[raw.type_index as usize];
            let mut offset = 0usize;
            let mut fields = Vec::with_capacity(raw.fields.len());
            for &(t, n) in &raw.fields {
                let ty = types.get(t as usize).ok_or_else(|| {
                    SchemaError::Malformed(format!("field type {t} out of range in {}", sty.name))
                })?;
                let decl = names.get(n as usize).ok_or_else(|| {
                    SchemaError::Malformed(format!("field name {n} out of range in {}", sty.name))
                })?;
                let (bare, kind, array_len) = parse_declarator(decl)?;
                let element = match kind {
                    FieldKind::Pointer | FieldKind::FunctionPointer => pointer_size,
                    FieldKind::Value => {
                        if let Some(prim) = Primitive::from_name(&ty.name) {
                            if prim == Primitive::Void {
                                return Err(SchemaError::Malformed(format!(
                                    "void value field {decl} in {}",
                                    sty.name
                                )));
                            }
                            prim.size()
                        } else if struct_by_type.contains_key(&(t as usize)) {
                            ty.size
                        } else {
                            return Err(SchemaError::UnknownType {
                                struct_name: sty.name.to_string(),
                                type_name: ty.name.to_string(),
                            });
                        }
                    }
                };
                let size = element.checked_mul(array_len).ok_or_else(|| {
                    SchemaError::Malformed(format!("field {decl} in {} is too large", sty.name))
                })?;
                fields.push(FieldDesc {
                    name: Arc::from(bare),
                    decl: decl.clone(),
                    type_index: t as usize,
                    type_name: ty.name.clone(),
                    kind,
                    array_len,
                    offset,
                    size,
                });
                offset = offset.checked_add(size).ok_or_else(|| {
                    SchemaError::Malformed(format!("struct {} is too large", sty.name))
                })?;
            }
            if offset != sty.size {
                return Err(SchemaError::Malformed(format!(
                    "struct {} size mismatch: table says {}, fields sum to {offset}",
                    sty.name, sty.size
                )));
            }
            structs.push(StructDesc {
                name: sty.name.clone(),
                type_index: raw.type_index as usize,
                size: offset,
                fields,
            });
        }

        check_embedding(&structs, &struct_by_type)?;

        Ok(Self {
            layout,
            names,
            types,
            raw_structs,
            structs,
            struct_by_name,
            struct_by_type,
        })
    }

    /// Serialize to the `DNA1` payload format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::new(self.layout.endian);
        w.bytes(b"SDNA");

        w.bytes(b"NAME");
        w.u32(self.names.len() as u32);
        for name in &self.names {
            w.cstr(name);
        }
        w.align4();

        w.bytes(b"TYPE");
        w.u32(self.types.len() as u32);
        for ty in &self.types {
            w.cstr(&ty.name);
        }
        w.align4();

        w.bytes(b"TLEN");
        for ty in &self.types {
            w.u16(ty.size as u16);
        }
        w.align4();

        w.bytes(b"STRC");
        w.u32(self.raw_structs.len() as u32);
        for raw in &self.raw_structs {
            w.u16(raw.type_index);
            w.u16(raw.fields.len() as u16);
            for &(t, n) in &raw.fields {
                w.u16(t);
                w.u16(n);
            }
        }
        w.into_inner()
    }

    /// The same declarations laid out for a different pointer width or byte
    /// order. Struct sizes are recomputed.
    pub fn with_layout(&self, layout: Layout) -> SchemaResult<Self> {
        let mut sizes: Vec<usize> = self.types.iter().map(|t| t.size).collect();
        // Structs are listed after the types they embed, so one pass in table
        // order settles every size.
        for raw in &self.raw_structs {
            let mut size = 0usize;
            for &(t, n) in &raw.fields {
                let (_, kind, count) = parse_declarator(&self.names[n as usize])?;
                let element = match kind {
                    FieldKind::Pointer | FieldKind::FunctionPointer => layout.pointer.bytes(),
                    FieldKind::Value => sizes[t as usize],
                };
                size = element
                    .checked_mul(count)
                    .and_then(|n| size.checked_add(n))
                    .ok_or_else(|| SchemaError::Malformed("struct too large for layout".into()))?;
            }
            sizes[raw.type_index as usize] = size;
        }
        let types = self
            .types
            .iter()
            .zip(sizes)
            .map(|(t, size)| (t.name.to_string(), size))
            .collect();
        let names = self.names.iter().map(|n| n.to_string()).collect();
        Self::from_parts(layout, names, types, self.raw_structs.clone())
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn types(&self) -> &[TypeDesc] {
        &self.types
    }

    pub fn structs(&self) -> &[StructDesc] {
        &self.structs
    }

    /// Struct by index into the struct table.
    pub fn struct_at(&self, index: usize) -> Option<&StructDesc> {
        self.structs.get(index)
    }

    /// Struct index by name.
    pub fn struct_index(&self, name: &str) -> Option<usize> {
        self.struct_by_name.get(name).copied()
    }

    /// Struct by name.
    pub fn struct_named(&self, name: &str) -> Option<&StructDesc> {
        self.struct_index(name).and_then(|i| self.structs.get(i))
    }

    /// Struct index for a type-table index, if that type is a struct.
    pub fn struct_for_type(&self, type_index: usize) -> Option<usize> {
        self.struct_by_type.get(&type_index).copied()
    }

    /// Validate a block's struct index and return the struct.
    pub fn checked_struct(&self, index: i64) -> SchemaResult<&StructDesc> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.structs.get(i))
            .ok_or(SchemaError::StructIndexOutOfRange {
                index,
                count: self.structs.len(),
            })
    }
}

/// Fail if a struct contains itself by value, directly or through the
/// structs it embeds.
fn check_embedding(structs: &[StructDesc], struct_by_type: &HashMap<usize, usize>) -> SchemaResult<()> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Visit {
        New,
        Open,
        Done,
    }

    let embeds: Vec<Vec<usize>> = structs
        .iter()
        .map(|s| {
            s.fields
                .iter()
                .filter(|f| f.kind == FieldKind::Value)
                .filter_map(|f| struct_by_type.get(&f.type_index).copied())
                .collect()
        })
        .collect();

    let mut visit = vec![Visit::New; structs.len()];
    for root in 0..structs.len() {
        if visit[root] != Visit::New {
            continue;
        }
        visit[root] = Visit::Open;
        let mut stack = vec![(root, 0usize)];
        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;
            let Some(&child) = embeds[node].get(next) else {
                visit[node] = Visit::Done;
                stack.pop();
                continue;
            };
            top.1 += 1;
            match visit[child] {
                Visit::Open => {
                    return Err(SchemaError::Malformed(format!(
                        "struct {} embeds itself",
                        structs[child].name
                    )))
                }
                Visit::New => {
                    visit[child] = Visit::Open;
                    stack.push((child, 0));
                }
                Visit::Done => {}
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SchemaBuilder;

    fn sample(layout: Layout) -> Schema {
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
                    ("int", "flag"),
                ],
            )
            .build()
            .unwrap()
    }

    #[test]
    fn declarators() {
        assert_eq!(
            parse_declarator("*next").unwrap(),
            ("next".into(), FieldKind::Pointer, 1)
        );
        assert_eq!(
            parse_declarator("mat[4][4]").unwrap(),
            ("mat".into(), FieldKind::Value, 16)
        );
        assert_eq!(
            parse_declarator("**mtex[18]").unwrap(),
            ("mtex".into(), FieldKind::Pointer, 18)
        );
        assert_eq!(
            parse_declarator("(*draw)()").unwrap(),
            ("draw".into(), FieldKind::FunctionPointer, 1)
        );
        assert!(parse_declarator("x[0]").is_err());
        assert!(parse_declarator("x[3").is_err());
        assert!(parse_declarator("*").is_err());
    }

    #[test]
    fn offsets_follow_pointer_width() {
        let wide = sample(Layout::new(PointerWidth::Eight, Endianness::Little));
        let narrow = wide
            .with_layout(Layout::new(PointerWidth::Four, Endianness::Little))
            .unwrap();

        let obj_wide = wide.struct_named("Object").unwrap();
        let obj_narrow = narrow.struct_named("Object").unwrap();
        assert_eq!(obj_wide.field("loc").unwrap().offset, wide.struct_named("ID").unwrap().size);
        assert_eq!(obj_wide.size - obj_narrow.size, 4 * 3);
        assert_eq!(obj_narrow.field("flag").unwrap().size, 4);
    }

    #[test]
    fn bytes_roundtrip() {
        for layout in [
            Layout::new(PointerWidth::Eight, Endianness::Little),
            Layout::new(PointerWidth::Four, Endianness::Big),
        ] {
            let schema = sample(layout);
            let parsed = Schema::parse(&schema.to_bytes(), layout).unwrap();
            assert_eq!(parsed, schema);
            assert_eq!(parsed.structs(), schema.structs());
        }
    }

    #[test]
    fn missing_magic_is_malformed() {
        let err = Schema::parse(b"NOPE", Layout::native()).unwrap_err();
        assert!(matches!(err, SchemaError::Malformed(_)));
    }

    #[test]
    fn truncated_payload_is_malformed() {
        let bytes = sample(Layout::native()).to_bytes();
        for cut in [4, 12, bytes.len() / 2, bytes.len() - 1] {
            let err = Schema::parse(&bytes[..cut], Layout::native()).unwrap_err();
            assert!(matches!(err, SchemaError::Malformed(_)), "cut at {cut}");
        }
    }

    #[test]
    fn size_mismatch_is_malformed() {
        let schema = sample(Layout::native());
        let mut types: Vec<(String, usize)> = schema
            .types()
            .iter()
            .map(|t| (t.name.to_string(), t.size))
            .collect();
        let vec3 = types.iter().position(|(n, _)| n == "Vec3").unwrap();
        types[vec3].1 += 1;
        let names = schema.names.iter().map(|n| n.to_string()).collect();
        let err = Schema::from_parts(schema.layout(), names, types, schema.raw_structs.clone())
            .unwrap_err();
        assert!(matches!(err, SchemaError::Malformed(_)));
    }

    fn raw(type_index: u16, fields: &[(u16, u16)]) -> RawStruct {
        RawStruct {
            type_index,
            fields: fields.to_vec(),
        }
    }

    #[test]
    fn struct_embedding_itself_is_malformed() {
        let names = vec!["a".to_string(), "b".to_string()];

        // A { A a; } with a table size that matches its single field.
        let types = vec![("int".to_string(), 4), ("A".to_string(), 8)];
        let err = Schema::from_parts(Layout::native(), names.clone(), types, vec![raw(1, &[(1, 0)])])
            .unwrap_err();
        assert!(matches!(err, SchemaError::Malformed(ref m) if m.contains("embeds itself")), "{err}");

        // A { B b; } B { A a; }
        let types = vec![
            ("int".to_string(), 4),
            ("A".to_string(), 4),
            ("B".to_string(), 4),
        ];
        let structs = vec![raw(1, &[(2, 1)]), raw(2, &[(1, 0)])];
        let err = Schema::from_parts(Layout::native(), names, types, structs).unwrap_err();
        assert!(matches!(err, SchemaError::Malformed(_)));

        // A pointer back to the struct is fine.
        let names = vec!["*next".to_string(), "x".to_string()];
        let pointer = Layout::native().pointer.bytes();
        let types = vec![("int".to_string(), 4), ("A".to_string(), pointer + 4)];
        let ok = Schema::from_parts(Layout::native(), names, types, vec![raw(1, &[(1, 0), (0, 1)])]);
        assert!(ok.is_ok());
    }

    #[test]
    fn oversized_field_is_malformed() {
        let names = vec!["x[4611686018427387904]".to_string()];
        let types = vec![("int".to_string(), 4), ("A".to_string(), 0)];
        let err = Schema::from_parts(Layout::native(), names, types, vec![raw(1, &[(0, 0)])])
            .unwrap_err();
        assert!(matches!(err, SchemaError::Malformed(_)));
    }

    #[test]
    fn checked_struct_bounds() {
        let schema = sample(Layout::native());
        assert!(schema.checked_struct(0).is_ok());
        assert!(matches!(
            schema.checked_struct(-1),
            Err(SchemaError::StructIndexOutOfRange { .. })
        ));
        assert!(schema.checked_struct(1000).is_err());
    }
}
