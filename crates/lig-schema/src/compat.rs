//! File-versus-runtime struct compatibility.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::desc::{FieldDesc, FieldKind, Schema, StructDesc};

/// How a struct written to a file relates to the runtime's struct of the
/// same name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Compat {
    /// Same fields, types, offsets and sizes: decode directly.
    Identical,
    /// Same name, different layout: decode with the file layout, then
    /// reconcile field by field.
    StructurallyDifferent,
    /// No runtime struct of that name.
    RemovedType,
}

/// Per-file-struct compatibility flags.
#[derive(Clone, Debug)]
pub struct Compatibility {
    flags: Vec<Compat>,
    runtime: Vec<Option<usize>>,
}

impl Compatibility {
    /// Compare every struct of `file` against `runtime`.
    ///
    /// A struct that embeds a differing struct by value is itself
    /// different, so flags are propagated until nothing changes.
    pub fn compute(file: &Schema, runtime: &Schema) -> Self {
        let runtime_index: Vec<Option<usize>> = file
            .structs()
            .iter()
            .map(|s| runtime.struct_index(&s.name))
            .collect();

        let mut flags: Vec<Compat> = file
            .structs()
            .iter()
            .zip(&runtime_index)
            .map(|(fs, ri)| match ri {
                None => Compat::RemovedType,
                Some(ri) if same_layout(fs, &runtime.structs()[*ri]) => Compat::Identical,
                Some(_) => Compat::StructurallyDifferent,
            })
            .collect();

        let mut changed = true;
        while changed {
            changed = false;
            for (i, fs) in file.structs().iter().enumerate() {
                if flags[i] != Compat::Identical {
                    continue;
                }
                let embeds_changed = fs.fields.iter().any(|f| {
                    f.kind == FieldKind::Value
                        && file
                            .struct_for_type(f.type_index)
                            .is_some_and(|n| flags[n] != Compat::Identical)
                });
                if embeds_changed {
                    flags[i] = Compat::StructurallyDifferent;
                    changed = true;
                }
            }
        }

        let compat = Self {
            flags,
            runtime: runtime_index,
        };
        debug!(
            identical = compat.count(Compat::Identical),
            different = compat.count(Compat::StructurallyDifferent),
            removed = compat.count(Compat::RemovedType),
            "computed struct compatibility"
        );
        compat
    }

    /// Flag for a file struct index.
    pub fn get(&self, file_index: usize) -> Option<Compat> {
        self.flags.get(file_index).copied()
    }

    /// Runtime struct index matching a file struct index, if any.
    pub fn runtime_index(&self, file_index: usize) -> Option<usize> {
        self.runtime.get(file_index).copied().flatten()
    }

    /// Number of file structs with the given flag.
    pub fn count(&self, flag: Compat) -> usize {
        self.flags.iter().filter(|&&f| f == flag).count()
    }

    /// Whether every file struct decodes directly.
    pub fn all_identical(&self) -> bool {
        self.flags.iter().all(|&f| f == Compat::Identical)
    }
}

fn same_layout(file: &StructDesc, runtime: &StructDesc) -> bool {
    file.size == runtime.size
        && file.fields.len() == runtime.fields.len()
        && file
            .fields
            .iter()
            .zip(&runtime.fields)
            .all(|(a, b)| same_field(a, b))
}

fn same_field(a: &FieldDesc, b: &FieldDesc) -> bool {
    a.name == b.name
        && a.decl == b.decl
        && a.type_name == b.type_name
        && a.kind == b.kind
        && a.array_len == b.array_len
        && a.offset == b.offset
        && a.size == b.size
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SchemaBuilder;
    use crate::desc::Layout;
    use lig_types::{Endianness, PointerWidth};

    fn runtime() -> Schema {
        SchemaBuilder::new(Layout::native())
            .with_core_types()
            .add_struct("Vec3", &[("float", "co[3]")])
            .add_struct("Lamp", &[("ID", "id"), ("float", "energy")])
            .add_struct("Object", &[("ID", "id"), ("Vec3", "loc"), ("Lamp", "*data")])
            .build()
            .unwrap()
    }

    #[test]
    fn same_schema_is_identical() {
        let rt = runtime();
        let compat = Compatibility::compute(&rt, &rt);
        assert!(compat.all_identical());
        let obj = rt.struct_index("Object").unwrap();
        assert_eq!(compat.runtime_index(obj), Some(obj));
    }

    #[test]
    fn nested_change_propagates() {
        let file = SchemaBuilder::new(Layout::native())
            .with_core_types()
            .add_struct("Vec3", &[("float", "co[4]")])
            .add_struct("Lamp", &[("ID", "id"), ("float", "energy")])
            .add_struct("Object", &[("ID", "id"), ("Vec3", "loc"), ("Lamp", "*data")])
            .build()
            .unwrap();
        let compat = Compatibility::compute(&file, &runtime());
        let flag = |name: &str| compat.get(file.struct_index(name).unwrap()).unwrap();
        assert_eq!(flag("Vec3"), Compat::StructurallyDifferent);
        assert_eq!(flag("Object"), Compat::StructurallyDifferent);
        assert_eq!(flag("Lamp"), Compat::Identical);
        assert_eq!(flag("ID"), Compat::Identical);
    }

    #[test]
    fn removed_struct_is_flagged() {
        let file = SchemaBuilder::new(Layout::native())
            .with_core_types()
            .add_struct("Ipo", &[("ID", "id"), ("short", "blocktype"), ("short", "pad")])
            .add_struct("Scene", &[("ID", "id"), ("Ipo", "ipo")])
            .build()
            .unwrap();
        let compat = Compatibility::compute(&file, &runtime());
        assert_eq!(
            compat.get(file.struct_index("Ipo").unwrap()),
            Some(Compat::RemovedType)
        );
        assert_eq!(
            compat.get(file.struct_index("Scene").unwrap()),
            Some(Compat::RemovedType)
        );
        assert_eq!(compat.runtime_index(file.struct_index("Ipo").unwrap()), None);
    }

    #[test]
    fn pointer_width_change_moves_offsets() {
        let narrow = runtime()
            .with_layout(Layout::new(PointerWidth::Four, Endianness::native()))
            .unwrap();
        let wide = runtime()
            .with_layout(Layout::new(PointerWidth::Eight, Endianness::native()))
            .unwrap();
        let compat = Compatibility::compute(&narrow, &wide);
        assert_eq!(
            compat.get(narrow.struct_index("ID").unwrap()),
            Some(Compat::StructurallyDifferent)
        );
        assert_eq!(
            compat.get(narrow.struct_index("Vec3").unwrap()),
            Some(Compat::Identical)
        );
    }
}
