//! Error types for the schema registry.

/// Errors raised while parsing schemas or converting values.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SchemaError {
    /// The structural self-description is absent or corrupt.
    #[error("malformed schema: {0}")]
    Malformed(String),

    /// A struct name was not found in the schema.
    #[error("unknown struct: {0}")]
    UnknownStruct(String),

    /// A struct index is outside the schema's struct table.
    #[error("struct index {index} out of range (schema has {count} structs)")]
    StructIndexOutOfRange { index: i64, count: usize },

    /// A declared type was never defined.
    #[error("unknown type {type_name:?} in struct {struct_name:?}")]
    UnknownType {
        struct_name: String,
        type_name: String,
    },

    /// The payload is shorter than the struct it should contain.
    #[error("payload too short for {struct_name}: need {needed} bytes, have {available}")]
    PayloadTooShort {
        struct_name: String,
        needed: usize,
        available: usize,
    },

    /// A value cannot be written back into the container layout.
    #[error("cannot encode field {field:?}: {reason}")]
    Unencodable { field: String, reason: String },
}

/// Convenience alias for schema results.
pub type SchemaResult<T> = Result<T, SchemaError>;
