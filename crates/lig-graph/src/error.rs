//! Error types for the object graph builder.

use lig_schema::SchemaError;
use lig_stream::StreamError;
use lig_types::{DocumentId, TypeCode};

/// Errors that abort reading a document.
///
/// Problems confined to one object are not errors; they are recorded in the
/// [`LoadReport`](crate::LoadReport) and the object is skipped.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A document id with no database in the forest.
    #[error("no database for document {0}")]
    UnknownDocument(DocumentId),

    /// A capability names a struct the runtime schema lacks.
    #[error("type {code} is registered with unknown struct {struct_name:?}")]
    UnregisteredStruct { code: TypeCode, struct_name: String },
}

/// Convenience alias for graph results.
pub type GraphResult<T> = Result<T, GraphError>;
