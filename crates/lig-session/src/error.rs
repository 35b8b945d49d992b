use std::io;

use lig_graph::GraphError;
use lig_link::LinkError;
use lig_schema::SchemaError;
use lig_stream::StreamError;
use thiserror::Error;

/// Errors that end a load. Problems local to one object or one library are
/// recorded in the load report instead.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("malformed schema: {0}")]
    MalformedSchema(String),

    #[error("unrecognized format: {0}")]
    UnrecognizedFormat(String),

    #[error("truncated payload at offset {offset}: need {needed} bytes")]
    TruncatedPayload { offset: u64, needed: u64 },

    #[error("corrupt block at offset {offset}: {reason}")]
    CorruptBlock { offset: u64, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("load interrupted")]
    Interrupted,

    #[error("data block at {address:#x} does not hold raw bytes")]
    NotRaw { address: u64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StreamError> for LoadError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::UnrecognizedFormat(msg) => Self::UnrecognizedFormat(msg),
            StreamError::Header(e) => Self::UnrecognizedFormat(e.to_string()),
            StreamError::Truncated { offset, needed } => Self::TruncatedPayload { offset, needed },
            StreamError::CorruptBlock { offset, reason } => Self::CorruptBlock { offset, reason },
            StreamError::Schema(e) => e.into(),
            StreamError::NotSeekable(offset) => Self::Io(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("source cannot seek back to offset {offset}"),
            )),
            StreamError::Interrupted => Self::Interrupted,
            StreamError::Io(e) => Self::Io(e),
        }
    }
}

impl From<SchemaError> for LoadError {
    fn from(err: SchemaError) -> Self {
        Self::MalformedSchema(err.to_string())
    }
}

impl From<GraphError> for LoadError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::Stream(e) => e.into(),
            GraphError::Schema(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<LinkError> for LoadError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::Graph(e) => e.into(),
            LinkError::Stream(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

pub type LoadResult<T> = Result<T, LoadError>;
