use lig_schema::SchemaError;
use lig_types::TypeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("unrecognized format: {0}")]
    UnrecognizedFormat(String),

    #[error("truncated payload at offset {offset}: need {needed} bytes")]
    Truncated { offset: u64, needed: u64 },

    #[error("corrupt block at offset {offset}: {reason}")]
    CorruptBlock { offset: u64, reason: String },

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("invalid header: {0}")]
    Header(#[from] TypeError),

    #[error("source cannot seek backwards to offset {0}")]
    NotSeekable(u64),

    #[error("interrupted")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StreamResult<T> = Result<T, StreamError>;
