use thiserror::Error;

/// Errors produced by foundation type parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid type code: {0:?}")]
    InvalidTypeCode(String),

    #[error("invalid pointer width marker: {0:#04x}")]
    InvalidPointerMarker(u8),

    #[error("invalid endianness marker: {0:#04x}")]
    InvalidEndianMarker(u8),

    #[error("unsupported pointer width: {0} bytes")]
    UnsupportedPointerWidth(usize),
}
