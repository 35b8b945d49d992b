//! Foundation types for Ligature.
//!
//! Every other Ligature crate depends on `lig-types`. Nothing in here knows
//! about the container format beyond the identifiers it uses.
//!
//! # Key Types
//!
//! - [`TypeCode`] -- Two-character code naming a top-level object kind (`OB`, `LI`, ...)
//! - [`BlockCode`] -- Four-byte tag at the start of every container block
//! - [`Handle`] / [`Arena`] -- Generational slot handles replacing raw addresses
//! - [`DocumentId`] -- Index of a document database inside a forest
//! - [`ObjectStatus`] -- Lifecycle tag of a loaded object
//! - [`Endianness`] / [`PointerWidth`] -- Byte-order and address-width markers

pub mod arena;
pub mod code;
pub mod error;
pub mod layout;
pub mod status;

pub use arena::{Arena, Handle};
pub use code::{BlockCode, TypeCode};
pub use error::TypeError;
pub use layout::{Endianness, PointerWidth};
pub use status::{DocumentId, ObjectStatus};
