//! Load sessions for Ligature.
//!
//! A [`LoadSession`] opens one document (a file, a byte buffer, or an
//! in-memory snapshot), reads it into a forest, links the libraries it
//! references, and patches every pointer. [`read_incremental`] re-reads a
//! newer snapshot on top of the forest an older one produced, decoding only
//! what changed.
//!
//! # Key Types
//!
//! - [`LoadSession`] -- Open document plus resolver and library cache
//! - [`LoadConfig`] -- Serde-backed options (TOML or JSON)
//! - [`Loaded`] -- Resulting forest and its [`LoadReport`]
//! - [`LoadError`] -- Conditions that end a load
//!
//! # Design Rules
//!
//! 1. Problems confined to one object or library go in the report; only
//!    stream-level failures end a load.
//! 2. A library document is opened at most once per session.
//! 3. Incremental reads keep the handles of objects that still exist.

pub mod config;
pub mod error;
pub mod incremental;
pub mod session;

#[cfg(test)]
mod fixtures;

pub use config::LoadConfig;
pub use error::{LoadError, LoadResult};
pub use incremental::read_incremental;
pub use session::{DocumentSource, LoadSession, Loaded};

pub use lig_graph::{LoadReport, LoadStats, ReportEntry};
