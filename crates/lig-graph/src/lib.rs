//! Object graph for Ligature.
//!
//! Decoded objects live in one generational arena owned by a [`Forest`].
//! Each document (the opened one and every library it links) gets a
//! [`Database`] listing its objects per type code. A [`Builder`] turns the
//! block groups of one document into objects; [`link_forest`] patches the
//! as-written pointers once every document is in.
//!
//! # Key Types
//!
//! - [`Forest`] / [`Database`] -- Arena plus per-document collections
//! - [`Object`] -- Decoded body, owned data blocks, embedded sub-objects
//! - [`TypeRegistry`] / [`Capabilities`] -- Object kinds the runtime knows
//! - [`Builder`] -- Group-to-object reading for one document
//! - [`ObjectMaps`] -- Per-document address maps used for patching
//! - [`LoadReport`] -- Recovered problems and counters
//!
//! # Design Rules
//!
//! 1. Object-local problems are reported and skipped, never fatal.
//! 2. A placeholder is resolved by reading into its slot, so handles held
//!    by other objects stay valid.
//! 3. After linking no pointer is stale: it refers to a live object or is null.

pub mod builder;
pub mod database;
pub mod error;
pub mod object;
pub mod registry;
pub mod relink;
pub mod report;

pub use builder::{Builder, ReadOutcome};
pub use database::{Database, DatabaseKind, Forest};
pub use error::{GraphError, GraphResult};
pub use object::{DataBlock, DataContents, Object};
pub use registry::{default_visitor, Capabilities, LinkFn, Reference, TypeRegistry, VisitFn};
pub use relink::{link_forest, recount_users, relink, run_link_hooks, ObjectMaps};
pub use report::{LoadReport, LoadStats, ReportEntry};
