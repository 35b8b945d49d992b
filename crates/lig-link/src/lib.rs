//! Cross-document linking for Ligature.
//!
//! A document may reference objects that live in other documents
//! ("libraries"). Reading it leaves placeholders for those objects; the
//! [`Linker`] opens each library once, reads the referenced objects into the
//! placeholders' slots, and follows their own references until nothing new
//! turns up.
//!
//! # Key Types
//!
//! - [`Linker`] -- Worklist expansion over a forest
//! - [`DocumentResolver`] -- Library path to document ([`FsResolver`], [`MemoryResolver`])
//! - [`DocumentCache`] -- Documents opened during one session, by canonical path
//!
//! # Design Rules
//!
//! 1. A canonical path is opened at most once per session.
//! 2. A library that is the main document resolves against the main database.
//! 3. Unresolved weak placeholders are dropped; strong ones stay as `Missing`.

pub mod cache;
pub mod error;
pub mod linker;
pub mod resolver;

pub use cache::DocumentCache;
pub use error::{LinkError, LinkResult};
pub use linker::{LinkOptions, LinkSummary, Linker};
pub use resolver::{join_written, normalize, DocumentResolver, FsResolver, MemoryResolver};
