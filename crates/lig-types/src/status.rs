use std::fmt;

use serde::{Deserialize, Serialize};

/// Index of a document database inside a forest.
///
/// `DocumentId::MAIN` is always the document a load session was opened on.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub u32);

impl DocumentId {
    /// The main document of a forest.
    pub const MAIN: DocumentId = DocumentId(0);

    /// Returns `true` for the main document.
    pub fn is_main(&self) -> bool {
        *self == Self::MAIN
    }

    /// Index into the forest's database list.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc{}", self.0)
    }
}

/// Lifecycle tag of a loaded object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectStatus {
    /// Read from its document; nothing unusual.
    #[default]
    Normal,
    /// Stand-in for an external object that has not been read yet.
    Placeholder,
    /// Stand-in whose target could not be found; surfaced to the caller.
    Missing,
    /// Created by this load (incremental reads only).
    NewlyCreated,
    /// Taken over unchanged from the previous snapshot.
    ReusedFromPrevious,
}

impl ObjectStatus {
    /// Whether the object is a stand-in rather than real data.
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder | Self::Missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_document_is_zero() {
        assert!(DocumentId::MAIN.is_main());
        assert!(!DocumentId(3).is_main());
        assert_eq!(DocumentId(3).index(), 3);
    }

    #[test]
    fn placeholder_statuses() {
        assert!(ObjectStatus::Placeholder.is_placeholder());
        assert!(ObjectStatus::Missing.is_placeholder());
        assert!(!ObjectStatus::Normal.is_placeholder());
        assert!(!ObjectStatus::ReusedFromPrevious.is_placeholder());
    }
}
