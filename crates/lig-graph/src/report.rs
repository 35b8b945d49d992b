//! Recoverable problems and counters collected during a load.

use serde::{Deserialize, Serialize};
use tracing::warn;

use lig_types::DocumentId;

/// One recovered problem. The object involved was skipped or left
/// unresolved; loading went on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReportEntry {
    /// Object block whose type code has no registered kind.
    UnknownType {
        document: DocumentId,
        code: String,
        address: u64,
    },
    /// Object block whose struct no longer exists at runtime.
    RemovedType {
        document: DocumentId,
        struct_name: String,
        address: u64,
    },
    /// Strong reference to an object its library does not have.
    MissingRequiredReference {
        document: DocumentId,
        code: String,
        name: String,
    },
    /// Library document that could not be opened or read.
    UnreadableDependency { path: String, reason: String },
    /// Pointer whose target has a different type than declared.
    TypeMismatch {
        document: DocumentId,
        address: u64,
        expected: String,
        found: String,
    },
    /// Object block that could not be decoded.
    UndecodableObject {
        document: DocumentId,
        address: u64,
        reason: String,
    },
    /// Expansion stopped at the configured pass limit.
    LinkPassLimit { passes: usize },
}

impl ReportEntry {
    /// Short kind name, as used in serialized reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownType { .. } => "unknown_type",
            Self::RemovedType { .. } => "removed_type",
            Self::MissingRequiredReference { .. } => "missing_required_reference",
            Self::UnreadableDependency { .. } => "unreadable_dependency",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::UndecodableObject { .. } => "undecodable_object",
            Self::LinkPassLimit { .. } => "link_pass_limit",
        }
    }
}

/// Counters describing the work a load did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStats {
    pub objects_read: usize,
    /// Struct instances decoded from bytes (object bodies and data elements).
    pub decoded_structs: usize,
    /// Struct instances that went through reconciliation.
    pub reconstructed: usize,
    pub data_blocks_dropped: usize,
    pub deferred_blocks: usize,
    pub documents_opened: usize,
    pub placeholders_resolved: usize,
    /// Incremental reads: objects kept from the previous forest untouched.
    pub reused: usize,
    /// Incremental reads: objects re-read into their previous handle.
    pub swapped: usize,
    /// Incremental reads: objects with no previous counterpart.
    pub created: usize,
    /// Incremental reads: previous objects no longer present.
    pub freed: usize,
}

/// Everything a load recovered from, plus its counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub entries: Vec<ReportEntry>,
    /// Weak placeholders dropped because their library lacked them.
    pub weak_links_dropped: usize,
    pub stats: LoadStats,
}

impl LoadReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ReportEntry) {
        warn!(kind = entry.kind(), ?entry, "load problem");
        self.entries.push(entry);
    }

    /// No problems recorded (dropped weak links do not count).
    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries of one kind.
    pub fn count(&self, kind: &str) -> usize {
        self.entries.iter().filter(|e| e.kind() == kind).count()
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: LoadReport) {
        self.entries.extend(other.entries);
        self.weak_links_dropped += other.weak_links_dropped;
        let s = &mut self.stats;
        let o = other.stats;
        s.objects_read += o.objects_read;
        s.decoded_structs += o.decoded_structs;
        s.reconstructed += o.reconstructed;
        s.data_blocks_dropped += o.data_blocks_dropped;
        s.deferred_blocks += o.deferred_blocks;
        s.documents_opened += o.documents_opened;
        s.placeholders_resolved += o.placeholders_resolved;
        s.reused += o.reused;
        s.swapped += o.swapped;
        s.created += o.created;
        s.freed += o.freed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_serialize_with_kind_tag() {
        let entry = ReportEntry::MissingRequiredReference {
            document: DocumentId(1),
            code: "OB".into(),
            name: "Bar".into(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kind"], "missing_required_reference");
        assert_eq!(json["name"], "Bar");
        assert_eq!(entry.kind(), "missing_required_reference");
    }

    #[test]
    fn counts_and_merge() {
        let mut report = LoadReport::new();
        assert!(report.is_clean());
        report.push(ReportEntry::LinkPassLimit { passes: 3 });
        let mut other = LoadReport::new();
        other.weak_links_dropped = 2;
        other.stats.objects_read = 5;
        other.push(ReportEntry::UnreadableDependency {
            path: "//x.lig".into(),
            reason: "not found".into(),
        });
        report.merge(other);
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.count("link_pass_limit"), 1);
        assert_eq!(report.weak_links_dropped, 2);
        assert_eq!(report.stats.objects_read, 5);
    }
}
