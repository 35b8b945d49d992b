//! Library documents opened during one load.
//!
//! Each canonical path is opened at most once per session, whether the
//! open succeeds or not. The cache belongs to the load session and goes
//! away with it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lig_stream::{BlockIndex, InterruptFn, ReadOptions, StreamError};
use tracing::{debug, warn};

use crate::error::{LinkError, LinkResult};
use crate::resolver::DocumentResolver;

#[derive(Default)]
pub struct DocumentCache {
    documents: HashMap<PathBuf, Result<Arc<BlockIndex>, String>>,
    opened: usize,
    interrupt: Option<InterruptFn>,
}

impl std::fmt::Debug for DocumentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCache")
            .field("documents", &self.documents.len())
            .field("opened", &self.opened)
            .field("interrupt", &self.interrupt.is_some())
            .finish()
    }
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Poll `check` between blocks of every document opened from now on.
    pub fn set_interrupt(&mut self, check: InterruptFn) {
        self.interrupt = Some(check);
    }

    /// The index of the document at a canonical path, opening it on first
    /// request. A failed open is remembered and reported again.
    pub fn get_or_open(
        &mut self,
        path: &Path,
        resolver: &dyn DocumentResolver,
        options: ReadOptions,
    ) -> LinkResult<Arc<BlockIndex>> {
        if let Some(cached) = self.documents.get(path) {
            return cached.clone().map_err(|reason| LinkError::Unreadable {
                path: path.to_path_buf(),
                reason,
            });
        }
        let opened = resolver.open(path, options).and_then(|mut stream| {
            if let Some(check) = &self.interrupt {
                stream.set_interrupt(check.clone());
            }
            BlockIndex::build(stream).map_err(LinkError::from)
        });
        match opened {
            Ok(index) => {
                let index = Arc::new(index);
                self.opened += 1;
                debug!(path = %path.display(), groups = index.groups().len(), "library document indexed");
                self.documents.insert(path.to_path_buf(), Ok(index.clone()));
                Ok(index)
            }
            // Interruption is not a property of the document.
            Err(LinkError::Stream(StreamError::Interrupted)) => {
                Err(LinkError::Stream(StreamError::Interrupted))
            }
            Err(e) => {
                let reason = match e {
                    LinkError::Unreadable { reason, .. } => reason,
                    other => other.to_string(),
                };
                warn!(path = %path.display(), %reason, "library document unreadable");
                self.documents.insert(path.to_path_buf(), Err(reason.clone()));
                Err(LinkError::Unreadable {
                    path: path.to_path_buf(),
                    reason,
                })
            }
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.documents.contains_key(path)
    }

    /// Documents opened successfully.
    pub fn opened(&self) -> usize {
        self.opened
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::MemoryResolver;
    use lig_schema::{Layout, SchemaBuilder};
    use lig_stream::DocumentWriter;

    fn document() -> Vec<u8> {
        let schema = SchemaBuilder::new(Layout::native())
            .with_core_types()
            .build()
            .unwrap();
        DocumentWriter::new(&schema).finish()
    }

    #[test]
    fn opens_each_path_once() {
        let resolver = MemoryResolver::new()
            .with("mem/a.lig", document())
            .with("mem/bad.lig", b"garbage".to_vec());
        let mut cache = DocumentCache::new();
        let a = Path::new("mem/a.lig");
        let first = cache.get_or_open(a, &resolver, ReadOptions::default()).unwrap();
        let second = cache.get_or_open(a, &resolver, ReadOptions::default()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(resolver.opens(a), 1);

        let bad = Path::new("mem/bad.lig");
        assert!(cache.get_or_open(bad, &resolver, ReadOptions::default()).is_err());
        assert!(cache.get_or_open(bad, &resolver, ReadOptions::default()).is_err());
        assert_eq!(resolver.opens(bad), 1);
        assert_eq!(cache.opened(), 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn interrupted_open_is_not_remembered() {
        let resolver = MemoryResolver::new().with("mem/a.lig", document());
        let a = Path::new("mem/a.lig");
        let mut cache = DocumentCache::new();
        cache.set_interrupt(Arc::new(|| true));
        let err = cache.get_or_open(a, &resolver, ReadOptions::default()).unwrap_err();
        assert!(matches!(err, LinkError::Stream(StreamError::Interrupted)));
        assert!(err.is_fatal());
        assert!(!cache.contains(a));

        cache.set_interrupt(Arc::new(|| false));
        assert!(cache.get_or_open(a, &resolver, ReadOptions::default()).is_ok());
        assert_eq!(resolver.opens(a), 2);
    }
}
