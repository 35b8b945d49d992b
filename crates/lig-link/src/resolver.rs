//! Finding and opening library documents.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use lig_stream::{BlockStream, ReadOptions};
use tracing::debug;

use crate::error::{LinkError, LinkResult};

/// Maps library paths to openable documents.
pub trait DocumentResolver: Send + Sync {
    /// Canonical location of `path`, used as the document's identity.
    fn canonicalize(&self, path: &Path) -> LinkResult<PathBuf>;

    /// Open a document at a canonical location.
    fn open(&self, path: &Path, options: ReadOptions) -> LinkResult<BlockStream>;

    /// Canonical location of a library path as written in the document at
    /// `referrer`.
    fn resolve(&self, written: &str, referrer: &Path) -> LinkResult<PathBuf> {
        self.canonicalize(&join_written(written, referrer))
    }
}

/// Apply the `//` convention: a path starting with `//` is relative to the
/// directory of the document that wrote it.
pub fn join_written(written: &str, referrer: &Path) -> PathBuf {
    match written.strip_prefix("//") {
        Some(rest) => referrer.parent().unwrap_or(Path::new("")).join(rest),
        None => PathBuf::from(written),
    }
}

/// Resolve `.` and `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// FsResolver
// ---------------------------------------------------------------------------

/// Documents on the local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsResolver;

impl DocumentResolver for FsResolver {
    fn canonicalize(&self, path: &Path) -> LinkResult<PathBuf> {
        std::fs::canonicalize(path).map_err(|e| LinkError::Unresolvable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn open(&self, path: &Path, options: ReadOptions) -> LinkResult<BlockStream> {
        debug!(path = %path.display(), "opening library document");
        BlockStream::from_path(path, options).map_err(|e| LinkError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryResolver
// ---------------------------------------------------------------------------

/// Documents held in memory under virtual paths. Counts opens per path.
#[derive(Debug, Default)]
pub struct MemoryResolver {
    documents: HashMap<PathBuf, (Vec<u8>, AtomicUsize)>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a document.
    pub fn insert(&mut self, path: impl AsRef<Path>, bytes: Vec<u8>) {
        self.documents
            .insert(normalize(path.as_ref()), (bytes, AtomicUsize::new(0)));
    }

    /// Chaining form of [`insert`](Self::insert).
    pub fn with(mut self, path: impl AsRef<Path>, bytes: Vec<u8>) -> Self {
        self.insert(path, bytes);
        self
    }

    /// How many times the document at `path` has been opened.
    pub fn opens(&self, path: impl AsRef<Path>) -> usize {
        self.documents
            .get(&normalize(path.as_ref()))
            .map_or(0, |(_, n)| n.load(Ordering::Relaxed))
    }
}

impl DocumentResolver for MemoryResolver {
    fn canonicalize(&self, path: &Path) -> LinkResult<PathBuf> {
        let path = normalize(path);
        if self.documents.contains_key(&path) {
            Ok(path)
        } else {
            Err(LinkError::Unresolvable {
                path: path.display().to_string(),
                reason: "no such document".into(),
            })
        }
    }

    fn open(&self, path: &Path, options: ReadOptions) -> LinkResult<BlockStream> {
        let (bytes, opens) =
            self.documents
                .get(&normalize(path))
                .ok_or_else(|| LinkError::Unreadable {
                    path: path.to_path_buf(),
                    reason: "no such document".into(),
                })?;
        opens.fetch_add(1, Ordering::Relaxed);
        BlockStream::from_bytes(bytes.clone(), options).map_err(|e| LinkError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}
