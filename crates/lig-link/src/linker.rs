//! Expanding references into library documents.
//!
//! Library objects are read on demand. The linker keeps a worklist of
//! objects read from libraries; following one of their pointers may read
//! another object from the same document (by address) or create a
//! placeholder in a further library. When the worklist drains, every
//! library with placeholders is opened and its placeholders are read in
//! place by name. This repeats until nothing changes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lig_graph::{
    Builder, Forest, LoadReport, Object, ObjectMaps, ReadOutcome, Reference, ReportEntry,
    TypeRegistry,
};
use lig_schema::Pointer;
use lig_stream::{BlockIndex, BlockRef, ReadOptions};
use lig_types::{BlockCode, DocumentId, Handle, ObjectStatus};
use tracing::{debug, info, trace};

use crate::cache::DocumentCache;
use crate::error::LinkResult;
use crate::resolver::{normalize, DocumentResolver};

/// Knobs for one expansion.
#[derive(Clone, Copy, Debug)]
pub struct LinkOptions {
    /// Passes (worklist drain plus placeholder round) before giving up.
    pub max_passes: usize,
    /// Options for opening library documents.
    pub read: ReadOptions,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            max_passes: 64,
            read: ReadOptions::default(),
        }
    }
}

/// Summary of one expansion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkSummary {
    pub passes: usize,
    pub resolved: usize,
    pub missing: usize,
    pub weak_dropped: usize,
}

/// An opened library and what has been read from it.
struct LibraryState {
    builder: Builder,
    index: Arc<BlockIndex>,
    /// Groups already read.
    read: HashSet<usize>,
    /// Library databases declared by this document, by `LI` group.
    declared: HashMap<usize, DocumentId>,
}

impl LibraryState {
    fn new(builder: Builder, index: Arc<BlockIndex>) -> Self {
        Self {
            builder,
            index,
            read: HashSet::new(),
            declared: HashMap::new(),
        }
    }

    fn read_globals(&mut self, forest: &mut Forest, report: &mut LoadReport) -> LinkResult<()> {
        let index = self.index.clone();
        for (g, group) in index.groups_with_code(BlockCode::GLOB) {
            self.read.insert(g);
            self.builder.read_group(group, forest, report)?;
        }
        Ok(())
    }

    /// Read the group at `g` plus anything it needs: the library declaration
    /// before a link placeholder, the embedded objects after an object.
    fn read_at(
        &mut self,
        g: usize,
        forest: &mut Forest,
        report: &mut LoadReport,
    ) -> LinkResult<Vec<ReadOutcome>> {
        if !self.read.insert(g) {
            return Ok(Vec::new());
        }
        let index = self.index.clone();
        let Some(group) = index.group(g) else {
            return Ok(Vec::new());
        };
        if group.code() == BlockCode::LINK_PLACEHOLDER {
            self.enter_declaring_library(g, forest, report)?;
        }
        let outcome = self.builder.read_group(group, forest, report)?;
        let mut outcomes = vec![outcome];
        if let ReadOutcome::Library { library, .. } = outcome {
            self.declared.insert(g, library);
        }
        if matches!(outcome, ReadOutcome::Object(_)) {
            self.read_embedded_after(g, forest, report, &mut outcomes)?;
        }
        Ok(outcomes)
    }

    /// Read the object group `g` into the slot of `target`.
    fn read_into(
        &mut self,
        g: usize,
        target: Handle,
        forest: &mut Forest,
        report: &mut LoadReport,
    ) -> LinkResult<bool> {
        if !self.read.insert(g) {
            return Ok(false);
        }
        let index = self.index.clone();
        let Some(group) = index.group(g) else {
            return Ok(false);
        };
        if !self.builder.read_into(group, forest, target, report)? {
            return Ok(false);
        }
        self.read_embedded_after(g, forest, report, &mut Vec::new())?;
        Ok(true)
    }

    fn read_embedded_after(
        &mut self,
        g: usize,
        forest: &mut Forest,
        report: &mut LoadReport,
        outcomes: &mut Vec<ReadOutcome>,
    ) -> LinkResult<()> {
        let index = self.index.clone();
        for next in g + 1..index.groups().len() {
            let Some(group) = index.group(next) else {
                break;
            };
            let embedded = group
                .code()
                .type_code()
                .and_then(|c| self.builder.registry().get(c))
                .is_some_and(|c| c.embedded);
            if !embedded || !self.read.insert(next) {
                break;
            }
            outcomes.push(self.builder.read_group(group, forest, report)?);
        }
        Ok(())
    }

    fn enter_declaring_library(
        &mut self,
        g: usize,
        forest: &mut Forest,
        report: &mut LoadReport,
    ) -> LinkResult<()> {
        let index = self.index.clone();
        let Some(li) = (0..g)
            .rev()
            .find(|&i| index.group(i).is_some_and(|x| x.code() == BlockCode::LIBRARY))
        else {
            return Ok(());
        };
        if let Some(&library) = self.declared.get(&li) {
            self.builder.enter_library(library);
            return Ok(());
        }
        if let Some(group) = index.group(li) {
            self.read.insert(li);
            if let ReadOutcome::Library { library, .. } =
                self.builder.read_group(group, forest, report)?
            {
                self.declared.insert(li, library);
            }
        }
        Ok(())
    }
}

/// How a library database gets its objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Source {
    /// Its own opened document.
    Opened,
    /// The same document as another database (the main one, or a library
    /// reached under a different path).
    Alias(DocumentId),
    /// Nothing: the document could not be found or read.
    Failed,
}

/// Cross-document expansion over one forest.
pub struct Linker<'a> {
    registry: Arc<TypeRegistry>,
    resolver: &'a dyn DocumentResolver,
    cache: &'a mut DocumentCache,
    options: LinkOptions,
    main_path: PathBuf,
    libraries: HashMap<DocumentId, LibraryState>,
    sources: HashMap<DocumentId, Source>,
    by_path: HashMap<PathBuf, DocumentId>,
    worklist: VecDeque<Handle>,
}

impl<'a> Linker<'a> {
    /// A linker for a forest whose main document was opened from `main_path`.
    pub fn new(
        registry: Arc<TypeRegistry>,
        resolver: &'a dyn DocumentResolver,
        cache: &'a mut DocumentCache,
        main_path: &Path,
        options: LinkOptions,
    ) -> Self {
        let canonical = resolver
            .canonicalize(main_path)
            .unwrap_or_else(|_| normalize(main_path));
        let mut by_path = HashMap::new();
        by_path.insert(canonical, DocumentId::MAIN);
        Self {
            registry,
            resolver,
            cache,
            options,
            main_path: main_path.to_path_buf(),
            libraries: HashMap::new(),
            sources: HashMap::new(),
            by_path,
            worklist: VecDeque::new(),
        }
    }

    /// Queue an object whose references should be followed.
    pub fn push(&mut self, handle: Handle) {
        self.worklist.push_back(handle);
    }

    /// Expand until a fixpoint, then settle unresolved placeholders.
    ///
    /// `maps` holds the main document's address map on entry; the maps of
    /// every library read are added to it.
    pub fn expand(
        mut self,
        forest: &mut Forest,
        maps: &mut ObjectMaps,
        report: &mut LoadReport,
    ) -> LinkResult<LinkSummary> {
        let mut summary = LinkSummary::default();
        loop {
            self.drain(forest, report)?;
            summary.passes += 1;
            let resolved = self.resolve_placeholders(forest, maps, report)?;
            summary.resolved += resolved;
            debug!(pass = summary.passes, resolved, "link pass");
            if resolved == 0 && self.worklist.is_empty() {
                break;
            }
            if summary.passes >= self.options.max_passes {
                report.push(ReportEntry::LinkPassLimit {
                    passes: summary.passes,
                });
                break;
            }
        }

        let (missing, weak_dropped) = settle(forest, report);
        summary.missing = missing;
        summary.weak_dropped = weak_dropped;
        for (doc, state) in self.libraries {
            maps.insert(doc, state.builder.into_objects());
        }
        info!(
            passes = summary.passes,
            resolved = summary.resolved,
            missing,
            weak_dropped,
            "expansion finished"
        );
        Ok(summary)
    }

    // ---------------------------------------------------------------
    // Worklist
    // ---------------------------------------------------------------

    fn drain(&mut self, forest: &mut Forest, report: &mut LoadReport) -> LinkResult<()> {
        while let Some(handle) = self.worklist.pop_front() {
            let Some(object) = forest.get(handle) else {
                continue;
            };
            if object.origin.is_main() || object.is_placeholder() {
                continue;
            }
            let origin = object.origin;
            let references = self.registry.references(object);
            trace!(%handle, references = references.len(), "expanding object");
            for reference in references {
                if let Pointer::Stale(address) = reference.ptr {
                    self.follow(origin, address, &reference, forest, report)?;
                }
            }
        }
        Ok(())
    }

    fn follow(
        &mut self,
        origin: DocumentId,
        address: u64,
        reference: &Reference,
        forest: &mut Forest,
        report: &mut LoadReport,
    ) -> LinkResult<()> {
        let Some(state) = self.libraries.get_mut(&origin) else {
            return Ok(());
        };
        if let Some(entry) = state.builder.objects().get(address) {
            let target = entry.live;
            if !reference.weak {
                if let Some(object) = forest.get_mut(target) {
                    object.weak = false;
                }
            }
            return Ok(());
        }
        let Some(BlockRef { group, data: None }) = state.index.by_address(address) else {
            return Ok(());
        };
        for outcome in state.read_at(group, forest, report)? {
            match outcome {
                ReadOutcome::Object(handle) => self.worklist.push_back(handle),
                ReadOutcome::Placeholder(handle) => {
                    if let Some(object) = forest.get_mut(handle) {
                        object.weak = object.weak || reference.weak;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Placeholders
    // ---------------------------------------------------------------

    fn resolve_placeholders(
        &mut self,
        forest: &mut Forest,
        maps: &mut ObjectMaps,
        report: &mut LoadReport,
    ) -> LinkResult<usize> {
        let mut resolved = 0;
        let docs: Vec<DocumentId> = forest.libraries().map(|db| db.id).collect();
        for doc in docs {
            let pending = pending_placeholders(forest, doc);
            if pending.is_empty() {
                continue;
            }
            match self.source(doc, forest, report)? {
                Source::Opened => {
                    resolved += self.resolve_opened(doc, &pending, forest, maps, report)?
                }
                Source::Alias(target) => {
                    let merged = self.resolve_alias(target, &pending, forest, maps);
                    report.stats.placeholders_resolved += merged;
                    resolved += merged;
                }
                Source::Failed => {
                    for handle in pending {
                        if let Some(object) = forest.get_mut(handle) {
                            object.status = ObjectStatus::Missing;
                        }
                    }
                }
            }
        }
        Ok(resolved)
    }

    /// Decide (once) where a library database's objects come from.
    fn source(
        &mut self,
        doc: DocumentId,
        forest: &mut Forest,
        report: &mut LoadReport,
    ) -> LinkResult<Source> {
        if let Some(source) = self.sources.get(&doc) {
            return Ok(*source);
        }
        let Some(written) = forest.database(doc).map(|db| db.path.clone()) else {
            return Ok(Source::Failed);
        };
        let referrer = self.referrer(forest, doc);
        let source = match self.resolver.resolve(&written, &referrer) {
            Err(e) => {
                report.push(ReportEntry::UnreadableDependency {
                    path: written,
                    reason: e.to_string(),
                });
                Source::Failed
            }
            Ok(canonical) => {
                if let Some(db) = forest.database_mut(doc) {
                    db.resolved = Some(canonical.clone());
                }
                let existing = self.by_path.get(&canonical).copied();
                match existing {
                    Some(other) => {
                        debug!(%doc, %other, path = %canonical.display(), "library aliases an open document");
                        Source::Alias(other)
                    }
                    None => self.open(doc, &written, canonical, forest, report)?,
                }
            }
        };
        self.sources.insert(doc, source);
        Ok(source)
    }

    fn open(
        &mut self,
        doc: DocumentId,
        written: &str,
        canonical: PathBuf,
        forest: &mut Forest,
        report: &mut LoadReport,
    ) -> LinkResult<Source> {
        let fresh = !self.cache.contains(&canonical);
        match self
            .cache
            .get_or_open(&canonical, self.resolver, self.options.read)
        {
            Ok(index) => {
                if fresh {
                    report.stats.documents_opened += 1;
                }
                let builder = Builder::new(
                    self.registry.clone(),
                    doc,
                    index.schema().clone(),
                    self.options.read.address_width,
                );
                let mut state = LibraryState::new(builder, index);
                state.read_globals(forest, report)?;
                self.libraries.insert(doc, state);
                self.by_path.insert(canonical, doc);
                Ok(Source::Opened)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                report.push(ReportEntry::UnreadableDependency {
                    path: written.to_string(),
                    reason: e.to_string(),
                });
                Ok(Source::Failed)
            }
        }
    }

    /// Path of the document that declared library `doc`.
    fn referrer(&self, forest: &Forest, doc: DocumentId) -> PathBuf {
        forest
            .database(doc)
            .and_then(|db| db.owner)
            .and_then(|owner| forest.get(owner))
            .map(|owner| owner.origin)
            .filter(|origin| !origin.is_main())
            .and_then(|origin| forest.database(origin))
            .and_then(|db| db.resolved.clone())
            .unwrap_or_else(|| self.main_path.clone())
    }

    fn resolve_opened(
        &mut self,
        doc: DocumentId,
        pending: &[Handle],
        forest: &mut Forest,
        maps: &mut ObjectMaps,
        report: &mut LoadReport,
    ) -> LinkResult<usize> {
        let mut resolved = 0;
        for &handle in pending {
            let Some((code, name)) = forest.get(handle).map(|o| (o.code, o.name.clone())) else {
                continue;
            };
            let existing = forest
                .database(doc)
                .and_then(|db| db.lookup(code, &name))
                .filter(|h| *h != handle && forest.get(*h).is_some_and(|o| !o.is_placeholder()));
            if let Some(real) = existing {
                self.merge_into(handle, real, forest, maps);
                report.stats.placeholders_resolved += 1;
                resolved += 1;
                continue;
            }
            let Some(state) = self.libraries.get_mut(&doc) else {
                continue;
            };
            let Some(group) = state.index.by_name(code, &name) else {
                trace!(%code, name, "placeholder not in library");
                continue;
            };
            if state.read_into(group, handle, forest, report)? {
                trace!(%handle, %code, name, "placeholder read in place");
                self.worklist.push_back(handle);
                resolved += 1;
            }
        }
        Ok(resolved)
    }

    /// Resolve placeholders of a database that is the same document as
    /// `target` by pointing them at `target`'s objects.
    fn resolve_alias(
        &mut self,
        target: DocumentId,
        pending: &[Handle],
        forest: &mut Forest,
        maps: &mut ObjectMaps,
    ) -> usize {
        let mut resolved = 0;
        for &handle in pending {
            let Some((code, name, weak)) = forest
                .get(handle)
                .map(|o| (o.code, o.name.clone(), o.weak))
            else {
                continue;
            };
            let replacement = match forest.database(target).and_then(|db| db.lookup(code, &name)) {
                Some(found) => found,
                // The main document is complete; what it lacks stays missing.
                None if target.is_main() => continue,
                None => {
                    let placeholder = Object::placeholder(code, &name, target, weak);
                    let Some(created) = forest.insert(target, placeholder) else {
                        continue;
                    };
                    created
                }
            };
            self.merge_into(handle, replacement, forest, maps);
            resolved += 1;
        }
        resolved
    }

    /// Point every reference to placeholder `old` at `new` and free `old`.
    fn merge_into(&mut self, old: Handle, new: Handle, forest: &mut Forest, maps: &mut ObjectMaps) {
        let weak = forest.get(old).is_some_and(|o| o.weak);
        if let Some(object) = forest.get_mut(new) {
            object.weak &= weak;
        }
        let mut moved = maps.retarget(old, new);
        for state in self.libraries.values_mut() {
            moved += state.builder.objects_mut().retarget(&old, new);
        }
        forest.free(old);
        trace!(%old, %new, moved, "placeholder merged");
    }
}

/// Placeholders still waiting in database `doc`.
fn pending_placeholders(forest: &Forest, doc: DocumentId) -> Vec<Handle> {
    let mut pending = Vec::new();
    forest.for_each_object(doc, |handle, object| {
        if object.status == ObjectStatus::Placeholder {
            pending.push(handle);
        }
    });
    pending
}

/// Free unresolved weak placeholders; mark the rest missing and report them.
fn settle(forest: &mut Forest, report: &mut LoadReport) -> (usize, usize) {
    let mut unresolved = Vec::new();
    for db in forest.libraries() {
        for handle in db.handles() {
            if let Some(object) = forest.get(handle) {
                if matches!(object.status, ObjectStatus::Placeholder | ObjectStatus::Missing) {
                    unresolved.push((db.id, handle, object.weak));
                }
            }
        }
    }

    let (mut missing, mut weak_dropped) = (0, 0);
    for (doc, handle, weak) in unresolved {
        if weak {
            forest.free(handle);
            weak_dropped += 1;
            continue;
        }
        let Some(object) = forest.get_mut(handle) else {
            continue;
        };
        object.status = ObjectStatus::Missing;
        missing += 1;
        let (code, name) = (object.code.to_string(), object.name.clone());
        report.push(ReportEntry::MissingRequiredReference {
            document: doc,
            code,
            name,
        });
    }
    report.weak_links_dropped += weak_dropped;
    (missing, weak_dropped)
}
