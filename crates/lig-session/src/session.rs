//! Opening a document and loading it into a forest.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use lig_graph::{
    link_forest, Builder, DataBlock, DataContents, Forest, LoadReport, Object, ObjectMaps,
    TypeRegistry,
};
use lig_link::{DocumentCache, DocumentResolver, FsResolver, Linker};
use lig_schema::Schema;
use lig_stream::{BlockStream, FileHeader, InterruptFn, MemFile, Payload, StreamError};
use lig_types::{DocumentId, Handle, TypeCode};
use tracing::{debug, info};

use crate::config::LoadConfig;
use crate::error::{LoadError, LoadResult};

/// Where the main document comes from.
#[derive(Clone, Debug)]
pub enum DocumentSource {
    /// A file on disk, plain or gzip-wrapped.
    Path(PathBuf),
    /// Container bytes. `name` is the path library references are
    /// resolved against.
    Bytes { name: PathBuf, bytes: Vec<u8> },
    /// An in-memory snapshot.
    Memfile { name: PathBuf, file: Arc<MemFile> },
}

impl DocumentSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn bytes(name: impl Into<PathBuf>, bytes: Vec<u8>) -> Self {
        Self::Bytes {
            name: name.into(),
            bytes,
        }
    }

    pub fn memfile(name: impl Into<PathBuf>, file: Arc<MemFile>) -> Self {
        Self::Memfile {
            name: name.into(),
            file,
        }
    }

    /// The path the document is known by.
    pub fn name(&self) -> &Path {
        match self {
            Self::Path(path) => path,
            Self::Bytes { name, .. } | Self::Memfile { name, .. } => name,
        }
    }
}

/// The result of a load.
///
/// When payloads were deferred the main document's stream is kept so they
/// can be read later with [`materialize`](Self::materialize).
#[derive(Clone, Debug)]
pub struct Loaded {
    pub forest: Forest,
    pub report: LoadReport,
    source: Option<Arc<Mutex<BlockStream>>>,
}

impl Loaded {
    /// Bytes of a raw data block of the main document, reading them from
    /// the source if they were deferred.
    pub fn materialize(&self, block: &DataBlock) -> LoadResult<Vec<u8>> {
        match &block.contents {
            DataContents::Raw { bytes, .. } => Ok(bytes.clone()),
            DataContents::Deferred { offset, len } => {
                let Some(source) = &self.source else {
                    return Err(StreamError::NotSeekable(*offset).into());
                };
                let mut stream = source.lock().unwrap_or_else(PoisonError::into_inner);
                let payload = Payload::Deferred {
                    offset: *offset,
                    len: *len,
                };
                Ok(stream.materialize(&payload)?)
            }
            DataContents::Structs(_) => Err(LoadError::NotRaw {
                address: block.address,
            }),
        }
    }

    /// Object with this type and name, main document first.
    pub fn lookup_object(&self, code: TypeCode, name: &str) -> Option<&Object> {
        self.handle(code, name).and_then(|h| self.forest.get(h))
    }

    pub fn handle(&self, code: TypeCode, name: &str) -> Option<Handle> {
        self.forest.lookup_object(code, name)
    }

    /// Visit every object listed in database `db`.
    pub fn for_each_object(&self, db: DocumentId, f: impl FnMut(Handle, &Object)) {
        self.forest.for_each_object(db, f);
    }
}

/// One open document plus everything needed to load it.
///
/// The session owns the library document cache and the resolver; both go
/// away when [`load`](Self::load) consumes it.
pub struct LoadSession {
    pub(crate) stream: BlockStream,
    pub(crate) path: PathBuf,
    pub(crate) registry: Arc<TypeRegistry>,
    pub(crate) config: LoadConfig,
    resolver: Box<dyn DocumentResolver>,
    cache: DocumentCache,
}

impl LoadSession {
    /// Open the main document and read its header and schema.
    pub fn open_document(
        source: DocumentSource,
        registry: Arc<TypeRegistry>,
        config: LoadConfig,
    ) -> LoadResult<Self> {
        config.validate()?;
        let options = config.read_options()?;
        let (path, stream) = match source {
            DocumentSource::Path(path) => {
                let stream = BlockStream::from_path(&path, options)?;
                (path, stream)
            }
            DocumentSource::Bytes { name, bytes } => (name, BlockStream::from_bytes(bytes, options)?),
            DocumentSource::Memfile { name, file } => {
                (name, BlockStream::from_memfile(file, options)?)
            }
        };
        debug!(
            path = %path.display(),
            header = ?stream.header(),
            structs = stream.schema().structs().len(),
            "document opened"
        );
        Ok(Self {
            stream,
            path,
            registry,
            config,
            resolver: Box::new(FsResolver),
            cache: DocumentCache::new(),
        })
    }

    /// Use `resolver` instead of the filesystem to find libraries.
    pub fn with_resolver(mut self, resolver: impl DocumentResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Install a cancellation check polled between blocks of the main
    /// document and of every library opened while linking.
    pub fn set_interrupt(&mut self, check: InterruptFn) {
        self.cache.set_interrupt(check.clone());
        self.stream.set_interrupt(check);
    }

    pub fn header(&self) -> FileHeader {
        self.stream.header()
    }

    /// The schema the document was written with.
    pub fn schema(&self) -> &Arc<Schema> {
        self.stream.schema()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// Read the whole document, link its libraries, and return the forest.
    pub fn load(mut self) -> LoadResult<Loaded> {
        let mut forest = Forest::new(self.path.display().to_string());
        let mut report = LoadReport::new();
        report.stats.documents_opened = 1;
        let mut builder =
            Builder::for_stream(self.registry.clone(), DocumentId::MAIN, &self.stream);
        while let Some(group) = self.stream.next_group()? {
            builder.read_group(&group, &mut forest, &mut report)?;
        }
        debug!(
            objects = forest.main().len(),
            libraries = forest.libraries().count(),
            "main document read"
        );
        self.finish(forest, builder, report)
    }

    /// Link libraries, patch pointers, and recount users.
    pub(crate) fn finish(
        mut self,
        mut forest: Forest,
        builder: Builder,
        mut report: LoadReport,
    ) -> LoadResult<Loaded> {
        let mut maps = ObjectMaps::new();
        maps.insert(DocumentId::MAIN, builder.into_objects());

        if self.config.split_libraries {
            forest.split();
        }
        if self.config.expand_libraries {
            let linker = Linker::new(
                self.registry.clone(),
                &*self.resolver,
                &mut self.cache,
                &self.path,
                self.config.link_options()?,
            );
            linker.expand(&mut forest, &mut maps, &mut report)?;
        }
        link_forest(&mut forest, &mut maps, &self.registry, &mut report);
        if self.config.join_after_link {
            forest.join();
        }

        info!(
            path = %self.path.display(),
            objects = forest.arena.len(),
            documents = report.stats.documents_opened,
            problems = report.entries.len(),
            "load finished"
        );
        let source = (self.config.defer_threshold.is_some() && self.stream.is_seekable())
            .then(|| Arc::new(Mutex::new(self.stream)));
        Ok(Loaded {
            forest,
            report,
            source,
        })
    }
}
