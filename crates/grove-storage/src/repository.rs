//! A repository: one object database and one reference database, bound to
//! their backends at construction.

use crate::branch::Branches;
use crate::cache::CachedObjectBackend;
use crate::config::{BackendKind, Identity, StoreConfig};
use crate::filesystem::FilesystemBackend;
use crate::memory::MemoryBackend;
use crate::odb::Odb;
use crate::refname::HEAD;
use crate::refs::RefDb;
use crate::tag::{TagAnnotation, Tags};
use crate::traits::{ObjectBackend, RefBackend};
use crate::{Object, ObjectId, ObjectType, RefKind, RefTarget, Reference, Result, StorageError};
use std::sync::Arc;
use tracing::{debug, info};

/// Object and reference storage for one repository.
#[derive(Debug, Clone)]
pub struct Repository {
    odb: Odb,
    refs: RefDb,
}

impl Repository {
    /// Binds a repository to an object backend and a reference backend.
    pub fn new(
        objects: Arc<dyn ObjectBackend>,
        refs: Arc<dyn RefBackend>,
        identity: Identity,
    ) -> Self {
        Self {
            odb: Odb::new(objects),
            refs: RefDb::new(refs, identity),
        }
    }

    /// A fresh repository held entirely in memory.
    pub fn in_memory() -> Self {
        let backend = Arc::new(MemoryBackend::new());
        Self::new(backend.clone(), backend, Identity::default())
    }

    /// Opens the repository described by `config`.
    ///
    /// A store with no `HEAD` gets one pointing at the configured initial
    /// branch.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let (objects, refs): (Arc<dyn ObjectBackend>, Arc<dyn RefBackend>) = match config.backend
        {
            BackendKind::Memory => {
                let backend = Arc::new(MemoryBackend::new());
                (backend.clone(), backend)
            }
            BackendKind::Filesystem => {
                let path = require_path(config)?;
                let backend = Arc::new(FilesystemBackend::with_compression(
                    path,
                    config.compression,
                )?);
                (backend.clone(), backend)
            }
            #[cfg(feature = "rocksdb-backend")]
            BackendKind::Rocksdb => {
                let path = require_path(config)?;
                let backend = Arc::new(crate::rocksdb::RocksDbStorage::open_default(path)?);
                (backend.clone(), backend)
            }
            #[cfg(not(feature = "rocksdb-backend"))]
            BackendKind::Rocksdb => {
                return Err(StorageError::InvalidConfig(
                    "built without the rocksdb-backend feature".to_string(),
                ))
            }
        };

        let objects: Arc<dyn ObjectBackend> = match config.cache_capacity {
            Some(capacity) => Arc::new(CachedObjectBackend::with_capacity(objects, capacity)),
            None => objects,
        };

        let repo = Self::new(objects, refs, config.identity.clone());
        if repo.refs.head()?.is_none() {
            let initial = config.initial_ref();
            repo.refs
                .create(HEAD, RefTarget::Symbolic(initial.clone()), false)?;
            debug!(branch = %initial, "initialized HEAD");
        }
        info!(backend = ?config.backend, "opened repository");
        Ok(repo)
    }

    /// The object database.
    pub fn odb(&self) -> &Odb {
        &self.odb
    }

    /// The reference database.
    pub fn refs(&self) -> &RefDb {
        &self.refs
    }

    /// The repository's tags.
    pub fn tags(&self) -> Tags<'_> {
        Tags::new(self)
    }

    /// The repository's branches.
    pub fn branches(&self) -> Branches<'_> {
        Branches::new(self)
    }

    /// Reads an object.
    pub fn lookup(&self, id: &ObjectId) -> Result<Object> {
        self.odb.read(id)
    }

    /// Stores an object.
    pub fn write(
        &self,
        data: impl Into<bytes::Bytes>,
        object_type: ObjectType,
    ) -> Result<ObjectId> {
        self.odb.write(data, object_type)
    }

    /// Peels a reference to the first non-tag object it leads to.
    ///
    /// Returns `None` when `reference` is direct and already points at a
    /// non-tag object, so callers can tell "already terminal" from "peeled".
    /// A symbolic reference always yields its resolved, peeled ID.
    pub fn peel(&self, reference: &Reference) -> Result<Option<ObjectId>> {
        let resolved = self.refs.resolve(reference)?;
        let id = match resolved.target() {
            RefTarget::Direct(id) => *id,
            RefTarget::Symbolic(name) => return Err(StorageError::InvalidReference(name.clone())),
        };

        let peeled = self.peel_id(&id)?;
        if peeled == id && reference.kind() == RefKind::Direct {
            return Ok(None);
        }
        Ok(Some(peeled))
    }

    /// Follows annotated tags from `id` until a non-tag object is reached.
    pub fn peel_id(&self, id: &ObjectId) -> Result<ObjectId> {
        let mut current = *id;
        loop {
            let header = self.odb.read_header(&current)?;
            if header.object_type != ObjectType::Tag {
                return Ok(current);
            }
            current = TagAnnotation::lookup(&self.odb, &current)?.target();
        }
    }
}

fn require_path(config: &StoreConfig) -> Result<&std::path::Path> {
    config.path.as_deref().ok_or_else(|| {
        StorageError::InvalidConfig(format!("{:?} backend requires a path", config.backend))
    })
}
