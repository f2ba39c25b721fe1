//! Object database: content-addressed, immutable object storage.
//!
//! The ODB sits on an [`ObjectBackend`] and guarantees that every object it
//! returns hashes to the ID it was requested under.

use crate::traits::ObjectBackend;
use crate::{Object, ObjectHeader, ObjectId, ObjectType, Result, StorageError};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Handle to an object database.
///
/// Cloning is cheap and clones share the same backend.
#[derive(Clone)]
pub struct Odb {
    backend: Arc<dyn ObjectBackend>,
}

impl Odb {
    /// Creates an object database on top of a backend.
    pub fn new(backend: Arc<dyn ObjectBackend>) -> Self {
        Self { backend }
    }

    /// Stores `data` as an object of `object_type` and returns its ID.
    ///
    /// Writing the same content twice yields the same ID and stores it once.
    pub fn write(&self, data: impl Into<Bytes>, object_type: ObjectType) -> Result<ObjectId> {
        self.write_object(&Object::new(object_type, data))
    }

    /// Stores an already-built object.
    pub fn write_object(&self, object: &Object) -> Result<ObjectId> {
        let id = self.backend.write(object)?;
        debug!(oid = %id, kind = %object.object_type, size = object.size(), "wrote object");
        Ok(id)
    }

    /// Reads an object, failing with `ObjectNotFound` if it is absent and
    /// `CorruptObject` if the stored bytes do not hash to `id`.
    pub fn read(&self, id: &ObjectId) -> Result<Object> {
        self.try_read(id)?
            .ok_or(StorageError::ObjectNotFound(*id))
    }

    /// Reads an object, or `None` if it is absent.
    pub fn try_read(&self, id: &ObjectId) -> Result<Option<Object>> {
        let Some(object) = self.backend.read(id)? else {
            trace!(oid = %id, "object not found");
            return Ok(None);
        };
        if object.id != *id {
            warn!(expected = %id, actual = %object.id, "object content does not match its id");
            return Err(StorageError::CorruptObject {
                expected: *id,
                actual: object.id,
            });
        }
        trace!(oid = %id, kind = %object.object_type, "read object");
        Ok(Some(object))
    }

    /// Reads an object's type and size without its payload.
    pub fn read_header(&self, id: &ObjectId) -> Result<ObjectHeader> {
        self.backend
            .read_header(id)?
            .ok_or(StorageError::ObjectNotFound(*id))
    }

    /// Returns true if the object is stored.
    pub fn exists(&self, id: &ObjectId) -> Result<bool> {
        self.backend.exists(id)
    }

    /// Flushes pending writes in the backend.
    pub fn flush(&self) -> Result<()> {
        self.backend.flush()
    }
}

impl std::fmt::Debug for Odb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Odb").finish_non_exhaustive()
    }
}
