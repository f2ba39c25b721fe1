//! Storage backend traits.
//!
//! A repository is bound to one object backend and one reference backend.
//! The object database and reference database above them only talk to
//! these traits, so in-memory, filesystem, and key-value backends are
//! interchangeable without changing object identity.

use crate::{Object, ObjectHeader, ObjectId, RefTarget, ReflogEntry, Result};
use std::sync::Arc;

/// Persistence for immutable, content-addressed objects.
pub trait ObjectBackend: Send + Sync {
    /// Checks if an object exists.
    fn exists(&self, id: &ObjectId) -> Result<bool>;

    /// Reads an object, or `None` if absent.
    ///
    /// The returned object's ID is recomputed from the stored bytes; callers
    /// compare it with `id` to detect corruption.
    fn read(&self, id: &ObjectId) -> Result<Option<Object>>;

    /// Reads an object's type and size without transferring the payload.
    fn read_header(&self, id: &ObjectId) -> Result<Option<ObjectHeader>>;

    /// Stores an object under its ID. Writing an object that already exists
    /// succeeds without rewriting it.
    fn write(&self, object: &Object) -> Result<ObjectId>;

    /// Flush any pending writes to durable storage.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Condition a reference write is checked against, atomically with the write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefExpectation {
    /// Write unconditionally.
    Any,
    /// The reference must not exist.
    Absent,
    /// The reference must currently hold exactly this target.
    Exactly(RefTarget),
}

impl RefExpectation {
    /// Returns true if `current` satisfies the expectation.
    pub fn is_met_by(&self, current: Option<&RefTarget>) -> bool {
        match self {
            Self::Any => true,
            Self::Absent => current.is_none(),
            Self::Exactly(expected) => current == Some(expected),
        }
    }
}

/// Persistence for references and their reflogs.
///
/// Every mutating call must be atomic with respect to other callers of the
/// same name: filesystem backends use per-name lock files, key-value
/// backends use compare-and-set.
pub trait RefBackend: Send + Sync {
    /// Reads a reference target, or `None` if absent.
    fn get(&self, name: &str) -> Result<Option<RefTarget>>;

    /// Writes a reference if `expected` holds, appending `log` to its
    /// reflog in the same step. Returns false if the expectation failed.
    fn set(
        &self,
        name: &str,
        target: &RefTarget,
        expected: &RefExpectation,
        log: Option<&ReflogEntry>,
    ) -> Result<bool>;

    /// Removes a reference and its reflog if `expected` holds. Returns false
    /// if the reference was absent or the expectation failed.
    fn delete(&self, name: &str, expected: &RefExpectation) -> Result<bool>;

    /// Lists references whose names start with `prefix`, sorted byte-wise
    /// by name.
    fn iterate(&self, prefix: &str) -> Result<Vec<(String, RefTarget)>>;

    /// Moves a reference and its reflog to a new name, appending `log`
    /// under the new name.
    ///
    /// Fails with `InvalidReference` if `old` does not exist and with
    /// `AlreadyExists` if `new` exists and `force` is false.
    fn rename(&self, old: &str, new: &str, force: bool, log: Option<&ReflogEntry>) -> Result<()>;

    /// Reads a reference's reflog, oldest entry first.
    fn read_log(&self, name: &str) -> Result<Vec<ReflogEntry>>;

    /// Appends one entry to a reference's reflog.
    fn append_log(&self, name: &str, entry: &ReflogEntry) -> Result<()>;

    /// Returns true if the reference has at least one reflog entry.
    fn has_log(&self, name: &str) -> Result<bool> {
        Ok(!self.read_log(name)?.is_empty())
    }
}

// Implement ObjectBackend for Arc<T> where T: ObjectBackend
impl<T: ObjectBackend + ?Sized> ObjectBackend for Arc<T> {
    fn exists(&self, id: &ObjectId) -> Result<bool> {
        (**self).exists(id)
    }

    fn read(&self, id: &ObjectId) -> Result<Option<Object>> {
        (**self).read(id)
    }

    fn read_header(&self, id: &ObjectId) -> Result<Option<ObjectHeader>> {
        (**self).read_header(id)
    }

    fn write(&self, object: &Object) -> Result<ObjectId> {
        (**self).write(object)
    }

    fn flush(&self) -> Result<()> {
        (**self).flush()
    }
}

// Implement RefBackend for Arc<T> where T: RefBackend
impl<T: RefBackend + ?Sized> RefBackend for Arc<T> {
    fn get(&self, name: &str) -> Result<Option<RefTarget>> {
        (**self).get(name)
    }

    fn set(
        &self,
        name: &str,
        target: &RefTarget,
        expected: &RefExpectation,
        log: Option<&ReflogEntry>,
    ) -> Result<bool> {
        (**self).set(name, target, expected, log)
    }

    fn delete(&self, name: &str, expected: &RefExpectation) -> Result<bool> {
        (**self).delete(name, expected)
    }

    fn iterate(&self, prefix: &str) -> Result<Vec<(String, RefTarget)>> {
        (**self).iterate(prefix)
    }

    fn rename(
        &self,
        old: &str,
        new: &str,
        force: bool,
        log: Option<&ReflogEntry>,
    ) -> Result<()> {
        (**self).rename(old, new, force, log)
    }

    fn read_log(&self, name: &str) -> Result<Vec<ReflogEntry>> {
        (**self).read_log(name)
    }

    fn append_log(&self, name: &str, entry: &ReflogEntry) -> Result<()> {
        (**self).append_log(name, entry)
    }

    fn has_log(&self, name: &str) -> Result<bool> {
        (**self).has_log(name)
    }
}
