//! In-memory backend for objects and references.
//!
//! Suitable for tests and short-lived repositories. A single lock guards
//! each reference and its reflog, so every mutation is atomic.

use crate::traits::{ObjectBackend, RefBackend, RefExpectation};
use crate::{Object, ObjectHeader, ObjectId, RefTarget, ReflogEntry, Result, StorageError};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Thread-safe in-memory object and reference storage.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    /// Objects indexed by their ID.
    objects: RwLock<HashMap<ObjectId, Object>>,
    /// References and reflogs, guarded together.
    refs: RwLock<RefTable>,
}

#[derive(Debug, Default)]
struct RefTable {
    /// Sorted so iteration is byte-wise ordered.
    refs: BTreeMap<String, RefTarget>,
    logs: HashMap<String, Vec<ReflogEntry>>,
}

impl MemoryBackend {
    /// Creates a new empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if no objects are stored.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Lists all object IDs.
    pub fn list_objects(&self) -> Vec<ObjectId> {
        self.objects.read().keys().copied().collect()
    }

    /// Stores an object under an arbitrary key, bypassing content addressing.
    #[cfg(test)]
    pub(crate) fn insert_unchecked(&self, id: ObjectId, object: Object) {
        self.objects.write().insert(id, object);
    }
}

impl ObjectBackend for MemoryBackend {
    fn exists(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.objects.read().contains_key(id))
    }

    fn read(&self, id: &ObjectId) -> Result<Option<Object>> {
        Ok(self.objects.read().get(id).cloned())
    }

    fn read_header(&self, id: &ObjectId) -> Result<Option<ObjectHeader>> {
        Ok(self.objects.read().get(id).map(Object::header))
    }

    fn write(&self, object: &Object) -> Result<ObjectId> {
        self.objects
            .write()
            .entry(object.id)
            .or_insert_with(|| object.clone());
        Ok(object.id)
    }
}

impl RefBackend for MemoryBackend {
    fn get(&self, name: &str) -> Result<Option<RefTarget>> {
        Ok(self.refs.read().refs.get(name).cloned())
    }

    fn set(
        &self,
        name: &str,
        target: &RefTarget,
        expected: &RefExpectation,
        log: Option<&ReflogEntry>,
    ) -> Result<bool> {
        let mut table = self.refs.write();
        if !expected.is_met_by(table.refs.get(name)) {
            return Ok(false);
        }
        table.refs.insert(name.to_string(), target.clone());
        if let Some(entry) = log {
            table
                .logs
                .entry(name.to_string())
                .or_default()
                .push(entry.clone());
        }
        Ok(true)
    }

    fn delete(&self, name: &str, expected: &RefExpectation) -> Result<bool> {
        let mut table = self.refs.write();
        let current = table.refs.get(name);
        if current.is_none() || !expected.is_met_by(current) {
            return Ok(false);
        }
        table.refs.remove(name);
        table.logs.remove(name);
        Ok(true)
    }

    fn iterate(&self, prefix: &str) -> Result<Vec<(String, RefTarget)>> {
        Ok(self
            .refs
            .read()
            .refs
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, target)| (name.clone(), target.clone()))
            .collect())
    }

    fn rename(
        &self,
        old: &str,
        new: &str,
        force: bool,
        log: Option<&ReflogEntry>,
    ) -> Result<()> {
        let mut table = self.refs.write();
        if !table.refs.contains_key(old) {
            return Err(StorageError::InvalidReference(format!(
                "cannot rename missing reference {old}"
            )));
        }
        if old != new && table.refs.contains_key(new) && !force {
            return Err(StorageError::AlreadyExists(new.to_string()));
        }

        let Some(target) = table.refs.remove(old) else {
            return Err(StorageError::InvalidReference(old.to_string()));
        };
        let mut entries = table.logs.remove(old).unwrap_or_default();
        if let Some(entry) = log {
            entries.push(entry.clone());
        }

        table.refs.insert(new.to_string(), target);
        if entries.is_empty() {
            table.logs.remove(new);
        } else {
            table.logs.insert(new.to_string(), entries);
        }
        Ok(())
    }

    fn read_log(&self, name: &str) -> Result<Vec<ReflogEntry>> {
        Ok(self
            .refs
            .read()
            .logs
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    fn append_log(&self, name: &str, entry: &ReflogEntry) -> Result<()> {
        self.refs
            .write()
            .logs
            .entry(name.to_string())
            .or_default()
            .push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Signature;

    fn entry(old: u8, new: u8) -> ReflogEntry {
        ReflogEntry::new(
            ObjectId::from_bytes([old; 20]),
            ObjectId::from_bytes([new; 20]),
            Signature::from_unix("test", "test@example.com", 1, 0).unwrap(),
            None,
        )
    }

    fn direct(byte: u8) -> RefTarget {
        RefTarget::Direct(ObjectId::from_bytes([byte; 20]))
    }

    #[test]
    fn test_object_roundtrip() {
        let backend = MemoryBackend::new();
        let blob = Object::blob(b"Hello, World!".to_vec());

        let id = backend.write(&blob).unwrap();
        assert_eq!(id, blob.id);
        assert!(backend.exists(&id).unwrap());

        let read = backend.read(&id).unwrap().unwrap();
        assert_eq!(read.data.as_ref(), b"Hello, World!");

        let header = backend.read_header(&id).unwrap().unwrap();
        assert_eq!(header.size, 13);
    }

    #[test]
    fn test_duplicate_write_is_idempotent() {
        let backend = MemoryBackend::new();
        let blob = Object::blob(b"same".to_vec());
        backend.write(&blob).unwrap();
        backend.write(&blob).unwrap();
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn test_missing_object() {
        let backend = MemoryBackend::new();
        let id = ObjectId::from_bytes([9u8; 20]);
        assert!(!backend.exists(&id).unwrap());
        assert!(backend.read(&id).unwrap().is_none());
        assert!(backend.read_header(&id).unwrap().is_none());
        assert!(backend.is_empty());
    }

    #[test]
    fn test_set_with_expectations() {
        let backend = MemoryBackend::new();
        let name = "refs/heads/main";

        assert!(backend
            .set(name, &direct(1), &RefExpectation::Absent, None)
            .unwrap());
        assert!(!backend
            .set(name, &direct(2), &RefExpectation::Absent, None)
            .unwrap());
        assert!(!backend
            .set(name, &direct(2), &RefExpectation::Exactly(direct(3)), None)
            .unwrap());
        assert!(backend
            .set(name, &direct(2), &RefExpectation::Exactly(direct(1)), Some(&entry(1, 2)))
            .unwrap());

        assert_eq!(backend.get(name).unwrap(), Some(direct(2)));
        assert_eq!(backend.read_log(name).unwrap(), vec![entry(1, 2)]);
    }

    #[test]
    fn test_delete_purges_log() {
        let backend = MemoryBackend::new();
        let name = "refs/heads/gone";
        backend
            .set(name, &direct(1), &RefExpectation::Any, Some(&entry(0, 1)))
            .unwrap();
        assert!(backend.has_log(name).unwrap());

        assert!(!backend
            .delete(name, &RefExpectation::Exactly(direct(5)))
            .unwrap());
        assert!(backend.delete(name, &RefExpectation::Any).unwrap());
        assert!(backend.get(name).unwrap().is_none());
        assert!(!backend.has_log(name).unwrap());
        assert!(!backend.delete(name, &RefExpectation::Any).unwrap());
    }

    #[test]
    fn test_iterate_prefix_sorted() {
        let backend = MemoryBackend::new();
        for name in ["refs/tags/v1", "refs/heads/b", "refs/heads/a", "HEAD"] {
            backend
                .set(name, &direct(1), &RefExpectation::Any, None)
                .unwrap();
        }

        let heads: Vec<_> = backend
            .iterate("refs/heads/")
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(heads, vec!["refs/heads/a", "refs/heads/b"]);

        assert_eq!(backend.iterate("").unwrap().len(), 4);
    }

    #[test]
    fn test_rename_moves_log() {
        let backend = MemoryBackend::new();
        backend
            .set("refs/heads/old", &direct(1), &RefExpectation::Any, Some(&entry(0, 1)))
            .unwrap();

        backend
            .rename("refs/heads/old", "refs/heads/new", false, Some(&entry(1, 1)))
            .unwrap();

        assert!(backend.get("refs/heads/old").unwrap().is_none());
        assert_eq!(backend.get("refs/heads/new").unwrap(), Some(direct(1)));
        assert_eq!(
            backend.read_log("refs/heads/new").unwrap(),
            vec![entry(0, 1), entry(1, 1)]
        );
        assert!(!backend.has_log("refs/heads/old").unwrap());
    }

    #[test]
    fn test_rename_conflicts() {
        let backend = MemoryBackend::new();
        backend
            .set("refs/heads/a", &direct(1), &RefExpectation::Any, None)
            .unwrap();
        backend
            .set("refs/heads/b", &direct(2), &RefExpectation::Any, None)
            .unwrap();

        let err = backend
            .rename("refs/heads/a", "refs/heads/b", false, None)
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));

        let err = backend
            .rename("refs/heads/missing", "refs/heads/c", false, None)
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidReference(_)));

        backend
            .rename("refs/heads/a", "refs/heads/b", true, None)
            .unwrap();
        assert_eq!(backend.get("refs/heads/b").unwrap(), Some(direct(1)));
    }
}
