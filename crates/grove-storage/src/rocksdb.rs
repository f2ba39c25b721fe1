//! RocksDB persistent storage backend.
//!
//! Objects, references and reflogs live in separate column families.
//! Reference writes are compare-and-set under a process-wide mutex, and a
//! reference update and its reflog entry are committed in one `WriteBatch`.

use crate::reflog::ReflogEntry;
use crate::traits::{ObjectBackend, RefBackend, RefExpectation};
use crate::{Object, ObjectHeader, ObjectId, ObjectType, RefTarget, Result, StorageError};
use bytes::Bytes;
use parking_lot::Mutex;
use rocksdb::{
    BlockBasedOptions, ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// RocksDB storage configuration.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Path to the database directory.
    pub path: std::path::PathBuf,

    /// Write buffer size in bytes.
    pub write_buffer_size: usize,

    /// Number of background compaction threads.
    pub background_jobs: i32,

    /// Enable LZ4 compression.
    pub compression_enabled: bool,

    /// Bloom filter bits per key (0 to disable).
    pub bloom_filter_bits: i32,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: std::path::PathBuf::from("./data/rocksdb"),
            write_buffer_size: 64 * 1024 * 1024, // 64 MB
            background_jobs: 4,
            compression_enabled: true,
            bloom_filter_bits: 10,
        }
    }
}

/// Column family names.
const CF_OBJECTS: &str = "objects";
const CF_REFS: &str = "refs";
const CF_LOGS: &str = "logs";

/// RocksDB persistent storage.
pub struct RocksDbStorage {
    /// The RocksDB instance.
    db: DB,

    /// Serializes reference read-check-write sequences.
    ref_lock: Mutex<()>,

    /// Statistics.
    stats: RocksDbStats,
}

/// RocksDB statistics.
#[derive(Debug, Default)]
struct RocksDbStats {
    reads: AtomicU64,
    writes: AtomicU64,
    ref_writes: AtomicU64,
}

/// Snapshot of RocksDB statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RocksDbStatsSnapshot {
    pub reads: u64,
    pub writes: u64,
    pub ref_writes: u64,
}

fn db_err(e: rocksdb::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

impl RocksDbStorage {
    /// Opens or creates a RocksDB database.
    pub fn open(config: RocksDbConfig) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        // Performance tuning
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.increase_parallelism(config.background_jobs);
        opts.set_max_background_jobs(config.background_jobs);

        if config.compression_enabled {
            opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        }

        let mut block_opts = BlockBasedOptions::default();
        if config.bloom_filter_bits > 0 {
            block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        }
        block_opts.set_cache_index_and_filter_blocks(true);
        opts.set_block_based_table_factory(&block_opts);

        let cf_opts = opts.clone();
        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_OBJECTS, cf_opts.clone()),
            ColumnFamilyDescriptor::new(CF_REFS, cf_opts.clone()),
            ColumnFamilyDescriptor::new(CF_LOGS, cf_opts),
        ];

        let db = DB::open_cf_descriptors(&opts, &config.path, cfs).map_err(db_err)?;
        debug!(path = %config.path.display(), "opened rocksdb store");

        Ok(Self {
            db,
            ref_lock: Mutex::new(()),
            stats: RocksDbStats::default(),
        })
    }

    /// Opens with default configuration.
    pub fn open_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(RocksDbConfig {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::Backend(format!("missing column family {name}")))
    }

    /// Returns the number of objects.
    pub fn len(&self) -> Result<usize> {
        Ok(self
            .db
            .iterator_cf(self.cf(CF_OBJECTS)?, IteratorMode::Start)
            .count())
    }

    /// Returns true if the database holds no objects.
    pub fn is_empty(&self) -> Result<bool> {
        let mut iter = self.db.iterator_cf(self.cf(CF_OBJECTS)?, IteratorMode::Start);
        Ok(iter.next().is_none())
    }

    /// Lists all object IDs.
    pub fn list_objects(&self) -> Result<Vec<ObjectId>> {
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(self.cf(CF_OBJECTS)?, IteratorMode::Start) {
            let (key, _) = item.map_err(db_err)?;
            ids.push(ObjectId::from_slice(&key)?);
        }
        Ok(ids)
    }

    /// Compacts the database.
    pub fn compact(&self) -> Result<()> {
        for cf in [CF_OBJECTS, CF_REFS, CF_LOGS] {
            self.db
                .compact_range_cf(self.cf(cf)?, None::<&[u8]>, None::<&[u8]>);
        }
        Ok(())
    }

    /// Returns storage statistics.
    pub fn stats(&self) -> RocksDbStatsSnapshot {
        RocksDbStatsSnapshot {
            reads: self.stats.reads.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
            ref_writes: self.stats.ref_writes.load(Ordering::Relaxed),
        }
    }

    /// Serializes an object for storage: `type_code | payload`.
    fn serialize_object(object: &Object) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + object.data.len());
        buf.push(object.object_type.type_code());
        buf.extend_from_slice(&object.data);
        buf
    }

    fn deserialize_object(data: &[u8]) -> Result<Object> {
        let (&type_code, payload) = data
            .split_first()
            .ok_or_else(|| StorageError::InvalidObject("empty data".to_string()))?;
        let object_type = ObjectType::from_type_code(type_code)?;
        Ok(Object::new(object_type, Bytes::copy_from_slice(payload)))
    }

    fn read_target(&self, name: &str) -> Result<Option<RefTarget>> {
        match self
            .db
            .get_cf(self.cf(CF_REFS)?, name.as_bytes())
            .map_err(db_err)?
        {
            Some(raw) => {
                let raw = String::from_utf8(raw).map_err(|_| {
                    StorageError::InvalidReference(format!("{name}: target is not utf-8"))
                })?;
                RefTarget::decode(&raw).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Log keys are `name \0 seq` with a big-endian sequence, so a prefix
    /// scan yields entries oldest first.
    fn log_prefix(name: &str) -> Vec<u8> {
        let mut key = name.as_bytes().to_vec();
        key.push(0);
        key
    }

    fn log_keys(&self, name: &str) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let prefix = Self::log_prefix(name);
        let mut entries = Vec::new();
        let iter = self.db.iterator_cf(
            self.cf(CF_LOGS)?,
            IteratorMode::From(prefix.as_slice(), Direction::Forward),
        );
        for item in iter {
            let (key, value) = item.map_err(db_err)?;
            if !key.starts_with(&prefix) {
                break;
            }
            entries.push((key, value));
        }
        Ok(entries)
    }

    fn next_log_key(&self, name: &str) -> Result<Vec<u8>> {
        let seq = match self.log_keys(name)?.last() {
            Some((key, _)) => {
                let prefix_len = name.len() + 1;
                let raw: [u8; 8] = key[prefix_len..].try_into().map_err(|_| {
                    StorageError::Backend(format!("malformed reflog key for {name}"))
                })?;
                u64::from_be_bytes(raw) + 1
            }
            None => 0,
        };
        Ok(Self::log_key(name, seq))
    }

    fn log_key(name: &str, seq: u64) -> Vec<u8> {
        let mut key = Self::log_prefix(name);
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }

    fn stage_log_append(
        &self,
        batch: &mut WriteBatch,
        name: &str,
        entry: &ReflogEntry,
    ) -> Result<()> {
        let key = self.next_log_key(name)?;
        batch.put_cf(self.cf(CF_LOGS)?, key, entry.to_line().as_bytes());
        Ok(())
    }

    fn stage_log_delete(&self, batch: &mut WriteBatch, name: &str) -> Result<()> {
        let cf = self.cf(CF_LOGS)?;
        for (key, _) in self.log_keys(name)? {
            batch.delete_cf(cf, key);
        }
        Ok(())
    }
}

impl ObjectBackend for RocksDbStorage {
    fn exists(&self, id: &ObjectId) -> Result<bool> {
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        self.db
            .get_pinned_cf(self.cf(CF_OBJECTS)?, id.as_bytes())
            .map(|opt| opt.is_some())
            .map_err(db_err)
    }

    fn read(&self, id: &ObjectId) -> Result<Option<Object>> {
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        match self
            .db
            .get_pinned_cf(self.cf(CF_OBJECTS)?, id.as_bytes())
            .map_err(db_err)?
        {
            Some(data) => Self::deserialize_object(&data).map(Some),
            None => Ok(None),
        }
    }

    fn read_header(&self, id: &ObjectId) -> Result<Option<ObjectHeader>> {
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        match self
            .db
            .get_pinned_cf(self.cf(CF_OBJECTS)?, id.as_bytes())
            .map_err(db_err)?
        {
            Some(data) => {
                let (&type_code, payload) = data
                    .split_first()
                    .ok_or_else(|| StorageError::InvalidObject("empty data".to_string()))?;
                Ok(Some(ObjectHeader {
                    object_type: ObjectType::from_type_code(type_code)?,
                    size: payload.len(),
                }))
            }
            None => Ok(None),
        }
    }

    fn write(&self, object: &Object) -> Result<ObjectId> {
        if self.exists(&object.id)? {
            return Ok(object.id);
        }
        self.db
            .put_cf(
                self.cf(CF_OBJECTS)?,
                object.id.as_bytes(),
                Self::serialize_object(object),
            )
            .map_err(db_err)?;
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        trace!(oid = %object.id, "stored object");
        Ok(object.id)
    }

    fn flush(&self) -> Result<()> {
        self.db.flush().map_err(db_err)
    }
}

impl RefBackend for RocksDbStorage {
    fn get(&self, name: &str) -> Result<Option<RefTarget>> {
        self.read_target(name)
    }

    fn set(
        &self,
        name: &str,
        target: &RefTarget,
        expected: &RefExpectation,
        log: Option<&ReflogEntry>,
    ) -> Result<bool> {
        let _guard = self.ref_lock.lock();
        if !expected.is_met_by(self.read_target(name)?.as_ref()) {
            return Ok(false);
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_REFS)?, name.as_bytes(), target.encode().as_bytes());
        if let Some(entry) = log {
            self.stage_log_append(&mut batch, name, entry)?;
        }
        self.db.write(batch).map_err(db_err)?;
        self.stats.ref_writes.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    fn delete(&self, name: &str, expected: &RefExpectation) -> Result<bool> {
        let _guard = self.ref_lock.lock();
        let current = self.read_target(name)?;
        if current.is_none() || !expected.is_met_by(current.as_ref()) {
            return Ok(false);
        }

        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_REFS)?, name.as_bytes());
        self.stage_log_delete(&mut batch, name)?;
        self.db.write(batch).map_err(db_err)?;
        self.stats.ref_writes.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    fn iterate(&self, prefix: &str) -> Result<Vec<(String, RefTarget)>> {
        let mut refs = Vec::new();
        let iter = self.db.iterator_cf(
            self.cf(CF_REFS)?,
            IteratorMode::From(prefix.as_bytes(), Direction::Forward),
        );
        for item in iter {
            let (key, value) = item.map_err(db_err)?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let name = String::from_utf8_lossy(&key).into_owned();
            let target = RefTarget::decode(&String::from_utf8_lossy(&value))?;
            refs.push((name, target));
        }
        Ok(refs)
    }

    fn rename(
        &self,
        old: &str,
        new: &str,
        force: bool,
        log: Option<&ReflogEntry>,
    ) -> Result<()> {
        let _guard = self.ref_lock.lock();
        let target = self.read_target(old)?.ok_or_else(|| {
            StorageError::InvalidReference(format!("cannot rename missing reference {old}"))
        })?;
        if old != new && !force && self.read_target(new)?.is_some() {
            return Err(StorageError::AlreadyExists(new.to_string()));
        }

        let refs = self.cf(CF_REFS)?;
        let logs = self.cf(CF_LOGS)?;
        let mut batch = WriteBatch::default();
        let mut seq = 0u64;

        if old != new {
            let moved = self.log_keys(old)?;
            self.stage_log_delete(&mut batch, new)?;
            for (key, value) in &moved {
                batch.delete_cf(logs, key);
                batch.put_cf(logs, Self::log_key(new, seq), value);
                seq += 1;
            }
            batch.delete_cf(refs, old.as_bytes());
            batch.put_cf(refs, new.as_bytes(), target.encode().as_bytes());
        } else {
            seq = self.log_keys(new)?.len() as u64;
        }
        if let Some(entry) = log {
            batch.put_cf(logs, Self::log_key(new, seq), entry.to_line().as_bytes());
        }

        self.db.write(batch).map_err(db_err)?;
        self.stats.ref_writes.fetch_add(1, Ordering::Relaxed);
        debug!(old = %old, new = %new, "renamed reference");
        Ok(())
    }

    fn read_log(&self, name: &str) -> Result<Vec<ReflogEntry>> {
        self.log_keys(name)?
            .into_iter()
            .map(|(_, value)| ReflogEntry::parse_line(&String::from_utf8_lossy(&value)))
            .collect()
    }

    fn append_log(&self, name: &str, entry: &ReflogEntry) -> Result<()> {
        let _guard = self.ref_lock.lock();
        let mut batch = WriteBatch::default();
        self.stage_log_append(&mut batch, name, entry)?;
        self.db.write(batch).map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Signature;
    use tempfile::TempDir;

    fn create_test_db() -> (RocksDbStorage, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = RocksDbStorage::open_default(dir.path()).unwrap();
        (storage, dir)
    }

    fn direct(byte: u8) -> RefTarget {
        RefTarget::Direct(ObjectId::from_bytes([byte; 20]))
    }

    fn entry(old: u8, new: u8) -> ReflogEntry {
        ReflogEntry::new(
            ObjectId::from_bytes([old; 20]),
            ObjectId::from_bytes([new; 20]),
            Signature::from_unix("test", "test@example.com", 1, 0).unwrap(),
            None,
        )
    }

    #[test]
    fn test_put_get() {
        let (storage, _dir) = create_test_db();

        let obj = Object::blob(b"hello world".to_vec());
        let id = storage.write(&obj).unwrap();

        let retrieved = storage.read(&id).unwrap().unwrap();
        assert_eq!(retrieved, obj);

        let header = storage.read_header(&id).unwrap().unwrap();
        assert_eq!(header.object_type, ObjectType::Blob);
        assert_eq!(header.size, 11);
    }

    #[test]
    fn test_list_objects() {
        let (storage, _dir) = create_test_db();

        let objects: Vec<_> = (0..10)
            .map(|i| Object::blob(format!("blob-{}", i).into_bytes()))
            .collect();
        for obj in &objects {
            storage.write(obj).unwrap();
            storage.write(obj).unwrap();
        }

        assert_eq!(storage.len().unwrap(), 10);
        let listed = storage.list_objects().unwrap();
        for obj in &objects {
            assert!(listed.contains(&obj.id));
        }
        assert_eq!(storage.stats().writes, 10);
    }

    #[test]
    fn test_refs_and_logs() {
        let (storage, _dir) = create_test_db();

        assert!(storage
            .set("refs/heads/main", &direct(1), &RefExpectation::Absent, Some(&entry(0, 1)))
            .unwrap());
        assert!(storage
            .set(
                "refs/heads/main",
                &direct(2),
                &RefExpectation::Exactly(direct(1)),
                Some(&entry(1, 2))
            )
            .unwrap());
        assert!(!storage
            .set("refs/heads/main", &direct(3), &RefExpectation::Exactly(direct(1)), None)
            .unwrap());

        assert_eq!(storage.get("refs/heads/main").unwrap(), Some(direct(2)));
        assert_eq!(
            storage.read_log("refs/heads/main").unwrap(),
            vec![entry(0, 1), entry(1, 2)]
        );

        assert!(storage.delete("refs/heads/main", &RefExpectation::Any).unwrap());
        assert!(storage.get("refs/heads/main").unwrap().is_none());
        assert!(!storage.has_log("refs/heads/main").unwrap());
    }

    #[test]
    fn test_log_keys_do_not_bleed_across_names() {
        let (storage, _dir) = create_test_db();
        storage.append_log("refs/heads/a", &entry(0, 1)).unwrap();
        storage.append_log("refs/heads/ab", &entry(0, 2)).unwrap();

        assert_eq!(storage.read_log("refs/heads/a").unwrap(), vec![entry(0, 1)]);
        assert_eq!(storage.read_log("refs/heads/ab").unwrap(), vec![entry(0, 2)]);
    }

    #[test]
    fn test_rename() {
        let (storage, _dir) = create_test_db();
        storage
            .set("refs/heads/old", &direct(1), &RefExpectation::Any, Some(&entry(0, 1)))
            .unwrap();
        storage
            .rename("refs/heads/old", "refs/heads/new", false, Some(&entry(1, 1)))
            .unwrap();

        assert!(storage.get("refs/heads/old").unwrap().is_none());
        assert_eq!(storage.get("refs/heads/new").unwrap(), Some(direct(1)));
        assert_eq!(
            storage.read_log("refs/heads/new").unwrap(),
            vec![entry(0, 1), entry(1, 1)]
        );
        assert!(storage.read_log("refs/heads/old").unwrap().is_empty());
    }

    #[test]
    fn test_iterate_prefix() {
        let (storage, _dir) = create_test_db();
        for name in ["refs/tags/v1", "refs/heads/b", "refs/heads/a"] {
            storage.set(name, &direct(1), &RefExpectation::Any, None).unwrap();
        }
        let names: Vec<_> = storage
            .iterate("refs/heads/")
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["refs/heads/a", "refs/heads/b"]);
    }

    #[test]
    fn test_flush_and_compact() {
        let (storage, _dir) = create_test_db();
        storage.write(&Object::blob(b"test".to_vec())).unwrap();
        storage.flush().unwrap();
        storage.compact().unwrap();
    }
}
