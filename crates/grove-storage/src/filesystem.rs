//! On-disk backend using the git directory layout.
//!
//! ```text
//! <root>/objects/ab/cdef...    zlib-compressed loose objects
//! <root>/HEAD, <root>/refs/... one file per loose reference
//! <root>/packed-refs           "<oid> <name>" lines
//! <root>/logs/<name>           one reflog line per change
//! ```
//!
//! Reference mutations take a `<file>.lock` file with exclusive create,
//! write the new value into it, and rename it over the reference.

use crate::compression::{
    decode_loose, decode_loose_header, encode_loose, CompressionLevel, CompressionStats,
    CompressionStatsSnapshot,
};
use crate::refname::{check_name, is_valid_name, REFS_PREFIX};
use crate::reflog::parse_log;
use crate::traits::{ObjectBackend, RefBackend, RefExpectation};
use crate::{Object, ObjectHeader, ObjectId, RefTarget, ReflogEntry, Result, StorageError};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

const OBJECTS_DIR: &str = "objects";
const LOGS_DIR: &str = "logs";
const PACKED_REFS: &str = "packed-refs";
const PACKED_HEADER: &str = "# pack-refs with: peeled sorted \n";
const LOCK_SUFFIX: &str = ".lock";

/// Loose-object and loose-reference storage rooted at a directory.
#[derive(Debug)]
pub struct FilesystemBackend {
    root: PathBuf,
    compression: CompressionLevel,
    stats: CompressionStats,
}

impl FilesystemBackend {
    /// Opens a store at `root`, creating the directory skeleton if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::with_compression(root, CompressionLevel::default())
    }

    /// Opens a store that writes objects at the given zlib level.
    pub fn with_compression(root: impl AsRef<Path>, compression: CompressionLevel) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(OBJECTS_DIR))?;
        fs::create_dir_all(root.join("refs/heads"))?;
        fs::create_dir_all(root.join("refs/tags"))?;
        debug!(root = %root.display(), ?compression, "opened filesystem store");
        Ok(Self {
            root,
            compression,
            stats: CompressionStats::new(),
        })
    }

    /// Returns the store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns compression statistics for objects written and read.
    pub fn compression_stats(&self) -> CompressionStatsSnapshot {
        self.stats.snapshot()
    }

    /// Moves every loose reference under `refs/` into `packed-refs`.
    ///
    /// Returns the number of references packed.
    pub fn pack_refs(&self) -> Result<usize> {
        let mut packed_lock = RefLock::acquire(&self.root.join(PACKED_REFS), PACKED_REFS)?;
        let mut packed = self.read_packed()?;

        let mut moved = Vec::new();
        for (name, path) in self.loose_ref_paths(REFS_PREFIX) {
            match self.read_loose(&name) {
                Ok(Some(RefTarget::Direct(id))) => {
                    packed.insert(name.clone(), id);
                    moved.push((name, path));
                }
                Ok(_) => {}
                Err(e) => warn!(name = %name, error = %e, "not packing unreadable reference"),
            }
        }

        packed_lock.write(render_packed(&packed).as_bytes())?;
        packed_lock.commit()?;

        for (name, path) in &moved {
            remove_if_exists(path)?;
            self.prune_empty_dirs(path, &self.root.join("refs"));
            trace!(name = %name, "packed reference");
        }
        debug!(count = moved.len(), "packed references");
        Ok(moved.len())
    }

    fn object_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join(OBJECTS_DIR).join(&hex[..2]).join(&hex[2..])
    }

    /// Names are joined onto the root, so only grammar-valid names (no
    /// `..`, no leading `/`) map to a path.
    fn ref_path(&self, name: &str) -> Result<PathBuf> {
        check_name(name)?;
        Ok(self.root.join(name))
    }

    fn log_path(&self, name: &str) -> Result<PathBuf> {
        check_name(name)?;
        Ok(self.root.join(LOGS_DIR).join(name))
    }

    /// True if `new` cannot be created as a file: a directory sits at its
    /// path, or a file other than `old` sits at one of its parents.
    fn namespace_conflict(&self, old: &str, new: &str) -> Result<bool> {
        if self.ref_path(new)?.is_dir() || self.log_path(new)?.is_dir() {
            return Ok(true);
        }
        let mut name = new;
        while let Some((parent, _)) = name.rsplit_once('/') {
            if parent != old
                && (self.root.join(parent).is_file()
                    || self.root.join(LOGS_DIR).join(parent).is_file())
            {
                return Ok(true);
            }
            name = parent;
        }
        Ok(false)
    }

    fn read_loose(&self, name: &str) -> Result<Option<RefTarget>> {
        let path = self.ref_path(name)?;
        match fs::read_to_string(&path) {
            Ok(raw) => RefTarget::decode(&raw).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            // A directory at this path is a namespace, not a reference.
            Err(_) if path.is_dir() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_packed(&self) -> Result<BTreeMap<String, ObjectId>> {
        let raw = match fs::read_to_string(self.root.join(PACKED_REFS)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        let mut packed = BTreeMap::new();
        for line in raw.lines() {
            // Comments and peeled-tag lines ("^<oid>") carry no reference.
            if line.is_empty() || line.starts_with('#') || line.starts_with('^') {
                continue;
            }
            let (hex, name) = line.split_once(' ').ok_or_else(|| {
                StorageError::InvalidReference(format!("malformed packed-refs line: {line:?}"))
            })?;
            packed.insert(name.to_string(), ObjectId::from_hex(hex)?);
        }
        Ok(packed)
    }

    fn remove_packed(&self, name: &str) -> Result<()> {
        if !self.read_packed()?.contains_key(name) {
            return Ok(());
        }
        let mut lock = RefLock::acquire(&self.root.join(PACKED_REFS), PACKED_REFS)?;
        let mut packed = self.read_packed()?;
        packed.remove(name);
        lock.write(render_packed(&packed).as_bytes())?;
        lock.commit()
    }

    /// Loose reference files whose names start with `prefix`.
    fn loose_ref_paths(&self, prefix: &str) -> Vec<(String, PathBuf)> {
        let mut found = Vec::new();

        // Top-level refs such as HEAD sit beside the refs/ directory.
        if let Ok(entries) = fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                let is_top_level_ref = !name.is_empty()
                    && name.chars().all(|c| c.is_ascii_uppercase() || c == '_');
                if is_top_level_ref && name.starts_with(prefix) && entry.path().is_file() {
                    found.push((name, entry.path()));
                }
            }
        }

        for entry in WalkDir::new(self.root.join("refs"))
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
        {
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if name.ends_with(LOCK_SUFFIX) || !name.starts_with(prefix) {
                continue;
            }
            found.push((name, entry.into_path()));
        }
        found
    }

    fn append_log_line(&self, name: &str, entry: &ReflogEntry) -> Result<()> {
        let path = self.log_path(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", entry.to_line())?;
        Ok(())
    }

    /// Removes empty directories from `path`'s parent up to, not including, `stop`.
    fn prune_empty_dirs(&self, path: &Path, stop: &Path) {
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == stop || !current.starts_with(stop) {
                break;
            }
            if fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }

    fn remove_ref_files(&self, name: &str) -> Result<()> {
        let path = self.ref_path(name)?;
        remove_if_exists(&path)?;
        self.remove_packed(name)?;
        self.prune_empty_dirs(&path, &self.root.join("refs"));
        Ok(())
    }

    fn remove_log(&self, name: &str) -> Result<()> {
        let path = self.log_path(name)?;
        remove_if_exists(&path)?;
        self.prune_empty_dirs(&path, &self.root.join(LOGS_DIR));
        Ok(())
    }

    /// Moves `from`'s reflog to `to`, replacing any log `to` had. On failure
    /// the log is put back under `from`.
    fn move_log(&self, from: &str, to: &str) -> Result<()> {
        let old_log = self.log_path(from)?;
        if !old_log.is_file() {
            return self.remove_log(to);
        }
        let new_log = self.log_path(to)?;
        let mut staged = old_log.as_os_str().to_owned();
        staged.push(".renaming");
        let staged = PathBuf::from(staged);

        fs::rename(&old_log, &staged)?;
        self.prune_empty_dirs(&old_log, &self.root.join(LOGS_DIR));
        let moved = match new_log.parent() {
            Some(parent) => fs::create_dir_all(parent),
            None => Ok(()),
        }
        .and_then(|()| fs::rename(&staged, &new_log));

        if let Err(e) = moved {
            if let Some(parent) = old_log.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&staged, &old_log)?;
            return Err(e.into());
        }
        Ok(())
    }

    /// Writes `contents` under `new` and moves the reflog, committing the new
    /// reference only once everything else has succeeded.
    fn move_ref(
        &self,
        old: &str,
        new: &str,
        contents: &str,
        log: Option<&ReflogEntry>,
    ) -> Result<()> {
        let mut new_lock = RefLock::acquire(&self.ref_path(new)?, new)?;
        new_lock.write(contents.as_bytes())?;
        self.move_log(old, new)?;

        let finished = match log {
            Some(entry) => self.append_log_line(new, entry),
            None => Ok(()),
        }
        .and_then(|()| new_lock.commit());
        if let Err(e) = finished {
            if let Err(undo) = self.move_log(new, old) {
                warn!(old = %old, new = %new, error = %undo, "could not restore reflog");
            }
            return Err(e);
        }
        Ok(())
    }
}

impl ObjectBackend for FilesystemBackend {
    fn exists(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.object_path(id).is_file())
    }

    fn read(&self, id: &ObjectId) -> Result<Option<Object>> {
        let compressed = match fs::read(self.object_path(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        self.stats.record_decompress();
        trace!(oid = %id, bytes = compressed.len(), "read loose object");
        decode_loose(&compressed).map(Some)
    }

    fn read_header(&self, id: &ObjectId) -> Result<Option<ObjectHeader>> {
        let file = match File::open(self.object_path(id)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        decode_loose_header(BufReader::new(file)).map(Some)
    }

    fn write(&self, object: &Object) -> Result<ObjectId> {
        let path = self.object_path(&object.id);
        if path.is_file() {
            trace!(oid = %object.id, "object already present");
            return Ok(object.id);
        }

        let dir = path
            .parent()
            .ok_or_else(|| StorageError::Backend(format!("bad object path {}", path.display())))?;
        fs::create_dir_all(dir)?;

        let encoded = encode_loose(object, self.compression)?;
        self.stats
            .record_compress(object.data.len() as u64, encoded.len() as u64);

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(&encoded)?;
        temp.as_file().sync_all()?;
        match temp.persist_noclobber(&path) {
            Ok(_) => {}
            // Another writer stored the same content first.
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.error.into()),
        }

        debug!(oid = %object.id, kind = %object.object_type, "wrote loose object");
        Ok(object.id)
    }
}

impl RefBackend for FilesystemBackend {
    fn get(&self, name: &str) -> Result<Option<RefTarget>> {
        if let Some(target) = self.read_loose(name)? {
            return Ok(Some(target));
        }
        Ok(self.read_packed()?.remove(name).map(RefTarget::Direct))
    }

    fn set(
        &self,
        name: &str,
        target: &RefTarget,
        expected: &RefExpectation,
        log: Option<&ReflogEntry>,
    ) -> Result<bool> {
        let mut lock = RefLock::acquire(&self.ref_path(name)?, name)?;
        let current = self.get(name)?;
        if !expected.is_met_by(current.as_ref()) {
            return Ok(false);
        }

        lock.write(format!("{}\n", target.encode()).as_bytes())?;
        if let Some(entry) = log {
            self.append_log_line(name, entry)?;
        }
        lock.commit()?;
        Ok(true)
    }

    fn delete(&self, name: &str, expected: &RefExpectation) -> Result<bool> {
        let path = self.ref_path(name)?;
        let lock = RefLock::acquire(&path, name)?;
        let current = self.get(name)?;
        let deleted = current.is_some() && expected.is_met_by(current.as_ref());
        if deleted {
            remove_if_exists(&path)?;
            self.remove_packed(name)?;
            self.remove_log(name)?;
        }
        drop(lock);
        self.prune_empty_dirs(&path, &self.root.join("refs"));
        Ok(deleted)
    }

    fn iterate(&self, prefix: &str) -> Result<Vec<(String, RefTarget)>> {
        let mut refs: BTreeMap<String, RefTarget> = self
            .read_packed()?
            .into_iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, id)| (name, RefTarget::Direct(id)))
            .collect();

        for (name, _) in self.loose_ref_paths(prefix) {
            if !is_valid_name(&name) {
                continue;
            }
            match self.read_loose(&name) {
                Ok(Some(target)) => {
                    refs.insert(name, target);
                }
                Ok(None) => {}
                Err(e) => warn!(name = %name, error = %e, "skipping unreadable reference"),
            }
        }
        Ok(refs.into_iter().collect())
    }

    fn rename(
        &self,
        old: &str,
        new: &str,
        force: bool,
        log: Option<&ReflogEntry>,
    ) -> Result<()> {
        let old_path = self.ref_path(old)?;
        let mut old_lock = RefLock::acquire(&old_path, old)?;
        let target = self.get(old)?.ok_or_else(|| {
            StorageError::InvalidReference(format!("cannot rename missing reference {old}"))
        })?;
        if old == new {
            if let Some(entry) = log {
                self.append_log_line(new, entry)?;
            }
            return Ok(());
        }
        if !force && self.get(new)?.is_some() {
            return Err(StorageError::AlreadyExists(new.to_string()));
        }
        if self.namespace_conflict(old, new)? {
            warn!(old = %old, new = %new, "rename target collides with a reference directory");
            return Err(StorageError::Conflict(new.to_string()));
        }
        let contents = format!("{}\n", target.encode());

        // Clear the old name first so "a" can become "a/b".
        self.remove_ref_files(old)?;
        if let Err(e) = self.move_ref(old, new, &contents, log) {
            warn!(old = %old, new = %new, error = %e, "rename failed, restoring reference");
            old_lock.write(contents.as_bytes())?;
            old_lock.commit()?;
            return Err(e);
        }

        drop(old_lock);
        self.prune_empty_dirs(&old_path, &self.root.join("refs"));
        debug!(old = %old, new = %new, "renamed reference");
        Ok(())
    }

    fn read_log(&self, name: &str) -> Result<Vec<ReflogEntry>> {
        let path = self.log_path(name)?;
        match fs::read_to_string(&path) {
            Ok(raw) => parse_log(&raw),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(_) if path.is_dir() => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn append_log(&self, name: &str, entry: &ReflogEntry) -> Result<()> {
        self.append_log_line(name, entry)
    }
}

/// An exclusive `<path>.lock` file. Dropping it without committing
/// removes the lock and leaves the target untouched.
struct RefLock {
    lock_path: PathBuf,
    target_path: PathBuf,
    file: Option<File>,
    committed: bool,
}

impl RefLock {
    fn acquire(target_path: &Path, name: &str) -> Result<Self> {
        if let Some(parent) = target_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut lock_path = target_path.as_os_str().to_owned();
        lock_path.push(LOCK_SUFFIX);
        let lock_path = PathBuf::from(lock_path);

        let file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!(name = %name, "reference is locked by another writer");
                return Err(StorageError::Conflict(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            lock_path,
            target_path: target_path.to_path_buf(),
            file: Some(file),
            committed: false,
        })
    }

    fn write(&mut self, contents: &[u8]) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(contents),
            None => Err(io::Error::other("lock already released")),
        }
    }

    fn commit(mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        fs::rename(&self.lock_path, &self.target_path)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for RefLock {
    fn drop(&mut self) {
        if !self.committed {
            self.file.take();
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}

fn render_packed(packed: &BTreeMap<String, ObjectId>) -> String {
    let mut out = String::from(PACKED_HEADER);
    for (name, id) in packed {
        out.push_str(&format!("{id} {name}\n"));
    }
    out
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
