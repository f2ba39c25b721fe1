//! Git object and reference storage for Grove.
//!
//! This crate provides a content-addressed object database ([`Odb`]) and a
//! reference database ([`RefDb`]) with reflogs, symbolic resolution, tags and
//! branches. Both sit on pluggable backends:
//!
//! - [`MemoryBackend`]: process-local, for tests and scratch repositories
//! - [`FilesystemBackend`]: loose objects and git-style reference files
//! - `RocksDbStorage`: column families in RocksDB (`rocksdb-backend` feature)
//!
//! ```
//! use grove_storage::{ObjectType, Repository};
//!
//! let repo = Repository::in_memory();
//! let id = repo.write(&b"hello\n"[..], ObjectType::Blob).unwrap();
//! repo.refs().create("refs/tags/greeting", id, false).unwrap();
//! assert_eq!(repo.refs().resolve_name("refs/tags/greeting").unwrap(), Some(id));
//! ```

mod branch;
mod cache;
pub mod compression;
mod config;
mod error;
mod filesystem;
mod memory;
mod object;
mod odb;
mod reference;
pub mod reflog;
pub mod refname;
mod refs;
mod repository;
#[cfg(feature = "rocksdb-backend")]
pub mod rocksdb;
mod signature;
mod tag;
mod traits;

pub use branch::{Branch, BranchIter, BranchKind, Branches};
pub use cache::{CacheConfig, CacheStats, CachedObjectBackend};
pub use compression::CompressionLevel;
pub use config::{BackendKind, Identity, StoreConfig};
pub use error::{Result, StorageError};
pub use filesystem::FilesystemBackend;
pub use memory::MemoryBackend;
pub use object::{Object, ObjectHeader, ObjectId, ObjectType};
pub use odb::Odb;
pub use reference::{RefKind, RefTarget, Reference};
pub use reflog::ReflogEntry;
pub use refname::RefPattern;
pub use refs::{RefDb, References, MAX_SYMBOLIC_DEPTH};
pub use repository::Repository;
#[cfg(feature = "rocksdb-backend")]
pub use rocksdb::{RocksDbConfig, RocksDbStorage};
pub use signature::Signature;
pub use tag::{Tag, TagAnnotation, TagChanges, TagIter, Tags};
pub use traits::{ObjectBackend, RefBackend, RefExpectation};
