//! Shared fixtures for the integration tests.
//!
//! Every behavioral test runs against each backend the build supports.

#![allow(dead_code)]

use grove_storage::{
    FilesystemBackend, Identity, MemoryBackend, Object, ObjectId, ObjectType, Repository,
    Signature,
};
use std::sync::Arc;
use tempfile::TempDir;

/// A repository plus whatever keeps its storage alive.
pub struct Fixture {
    pub name: &'static str,
    pub repo: Repository,
    _dir: Option<TempDir>,
}

/// One fresh, empty repository per available backend.
pub fn fixtures() -> Vec<Fixture> {
    fixtures_with(Identity::default())
}

/// Like [`fixtures`], with `identity` as the default reflog committer.
pub fn fixtures_with(identity: Identity) -> Vec<Fixture> {
    let mut out = vec![memory(identity.clone()), filesystem(identity.clone())];
    #[cfg(feature = "rocksdb-backend")]
    out.push(rocksdb(identity));
    out
}

pub fn memory(identity: Identity) -> Fixture {
    let backend = Arc::new(MemoryBackend::new());
    Fixture {
        name: "memory",
        repo: Repository::new(backend.clone(), backend, identity),
        _dir: None,
    }
}

pub fn filesystem(identity: Identity) -> Fixture {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(FilesystemBackend::open(dir.path()).unwrap());
    Fixture {
        name: "filesystem",
        repo: Repository::new(backend.clone(), backend, identity),
        _dir: Some(dir),
    }
}

#[cfg(feature = "rocksdb-backend")]
pub fn rocksdb(identity: Identity) -> Fixture {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(grove_storage::RocksDbStorage::open_default(dir.path()).unwrap());
    Fixture {
        name: "rocksdb",
        repo: Repository::new(backend.clone(), backend, identity),
        _dir: Some(dir),
    }
}

pub const AUTHOR: &str = "Scott Chacon <schacon@gmail.com> 1288114383 -0700";

pub fn tagger() -> Signature {
    Signature::from_unix("Scott Chacon", "schacon@gmail.com", 1288114383, -420).unwrap()
}

/// Stores an empty tree and a commit on top of it.
pub fn commit(repo: &Repository, parents: &[ObjectId], message: &str) -> ObjectId {
    let tree = repo.write(Vec::new(), ObjectType::Tree).unwrap();
    let object = Object::commit(&tree, parents, AUTHOR, AUTHOR, message);
    repo.odb().write_object(&object).unwrap()
}

/// Populates the fixture layout used across the reference tests:
/// `master` and `packed-test` branches, a `test` remote, lightweight and
/// annotated tags, and `HEAD` attached to `master`.
pub struct Seeded {
    pub root: ObjectId,
    pub tip: ObjectId,
    pub side: ObjectId,
    pub blob: ObjectId,
    pub annotated: ObjectId,
}

pub fn seed(repo: &Repository) -> Seeded {
    let root = commit(repo, &[], "root\n");
    let tip = commit(repo, &[root], "tip\n");
    let side = commit(repo, &[root], "side\n");
    let blob = repo.write(&b"hi\n"[..], ObjectType::Blob).unwrap();

    let refs = repo.refs();
    refs.create("refs/heads/master", tip, false).unwrap();
    refs.create("refs/heads/packed-test", side, false).unwrap();
    refs.create("refs/remotes/test/master", tip, false).unwrap();
    refs.create("refs/tags/v0.9", blob, false).unwrap();
    refs.create("HEAD", "refs/heads/master", false).unwrap();

    let tag = repo
        .tags()
        .create_annotated("v1.0", &tip, &tagger(), "test tag message\n", false)
        .unwrap();
    let annotated = tag.reference().target_id().unwrap();

    Seeded {
        root,
        tip,
        side,
        blob,
        annotated,
    }
}
