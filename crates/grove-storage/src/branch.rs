//! Local and remote-tracking branches.

use crate::refname::{HEAD, HEADS_PREFIX, REMOTES_PREFIX};
use crate::refs::References;
use crate::repository::Repository;
use crate::{ObjectId, ObjectType, Reference, Result, StorageError};
use std::fmt;
use tracing::debug;

/// Which branches to enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    /// `refs/heads/`
    Local,
    /// `refs/remotes/`
    Remote,
}

/// A reference under `refs/heads/` or `refs/remotes/`, viewed as a branch.
#[derive(Clone)]
pub struct Branch<'r> {
    repo: &'r Repository,
    reference: Reference,
}

impl<'r> Branch<'r> {
    /// Interprets a reference as a branch, or `None` if it is neither local
    /// nor remote-tracking.
    pub fn from_reference(repo: &'r Repository, reference: Reference) -> Option<Self> {
        (reference.is_branch() || reference.is_remote()).then_some(Self { repo, reference })
    }

    /// The short name: `main` or `origin/main`.
    pub fn name(&self) -> &str {
        let name = self.reference.name();
        name.strip_prefix(HEADS_PREFIX)
            .or_else(|| name.strip_prefix(REMOTES_PREFIX))
            .unwrap_or(name)
    }

    /// The full reference name.
    pub fn canonical_name(&self) -> &str {
        self.reference.name()
    }

    /// The underlying reference.
    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    /// True for a remote-tracking branch.
    pub fn is_remote(&self) -> bool {
        self.reference.is_remote()
    }

    /// The remote a remote-tracking branch belongs to.
    pub fn remote_name(&self) -> Option<&str> {
        let rest = self.reference.name().strip_prefix(REMOTES_PREFIX)?;
        rest.split_once('/').map(|(remote, _)| remote)
    }

    /// True if `HEAD` is attached to this branch.
    pub fn is_head(&self) -> Result<bool> {
        let Some(head) = self.repo.refs().head()? else {
            return Ok(false);
        };
        Ok(head.symbolic_target() == Some(self.canonical_name()))
    }

    /// The commit the branch resolves to.
    pub fn tip(&self) -> Result<ObjectId> {
        let resolved = self.repo.refs().resolve(&self.reference)?;
        resolved
            .target_id()
            .ok_or_else(|| StorageError::InvalidReference(resolved.name().to_string()))
    }
}

impl AsRef<str> for Branch<'_> {
    fn as_ref(&self) -> &str {
        self.canonical_name()
    }
}

impl fmt::Debug for Branch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Branch")
            .field("name", &self.name())
            .field("target", self.reference.target())
            .finish()
    }
}

/// The branches of a repository.
#[derive(Clone, Copy)]
pub struct Branches<'r> {
    repo: &'r Repository,
}

impl<'r> Branches<'r> {
    pub(crate) fn new(repo: &'r Repository) -> Self {
        Self { repo }
    }

    /// Looks up a branch by full name, or by short name trying local
    /// branches first and remote-tracking branches second.
    pub fn get(&self, name: &str) -> Result<Option<Branch<'r>>> {
        let candidates = if name.starts_with(HEADS_PREFIX) || name.starts_with(REMOTES_PREFIX) {
            vec![name.to_string()]
        } else {
            vec![
                format!("{HEADS_PREFIX}{name}"),
                format!("{REMOTES_PREFIX}{name}"),
            ]
        };

        for candidate in candidates {
            if let Some(reference) = self.repo.refs().lookup(&candidate)? {
                return Ok(Branch::from_reference(self.repo, reference));
            }
        }
        Ok(None)
    }

    /// Iterates over branches of one kind, or all of them, sorted by name.
    pub fn each(&self, kind: Option<BranchKind>) -> Result<BranchIter<'r>> {
        let refs = self.repo.refs().each(None)?;
        Ok(BranchIter {
            repo: self.repo,
            refs,
            kind,
        })
    }

    /// Creates a local branch at a commit.
    ///
    /// The target must be an existing commit; any other object type is
    /// `TypeMismatch`.
    pub fn create(&self, name: &str, target: &ObjectId, force: bool) -> Result<Branch<'r>> {
        let header = self.repo.odb().read_header(target)?;
        if header.object_type != ObjectType::Commit {
            return Err(StorageError::TypeMismatch(format!(
                "branch target {target} is a {}, not a commit",
                header.object_type
            )));
        }

        let reference = self.repo.refs().create(&local(name), target, force)?;
        debug!(name = %name, target = %target, "created branch");
        Ok(Branch {
            repo: self.repo,
            reference,
        })
    }

    /// Renames a branch. A short `new_name` is taken as a local branch.
    pub fn rename(
        &self,
        branch: impl AsRef<str>,
        new_name: &str,
        force: bool,
    ) -> Result<Branch<'r>> {
        let old = self.require(branch.as_ref())?;
        let new_full = if new_name.starts_with(HEADS_PREFIX)
            || new_name.starts_with(REMOTES_PREFIX)
        {
            new_name.to_string()
        } else {
            local(new_name)
        };
        let reference = self.repo.refs().rename(old.canonical_name(), &new_full, force)?;
        Ok(Branch {
            repo: self.repo,
            reference,
        })
    }

    /// Moves a branch to a new commit. `HEAD` is force-overwritten.
    pub fn update(&self, branch: impl AsRef<str>, target: &ObjectId) -> Result<Reference> {
        let name = branch.as_ref();
        if name == HEAD {
            return self.repo.refs().create(HEAD, target, true);
        }
        let branch = self.require(name)?;
        self.repo.refs().update(branch.canonical_name(), target)
    }

    /// Deletes a branch by name or [`Branch`].
    pub fn delete(&self, branch: impl AsRef<str>) -> Result<()> {
        let branch = self.require(branch.as_ref())?;
        self.repo.refs().delete(branch.canonical_name())
    }

    fn require(&self, name: &str) -> Result<Branch<'r>> {
        self.get(name)?
            .ok_or_else(|| StorageError::RefNotFound(name.to_string()))
    }
}

/// Iterator over the branches of a repository.
#[derive(Clone)]
pub struct BranchIter<'r> {
    repo: &'r Repository,
    refs: References,
    kind: Option<BranchKind>,
}

impl<'r> Iterator for BranchIter<'r> {
    type Item = Branch<'r>;

    fn next(&mut self) -> Option<Self::Item> {
        for reference in self.refs.by_ref() {
            let wanted = match self.kind {
                Some(BranchKind::Local) => reference.is_branch(),
                Some(BranchKind::Remote) => reference.is_remote(),
                None => reference.is_branch() || reference.is_remote(),
            };
            if wanted {
                return Some(Branch {
                    repo: self.repo,
                    reference,
                });
            }
        }
        None
    }
}

fn local(name: &str) -> String {
    if name.starts_with(HEADS_PREFIX) {
        name.to_string()
    } else {
        format!("{HEADS_PREFIX}{name}")
    }
}
