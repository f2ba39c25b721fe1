//! Reference database: named pointers, symbolic resolution, and reflogs.

use crate::config::Identity;
use crate::refname::{check_name, is_valid_name, RefPattern, HEAD, REFS_PREFIX};
use crate::traits::{RefBackend, RefExpectation};
use crate::{ObjectId, RefTarget, Reference, ReflogEntry, Result, Signature, StorageError};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Maximum number of symbolic hops followed before a chain is declared
/// cyclic.
pub const MAX_SYMBOLIC_DEPTH: usize = 5;

/// Handle to a reference database.
///
/// Cloning is cheap and clones share the same backend.
#[derive(Clone)]
pub struct RefDb {
    backend: Arc<dyn RefBackend>,
    identity: Identity,
}

impl RefDb {
    /// Creates a reference database whose reflog entries default to
    /// `identity` when no committer is supplied.
    pub fn new(backend: Arc<dyn RefBackend>, identity: Identity) -> Self {
        Self { backend, identity }
    }

    /// Returns the default reflog identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Returns true if `name` satisfies the reference name grammar.
    pub fn valid_name(name: &str) -> bool {
        is_valid_name(name)
    }

    /// Looks up a reference by full name.
    ///
    /// Absence is `Ok(None)`; a malformed name is `InvalidName`.
    pub fn lookup(&self, name: &str) -> Result<Option<Reference>> {
        check_name(name)?;
        let found = self.backend.get(name)?;
        trace!(name = %name, found = found.is_some(), "lookup reference");
        Ok(found.map(|target| Reference::new(name, target)))
    }

    /// Returns true if a reference with this name exists. Invalid names
    /// never exist.
    pub fn exists(&self, name: &str) -> Result<bool> {
        if !is_valid_name(name) {
            return Ok(false);
        }
        Ok(self.backend.get(name)?.is_some())
    }

    /// Returns `HEAD`, if set.
    pub fn head(&self) -> Result<Option<Reference>> {
        self.lookup(HEAD)
    }

    /// Creates a reference. A target that parses as a full hex OID makes a
    /// direct reference; anything else names the reference it points to.
    ///
    /// Without `force`, an existing name is `AlreadyExists`. With `force`,
    /// the existing value is replaced atomically and the replacement is
    /// recorded in the reflog. A brand-new reference gets no reflog entry.
    pub fn create(
        &self,
        name: &str,
        target: impl Into<RefTarget>,
        force: bool,
    ) -> Result<Reference> {
        let target = target.into();
        self.check_target(name, &target)?;

        if !force {
            if !self.backend.set(name, &target, &RefExpectation::Absent, None)? {
                return Err(StorageError::AlreadyExists(name.to_string()));
            }
            debug!(name = %name, target = %target, "created reference");
            return Ok(Reference::new(name, target));
        }

        let committer = self.default_signature()?;
        self.overwrite(name, target, &committer, None)
    }

    /// Lists references under `refs/`, optionally filtered by a glob.
    ///
    /// `*` matches any run of characters including `/`. Entries are sorted
    /// byte-wise by name and names failing the grammar are skipped. The
    /// returned iterator can be cloned to restart it.
    pub fn each(&self, pattern: Option<&str>) -> Result<References> {
        let pattern = pattern.map(RefPattern::new).transpose()?;

        let prefix = match &pattern {
            Some(p) if p.literal_prefix().starts_with(REFS_PREFIX) => p.literal_prefix(),
            _ => REFS_PREFIX,
        };

        let refs: Vec<Reference> = self
            .backend
            .iterate(prefix)?
            .into_iter()
            .filter(|(name, _)| is_valid_name(name))
            .filter(|(name, _)| pattern.as_ref().map_or(true, |p| p.matches(name)))
            .map(|(name, target)| Reference::new(name, target))
            .collect();

        trace!(prefix = %prefix, count = refs.len(), "enumerated references");
        Ok(References {
            inner: refs.into_iter(),
        })
    }

    /// Lists references whose full names match `pattern`.
    pub fn glob(&self, pattern: &str) -> Result<References> {
        self.each(Some(pattern))
    }

    /// Moves a reference, and its reflog, to `new_name`.
    ///
    /// Fails with `InvalidReference` if the source does not exist and with
    /// `AlreadyExists` if `new_name` is taken and `force` is false.
    pub fn rename(
        &self,
        reference: impl AsRef<str>,
        new_name: &str,
        force: bool,
    ) -> Result<Reference> {
        let old_name = reference.as_ref();
        check_name(old_name)?;
        check_name(new_name)?;

        let target = self.backend.get(old_name)?.ok_or_else(|| {
            StorageError::InvalidReference(format!("cannot rename missing reference {old_name}"))
        })?;

        let id = self.resolved_id(old_name, &target)?;
        let message = format!("renamed {old_name} to {new_name}");
        let entry = ReflogEntry::new(id, id, self.default_signature()?, Some(&message));
        self.backend.rename(old_name, new_name, force, Some(&entry))?;

        debug!(old = %old_name, new = %new_name, "renamed reference");
        Ok(Reference::new(new_name, target))
    }

    /// Points an existing reference at a new target, logging the change
    /// under the default identity.
    pub fn update(
        &self,
        reference: impl AsRef<str>,
        target: impl Into<RefTarget>,
    ) -> Result<Reference> {
        let committer = self.default_signature()?;
        self.update_with(reference, target, &committer, None)
    }

    /// Points an existing reference at a new target, appending one reflog
    /// entry from `committer`.
    ///
    /// A direct reference takes an OID and a symbolic reference takes a
    /// name; changing kind is `InvalidReference`. `HEAD` is the exception:
    /// it is force-overwritten so it can move between attached and detached.
    pub fn update_with(
        &self,
        reference: impl AsRef<str>,
        target: impl Into<RefTarget>,
        committer: &Signature,
        message: Option<&str>,
    ) -> Result<Reference> {
        let name = reference.as_ref();
        let target = target.into();
        self.check_target(name, &target)?;

        if name == HEAD {
            return self.overwrite(name, target, committer, message);
        }

        let current = self.backend.get(name)?.ok_or_else(|| {
            StorageError::InvalidReference(format!("cannot update missing reference {name}"))
        })?;
        if current.kind() != target.kind() {
            return Err(StorageError::InvalidReference(format!(
                "{name} is {:?}, cannot point it at {target}",
                current.kind()
            )));
        }

        let entry = ReflogEntry::new(
            self.resolved_id(name, &current)?,
            self.resolved_id(name, &target)?,
            committer.clone(),
            message,
        );
        if !self
            .backend
            .set(name, &target, &RefExpectation::Exactly(current), Some(&entry))?
        {
            warn!(name = %name, "reference changed during update");
            return Err(StorageError::Conflict(name.to_string()));
        }

        debug!(name = %name, target = %target, "updated reference");
        Ok(Reference::new(name, target))
    }

    /// Removes a reference and its reflog.
    pub fn delete(&self, reference: impl AsRef<str>) -> Result<()> {
        let name = reference.as_ref();
        check_name(name)?;
        let current = self
            .backend
            .get(name)?
            .ok_or_else(|| StorageError::RefNotFound(name.to_string()))?;

        if !self
            .backend
            .delete(name, &RefExpectation::Exactly(current))?
        {
            warn!(name = %name, "reference changed during delete");
            return Err(StorageError::Conflict(name.to_string()));
        }
        debug!(name = %name, "deleted reference");
        Ok(())
    }

    /// Follows symbolic references until a direct one is reached.
    ///
    /// At most [`MAX_SYMBOLIC_DEPTH`] hops are taken; a longer chain (or a
    /// loop) is `CyclicReference`. A symbolic target naming a missing
    /// reference is `RefNotFound`.
    pub fn resolve(&self, reference: &Reference) -> Result<Reference> {
        let mut current = reference.clone();
        let mut hops = 0;
        loop {
            let next = match current.target() {
                RefTarget::Direct(_) => return Ok(current),
                RefTarget::Symbolic(next) => next.clone(),
            };
            if hops == MAX_SYMBOLIC_DEPTH {
                warn!(name = %reference.name(), "symbolic reference chain too deep");
                return Err(StorageError::CyclicReference(reference.name().to_string()));
            }
            hops += 1;
            check_name(&next)?;
            let target = self
                .backend
                .get(&next)?
                .ok_or_else(|| StorageError::RefNotFound(next.clone()))?;
            current = Reference::new(next, target);
        }
    }

    /// Looks up `name` and resolves it to an object ID, or `None` if the
    /// reference does not exist.
    pub fn resolve_name(&self, name: &str) -> Result<Option<ObjectId>> {
        match self.lookup(name)? {
            Some(reference) => Ok(self.resolve(&reference)?.target_id()),
            None => Ok(None),
        }
    }

    /// Returns the reflog of a reference, oldest entry first.
    pub fn log(&self, name: &str) -> Result<Vec<ReflogEntry>> {
        check_name(name)?;
        self.backend.read_log(name)
    }

    /// Returns true if the reference has reflog entries. Invalid names have
    /// none.
    pub fn has_log(&self, name: &str) -> Result<bool> {
        if !is_valid_name(name) {
            return Ok(false);
        }
        self.backend.has_log(name)
    }

    /// Records the reference's current value in its reflog.
    ///
    /// The entry's old ID continues from the last entry (zero for the first)
    /// and its new ID is the current resolved target.
    pub fn log_append(
        &self,
        name: &str,
        committer: Option<&Signature>,
        message: Option<&str>,
    ) -> Result<ReflogEntry> {
        check_name(name)?;
        let target = self
            .backend
            .get(name)?
            .ok_or_else(|| StorageError::RefNotFound(name.to_string()))?;

        let id_old = self
            .backend
            .read_log(name)?
            .last()
            .map(|entry| entry.id_new)
            .unwrap_or_else(ObjectId::zero);
        let id_new = self.resolved_id(name, &target)?;
        let committer = match committer {
            Some(sig) => sig.clone(),
            None => self.default_signature()?,
        };

        let entry = ReflogEntry::new(id_old, id_new, committer, message);
        self.backend.append_log(name, &entry)?;
        debug!(name = %name, old = %id_old, new = %id_new, "appended reflog entry");
        Ok(entry)
    }

    /// Returns a signature for the default identity, stamped now.
    pub fn default_signature(&self) -> Result<Signature> {
        Signature::now(&self.identity.name, &self.identity.email)
    }

    fn check_target(&self, name: &str, target: &RefTarget) -> Result<()> {
        check_name(name)?;
        if let RefTarget::Symbolic(target_name) = target {
            check_name(target_name)?;
        }
        Ok(())
    }

    /// Replaces whatever `name` holds, logging the change if it existed.
    fn overwrite(
        &self,
        name: &str,
        target: RefTarget,
        committer: &Signature,
        message: Option<&str>,
    ) -> Result<Reference> {
        let written = match self.backend.get(name)? {
            None => self.backend.set(name, &target, &RefExpectation::Absent, None)?,
            Some(current) => {
                let entry = ReflogEntry::new(
                    self.resolved_id(name, &current)?,
                    self.resolved_id(name, &target)?,
                    committer.clone(),
                    message,
                );
                self.backend.set(
                    name,
                    &target,
                    &RefExpectation::Exactly(current),
                    Some(&entry),
                )?
            }
        };
        if !written {
            warn!(name = %name, "reference changed during forced write");
            return Err(StorageError::Conflict(name.to_string()));
        }

        debug!(name = %name, target = %target, "overwrote reference");
        Ok(Reference::new(name, target))
    }

    /// The object ID a target resolves to for reflog purposes; zero when
    /// the chain dangles.
    fn resolved_id(&self, name: &str, target: &RefTarget) -> Result<ObjectId> {
        match self.resolve(&Reference::new(name, target.clone())) {
            Ok(resolved) => Ok(resolved.target_id().unwrap_or_else(ObjectId::zero)),
            Err(StorageError::RefNotFound(_)) | Err(StorageError::CyclicReference(_)) => {
                Ok(ObjectId::zero())
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for RefDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefDb")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// An ordered, restartable sequence of references.
#[derive(Debug, Clone)]
pub struct References {
    inner: std::vec::IntoIter<Reference>,
}

impl Iterator for References {
    type Item = Reference;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for References {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBackend;

    fn oid(byte: u8) -> ObjectId {
        ObjectId::from_bytes([byte; 20])
    }

    fn refdb() -> RefDb {
        RefDb::new(Arc::new(MemoryBackend::new()), Identity::default())
    }

    fn names(refs: References) -> Vec<String> {
        refs.map(|r| r.name().to_string()).collect()
    }

    #[test]
    fn test_create_and_lookup() {
        let db = refdb();
        let created = db.create("refs/heads/main", oid(1), false).unwrap();
        assert_eq!(created.target_id(), Some(oid(1)));

        let found = db.lookup("refs/heads/main").unwrap().unwrap();
        assert_eq!(found, created);
        assert!(db.lookup("refs/heads/missing").unwrap().is_none());
        assert!(db.exists("refs/heads/main").unwrap());
        assert!(!db.exists("refs/heads/~bad").unwrap());
    }

    #[test]
    fn test_create_symbolic_from_name() {
        let db = refdb();
        db.create("refs/heads/main", oid(1), false).unwrap();
        let head = db.create("HEAD", "refs/heads/main", false).unwrap();
        assert_eq!(head.symbolic_target(), Some("refs/heads/main"));
    }

    #[test]
    fn test_create_symbolic_with_invalid_target() {
        let db = refdb();
        let err = db.create("refs/heads/link", "refs/heads/bad name", false);
        assert!(matches!(err, Err(StorageError::InvalidName(_))));
        assert!(!db.exists("refs/heads/link").unwrap());
    }

    #[test]
    fn test_create_existing_requires_force() {
        let db = refdb();
        db.create("refs/heads/main", oid(1), false).unwrap();
        assert!(matches!(
            db.create("refs/heads/main", oid(2), false),
            Err(StorageError::AlreadyExists(_))
        ));
        assert!(!db.has_log("refs/heads/main").unwrap());

        db.create("refs/heads/main", oid(2), true).unwrap();
        let log = db.log("refs/heads/main").unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].id_old, oid(1));
        assert_eq!(log[0].id_new, oid(2));
    }

    #[test]
    fn test_invalid_name_rejected() {
        let db = refdb();
        for name in ["refs/heads/a..b", "refs/heads/", "refs/heads/x.lock", "lower"] {
            assert!(matches!(
                db.create(name, oid(1), false),
                Err(StorageError::InvalidName(_))
            ));
            assert!(matches!(db.lookup(name), Err(StorageError::InvalidName(_))));
        }
        assert!(db.each(None).unwrap().next().is_none());
    }

    #[test]
    fn test_each_sorted_and_scoped() {
        let db = refdb();
        for name in ["refs/tags/v1", "refs/heads/b", "refs/heads/a"] {
            db.create(name, oid(1), false).unwrap();
        }
        db.create("HEAD", "refs/heads/a", false).unwrap();

        assert_eq!(
            names(db.each(None).unwrap()),
            vec!["refs/heads/a", "refs/heads/b", "refs/tags/v1"]
        );
    }

    #[test]
    fn test_each_is_restartable() {
        let db = refdb();
        db.create("refs/heads/a", oid(1), false).unwrap();
        db.create("refs/heads/b", oid(1), false).unwrap();

        let refs = db.each(None).unwrap();
        let first: Vec<_> = refs.clone().collect();
        let second: Vec<_> = refs.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_glob() {
        let db = refdb();
        for name in ["refs/heads/master", "refs/heads/test2", "refs/heads/test1"] {
            db.create(name, oid(1), false).unwrap();
        }
        assert_eq!(
            names(db.glob("refs/heads/test*").unwrap()),
            vec!["refs/heads/test1", "refs/heads/test2"]
        );
        assert_eq!(names(db.glob("*master").unwrap()), vec!["refs/heads/master"]);
        assert!(matches!(
            db.glob("refs/[oops"),
            Err(StorageError::InvalidName(_))
        ));
    }

    #[test]
    fn test_update_direct_logs_once() {
        let db = refdb();
        db.create("refs/heads/main", oid(1), false).unwrap();
        let sig = Signature::from_unix("Scott Chacon", "schacon@gmail.com", 1288114383, -420)
            .unwrap();

        let updated = db
            .update_with("refs/heads/main", oid(2), &sig, Some("commit: bla bla"))
            .unwrap();
        assert_eq!(updated.target_id(), Some(oid(2)));

        let log = db.log("refs/heads/main").unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].id_old, oid(1));
        assert_eq!(log[0].id_new, oid(2));
        assert_eq!(log[0].committer, sig);
        assert_eq!(log[0].message.as_deref(), Some("commit: bla bla"));
    }

    #[test]
    fn test_update_rejects_kind_change() {
        let db = refdb();
        db.create("refs/heads/main", oid(1), false).unwrap();
        db.create("refs/heads/alias", "refs/heads/main", false).unwrap();

        assert!(matches!(
            db.update("refs/heads/main", "refs/heads/alias"),
            Err(StorageError::InvalidReference(_))
        ));
        assert!(matches!(
            db.update("refs/heads/alias", oid(3)),
            Err(StorageError::InvalidReference(_))
        ));
        assert!(matches!(
            db.update("refs/heads/missing", oid(3)),
            Err(StorageError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_update_head_can_detach_and_reattach() {
        let db = refdb();
        db.create("refs/heads/main", oid(1), false).unwrap();
        db.create("HEAD", "refs/heads/main", false).unwrap();

        let detached = db.update("HEAD", oid(7)).unwrap();
        assert_eq!(detached.target_id(), Some(oid(7)));

        let attached = db.update("HEAD", "refs/heads/main").unwrap();
        assert_eq!(attached.symbolic_target(), Some("refs/heads/main"));

        let log = db.log("HEAD").unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!((log[0].id_old, log[0].id_new), (oid(1), oid(7)));
        assert_eq!((log[1].id_old, log[1].id_new), (oid(7), oid(1)));
    }

    #[test]
    fn test_update_with_reference_target() {
        let db = refdb();
        db.create("refs/heads/main", oid(1), false).unwrap();
        let other = db.create("refs/heads/other", oid(2), false).unwrap();
        db.create("refs/heads/link", "refs/heads/main", false).unwrap();

        let updated = db.update("refs/heads/link", &other).unwrap();
        assert_eq!(updated.symbolic_target(), Some("refs/heads/other"));
    }

    #[test]
    fn test_rename() {
        let db = refdb();
        let main = db.create("refs/heads/main", oid(1), false).unwrap();
        db.create("refs/heads/taken", oid(2), false).unwrap();

        assert!(matches!(
            db.rename(&main, "refs/heads/taken", false),
            Err(StorageError::AlreadyExists(_))
        ));

        let renamed = db.rename(&main, "refs/heads/taken", true).unwrap();
        assert_eq!(renamed.name(), "refs/heads/taken");
        assert_eq!(renamed.target_id(), Some(oid(1)));
        assert!(!db.exists("refs/heads/main").unwrap());

        let log = db.log("refs/heads/taken").unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(
            log[0].message.as_deref(),
            Some("renamed refs/heads/main to refs/heads/taken")
        );

        assert!(matches!(
            db.rename("refs/heads/ghost", "refs/heads/x", false),
            Err(StorageError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_delete() {
        let db = refdb();
        db.create("refs/heads/gone", oid(1), false).unwrap();
        db.update("refs/heads/gone", oid(2)).unwrap();

        db.delete("refs/heads/gone").unwrap();
        assert!(db.lookup("refs/heads/gone").unwrap().is_none());
        assert!(!db.has_log("refs/heads/gone").unwrap());
        assert!(matches!(
            db.delete("refs/heads/gone"),
            Err(StorageError::RefNotFound(_))
        ));
    }

    #[test]
    fn test_resolve_chain() {
        let db = refdb();
        db.create("refs/heads/master", oid(9), false).unwrap();
        let head = db.create("HEAD", "refs/heads/master", false).unwrap();

        let resolved = db.resolve(&head).unwrap();
        assert_eq!(resolved.name(), "refs/heads/master");
        assert_eq!(resolved.target_id(), Some(oid(9)));

        let direct = db.lookup("refs/heads/master").unwrap().unwrap();
        assert_eq!(db.resolve(&direct).unwrap(), direct);
        assert_eq!(db.resolve_name("HEAD").unwrap(), Some(oid(9)));
        assert_eq!(db.resolve_name("refs/heads/nope").unwrap(), None);
    }

    #[test]
    fn test_resolve_depth_limit() {
        let db = refdb();
        db.create("refs/chain/0", oid(1), false).unwrap();
        for i in 1..=6 {
            db.create(&format!("refs/chain/{i}"), format!("refs/chain/{}", i - 1), false)
                .unwrap();
        }

        let five = db.lookup("refs/chain/5").unwrap().unwrap();
        assert_eq!(db.resolve(&five).unwrap().target_id(), Some(oid(1)));

        let six = db.lookup("refs/chain/6").unwrap().unwrap();
        assert!(matches!(
            db.resolve(&six),
            Err(StorageError::CyclicReference(_))
        ));
    }

    #[test]
    fn test_resolve_cycle() {
        let db = refdb();
        db.create("refs/loop/a", "refs/loop/b", false).unwrap();
        let b = db.create("refs/loop/b", "refs/loop/a", false).unwrap();
        assert!(matches!(
            db.resolve(&b),
            Err(StorageError::CyclicReference(_))
        ));
    }

    #[test]
    fn test_resolve_dangling() {
        let db = refdb();
        let head = db.create("HEAD", "refs/heads/unborn", false).unwrap();
        assert!(matches!(
            db.resolve(&head),
            Err(StorageError::RefNotFound(name)) if name == "refs/heads/unborn"
        ));
    }

    #[test]
    fn test_log_append_chains_ids() {
        let db = refdb();
        db.create("refs/heads/main", oid(1), false).unwrap();

        let first = db.log_append("refs/heads/main", None, Some("first")).unwrap();
        assert_eq!(first.id_old, ObjectId::zero());
        assert_eq!(first.id_new, oid(1));

        db.create("refs/heads/main", oid(2), true).unwrap();
        let sig = Signature::from_unix("foo", "foo@bar", 1, 0).unwrap();
        let third = db.log_append("refs/heads/main", Some(&sig), None).unwrap();
        assert_eq!(third.id_old, oid(2));
        assert_eq!(third.id_new, oid(2));
        assert_eq!(third.committer, sig);

        assert_eq!(db.log("refs/heads/main").unwrap().len(), 3);
        assert!(matches!(
            db.log_append("refs/heads/none", None, None),
            Err(StorageError::RefNotFound(_))
        ));
    }
}
