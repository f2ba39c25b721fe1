//! Lightweight and annotated tags.
//!
//! A lightweight tag is a direct reference under `refs/tags/`. An annotated
//! tag is a stored `tag` object plus a reference pointing at it. Tag objects
//! are immutable: "modifying" one stores a new object with a new ID.

use crate::odb::Odb;
use crate::refname::{check_name, TAGS_PREFIX};
use crate::refs::References;
use crate::repository::Repository;
use crate::{Object, ObjectId, ObjectType, Reference, Result, Signature, StorageError};
use std::fmt;
use tracing::debug;

/// The parsed contents of a tag object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagAnnotation {
    id: ObjectId,
    target: ObjectId,
    target_type: ObjectType,
    name: String,
    tagger: Option<Signature>,
    message: String,
}

/// Field overrides for [`TagAnnotation::modify`]. `None` keeps the old value.
#[derive(Debug, Clone, Default)]
pub struct TagChanges {
    pub name: Option<String>,
    pub target: Option<ObjectId>,
    pub tagger: Option<Signature>,
    pub message: Option<String>,
}

impl TagAnnotation {
    /// Stores a new tag object and returns its ID. No reference is created.
    ///
    /// The target must exist; its type is recorded in the annotation.
    pub fn create(
        odb: &Odb,
        name: &str,
        target: &ObjectId,
        tagger: Option<&Signature>,
        message: &str,
    ) -> Result<ObjectId> {
        check_name(&format!("{TAGS_PREFIX}{name}"))?;
        if message.contains('\0') {
            return Err(StorageError::TypeMismatch(
                "tag message cannot contain NUL bytes".to_string(),
            ));
        }

        let target_type = odb.read_header(target)?.object_type;
        let data = Self::serialize(target, target_type, name, tagger, message);
        let id = odb.write(data, ObjectType::Tag)?;
        debug!(oid = %id, name = %name, target = %target, "created tag annotation");
        Ok(id)
    }

    /// Reads and parses the tag object `id`.
    pub fn lookup(odb: &Odb, id: &ObjectId) -> Result<Self> {
        Self::from_object(&odb.read(id)?)
    }

    /// Parses a stored object, which must be of type `tag`.
    pub fn from_object(object: &Object) -> Result<Self> {
        if object.object_type != ObjectType::Tag {
            return Err(StorageError::InvalidObject(format!(
                "{} is a {}, not a tag",
                object.id, object.object_type
            )));
        }
        Self::parse(object.id, &object.data)
    }

    /// Parses the payload of a tag object.
    ///
    /// ```text
    /// object <hex>
    /// type <type>
    /// tag <name>
    /// tagger <signature>      (optional)
    ///
    /// <message>
    /// ```
    pub fn parse(id: ObjectId, data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| StorageError::InvalidObject(format!("tag {id} is not utf-8")))?;
        let (headers, message) = match text.split_once("\n\n") {
            Some((headers, message)) => (headers, message),
            None => (text.trim_end_matches('\n'), ""),
        };

        let mut target = None;
        let mut target_type = None;
        let mut name = None;
        let mut tagger = None;
        for line in headers.lines() {
            let (key, value) = line.split_once(' ').ok_or_else(|| {
                StorageError::InvalidObject(format!("malformed tag header: {line:?}"))
            })?;
            match key {
                "object" => target = Some(ObjectId::from_hex(value)?),
                "type" => target_type = Some(ObjectType::parse(value)?),
                "tag" => name = Some(value.to_string()),
                "tagger" => tagger = Some(Signature::parse(value)?),
                // Unknown headers (e.g. signatures) are carried in the ID only.
                _ => {}
            }
        }

        let missing = |field: &str| StorageError::InvalidObject(format!("tag {id} has no {field}"));
        Ok(Self {
            id,
            target: target.ok_or_else(|| missing("object"))?,
            target_type: target_type.ok_or_else(|| missing("type"))?,
            name: name.ok_or_else(|| missing("tag"))?,
            tagger,
            message: message.to_string(),
        })
    }

    /// Renders a tag payload.
    pub fn serialize(
        target: &ObjectId,
        target_type: ObjectType,
        name: &str,
        tagger: Option<&Signature>,
        message: &str,
    ) -> Vec<u8> {
        let mut out = format!("object {target}\ntype {target_type}\ntag {name}\n");
        if let Some(tagger) = tagger {
            out.push_str(&format!("tagger {tagger}\n"));
        }
        out.push('\n');
        out.push_str(message);
        out.into_bytes()
    }

    /// Stores a new tag object built from this one with `changes` applied,
    /// returning the new ID. This object is left untouched.
    pub fn modify(&self, odb: &Odb, changes: TagChanges) -> Result<ObjectId> {
        let name = changes.name.unwrap_or_else(|| self.name.clone());
        let target = changes.target.unwrap_or(self.target);
        let tagger = changes.tagger.or_else(|| self.tagger.clone());
        let message = changes.message.unwrap_or_else(|| self.message.clone());
        Self::create(odb, &name, &target, tagger.as_ref(), &message)
    }

    /// The tag object's own ID.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The tagged object's ID.
    pub fn target(&self) -> ObjectId {
        self.target
    }

    /// The tagged object's type.
    pub fn target_type(&self) -> ObjectType {
        self.target_type
    }

    /// The name recorded in the annotation.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Who created the tag, if recorded.
    pub fn tagger(&self) -> Option<&Signature> {
        self.tagger.as_ref()
    }

    /// The tag message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A reference under `refs/tags/`, viewed as a tag.
#[derive(Clone)]
pub struct Tag<'r> {
    repo: &'r Repository,
    reference: Reference,
}

impl<'r> Tag<'r> {
    /// Interprets a reference as a tag, or `None` if it is not under
    /// `refs/tags/`.
    pub fn from_reference(repo: &'r Repository, reference: Reference) -> Option<Self> {
        reference.is_tag().then_some(Self { repo, reference })
    }

    /// The short name, without `refs/tags/`.
    pub fn name(&self) -> &str {
        self.reference
            .name()
            .strip_prefix(TAGS_PREFIX)
            .unwrap_or(self.reference.name())
    }

    /// The full reference name.
    pub fn canonical_name(&self) -> &str {
        self.reference.name()
    }

    /// The underlying reference.
    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    /// The object ID the reference resolves to: the tag object for an
    /// annotated tag, the tagged object for a lightweight one.
    pub fn target_id(&self) -> Result<ObjectId> {
        let resolved = self.repo.refs().resolve(&self.reference)?;
        resolved
            .target_id()
            .ok_or_else(|| StorageError::InvalidReference(resolved.name().to_string()))
    }

    /// True if the reference points at a tag object.
    pub fn is_annotated(&self) -> Result<bool> {
        let id = self.target_id()?;
        Ok(self.repo.odb().read_header(&id)?.object_type == ObjectType::Tag)
    }

    /// The annotation, or `None` for a lightweight tag.
    pub fn annotation(&self) -> Result<Option<TagAnnotation>> {
        let object = self.repo.odb().read(&self.target_id()?)?;
        if object.object_type != ObjectType::Tag {
            return Ok(None);
        }
        TagAnnotation::from_object(&object).map(Some)
    }

    /// The first non-tag object this tag leads to.
    pub fn target_object(&self) -> Result<Object> {
        let id = self.repo.peel_id(&self.target_id()?)?;
        self.repo.odb().read(&id)
    }
}

impl AsRef<str> for Tag<'_> {
    fn as_ref(&self) -> &str {
        self.canonical_name()
    }
}

impl fmt::Debug for Tag<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tag")
            .field("name", &self.name())
            .field("target", self.reference.target())
            .finish()
    }
}

/// The tags of a repository.
#[derive(Clone, Copy)]
pub struct Tags<'r> {
    repo: &'r Repository,
}

impl<'r> Tags<'r> {
    pub(crate) fn new(repo: &'r Repository) -> Self {
        Self { repo }
    }

    /// Looks up a tag by short (`v1.0`) or full (`refs/tags/v1.0`) name.
    pub fn get(&self, name: &str) -> Result<Option<Tag<'r>>> {
        let found = self.repo.refs().lookup(&canonical(name))?;
        Ok(found.and_then(|reference| Tag::from_reference(self.repo, reference)))
    }

    /// Iterates over every tag, sorted by name.
    pub fn each(&self) -> Result<TagIter<'r>> {
        Ok(TagIter {
            repo: self.repo,
            refs: self.repo.refs().each(Some("refs/tags/*"))?,
        })
    }

    /// Creates a lightweight tag pointing straight at `target`.
    pub fn create(&self, name: &str, target: &ObjectId, force: bool) -> Result<Tag<'r>> {
        let reference = self.repo.refs().create(&canonical(name), target, force)?;
        debug!(name = %name, target = %target, "created lightweight tag");
        Ok(Tag {
            repo: self.repo,
            reference,
        })
    }

    /// Creates an annotated tag: stores the tag object, then the reference.
    ///
    /// If creating the reference fails, the tag object stays in the object
    /// store unreferenced.
    pub fn create_annotated(
        &self,
        name: &str,
        target: &ObjectId,
        tagger: &Signature,
        message: &str,
        force: bool,
    ) -> Result<Tag<'r>> {
        let full_name = canonical(name);
        check_name(&full_name)?;
        if !force && self.repo.refs().exists(&full_name)? {
            return Err(StorageError::AlreadyExists(full_name));
        }

        let short = full_name.strip_prefix(TAGS_PREFIX).unwrap_or(&full_name);
        let tag_id = TagAnnotation::create(self.repo.odb(), short, target, Some(tagger), message)?;
        let reference = self.repo.refs().create(&full_name, tag_id, force)?;
        debug!(name = %name, oid = %tag_id, target = %target, "created annotated tag");
        Ok(Tag {
            repo: self.repo,
            reference,
        })
    }

    /// Deletes a tag by short name, full name, or [`Tag`].
    pub fn delete(&self, tag: impl AsRef<str>) -> Result<()> {
        self.repo.refs().delete(canonical(tag.as_ref()))
    }
}

/// Iterator over the tags of a repository.
#[derive(Clone)]
pub struct TagIter<'r> {
    repo: &'r Repository,
    refs: References,
}

impl<'r> Iterator for TagIter<'r> {
    type Item = Tag<'r>;

    fn next(&mut self) -> Option<Self::Item> {
        let reference = self.refs.next()?;
        Some(Tag {
            repo: self.repo,
            reference,
        })
    }
}

fn canonical(name: &str) -> String {
    if name.starts_with(TAGS_PREFIX) {
        name.to_string()
    } else {
        format!("{TAGS_PREFIX}{name}")
    }
}
