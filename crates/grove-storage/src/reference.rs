//! Reference records: a name plus a direct or symbolic target.

use crate::refname::{HEADS_PREFIX, NOTES_PREFIX, REMOTES_PREFIX, TAGS_PREFIX};
use crate::{ObjectId, Result, StorageError};
use std::fmt;

const SYMBOLIC_PREFIX: &str = "ref: ";

/// What a reference points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RefTarget {
    /// Direct reference to an object.
    Direct(ObjectId),
    /// Symbolic reference to another reference (e.g., HEAD -> refs/heads/main).
    Symbolic(String),
}

/// The discriminant of a [`RefTarget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// Points at an object ID.
    Direct,
    /// Points at another reference name.
    Symbolic,
}

impl RefTarget {
    /// Interprets a string target: a full hex OID is direct, anything else
    /// is taken as a reference name.
    pub fn parse(target: &str) -> Self {
        match ObjectId::from_hex(target) {
            Ok(id) => Self::Direct(id),
            Err(_) => Self::Symbolic(target.to_string()),
        }
    }

    /// Returns the kind of target.
    pub fn kind(&self) -> RefKind {
        match self {
            Self::Direct(_) => RefKind::Direct,
            Self::Symbolic(_) => RefKind::Symbolic,
        }
    }

    /// Returns the object ID if this is a direct target.
    pub fn as_direct(&self) -> Option<ObjectId> {
        match self {
            Self::Direct(id) => Some(*id),
            Self::Symbolic(_) => None,
        }
    }

    /// Returns the target name if this is a symbolic target.
    pub fn as_symbolic(&self) -> Option<&str> {
        match self {
            Self::Direct(_) => None,
            Self::Symbolic(name) => Some(name),
        }
    }

    /// Encodes the target the way backends persist it: a hex OID, or
    /// `ref: <name>`.
    pub fn encode(&self) -> String {
        match self {
            Self::Direct(id) => id.to_hex(),
            Self::Symbolic(name) => format!("{SYMBOLIC_PREFIX}{name}"),
        }
    }

    /// Decodes a persisted target; surrounding whitespace is ignored.
    pub fn decode(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if let Some(name) = raw.strip_prefix(SYMBOLIC_PREFIX) {
            let name = name.trim();
            if name.is_empty() {
                return Err(StorageError::InvalidReference(
                    "empty symbolic target".to_string(),
                ));
            }
            return Ok(Self::Symbolic(name.to_string()));
        }
        ObjectId::from_hex(raw)
            .map(Self::Direct)
            .map_err(|_| StorageError::InvalidReference(format!("malformed target: {raw:?}")))
    }
}

impl fmt::Display for RefTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(id) => write!(f, "{id}"),
            Self::Symbolic(name) => f.write_str(name),
        }
    }
}

impl From<ObjectId> for RefTarget {
    fn from(id: ObjectId) -> Self {
        Self::Direct(id)
    }
}

impl From<&ObjectId> for RefTarget {
    fn from(id: &ObjectId) -> Self {
        Self::Direct(*id)
    }
}

impl From<&str> for RefTarget {
    fn from(target: &str) -> Self {
        Self::parse(target)
    }
}

impl From<String> for RefTarget {
    fn from(target: String) -> Self {
        Self::parse(&target)
    }
}

/// Pointing at a reference makes a symbolic target to its name.
impl From<&Reference> for RefTarget {
    fn from(reference: &Reference) -> Self {
        Self::Symbolic(reference.name.clone())
    }
}

/// A named pointer in the reference database.
///
/// Branches and tags are not separate types: they are references whose
/// names live under `refs/heads/`, `refs/remotes/` or `refs/tags/`, and the
/// [`Branch`](crate::Branch) and [`Tag`](crate::Tag) views interpret them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    name: String,
    target: RefTarget,
}

impl Reference {
    /// Creates a reference record. No validation or persistence happens here.
    pub fn new(name: impl Into<String>, target: impl Into<RefTarget>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
        }
    }

    /// Returns the full name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the target.
    pub fn target(&self) -> &RefTarget {
        &self.target
    }

    /// Returns the kind of reference.
    pub fn kind(&self) -> RefKind {
        self.target.kind()
    }

    /// Returns the object ID for a direct reference.
    pub fn target_id(&self) -> Option<ObjectId> {
        self.target.as_direct()
    }

    /// Returns the target name for a symbolic reference.
    pub fn symbolic_target(&self) -> Option<&str> {
        self.target.as_symbolic()
    }

    /// Local branch (`refs/heads/`).
    pub fn is_branch(&self) -> bool {
        self.name.starts_with(HEADS_PREFIX)
    }

    /// Remote-tracking branch (`refs/remotes/`).
    pub fn is_remote(&self) -> bool {
        self.name.starts_with(REMOTES_PREFIX)
    }

    /// Tag (`refs/tags/`).
    pub fn is_tag(&self) -> bool {
        self.name.starts_with(TAGS_PREFIX)
    }

    /// Note (`refs/notes/`).
    pub fn is_note(&self) -> bool {
        self.name.starts_with(NOTES_PREFIX)
    }

    /// Consumes the reference, returning its parts.
    pub fn into_parts(self) -> (String, RefTarget) {
        (self.name, self.target)
    }
}

impl AsRef<str> for Reference {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.name, self.target)
    }
}
