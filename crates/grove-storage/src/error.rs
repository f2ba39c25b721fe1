//! Storage error types.

use crate::ObjectId;
use thiserror::Error;

/// Errors that can occur during object and reference operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred in a backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A backend failed for a reason other than local I/O.
    #[error("backend error: {0}")]
    Backend(String),

    /// The requested object does not exist.
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// The requested reference does not exist.
    #[error("reference not found: {0}")]
    RefNotFound(String),

    /// A reference with this name already exists.
    #[error("reference already exists: {0}")]
    AlreadyExists(String),

    /// A reference name violates the naming grammar.
    #[error("invalid reference name: {0:?}")]
    InvalidName(String),

    /// The reference cannot take part in the requested operation.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// Symbolic resolution exceeded the hop limit.
    #[error("cyclic or too deeply nested symbolic reference: {0}")]
    CyclicReference(String),

    /// Stored bytes do not hash to the object ID they were read under.
    #[error("corrupt object {expected}: content hashes to {actual}")]
    CorruptObject {
        /// The ID that was requested.
        expected: ObjectId,
        /// The ID the stored bytes actually hash to.
        actual: ObjectId,
    },

    /// An object payload or object ID could not be parsed.
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// A tagger, committer, or message field is malformed.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// A conditional reference write lost a race with another writer.
    #[error("concurrent update of {0}")]
    Conflict(String),

    /// The store configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StorageError {
    /// Returns true for the not-found family of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ObjectNotFound(_) | Self::RefNotFound(_))
    }

    /// Returns true if the failure came from the backend rather than the caller.
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Backend(_))
    }
}

/// A specialized Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let missing = StorageError::RefNotFound("refs/heads/gone".to_string());
        assert!(missing.is_not_found());
        assert!(!missing.is_backend());

        let io = StorageError::from(std::io::Error::other("disk on fire"));
        assert!(io.is_backend());
        assert!(!io.is_not_found());
    }

    #[test]
    fn test_corrupt_object_message() {
        let err = StorageError::CorruptObject {
            expected: ObjectId::zero(),
            actual: ObjectId::from_bytes([0xff; 20]),
        };
        let msg = err.to_string();
        assert!(msg.contains(&"0".repeat(40)));
        assert!(msg.contains(&"f".repeat(40)));
    }
}
