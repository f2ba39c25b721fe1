//! Object identifiers, object types, and immutable stored objects.

use crate::{Result, StorageError};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;

/// A 20-byte SHA-1 object identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 20]);

impl Serialize for ObjectId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ObjectId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl ObjectId {
    /// Length of an object ID in bytes.
    pub const LEN: usize = 20;

    /// Length of the hex rendering of an object ID.
    pub const HEX_LEN: usize = 40;

    /// The all-zero ID, used in reflogs for "no previous value".
    pub const fn zero() -> Self {
        Self([0u8; 20])
    }

    /// Returns true if this is the all-zero ID.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Creates an ObjectId from raw bytes.
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Creates an ObjectId from a byte slice of exactly 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 20] = bytes.try_into().map_err(|_| {
            StorageError::InvalidObject(format!("invalid object id length: {}", bytes.len()))
        })?;
        Ok(Self(bytes))
    }

    /// Creates an ObjectId from a hex string.
    ///
    /// Only the canonical 40-character form is accepted; upper-case hex is
    /// tolerated and normalized.
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != Self::HEX_LEN {
            return Err(StorageError::InvalidObject(format!(
                "invalid object id length: {}",
                hex.len()
            )));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex, &mut bytes)
            .map_err(|e| StorageError::InvalidObject(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Returns true if `s` looks like a full hex object ID.
    pub fn is_hex(s: &str) -> bool {
        s.len() == Self::HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Returns the lowercase hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Computes the ID of an object from its type and payload.
    ///
    /// The hashed encoding is `"<type> <len>\0<payload>"`.
    pub fn hash_object(object_type: ObjectType, data: &[u8]) -> Self {
        let header = format!("{} {}\0", object_type.as_str(), data.len());
        let mut hasher = Sha1::new();
        hasher.update(header.as_bytes());
        hasher.update(data);
        let result = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&result);
        Self(bytes)
    }
}

impl FromStr for ObjectId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Object types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    /// File content.
    Blob,
    /// Directory listing.
    Tree,
    /// Commit object.
    Commit,
    /// Annotated tag.
    Tag,
}

impl ObjectType {
    /// Returns the string representation used in object headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
        }
    }

    /// Parses an object type from a string.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "blob" => Ok(Self::Blob),
            "tree" => Ok(Self::Tree),
            "commit" => Ok(Self::Commit),
            "tag" => Ok(Self::Tag),
            _ => Err(StorageError::InvalidObject(format!(
                "unknown object type: {}",
                s
            ))),
        }
    }

    /// Returns the single-byte type code used by key-value backends.
    pub fn type_code(&self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
        }
    }

    /// Parses an object type from its single-byte type code.
    pub fn from_type_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(Self::Commit),
            2 => Ok(Self::Tree),
            3 => Ok(Self::Blob),
            4 => Ok(Self::Tag),
            _ => Err(StorageError::InvalidObject(format!(
                "unknown type code: {}",
                code
            ))),
        }
    }
}

impl FromStr for ObjectType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The type and payload length of an object, read without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    /// The type of object.
    pub object_type: ObjectType,
    /// Payload length in bytes.
    pub size: usize,
}

/// An immutable stored object: its ID, type, and payload.
///
/// The ID is always computed from the type and payload, so an `Object`
/// value can never disagree with its own content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    /// The object's identifier (SHA-1 of the canonical encoding).
    pub id: ObjectId,
    /// The type of object.
    pub object_type: ObjectType,
    /// The raw payload (uncompressed, without header).
    pub data: Bytes,
}

impl Object {
    /// Creates a new object, computing its ID from the payload.
    pub fn new(object_type: ObjectType, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let id = ObjectId::hash_object(object_type, &data);
        Self {
            id,
            object_type,
            data,
        }
    }

    /// Creates a blob object from file content.
    pub fn blob(content: impl Into<Bytes>) -> Self {
        Self::new(ObjectType::Blob, content)
    }

    /// Creates a commit object.
    ///
    /// `author` and `committer` are full signature lines, e.g.
    /// `"Alice <alice@example.com> 1234567890 +0000"`.
    pub fn commit(
        tree_id: &ObjectId,
        parents: &[ObjectId],
        author: &str,
        committer: &str,
        message: &str,
    ) -> Self {
        let mut content = format!("tree {}\n", tree_id);
        for parent in parents {
            content.push_str(&format!("parent {}\n", parent));
        }
        content.push_str(&format!("author {}\n", author));
        content.push_str(&format!("committer {}\n", committer));
        content.push_str(&format!("\n{}", message));
        Self::new(ObjectType::Commit, content.into_bytes())
    }

    /// Returns the size of the object payload.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Returns the object's header.
    pub fn header(&self) -> ObjectHeader {
        ObjectHeader {
            object_type: self.object_type,
            size: self.data.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_hex_roundtrip() {
        let hex = "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3";
        let id = ObjectId::from_hex(hex).unwrap();
        assert_eq!(id.to_hex(), hex);
    }

    #[test]
    fn test_object_id_uppercase_normalized() {
        let id = ObjectId::from_hex("A94A8FE5CCB19BA61C4C0873D391E987982FBBD3").unwrap();
        assert_eq!(id.to_hex(), "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3");
    }

    #[test]
    fn test_blob_hash() {
        // "hello\n" hashes to a well-known value
        let obj = Object::blob(b"hello\n".to_vec());
        assert_eq!(obj.id.to_hex(), "ce013625030ba8dba906f756967f9e9ca394464a");
    }

    #[test]
    fn test_empty_blob_hash() {
        let obj = Object::blob(Bytes::new());
        assert_eq!(obj.size(), 0);
        assert_eq!(obj.id.to_hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    }

    #[test]
    fn test_hash_depends_on_type() {
        let blob = ObjectId::hash_object(ObjectType::Blob, b"same");
        let tree = ObjectId::hash_object(ObjectType::Tree, b"same");
        assert_ne!(blob, tree);
    }

    #[test]
    fn test_object_type_parse() {
        assert_eq!(ObjectType::parse("tag").unwrap(), ObjectType::Tag);
        assert_eq!("commit".parse::<ObjectType>().unwrap(), ObjectType::Commit);
        assert!(ObjectType::parse("invalid").is_err());
    }

    #[test]
    fn test_object_type_from_type_code_invalid() {
        assert!(ObjectType::from_type_code(0).is_err());
        assert!(ObjectType::from_type_code(5).is_err());
        assert!(ObjectType::from_type_code(255).is_err());
    }

    #[test]
    fn test_object_id_invalid_hex() {
        assert!(ObjectId::from_hex("abc").is_err());
        assert!(ObjectId::from_hex("a94a8fe5ccb19ba61c4c0873d391e987982fbbd3ff").is_err());
        assert!(ObjectId::from_hex("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz").is_err());
    }

    #[test]
    fn test_object_id_is_hex() {
        assert!(ObjectId::is_hex("36060c58702ed4c2a40832c51758d5344201d89a"));
        assert!(!ObjectId::is_hex("refs/heads/master"));
        assert!(!ObjectId::is_hex("36060c58"));
    }

    #[test]
    fn test_object_id_zero() {
        let zero = ObjectId::zero();
        assert!(zero.is_zero());
        assert_eq!(zero.to_string(), "0".repeat(40));
        assert!(!ObjectId::from_bytes([1u8; 20]).is_zero());
    }

    #[test]
    fn test_object_id_from_slice() {
        let id = ObjectId::from_slice(&[0xab; 20]).unwrap();
        assert_eq!(*id.as_bytes(), [0xab; 20]);
        assert!(ObjectId::from_slice(&[0xab; 19]).is_err());
    }

    #[test]
    fn test_object_id_ordering_is_bytewise() {
        let low = ObjectId::from_bytes([0x01; 20]);
        let high = ObjectId::from_bytes([0xf0; 20]);
        assert!(low < high);
    }

    #[test]
    fn test_object_id_debug() {
        let id = ObjectId::from_bytes([0u8; 20]);
        let debug = format!("{:?}", id);
        assert!(debug.contains("ObjectId"));
        assert!(debug.contains(&"0".repeat(40)));
    }

    #[test]
    fn test_object_id_serialization() {
        let id = ObjectId::from_bytes([0xab; 20]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(20)));
        let parsed: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_commit_contents() {
        let tree_id = ObjectId::from_bytes([1u8; 20]);
        let parents = vec![
            ObjectId::from_bytes([2u8; 20]),
            ObjectId::from_bytes([3u8; 20]),
        ];
        let author = "Alice <alice@example.com> 1234567890 +0000";

        let obj = Object::commit(&tree_id, &parents, author, author, "Merge commit");

        assert_eq!(obj.object_type, ObjectType::Commit);
        let content = String::from_utf8_lossy(&obj.data);
        assert!(content.starts_with(&format!("tree {}\n", tree_id)));
        assert!(content.contains(&format!("parent {}", parents[0])));
        assert!(content.contains(&format!("parent {}", parents[1])));
        assert!(content.ends_with("\nMerge commit"));
    }

    #[test]
    fn test_object_header() {
        let obj = Object::new(ObjectType::Tree, b"tree data".to_vec());
        let header = obj.header();
        assert_eq!(header.object_type, ObjectType::Tree);
        assert_eq!(header.size, 9);
    }
}
