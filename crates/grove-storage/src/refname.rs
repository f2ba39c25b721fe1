//! Reference name grammar and name patterns.
//!
//! A valid name:
//! - is non-empty and contains no control characters (< 0x20, 0x7f);
//! - has no empty segments and no leading or trailing `/`;
//! - contains none of `space ~ ^ : ? * [ \`, and no `..` or `@{`;
//! - has no segment starting with `.` or ending in `.lock`;
//! - does not end in `.` and is not `@`;
//! - if it has a single segment, is made of upper-case ASCII letters and
//!   `_` only (`HEAD`, `ORIG_HEAD`).

use crate::{Result, StorageError};

/// The well-known symbolic reference naming the current branch.
pub const HEAD: &str = "HEAD";

/// Namespace holding every enumerable reference.
pub const REFS_PREFIX: &str = "refs/";

/// Namespace for local branches.
pub const HEADS_PREFIX: &str = "refs/heads/";

/// Namespace for remote-tracking branches.
pub const REMOTES_PREFIX: &str = "refs/remotes/";

/// Namespace for tags.
pub const TAGS_PREFIX: &str = "refs/tags/";

/// Namespace for notes.
pub const NOTES_PREFIX: &str = "refs/notes/";

const FORBIDDEN: &[char] = &[' ', '~', '^', ':', '?', '*', '[', '\\'];

/// Returns true if `name` satisfies the reference name grammar.
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name == "@" {
        return false;
    }
    if name.chars().any(|c| c.is_ascii_control() || FORBIDDEN.contains(&c)) {
        return false;
    }
    if name.contains("..") || name.contains("@{") || name.ends_with('.') {
        return false;
    }

    let mut segments = 0;
    for segment in name.split('/') {
        segments += 1;
        if segment.is_empty() || segment.starts_with('.') || segment.ends_with(".lock") {
            return false;
        }
    }

    segments > 1 || name.chars().all(|c| c.is_ascii_uppercase() || c == '_')
}

/// Returns `Ok(())` for a valid name, `InvalidName` otherwise.
pub fn check_name(name: &str) -> Result<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}

/// A compiled reference name pattern.
///
/// `*` matches any run of characters, including `/`, so
/// `refs/remotes/*` covers every remote and `*0.9*` matches
/// `refs/tags/v0.9`. `?` and `[...]` classes are also supported.
#[derive(Debug, Clone)]
pub struct RefPattern {
    pattern: glob::Pattern,
}

impl RefPattern {
    /// Compiles a pattern.
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = glob::Pattern::new(pattern)
            .map_err(|e| StorageError::InvalidName(format!("{pattern}: {e}")))?;
        Ok(Self { pattern })
    }

    /// Returns true if the whole of `name` matches.
    pub fn matches(&self, name: &str) -> bool {
        self.pattern.matches_with(
            name,
            glob::MatchOptions {
                case_sensitive: true,
                require_literal_separator: false,
                require_literal_leading_dot: false,
            },
        )
    }

    /// Returns the literal prefix before the first wildcard.
    ///
    /// Backends use it to narrow iteration.
    pub fn literal_prefix(&self) -> &str {
        let raw = self.pattern.as_str();
        let end = raw.find(['*', '?', '[']).unwrap_or(raw.len());
        &raw[..end]
    }
}
