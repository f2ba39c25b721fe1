//! Per-reference history of target changes.

use crate::{ObjectId, Result, Signature, StorageError};

/// One append-only record of a reference changing target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflogEntry {
    /// The resolved target before the change (zero if there was none).
    pub id_old: ObjectId,
    /// The resolved target after the change.
    pub id_new: ObjectId,
    /// Who made the change, and when.
    pub committer: Signature,
    /// Optional free-form description.
    pub message: Option<String>,
}

impl ReflogEntry {
    /// Creates an entry; embedded newlines in the message are flattened to
    /// spaces so the entry stays on one line.
    pub fn new(
        id_old: ObjectId,
        id_new: ObjectId,
        committer: Signature,
        message: Option<&str>,
    ) -> Self {
        Self {
            id_old,
            id_new,
            committer,
            message: message.map(|m| m.trim_end_matches('\n').replace('\n', " ")),
        }
    }

    /// Encodes the entry as a single log line, without the trailing newline.
    ///
    /// Format: `<old> <new> <signature>[\t<message>]`.
    pub fn to_line(&self) -> String {
        let mut line = format!("{} {} {}", self.id_old, self.id_new, self.committer);
        if let Some(message) = &self.message {
            line.push('\t');
            line.push_str(message);
        }
        line
    }

    /// Parses a line produced by [`ReflogEntry::to_line`].
    pub fn parse_line(line: &str) -> Result<Self> {
        let malformed = || StorageError::InvalidObject(format!("malformed reflog line: {line:?}"));

        let (head, message) = match line.split_once('\t') {
            Some((head, message)) => (head, Some(message.to_string())),
            None => (line, None),
        };

        let mut parts = head.splitn(3, ' ');
        let id_old = parts.next().ok_or_else(malformed)?.parse::<ObjectId>()?;
        let id_new = parts.next().ok_or_else(malformed)?.parse::<ObjectId>()?;
        let committer = Signature::parse(parts.next().ok_or_else(malformed)?)?;

        Ok(Self {
            id_old,
            id_new,
            committer,
            message,
        })
    }
}

/// Parses a whole log file, skipping blank lines.
pub fn parse_log(contents: &str) -> Result<Vec<ReflogEntry>> {
    contents
        .lines()
        .filter(|line| !line.is_empty())
        .map(ReflogEntry::parse_line)
        .collect()
}
