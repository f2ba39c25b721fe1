//! Committer and tagger identities.

use crate::{Result, StorageError};
use chrono::{DateTime, FixedOffset, Local, TimeZone};
use std::fmt;

/// A name, email, and timestamp identifying who made a change.
///
/// Rendered as `Name <email> <unix-seconds> <+hhmm>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    name: String,
    email: String,
    time: DateTime<FixedOffset>,
}

impl Signature {
    /// Creates a signature, rejecting fields that would corrupt the
    /// serialized form.
    pub fn new(
        name: impl AsRef<str>,
        email: impl AsRef<str>,
        time: DateTime<FixedOffset>,
    ) -> Result<Self> {
        let name = name.as_ref().trim();
        let email = email.as_ref().trim();
        check_field("name", name)?;
        check_field("email", email)?;

        Ok(Self {
            name: name.to_string(),
            email: email.to_string(),
            time,
        })
    }

    /// Creates a signature stamped with the current local time.
    pub fn now(name: impl AsRef<str>, email: impl AsRef<str>) -> Result<Self> {
        Self::new(name, email, Local::now().fixed_offset())
    }

    /// Creates a signature from seconds since the epoch and a UTC offset
    /// in minutes.
    pub fn from_unix(
        name: impl AsRef<str>,
        email: impl AsRef<str>,
        seconds: i64,
        offset_minutes: i32,
    ) -> Result<Self> {
        let offset = FixedOffset::east_opt(offset_minutes * 60).ok_or_else(|| {
            StorageError::TypeMismatch(format!("invalid utc offset: {offset_minutes} minutes"))
        })?;
        let time = offset.timestamp_opt(seconds, 0).single().ok_or_else(|| {
            StorageError::TypeMismatch(format!("invalid timestamp: {seconds}"))
        })?;
        Self::new(name, email, time)
    }

    /// Parses the `Name <email> seconds +hhmm` form.
    pub fn parse(s: &str) -> Result<Self> {
        let malformed = || StorageError::InvalidObject(format!("malformed signature: {s:?}"));

        let open = s.find('<').ok_or_else(malformed)?;
        let close = s[open..].find('>').map(|i| open + i).ok_or_else(malformed)?;
        let name = &s[..open];
        let email = &s[open + 1..close];

        let mut rest = s[close + 1..].split_whitespace();
        let seconds: i64 = rest
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(malformed)?;
        let offset_minutes = rest.next().map(parse_offset).transpose()?.unwrap_or(0);

        Self::from_unix(name, email, seconds, offset_minutes)
    }

    /// Returns the name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the email.
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Returns the timestamp with its original UTC offset.
    pub fn time(&self) -> DateTime<FixedOffset> {
        self.time
    }

    /// Returns seconds since the Unix epoch.
    pub fn seconds(&self) -> i64 {
        self.time.timestamp()
    }

    /// Returns the UTC offset in minutes.
    pub fn offset_minutes(&self) -> i32 {
        self.time.offset().local_minus_utc() / 60
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let offset = self.offset_minutes();
        let sign = if offset < 0 { '-' } else { '+' };
        let offset = offset.abs();
        write!(
            f,
            "{} <{}> {} {}{:02}{:02}",
            self.name,
            self.email,
            self.seconds(),
            sign,
            offset / 60,
            offset % 60
        )
    }
}

fn check_field(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(StorageError::TypeMismatch(format!(
            "signature {field} cannot be empty"
        )));
    }
    if value.contains(['<', '>', '\n', '\t', '\0']) {
        return Err(StorageError::TypeMismatch(format!(
            "signature {field} contains a forbidden character: {value:?}"
        )));
    }
    Ok(())
}

fn parse_offset(tz: &str) -> Result<i32> {
    let malformed = || StorageError::InvalidObject(format!("malformed utc offset: {tz:?}"));
    let (sign, digits) = match tz.as_bytes().first() {
        Some(b'+') => (1, &tz[1..]),
        Some(b'-') => (-1, &tz[1..]),
        _ => return Err(malformed()),
    };
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let hours: i32 = digits[..2].parse().map_err(|_| malformed())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| malformed())?;
    Ok(sign * (hours * 60 + minutes))
}
