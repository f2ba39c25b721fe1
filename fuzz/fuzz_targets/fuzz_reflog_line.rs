//! Fuzz target for reflog line parsing.
//!
//! Tests that reflog parsing handles arbitrary input without panicking and
//! that accepted entries re-encode to a line that parses to the same entry.

#![no_main]

use grove_storage::{reflog::parse_log, ReflogEntry};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let _ = parse_log(&text);

    let Some(line) = text.lines().next() else {
        return;
    };
    if let Ok(entry) = ReflogEntry::parse_line(line) {
        let reparsed = ReflogEntry::parse_line(&entry.to_line())
            .expect("encoded reflog line must parse");
        assert_eq!(reparsed.id_old, entry.id_old);
        assert_eq!(reparsed.id_new, entry.id_new);
    }
});
