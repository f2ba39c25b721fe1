//! Fuzz target for the reference name grammar.
//!
//! Tests that name validation and glob compilation handle arbitrary input
//! without panicking, and that accepted names are safe path components.

#![no_main]

use grove_storage::refname::{is_valid_name, RefPattern};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let name = String::from_utf8_lossy(data);

    if is_valid_name(&name) {
        assert!(!name.contains(".."));
        assert!(!name.starts_with('/') && !name.ends_with('/'));
        assert!(!name.split('/').any(|s| s.is_empty() || s.starts_with('.')));
    }

    if let Ok(pattern) = RefPattern::new(&name) {
        let _ = pattern.matches("refs/heads/master");
        let _ = pattern.literal_prefix();
    }
});
