//! Fuzz target for loose object decoding.
//!
//! Tests that the zlib loose-object decoder and the header-only reader
//! handle arbitrary input without panicking and agree with each other.

#![no_main]

use grove_storage::compression::{decode_loose, decode_loose_header};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let full = decode_loose(data);
    let header = decode_loose_header(data);

    if let (Ok(object), Ok(header)) = (full, header) {
        assert_eq!(object.header(), header);
    }
});
