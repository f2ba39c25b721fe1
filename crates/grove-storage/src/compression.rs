//! Zlib codec for loose objects.
//!
//! A loose object is the zlib-compressed canonical encoding
//! `"<type> <len>\0<payload>"`, the same bytes the object ID is hashed over.

use crate::{Object, ObjectHeader, ObjectType, Result, StorageError};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

/// Longest header we will scan for before giving up: `"commit "` plus a
/// 20-digit length and the NUL.
const MAX_HEADER_LEN: usize = 32;

/// Compression level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// No compression
    None,
    /// Fast compression (lower ratio)
    Fast,
    /// Default compression (balanced)
    #[default]
    Default,
    /// Best compression (slower, higher ratio)
    Best,
}

impl CompressionLevel {
    /// Converts to flate2 compression level.
    pub fn to_flate2(self) -> flate2::Compression {
        match self {
            CompressionLevel::None => flate2::Compression::none(),
            CompressionLevel::Fast => flate2::Compression::fast(),
            CompressionLevel::Default => flate2::Compression::default(),
            CompressionLevel::Best => flate2::Compression::best(),
        }
    }
}

/// Compression statistics for monitoring.
#[derive(Debug, Default)]
pub struct CompressionStats {
    input_bytes: AtomicU64,
    output_bytes: AtomicU64,
    compress_count: AtomicU64,
    decompress_count: AtomicU64,
}

impl CompressionStats {
    /// Creates new compression stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a compression operation.
    pub fn record_compress(&self, input_size: u64, output_size: u64) {
        self.input_bytes.fetch_add(input_size, Ordering::Relaxed);
        self.output_bytes.fetch_add(output_size, Ordering::Relaxed);
        self.compress_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a decompression operation.
    pub fn record_decompress(&self) {
        self.decompress_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of the stats.
    pub fn snapshot(&self) -> CompressionStatsSnapshot {
        CompressionStatsSnapshot {
            input_bytes: self.input_bytes.load(Ordering::Relaxed),
            output_bytes: self.output_bytes.load(Ordering::Relaxed),
            compress_count: self.compress_count.load(Ordering::Relaxed),
            decompress_count: self.decompress_count.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of compression statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionStatsSnapshot {
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub compress_count: u64,
    pub decompress_count: u64,
}

impl CompressionStatsSnapshot {
    /// Returns the compression ratio (output/input).
    pub fn compression_ratio(&self) -> f64 {
        if self.input_bytes == 0 {
            1.0
        } else {
            self.output_bytes as f64 / self.input_bytes as f64
        }
    }
}

/// Compresses an object into its loose encoding.
pub fn encode_loose(object: &Object, level: CompressionLevel) -> Result<Vec<u8>> {
    let header = format!("{} {}\0", object.object_type.as_str(), object.data.len());
    let mut encoder = ZlibEncoder::new(Vec::new(), level.to_flate2());
    encoder.write_all(header.as_bytes())?;
    encoder.write_all(&object.data)?;
    Ok(encoder.finish()?)
}

/// Decompresses a loose encoding back into an object.
///
/// The returned object's ID is recomputed from the decoded bytes.
pub fn decode_loose(compressed: &[u8]) -> Result<Object> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| StorageError::InvalidObject(format!("zlib: {e}")))?;

    let null_pos = decompressed
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| StorageError::InvalidObject("missing null byte in header".to_string()))?;

    let header = parse_header(&decompressed[..null_pos])?;
    let data = decompressed.split_off(null_pos + 1);
    if data.len() != header.size {
        return Err(StorageError::InvalidObject(format!(
            "size mismatch: header says {}, payload is {}",
            header.size,
            data.len()
        )));
    }

    Ok(Object::new(header.object_type, data))
}

/// Reads only the header of a loose encoding, decompressing as few bytes
/// as possible.
pub fn decode_loose_header(compressed: impl Read) -> Result<ObjectHeader> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut header = Vec::with_capacity(MAX_HEADER_LEN);
    let mut byte = [0u8; 1];
    loop {
        let n = decoder
            .read(&mut byte)
            .map_err(|e| StorageError::InvalidObject(format!("zlib: {e}")))?;
        if n == 0 {
            return Err(StorageError::InvalidObject(
                "missing null byte in header".to_string(),
            ));
        }
        if byte[0] == 0 {
            break;
        }
        header.push(byte[0]);
        if header.len() > MAX_HEADER_LEN {
            return Err(StorageError::InvalidObject("header too long".to_string()));
        }
    }
    parse_header(&header)
}

fn parse_header(raw: &[u8]) -> Result<ObjectHeader> {
    let header = std::str::from_utf8(raw)
        .map_err(|_| StorageError::InvalidObject("header is not utf-8".to_string()))?;
    let (kind, size) = header
        .split_once(' ')
        .ok_or_else(|| StorageError::InvalidObject(format!("invalid header: {header}")))?;

    let object_type = ObjectType::parse(kind)?;
    let size = size
        .parse::<usize>()
        .map_err(|_| StorageError::InvalidObject(format!("invalid size: {size}")))?;

    Ok(ObjectHeader { object_type, size })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_level_default() {
        assert_eq!(CompressionLevel::default(), CompressionLevel::Default);
    }

    #[test]
    fn test_compression_level_yaml() {
        let level: CompressionLevel = serde_yaml::from_str("best").unwrap();
        assert_eq!(level, CompressionLevel::Best);
        assert!(serde_yaml::from_str::<CompressionLevel>("extreme").is_err());
    }

    #[test]
    fn test_compression_stats() {
        let stats = CompressionStats::new();

        stats.record_compress(1000, 500);
        stats.record_compress(1000, 500);
        stats.record_decompress();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.input_bytes, 2000);
        assert_eq!(snapshot.output_bytes, 1000);
        assert_eq!(snapshot.compress_count, 2);
        assert_eq!(snapshot.decompress_count, 1);
        assert!((snapshot.compression_ratio() - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_compression_ratio_zero_input() {
        assert_eq!(CompressionStats::new().snapshot().compression_ratio(), 1.0);
    }

    #[test]
    fn test_loose_roundtrip() {
        for level in [
            CompressionLevel::None,
            CompressionLevel::Fast,
            CompressionLevel::Best,
        ] {
            let object = Object::blob(b"loose object payload".to_vec());
            let encoded = encode_loose(&object, level).unwrap();
            let decoded = decode_loose(&encoded).unwrap();
            assert_eq!(decoded, object);
        }
    }

    #[test]
    fn test_header_only() {
        let object = Object::new(ObjectType::Commit, vec![b'x'; 4096]);
        let encoded = encode_loose(&object, CompressionLevel::Default).unwrap();
        let header = decode_loose_header(encoded.as_slice()).unwrap();
        assert_eq!(header.object_type, ObjectType::Commit);
        assert_eq!(header.size, 4096);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(decode_loose(b"definitely not zlib").is_err());
        assert!(decode_loose_header(&b"definitely not zlib"[..]).is_err());
    }

    #[test]
    fn test_decode_size_mismatch() {
        let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"blob 10\0short").unwrap();
        let encoded = encoder.finish().unwrap();
        assert!(matches!(
            decode_loose(&encoded),
            Err(StorageError::InvalidObject(_))
        ));
    }
}
