//! Whole-file and per-chunk compression contract (spec §4.4).

use crate::axdp::Compression;
use std::io::{Read, Write};

/// Minimum size worth compressing, and magic bytes of already-compressed
/// container formats we should not try to re-compress.
const MIN_COMPRESSIBLE_BYTES: usize = 256;
const ALREADY_COMPRESSED_MAGICS: &[&[u8]] = &[
    b"\x89PNG",
    b"\xFF\xD8\xFF", // JPEG
    b"PK\x03\x04",   // ZIP
    b"\x1F\x8B",     // gzip
];

/// Heuristic compressibility analyzer: mirrors the teacher's "don't bother
/// if it won't help" check before spending CPU on whole-file compression.
pub struct CompressionAnalyzer;

impl CompressionAnalyzer {
    pub fn is_compressible(data: &[u8]) -> bool {
        if data.len() < MIN_COMPRESSIBLE_BYTES {
            return false;
        }
        !ALREADY_COMPRESSED_MAGICS
            .iter()
            .any(|magic| data.starts_with(magic))
    }
}

/// Compress `data` with `alg`. Returns `None` if compression would not
/// shrink the data (spec §4.4 compression contract).
pub fn compress(data: &[u8], alg: Compression) -> Option<Vec<u8>> {
    let compressed = match alg {
        Compression::None => return None,
        Compression::Lz4 => lz4_flex::block::compress(data),
        Compression::Deflate => {
            use flate2::write::DeflateEncoder;
            use flate2::Compression as Level;
            let mut enc = DeflateEncoder::new(Vec::new(), Level::default());
            enc.write_all(data).ok()?;
            enc.finish().ok()?
        }
    };
    if compressed.len() < data.len() {
        Some(compressed)
    } else {
        None
    }
}

/// Decompress `data`, rejecting a malicious `original_length` claim that
/// exceeds `max_length` before allocating (spec §4.4).
pub fn decompress(
    data: &[u8],
    alg: Compression,
    original_length: usize,
    max_length: usize,
) -> Option<Vec<u8>> {
    if original_length > max_length {
        return None;
    }
    match alg {
        Compression::None => Some(data.to_vec()),
        Compression::Lz4 => lz4_flex::block::decompress(data, original_length).ok(),
        Compression::Deflate => {
            use flate2::read::DeflateDecoder;
            let mut dec = DeflateDecoder::new(data);
            let mut out = Vec::with_capacity(original_length.min(max_length));
            let mut limited = (&mut dec).take(max_length as u64);
            limited.read_to_end(&mut out).ok()?;
            if out.len() != original_length {
                return None;
            }
            Some(out)
        }
    }
}

/// Per-message decompression bound (spec §4.4): smaller than the per-file
/// bound, protects reassembly of a single AXDP chunk payload.
pub const PER_MESSAGE_MAX_DECOMPRESSED: usize = 256 * 1024;
/// Per-file decompression bound: at least 1 MiB, always >= the per-message
/// bound (spec §4.4).
pub const PER_FILE_MAX_DECOMPRESSED: usize = 16 * 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lz4_round_trips_and_rejects_over_budget_claims() {
        let original: Vec<u8> = b"This is test content for a larger file transfer. "
            .iter()
            .cycle()
            .take(24_500)
            .copied()
            .collect();
        let compressed = compress(&original, Compression::Lz4).expect("should compress");
        assert!(compressed.len() < original.len());
        let restored = decompress(
            &compressed,
            Compression::Lz4,
            original.len(),
            PER_FILE_MAX_DECOMPRESSED,
        )
        .expect("should decompress under per-file bound");
        assert_eq!(restored, original);

        assert!(decompress(
            &compressed,
            Compression::Lz4,
            original.len(),
            PER_MESSAGE_MAX_DECOMPRESSED.min(original.len() - 1),
        )
        .is_none());
    }

    #[test]
    fn deflate_round_trips() {
        let original = b"abcabcabcabcabcabcabcabcabcabcabcabcabcabcabcabcabc".repeat(20);
        let compressed = compress(&original, Compression::Deflate).expect("compress");
        let restored = decompress(
            &compressed,
            Compression::Deflate,
            original.len(),
            PER_FILE_MAX_DECOMPRESSED,
        )
        .unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn refuses_to_compress_incompressible_or_tiny_input() {
        assert!(!CompressionAnalyzer::is_compressible(b"short"));
        assert!(!CompressionAnalyzer::is_compressible(
            &[b"\x89PNG".as_slice(), &[0u8; 1000]].concat()
        ));
    }

    #[test]
    fn compress_returns_none_on_incompressible_input() {
        let mut pseudo_random = Vec::with_capacity(4096);
        let mut x: u32 = 0x12345678;
        for _ in 0..4096 {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            pseudo_random.push((x & 0xFF) as u8);
        }
        assert!(compress(&pseudo_random, Compression::Deflate).is_none());
    }
}
