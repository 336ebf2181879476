mod lz4_codec;
mod stored;
mod zlib_codec;
mod zstd_codec;

pub use lz4_codec::Lz4Codec;
pub use stored::StoredCodec;
pub use zlib_codec::ZlibCodec;
pub use zstd_codec::ZstdCodec;

use std::sync::Arc;

use rac_core::format::{CODEC_LZ4, CODEC_STORED, CODEC_ZLIB, CODEC_ZSTD};
use rac_core::{Codec, CodecRegistry};

/// Initial output capacity for decoding a chunk. The declared length comes
/// from the index and is only trusted as an upper bound; the buffer grows as
/// real output arrives.
pub(crate) fn capacity_hint(expected_len: usize, compressed_len: usize) -> usize {
    expected_len.min(compressed_len.saturating_mul(8).max(64 * 1024))
}

/// Registry holding every bundled codec at its default level.
///
/// Readers only need this: compression level never affects decoding.
pub fn default_registry() -> CodecRegistry {
    CodecRegistry::new()
        .with(Arc::new(StoredCodec))
        .with(Arc::new(ZlibCodec::default()))
        .with(Arc::new(Lz4Codec))
        .with(Arc::new(ZstdCodec::default()))
}

/// Resolve a codec from its on-disk `codec_id`.
pub fn codec_by_id(id: u32) -> anyhow::Result<Arc<dyn Codec>> {
    match id {
        CODEC_STORED => Ok(Arc::new(StoredCodec)),
        CODEC_ZLIB => Ok(Arc::new(ZlibCodec::default())),
        CODEC_LZ4 => Ok(Arc::new(Lz4Codec)),
        CODEC_ZSTD => Ok(Arc::new(ZstdCodec::default())),
        _ => anyhow::bail!("unknown codec id {}; supported: 0 (stored), 1 (zlib), 2 (lz4), 3 (zstd)", id),
    }
}

/// Resolve a codec from its CLI name, applying `level` where the codec has
/// one. `None` keeps the codec's default level.
pub fn codec_by_name(name: &str, level: Option<i32>) -> anyhow::Result<Arc<dyn Codec>> {
    match name {
        "stored" | "none" => Ok(Arc::new(StoredCodec)),
        "zlib" | "deflate" => Ok(Arc::new(match level {
            Some(l) => ZlibCodec::new(l.clamp(0, 9) as u32),
            None => ZlibCodec::default(),
        })),
        "lz4" => Ok(Arc::new(Lz4Codec)),
        "zstd" => Ok(Arc::new(match level {
            Some(l) => ZstdCodec::new(l),
            None => ZstdCodec::default(),
        })),
        other => anyhow::bail!(
            "unknown codec '{}'. Valid options: zlib, lz4, zstd, stored",
            other
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        b"the quick brown fox jumps over the lazy dog. "
            .iter()
            .copied()
            .cycle()
            .take(10_000)
            .collect()
    }

    #[test]
    fn every_bundled_codec_round_trips_a_chunk() {
        let raw = sample();
        let registry = default_registry();
        for id in registry.ids() {
            let codec = registry.get(id).unwrap();
            let compressed = codec.compress(&raw, None).unwrap();
            let back = codec.decompress(&compressed, raw.len(), None).unwrap();
            assert_eq!(back, raw, "codec {}", codec.name());
        }
    }

    #[test]
    fn dictionary_codecs_need_the_same_dictionary_back() {
        let raw = sample();
        let dict = b"the quick brown fox jumps over the lazy dog. ".repeat(8);
        for id in [CODEC_ZLIB, CODEC_ZSTD, CODEC_LZ4] {
            let codec = codec_by_id(id).unwrap();
            let compressed = codec.compress(&raw, Some(dict.as_slice())).unwrap();
            let back = codec.decompress(&compressed, raw.len(), Some(dict.as_slice())).unwrap();
            assert_eq!(back, raw, "codec {}", codec.name());
        }
    }

    #[test]
    fn zlib_dictionary_shrinks_small_chunks_and_is_required_back() {
        let codec = ZlibCodec::default();
        let raw = b"the quick brown fox jumps over the lazy dog. ".to_vec();
        let dict = raw.repeat(2);
        let plain = codec.compress(&raw, None).unwrap();
        let seeded = codec.compress(&raw, Some(&dict)).unwrap();
        assert!(seeded.len() < plain.len(), "{} vs {}", seeded.len(), plain.len());

        assert!(codec.decompress(&seeded, raw.len(), None).is_err());
        assert!(codec.decompress(&seeded, raw.len(), Some(&b"some other dictionary"[..])).is_err());
        assert_eq!(codec.decompress(&seeded, raw.len(), Some(&dict)).unwrap(), raw);
    }

    #[test]
    fn stored_rejects_dictionaries() {
        let codec = codec_by_id(CODEC_STORED).unwrap();
        assert!(codec.compress(b"abc", Some(&b"dict"[..])).is_err());
    }

    #[test]
    fn huge_declared_length_does_not_allocate_it() {
        let raw = sample();
        for id in [CODEC_STORED, CODEC_ZLIB, CODEC_LZ4, CODEC_ZSTD] {
            let codec = codec_by_id(id).unwrap();
            let compressed = codec.compress(&raw, None).unwrap();
            // Either a short buffer comes back or an error does; the caller
            // rejects the length mismatch.
            if let Ok(back) = codec.decompress(&compressed, 1 << 50, None) {
                assert_eq!(back, raw, "codec {}", codec.name());
            }
        }
    }

    #[test]
    fn truncated_zlib_stream_is_an_error() {
        let codec = ZlibCodec::default();
        let compressed = codec.compress(&sample(), None).unwrap();
        assert!(codec.decompress(&compressed[..compressed.len() / 2], 10_000, None).is_err());
    }

    #[test]
    fn zlib_reports_overlong_output() {
        let codec = ZlibCodec::default();
        let compressed = codec.compress(&sample(), None).unwrap();
        let raw = codec.decompress(&compressed, 100, None).unwrap();
        assert_eq!(raw.len(), 101);
    }

    #[test]
    fn zstd_reports_overlong_output() {
        let codec = ZstdCodec::default();
        let compressed = codec.compress(&sample(), None).unwrap();
        let raw = codec.decompress(&compressed, 100, None).unwrap();
        assert_eq!(raw.len(), 101);
    }

    #[test]
    fn names_resolve_with_levels() {
        assert_eq!(codec_by_name("zstd", Some(19)).unwrap().id(), CODEC_ZSTD);
        assert_eq!(codec_by_name("deflate", None).unwrap().id(), CODEC_ZLIB);
        assert!(codec_by_name("brotli", None).is_err());
    }
}
