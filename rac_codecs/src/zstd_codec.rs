use std::io::Read;

use anyhow::Context;
use rac_core::format::CODEC_ZSTD;
use rac_core::Codec;

use crate::capacity_hint;

/// Zstandard chunk codec.
///
/// Each chunk is compressed independently at the configured level (default:
/// 3). A shared dictionary, when given, is loaded as raw content, which helps
/// most when chunks are small and similar.
///
/// Best for: general text, JSON, logs, mixed structured data.
pub struct ZstdCodec {
    /// Compression level (1 = fast / larger, 22 = slow / smallest).
    pub level: i32,
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self { level: 3 }
    }
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Codec for ZstdCodec {
    fn id(&self) -> u32 {
        CODEC_ZSTD
    }

    fn name(&self) -> &'static str {
        "zstd"
    }

    fn compress(&self, raw: &[u8], dictionary: Option<&[u8]>) -> anyhow::Result<Vec<u8>> {
        let compressed = match dictionary {
            Some(dict) => zstd::bulk::Compressor::with_dictionary(self.level, dict)?.compress(raw)?,
            None => zstd::bulk::compress(raw, self.level)?,
        };
        Ok(compressed)
    }

    fn decompress(
        &self,
        compressed: &[u8],
        expected_len: usize,
        dictionary: Option<&[u8]>,
    ) -> anyhow::Result<Vec<u8>> {
        let decoder = match dictionary {
            Some(dict) => zstd::stream::read::Decoder::with_dictionary(compressed, dict)?,
            None => zstd::stream::read::Decoder::with_buffer(compressed)?,
        };
        // Reading stops one byte past the declared length, so a frame that
        // inflates further is caught without buffering all of it.
        let mut raw = Vec::with_capacity(capacity_hint(expected_len, compressed.len()));
        decoder
            .single_frame()
            .take((expected_len as u64).saturating_add(1))
            .read_to_end(&mut raw)
            .context("zstd decompress error")?;
        Ok(raw)
    }
}
