use lz4_flex::block::{compress, compress_with_dict, decompress, decompress_with_dict};
use rac_core::format::CODEC_LZ4;
use rac_core::Codec;

/// Upper bound on how much one compressed byte can expand: a long match
/// costs one extension byte per 255 bytes of output.
const MAX_EXPANSION: usize = 255;

/// LZ4 block codec.
///
/// Fastest decompression of all bundled codecs, typically several GB/s on
/// modern hardware. The chunk record already carries the decompressed length,
/// so the raw block format is used without a size prefix.
///
/// Best for: hot data, low-latency random access workloads.
pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn id(&self) -> u32 {
        CODEC_LZ4
    }

    fn name(&self) -> &'static str {
        "lz4"
    }

    fn compress(&self, raw: &[u8], dictionary: Option<&[u8]>) -> anyhow::Result<Vec<u8>> {
        Ok(match dictionary {
            Some(dict) => compress_with_dict(raw, dict),
            None => compress(raw),
        })
    }

    fn decompress(
        &self,
        compressed: &[u8],
        expected_len: usize,
        dictionary: Option<&[u8]>,
    ) -> anyhow::Result<Vec<u8>> {
        // lz4_flex allocates the declared length up front.
        let ceiling = compressed.len().saturating_mul(MAX_EXPANSION).saturating_add(64);
        if expected_len > ceiling {
            anyhow::bail!(
                "lz4: declared length {} is more than {} compressed bytes can hold",
                expected_len,
                compressed.len()
            );
        }
        let raw = match dictionary {
            Some(dict) => decompress_with_dict(compressed, expected_len, dict),
            None => decompress(compressed, expected_len),
        }
        .map_err(|e| anyhow::anyhow!("lz4 decompress error: {}", e))?;
        Ok(raw)
    }
}
