use anyhow::bail;
use rac_core::format::CODEC_STORED;
use rac_core::Codec;

/// No-op codec: stores chunks verbatim.
///
/// Useful for:
/// - Verifying the container round-trip independently of any real codec.
/// - Data that is already compressed (JPEG, MP4, ...) where further
///   compression would expand the chunk.
pub struct StoredCodec;

impl Codec for StoredCodec {
    fn id(&self) -> u32 {
        CODEC_STORED
    }

    fn name(&self) -> &'static str {
        "stored"
    }

    fn compress(&self, raw: &[u8], dictionary: Option<&[u8]>) -> anyhow::Result<Vec<u8>> {
        if dictionary.is_some() {
            bail!("stored chunks cannot use a dictionary");
        }
        Ok(raw.to_vec())
    }

    fn decompress(
        &self,
        compressed: &[u8],
        _expected_len: usize,
        dictionary: Option<&[u8]>,
    ) -> anyhow::Result<Vec<u8>> {
        if dictionary.is_some() {
            bail!("stored chunks cannot use a dictionary");
        }
        Ok(compressed.to_vec())
    }
}
