use anyhow::{bail, Context};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use rac_core::format::CODEC_ZLIB;
use rac_core::Codec;

use crate::capacity_hint;

/// Zlib (DEFLATE with zlib framing) chunk codec.
///
/// The default RAC codec: universally available, moderate ratio, moderate
/// speed. A shared dictionary is installed as the zlib preset dictionary, so
/// small chunks of similar data can back-reference it from their first byte.
pub struct ZlibCodec {
    /// Compression level (0 = store, 9 = smallest).
    pub level: u32,
}

impl Default for ZlibCodec {
    fn default() -> Self {
        Self { level: 6 }
    }
}

impl ZlibCodec {
    pub fn new(level: u32) -> Self {
        Self { level: level.min(9) }
    }
}

impl Codec for ZlibCodec {
    fn id(&self) -> u32 {
        CODEC_ZLIB
    }

    fn name(&self) -> &'static str {
        "zlib"
    }

    fn compress(&self, raw: &[u8], dictionary: Option<&[u8]>) -> anyhow::Result<Vec<u8>> {
        let mut z = Compress::new(Compression::new(self.level), true);
        if let Some(dict) = dictionary {
            z.set_dictionary(dict).context("zlib: installing preset dictionary")?;
        }
        let mut out = Vec::with_capacity(raw.len() / 2 + 64);
        loop {
            let input = &raw[z.total_in() as usize..];
            match z.compress_vec(input, &mut out, FlushCompress::Finish)? {
                Status::StreamEnd => return Ok(out),
                Status::Ok | Status::BufError => out.reserve(out.capacity().max(64)),
            }
        }
    }

    fn decompress(
        &self,
        compressed: &[u8],
        expected_len: usize,
        dictionary: Option<&[u8]>,
    ) -> anyhow::Result<Vec<u8>> {
        // Growth stops one byte past the declared length: enough to detect an
        // overlong stream without trusting the declared length for the
        // allocation.
        let limit = expected_len.saturating_add(1);
        let mut z = Decompress::new(true);
        let mut out = Vec::with_capacity(capacity_hint(expected_len, compressed.len()));
        loop {
            let input = &compressed[z.total_in() as usize..];
            match z.decompress_vec(input, &mut out, FlushDecompress::Finish) {
                Ok(Status::StreamEnd) => return Ok(out),
                Ok(_) => {
                    if out.len() >= limit {
                        out.truncate(limit);
                        return Ok(out);
                    }
                    if out.len() == out.capacity() {
                        out.reserve_exact((limit - out.len()).min(out.capacity().max(4096)));
                    } else if z.total_in() as usize == compressed.len() {
                        bail!("truncated zlib stream after {} bytes", out.len());
                    }
                }
                Err(e) => match (e.needs_dictionary(), dictionary) {
                    (Some(_), Some(dict)) => {
                        z.set_dictionary(dict).context("zlib: installing preset dictionary")?;
                    }
                    (Some(_), None) => bail!("zlib stream needs a preset dictionary"),
                    (None, _) => return Err(e).context("zlib decompress error"),
                },
            }
        }
    }
}
