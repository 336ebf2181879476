//! Fan-out/fan-in decoding of a resolved chunk run.
//!
//! Each chunk decodes on its own: a positioned read of its CSpace bytes and
//! one codec call. Parallel results land in a slot per chunk position, so the
//! output order never depends on which worker finished first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::anyhow;
use log::trace;
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::codec::{CodecRegistry, Dictionaries};
use crate::error::{RacError, Result};
use crate::format::ChunkDescriptor;
use crate::range::ResolvedRange;
use crate::source::ReadAt;

/// Everything one worker needs to turn a chunk record into its DSpace bytes.
/// All of it is read-only, so one instance is shared by every worker.
pub(crate) struct ChunkDecoder<'a, S: ?Sized> {
    pub source: &'a S,
    pub registry: &'a CodecRegistry,
    pub dictionaries: &'a Dictionaries,
}

impl<S: ReadAt + ?Sized> ChunkDecoder<'_, S> {
    /// Decode chunk number `index` of the table.
    pub fn decode(&self, index: usize, chunk: &ChunkDescriptor) -> Result<Vec<u8>> {
        let codec = self.registry.for_decode(chunk.codec_id)?;
        let dictionary = self.dictionaries.for_decode(chunk.dictionary_id)?;
        let expected = usize::try_from(chunk.d_length)
            .map_err(|_| RacError::format(format!("chunk {index} is too large for this platform")))?;

        let compressed = self.source.read_vec_at(chunk.c_offset, chunk.c_length)?;
        let raw = codec
            .decompress(&compressed, expected, dictionary)
            .map_err(|e| RacError::codec(index, chunk.d_offset, e))?;
        if raw.len() != expected {
            return Err(RacError::codec(
                index,
                chunk.d_offset,
                anyhow!(
                    "{} decompressed to {} bytes but index says {}",
                    codec.name(),
                    raw.len(),
                    expected
                ),
            ));
        }
        trace!("chunk {index}: {} -> {} bytes", chunk.c_length, raw.len());
        Ok(raw)
    }
}

/// Decode chunks strictly in order on the calling thread, trimming as it goes.
pub(crate) fn decode_sequential<S: ReadAt + ?Sized>(
    decoder: &ChunkDecoder<'_, S>,
    range: &ResolvedRange<'_>,
) -> Result<Vec<u8>> {
    // Declared lengths are unverified until each chunk decodes.
    let mut out = Vec::new();
    for (i, chunk) in range.chunks.iter().enumerate() {
        let raw = decoder.decode(range.first_index + i, chunk)?;
        append_trimmed(&mut out, range, chunk, &raw);
    }
    Ok(out)
}

/// Decode chunks on `pool`, then assemble in DSpace order.
///
/// The first failure raises an abort flag: chunks not yet started are
/// skipped, chunks already in a codec call run to completion and are dropped,
/// and the first recorded error is returned.
pub(crate) fn decode_parallel<S: ReadAt + ?Sized>(
    decoder: &ChunkDecoder<'_, S>,
    range: &ResolvedRange<'_>,
    pool: &ThreadPool,
) -> Result<Vec<u8>> {
    let abort = AtomicBool::new(false);
    let first_error: Mutex<Option<RacError>> = Mutex::new(None);

    let slots: Vec<Option<Vec<u8>>> = pool.install(|| {
        range
            .chunks
            .par_iter()
            .enumerate()
            .map(|(i, chunk)| {
                if abort.load(Ordering::Acquire) {
                    return None;
                }
                match decoder.decode(range.first_index + i, chunk) {
                    Ok(raw) => Some(raw),
                    Err(e) => {
                        abort.store(true, Ordering::Release);
                        first_error
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .get_or_insert(e);
                        None
                    }
                }
            })
            .collect()
    });

    if let Some(e) = first_error.into_inner().unwrap_or_else(PoisonError::into_inner) {
        return Err(e);
    }

    // Every slot matched its declared length, so the range is backed by bytes
    // already in memory.
    let mut out = Vec::with_capacity(range.len() as usize);
    for (chunk, raw) in range.chunks.iter().zip(slots.iter().flatten()) {
        append_trimmed(&mut out, range, chunk, raw);
    }
    Ok(out)
}

/// Append the part of `raw` (the bytes of `chunk`) that falls inside the
/// requested range.
fn append_trimmed(out: &mut Vec<u8>, range: &ResolvedRange<'_>, chunk: &ChunkDescriptor, raw: &[u8]) {
    let lo = range.start.saturating_sub(chunk.d_offset) as usize;
    let hi = (range.end.min(chunk.d_end()) - chunk.d_offset) as usize;
    out.extend_from_slice(&raw[lo..hi]);
}
