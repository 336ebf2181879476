//! Chunk partitioning and page alignment for the encoder.
//!
//! With a DSpace target the whole partition is known up front. With a CSpace
//! target, where a chunk ends depends on how well its bytes compress, so the
//! planner hands the pipeline an online [`ChunkCutter`] that decides each
//! boundary by compressing speculatively.

use serde::{Deserialize, Serialize};

use crate::error::{RacError, Result};
use crate::format::DEFAULT_D_CHUNK_SIZE;

/// Upper bound on one chunk's DSpace length when cutting by compressed size.
/// Keeps highly compressible input from growing a single chunk without limit.
pub const MAX_ADAPTIVE_D_CHUNK: usize = 16 * 1024 * 1024;

/// Binary search for a CSpace-targeted boundary stops once the fitting and
/// overshooting prefixes are this close.
const SEARCH_GRANULARITY: usize = 256;

/// Which size target is authoritative for chunk boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkSizing {
    /// Every chunk holds this many decompressed bytes (the last may be shorter).
    Decompressed(u64),
    /// Chunks grow until their compressed form reaches this many bytes.
    Compressed(u64),
}

impl Default for ChunkSizing {
    fn default() -> Self {
        ChunkSizing::Decompressed(DEFAULT_D_CHUNK_SIZE)
    }
}

impl ChunkSizing {
    /// Pick the authoritative target. Both zero means the 64 KiB DSpace
    /// default; both set is ambiguous and rejected.
    pub fn from_targets(c_chunk_size: u64, d_chunk_size: u64) -> Result<Self> {
        match (c_chunk_size, d_chunk_size) {
            (0, 0) => Ok(ChunkSizing::default()),
            (0, d) => Ok(ChunkSizing::Decompressed(d)),
            (c, 0) => Ok(ChunkSizing::Compressed(c)),
            (c, d) => Err(RacError::Config(format!(
                "set at most one of the CSpace chunk size ({c}) and DSpace chunk size ({d})"
            ))),
        }
    }
}

/// A chunk's position in DSpace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBoundary {
    pub d_start: u64,
    pub d_length: u64,
}

/// Outcome of planning an input of known size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkPlan {
    Fixed(Vec<ChunkBoundary>),
    /// Boundaries are found while encoding; see [`ChunkCutter`].
    Adaptive { c_chunk_size: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Planner {
    sizing: ChunkSizing,
    page_size: u64,
}

impl Planner {
    pub fn new(sizing: ChunkSizing, page_size: u64) -> Self {
        Self { sizing, page_size }
    }

    pub fn from_targets(c_chunk_size: u64, d_chunk_size: u64, page_size: u64) -> Result<Self> {
        Ok(Self::new(ChunkSizing::from_targets(c_chunk_size, d_chunk_size)?, page_size))
    }

    pub fn sizing(&self) -> ChunkSizing {
        self.sizing
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Partition `input_size` DSpace bytes.
    pub fn plan(&self, input_size: u64) -> ChunkPlan {
        match self.sizing {
            ChunkSizing::Decompressed(n) => {
                let n = n.max(1);
                let mut boundaries = Vec::with_capacity(input_size.div_ceil(n) as usize);
                let mut d_start = 0;
                while d_start < input_size {
                    let d_length = n.min(input_size - d_start);
                    boundaries.push(ChunkBoundary { d_start, d_length });
                    d_start += d_length;
                }
                ChunkPlan::Fixed(boundaries)
            }
            ChunkSizing::Compressed(c) => ChunkPlan::Adaptive { c_chunk_size: c },
        }
    }

    /// Zero bytes to insert before a chunk that would otherwise start at
    /// `offset` so that it starts on a page boundary.
    pub fn padding_before(&self, offset: u64) -> u64 {
        padding_for(offset, self.page_size)
    }

    pub fn cutter(&self) -> ChunkCutter {
        ChunkCutter::new(self.sizing)
    }
}

/// Bytes needed to round `offset` up to a multiple of `page_size`.
pub fn padding_for(offset: u64, page_size: u64) -> u64 {
    if page_size == 0 {
        return 0;
    }
    match offset % page_size {
        0 => 0,
        rem => page_size - rem,
    }
}

/// A boundary decision: cut the first `d_length` pending bytes. When the
/// cutter already compressed exactly that prefix, the bytes are handed over
/// so the pipeline does not compress twice.
#[derive(Debug)]
pub struct Cut {
    pub d_length: usize,
    pub compressed: Option<Vec<u8>>,
}

/// Online boundary decider, fed the encoder's pending (not yet chunked) input.
#[derive(Debug)]
pub struct ChunkCutter {
    sizing: ChunkSizing,
    span: usize,
    /// Longest pending prefix known to compress within the target, with its
    /// compressed bytes. Pending input only grows at the tail between cuts, so
    /// this stays valid until the next cut.
    fitting: Option<(usize, Vec<u8>)>,
}

impl ChunkCutter {
    pub fn new(sizing: ChunkSizing) -> Self {
        let span = match sizing {
            ChunkSizing::Decompressed(n) => clamp_len(n),
            ChunkSizing::Compressed(c) => clamp_len(c).min(MAX_ADAPTIVE_D_CHUNK),
        };
        Self {
            sizing,
            span,
            fitting: None,
        }
    }

    /// Decide the next boundary within `pending`.
    ///
    /// Returns `None` when more input is needed (or `pending` is empty).
    /// `at_eof` means no more input will arrive before the next boundary.
    /// `compress` is only called in CSpace-targeted mode.
    pub fn next_cut<F>(&mut self, pending: &[u8], at_eof: bool, mut compress: F) -> Result<Option<Cut>>
    where
        F: FnMut(&[u8]) -> Result<Vec<u8>>,
    {
        if pending.is_empty() {
            return Ok(None);
        }
        let target = match self.sizing {
            ChunkSizing::Decompressed(_) => {
                return Ok(if pending.len() >= self.span {
                    Some(Cut {
                        d_length: self.span,
                        compressed: None,
                    })
                } else if at_eof {
                    Some(Cut {
                        d_length: pending.len(),
                        compressed: None,
                    })
                } else {
                    None
                });
            }
            ChunkSizing::Compressed(c) => c,
        };

        loop {
            if pending.len() < self.span && !at_eof {
                return Ok(None);
            }
            let window = self.span.min(pending.len());
            let compressed = compress(&pending[..window])?;

            if compressed.len() as u64 > target {
                let cut = self.search(pending, window, target, &mut compress)?;
                self.reset();
                return Ok(Some(cut));
            }
            if (window == pending.len() && at_eof) || window >= MAX_ADAPTIVE_D_CHUNK {
                self.reset();
                return Ok(Some(Cut {
                    d_length: window,
                    compressed: Some(compressed),
                }));
            }
            self.fitting = Some((window, compressed));
            self.span = (self.span * 2).min(MAX_ADAPTIVE_D_CHUNK);
        }
    }

    /// Binary search between the longest known-fitting prefix and `over`, a
    /// prefix known to compress past `target`.
    fn search<F>(&mut self, pending: &[u8], over: usize, target: u64, compress: &mut F) -> Result<Cut>
    where
        F: FnMut(&[u8]) -> Result<Vec<u8>>,
    {
        let (mut lo, mut lo_bytes) = match self.fitting.take() {
            Some((len, bytes)) => (len, Some(bytes)),
            None => (0, None),
        };
        let mut hi = over;
        while hi - lo > 1 && (lo == 0 || hi - lo > SEARCH_GRANULARITY) {
            let mid = lo + (hi - lo) / 2;
            let c = compress(&pending[..mid])?;
            if c.len() as u64 <= target {
                lo = mid;
                lo_bytes = Some(c);
            } else {
                hi = mid;
            }
        }
        if lo == 0 {
            // Even one byte overshoots; a chunk still has to make progress.
            return Ok(Cut {
                d_length: 1,
                compressed: None,
            });
        }
        Ok(Cut {
            d_length: lo,
            compressed: lo_bytes,
        })
    }

    /// Forget any partially searched boundary and its compressed bytes.
    pub(crate) fn reset(&mut self) {
        self.fitting = None;
        if let ChunkSizing::Compressed(c) = self.sizing {
            self.span = clamp_len(c).min(MAX_ADAPTIVE_D_CHUNK);
        }
    }
}

fn clamp_len(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_targets_zero_defaults_to_64k_dspace() {
        assert_eq!(
            ChunkSizing::from_targets(0, 0).unwrap(),
            ChunkSizing::Decompressed(65536)
        );
    }

    #[test]
    fn both_targets_set_is_a_config_error() {
        assert!(matches!(
            ChunkSizing::from_targets(100, 200),
            Err(RacError::Config(_))
        ));
    }

    #[test]
    fn plan_150000_bytes_in_64k_chunks() {
        let planner = Planner::from_targets(0, 65536, 0).unwrap();
        let ChunkPlan::Fixed(b) = planner.plan(150_000) else {
            panic!("expected a fixed plan");
        };
        let lengths: Vec<u64> = b.iter().map(|c| c.d_length).collect();
        assert_eq!(lengths, vec![65536, 65536, 18928]);
        assert_eq!(b[2].d_start, 131072);
    }

    #[test]
    fn plan_of_empty_input_has_no_chunks() {
        let planner = Planner::from_targets(0, 0, 0).unwrap();
        assert_eq!(planner.plan(0), ChunkPlan::Fixed(Vec::new()));
    }

    #[test]
    fn compressed_target_plans_adaptively() {
        let planner = Planner::from_targets(4096, 0, 0).unwrap();
        assert_eq!(planner.plan(1 << 20), ChunkPlan::Adaptive { c_chunk_size: 4096 });
    }

    #[test]
    fn padding_rounds_up_to_page() {
        assert_eq!(padding_for(0, 4096), 0);
        assert_eq!(padding_for(1, 4096), 4095);
        assert_eq!(padding_for(4096, 4096), 0);
        assert_eq!(padding_for(5000, 4096), 3192);
        assert_eq!(padding_for(5000, 0), 0);
    }

    #[test]
    fn dspace_cutter_matches_static_plan() {
        let planner = Planner::from_targets(0, 1000, 0).unwrap();
        let mut cutter = planner.cutter();
        let data = vec![1u8; 2500];
        let mut pending = &data[..];
        let mut lengths = Vec::new();
        while let Some(cut) = cutter
            .next_cut(pending, true, |_| unreachable!("DSpace mode never compresses"))
            .unwrap()
        {
            lengths.push(cut.d_length as u64);
            pending = &pending[cut.d_length..];
        }
        let ChunkPlan::Fixed(plan) = planner.plan(2500) else {
            unreachable!()
        };
        assert_eq!(lengths, plan.iter().map(|b| b.d_length).collect::<Vec<_>>());
    }

    #[test]
    fn dspace_cutter_waits_for_a_full_chunk() {
        let mut cutter = ChunkCutter::new(ChunkSizing::Decompressed(10));
        assert!(cutter.next_cut(&[0; 9], false, |_| unreachable!()).unwrap().is_none());
        assert_eq!(
            cutter.next_cut(&[0; 9], true, |_| unreachable!()).unwrap().unwrap().d_length,
            9
        );
    }

    /// "Compressor" whose output is half the input length, rounded up.
    fn halving(raw: &[u8]) -> Result<Vec<u8>> {
        Ok(vec![0; raw.len().div_ceil(2)])
    }

    #[test]
    fn cspace_cutter_finds_largest_fitting_prefix() {
        let mut cutter = ChunkCutter::new(ChunkSizing::Compressed(1000));
        let data = vec![0u8; 10_000];
        let cut = cutter.next_cut(&data, false, halving).unwrap().unwrap();
        // 2000 raw bytes halve to exactly the target.
        assert!(cut.d_length <= 2000 && cut.d_length > 2000 - SEARCH_GRANULARITY);
        assert!(cut.compressed.unwrap().len() <= 1000);
    }

    #[test]
    fn cspace_cutter_takes_the_tail_at_eof() {
        let mut cutter = ChunkCutter::new(ChunkSizing::Compressed(1000));
        let cut = cutter.next_cut(&[0u8; 300], true, halving).unwrap().unwrap();
        assert_eq!(cut.d_length, 300);
    }

    #[test]
    fn cspace_cutter_waits_for_more_input() {
        let mut cutter = ChunkCutter::new(ChunkSizing::Compressed(1000));
        assert!(cutter.next_cut(&[0u8; 300], false, halving).unwrap().is_none());
    }

    #[test]
    fn cspace_cutter_always_makes_progress() {
        let mut cutter = ChunkCutter::new(ChunkSizing::Compressed(1));
        let expanding = |raw: &[u8]| -> Result<Vec<u8>> { Ok(vec![0; raw.len() + 10]) };
        let cut = cutter.next_cut(&[0u8; 50], true, expanding).unwrap().unwrap();
        assert_eq!(cut.d_length, 1);
    }
}
