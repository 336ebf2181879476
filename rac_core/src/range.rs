use std::fmt;
use std::str::FromStr;

use crate::error::{RacError, Result};
use crate::format::ChunkDescriptor;
use crate::table::ChunkDescriptorTable;

/// A DSpace byte range to decode: `start` inclusive, `end` exclusive or
/// `None` for "to end of file".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeRequest {
    pub start: u64,
    pub end: Option<u64>,
}

impl DecodeRequest {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// Everything from `start` to the end of the decompressed data.
    pub fn from(start: u64) -> Self {
        Self { start, end: None }
    }

    /// The whole decompressed file.
    pub fn all() -> Self {
        Self::default()
    }
}

impl fmt::Display for DecodeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "{}..{end}", self.start),
            None => write!(f, "{}..", self.start),
        }
    }
}

/// Parses `"i..j"`, where either bound may be omitted: `"..8"` is the first 8
/// bytes, `"400.."` is everything from 400 on, `".."` is everything.
impl FromStr for DecodeRequest {
    type Err = RacError;

    fn from_str(s: &str) -> Result<Self> {
        let (lo, hi) = s
            .split_once("..")
            .ok_or_else(|| RacError::Config(format!("range '{s}' is not of the form i..j")))?;
        let bound = |b: &str| -> Result<Option<u64>> {
            let b = b.trim();
            if b.is_empty() {
                return Ok(None);
            }
            b.parse()
                .map(Some)
                .map_err(|_| RacError::Config(format!("bad range bound '{b}' in '{s}'")))
        };
        Ok(Self {
            start: bound(lo)?.unwrap_or(0),
            end: bound(hi)?,
        })
    }
}

/// The outcome of resolving a request against a table: the contiguous run of
/// chunks that covers it and the exact byte bounds to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange<'a> {
    /// Chunks to decode, in DSpace order.
    pub chunks: &'a [ChunkDescriptor],
    /// Position of `chunks[0]` in the whole table.
    pub first_index: usize,
    pub start: u64,
    pub end: u64,
}

impl ResolvedRange<'_> {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Find the minimal run of chunks covering `request`.
///
/// Fails with [`RacError::Range`] when the request starts or ends past the
/// decompressed size, or starts after it ends. An empty range resolves to no
/// chunks.
pub fn resolve<'a>(table: &'a ChunkDescriptorTable, request: DecodeRequest) -> Result<ResolvedRange<'a>> {
    let total = table.total_d_size();
    let start = request.start;
    let end = request.end.unwrap_or(total);
    if start > total || end > total || start > end {
        return Err(RacError::Range {
            start,
            end: request.end,
            total,
        });
    }

    let chunks = table.chunks();
    if start == end {
        return Ok(ResolvedRange {
            chunks: &chunks[..0],
            first_index: 0,
            start,
            end,
        });
    }

    // First chunk whose range contains `start`, and one past the last chunk
    // that begins before `end`.
    let first = chunks.partition_point(|c| c.d_end() <= start);
    let last = chunks.partition_point(|c| c.d_offset < end);
    Ok(ResolvedRange {
        chunks: &chunks[first..last],
        first_index: first,
        start,
        end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(lengths: &[u64]) -> ChunkDescriptorTable {
        let mut chunks = Vec::new();
        let mut d = 0;
        for &len in lengths {
            chunks.push(ChunkDescriptor {
                d_offset: d,
                d_length: len,
                c_offset: d,
                c_length: len,
                ..Default::default()
            });
            d += len;
        }
        ChunkDescriptorTable::new(chunks, d, d).unwrap()
    }

    #[test]
    fn range_inside_one_chunk_resolves_to_that_chunk() {
        let t = table(&[65536, 65536, 18928]);
        let r = resolve(&t, DecodeRequest::new(70_000, 70_010)).unwrap();
        assert_eq!(r.first_index, 1);
        assert_eq!(r.chunks.len(), 1);
        assert_eq!(r.chunks[0].d_offset, 65536);
        assert_eq!(r.len(), 10);
    }

    #[test]
    fn boundary_start_skips_previous_chunk() {
        let t = table(&[100, 100, 100]);
        let r = resolve(&t, DecodeRequest::new(100, 201)).unwrap();
        assert_eq!(r.first_index, 1);
        assert_eq!(r.chunks.len(), 2);
    }

    #[test]
    fn boundary_end_excludes_next_chunk() {
        let t = table(&[100, 100, 100]);
        let r = resolve(&t, DecodeRequest::new(50, 200)).unwrap();
        assert_eq!((r.first_index, r.chunks.len()), (0, 2));
    }

    #[test]
    fn unbounded_end_runs_through_last_chunk() {
        let t = table(&[100, 100, 100]);
        let r = resolve(&t, DecodeRequest::from(150)).unwrap();
        assert_eq!((r.first_index, r.chunks.len(), r.end), (1, 2, 300));
    }

    #[test]
    fn empty_range_touches_no_chunks() {
        let t = table(&[100, 100]);
        for a in [0, 50, 100, 200] {
            let r = resolve(&t, DecodeRequest::new(a, a)).unwrap();
            assert!(r.chunks.is_empty() && r.is_empty());
        }
    }

    #[test]
    fn out_of_range_requests_fail() {
        let t = table(&[100]);
        for req in [
            DecodeRequest::new(101, 101),
            DecodeRequest::from(101),
            DecodeRequest::new(60, 50),
            DecodeRequest::new(0, 101),
        ] {
            assert!(matches!(resolve(&t, req), Err(RacError::Range { .. })), "{req}");
        }
    }

    #[test]
    fn parses_slice_syntax() {
        assert_eq!("400..500".parse::<DecodeRequest>().unwrap(), DecodeRequest::new(400, 500));
        assert_eq!("..8".parse::<DecodeRequest>().unwrap(), DecodeRequest::new(0, 8));
        assert_eq!("400..".parse::<DecodeRequest>().unwrap(), DecodeRequest::from(400));
        assert_eq!("..".parse::<DecodeRequest>().unwrap(), DecodeRequest::all());
        assert!("400".parse::<DecodeRequest>().is_err());
        assert!("a..b".parse::<DecodeRequest>().is_err());
    }
}
