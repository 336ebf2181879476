use crate::error::{RacError, Result};
use crate::format::ChunkDescriptor;

/// In-memory form of a container's index.
///
/// A table can only be built through [`ChunkDescriptorTable::new`], which
/// checks that DSpace is covered contiguously from 0 and that no chunk's
/// CSpace range overlaps another or runs past the container. Once built it is
/// read-only, so it can be shared freely between decode workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptorTable {
    chunks: Vec<ChunkDescriptor>,
    total_d_size: u64,
    total_c_size: u64,
}

impl ChunkDescriptorTable {
    pub fn new(chunks: Vec<ChunkDescriptor>, total_d_size: u64, total_c_size: u64) -> Result<Self> {
        let mut expected_d = 0u64;
        for (i, c) in chunks.iter().enumerate() {
            if c.d_length == 0 {
                return Err(RacError::format(format!("chunk {i} has zero DSpace length")));
            }
            if c.d_offset != expected_d {
                return Err(RacError::format(format!(
                    "chunk {i} starts at DSpace offset {} but previous chunk ends at {expected_d}",
                    c.d_offset
                )));
            }
            expected_d = c
                .d_offset
                .checked_add(c.d_length)
                .ok_or_else(|| RacError::format(format!("chunk {i} DSpace range overflows")))?;

            let c_end = c
                .c_offset
                .checked_add(c.c_length)
                .ok_or_else(|| RacError::format(format!("chunk {i} CSpace range overflows")))?;
            if c_end > total_c_size {
                return Err(RacError::format(format!(
                    "chunk {i} CSpace range {}..{c_end} exceeds container size {total_c_size}",
                    c.c_offset
                )));
            }
        }
        if expected_d != total_d_size {
            return Err(RacError::format(format!(
                "chunks cover {expected_d} DSpace bytes but header declares {total_d_size}"
            )));
        }

        // CSpace may have gaps but no overlaps. Chunks are usually laid out in
        // DSpace order, so sorting an index vector is cheap.
        let mut by_c: Vec<usize> = (0..chunks.len()).filter(|&i| chunks[i].c_length > 0).collect();
        by_c.sort_unstable_by_key(|&i| chunks[i].c_offset);
        for pair in by_c.windows(2) {
            let (a, b) = (&chunks[pair[0]], &chunks[pair[1]]);
            if a.c_end() > b.c_offset {
                return Err(RacError::format(format!(
                    "chunks {} and {} overlap in CSpace",
                    pair[0], pair[1]
                )));
            }
        }

        Ok(Self {
            chunks,
            total_d_size,
            total_c_size,
        })
    }

    #[inline]
    pub fn chunks(&self) -> &[ChunkDescriptor] {
        &self.chunks
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&ChunkDescriptor> {
        self.chunks.get(idx)
    }

    #[inline]
    pub fn total_d_size(&self) -> u64 {
        self.total_d_size
    }

    #[inline]
    pub fn total_c_size(&self) -> u64 {
        self.total_c_size
    }

    /// Sum of chunk payload lengths, excluding index, trailer and padding.
    pub fn payload_c_size(&self) -> u64 {
        self.chunks.iter().map(|c| c.c_length).sum()
    }

    /// Compression ratio (decompressed / container size).
    pub fn ratio(&self) -> f64 {
        if self.total_c_size == 0 {
            return 1.0;
        }
        self.total_d_size as f64 / self.total_c_size as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(d_offset: u64, d_length: u64, c_offset: u64, c_length: u64) -> ChunkDescriptor {
        ChunkDescriptor {
            d_offset,
            d_length,
            c_offset,
            c_length,
            ..Default::default()
        }
    }

    #[test]
    fn accepts_contiguous_dspace_with_cspace_gaps() {
        let table = ChunkDescriptorTable::new(
            vec![chunk(0, 10, 0, 5), chunk(10, 10, 4096, 6)],
            20,
            4102,
        )
        .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.payload_c_size(), 11);
    }

    #[test]
    fn rejects_dspace_gap() {
        let err = ChunkDescriptorTable::new(vec![chunk(0, 10, 0, 5), chunk(11, 10, 5, 5)], 21, 10)
            .unwrap_err();
        assert!(err.to_string().contains("previous chunk ends at 10"), "{err}");
    }

    #[test]
    fn rejects_nonzero_first_offset() {
        assert!(ChunkDescriptorTable::new(vec![chunk(1, 10, 0, 5)], 11, 5).is_err());
    }

    #[test]
    fn rejects_cspace_overlap() {
        let err = ChunkDescriptorTable::new(vec![chunk(0, 10, 0, 8), chunk(10, 10, 4, 8)], 20, 20)
            .unwrap_err();
        assert!(err.to_string().contains("overlap"), "{err}");
    }

    #[test]
    fn rejects_chunk_past_container_end() {
        assert!(ChunkDescriptorTable::new(vec![chunk(0, 10, 0, 8)], 10, 7).is_err());
    }

    #[test]
    fn rejects_total_d_size_mismatch() {
        assert!(ChunkDescriptorTable::new(vec![chunk(0, 10, 0, 8)], 11, 8).is_err());
    }

    #[test]
    fn rejects_zero_length_chunk() {
        assert!(ChunkDescriptorTable::new(vec![chunk(0, 0, 0, 0)], 0, 0).is_err());
    }

    #[test]
    fn empty_table_is_valid() {
        let table = ChunkDescriptorTable::new(Vec::new(), 0, 35).unwrap();
        assert!(table.is_empty());
    }
}
