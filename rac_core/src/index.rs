//! Index codec: the table of chunk records plus its header, checksum, and
//! (for index-at-end containers) trailer.
//!
//! ```text
//! index-at-start: [INDEX][pad?][CHUNK 0][pad?][CHUNK 1]...
//! index-at-end:   [CHUNK 0][pad?][CHUNK 1]...[INDEX][TRAILER]
//!
//! INDEX   = [HEADER: 27][RECORD: 40 × N][xxh3-64: 8]
//! TRAILER = [magic "RACt": 4][index offset: 8]
//! ```

use xxhash_rust::xxh3::xxh3_64;

use crate::error::{RacError, Result};
use crate::format::{
    index_len, ChunkDescriptor, IndexHeader, IndexLocation, Trailer, CHECKSUM_SIZE,
    FORMAT_VERSION, HEADER_SIZE, INDEX_MAGIC, RECORD_SIZE, TRAILER_SIZE,
};
use crate::source::ReadAt;
use crate::table::ChunkDescriptorTable;

/// Serialize `table` into index bytes tagged with `location`.
pub fn encode_index(table: &ChunkDescriptorTable, location: IndexLocation) -> Result<Vec<u8>> {
    let chunk_count = u32::try_from(table.len())
        .map_err(|_| RacError::Config(format!("{} chunks exceed the u32 index limit", table.len())))?;
    let header = IndexHeader {
        version: FORMAT_VERSION,
        location,
        chunk_count,
        total_d_size: table.total_d_size(),
        total_c_size: table.total_c_size(),
    };

    let mut buf = Vec::with_capacity(index_len(table.len() as u64) as usize);
    buf.extend_from_slice(&header.to_bytes());
    for chunk in table.chunks() {
        buf.extend_from_slice(&chunk.to_bytes());
    }
    let checksum = xxh3_64(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    Ok(buf)
}

/// Parse index bytes. `bytes` may extend past the index; the header's chunk
/// count decides how much is consumed.
///
/// The checksum is verified before any record is trusted, then the table
/// invariants are checked by [`ChunkDescriptorTable::new`].
pub fn decode_index(bytes: &[u8]) -> Result<(IndexHeader, ChunkDescriptorTable)> {
    let header_bytes: &[u8; HEADER_SIZE as usize] = bytes
        .get(..HEADER_SIZE as usize)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| RacError::format("truncated index header"))?;
    let header = IndexHeader::from_bytes(header_bytes)?;

    let body_len = (index_len(header.chunk_count as u64) - CHECKSUM_SIZE) as usize;
    let total_len = body_len + CHECKSUM_SIZE as usize;
    if bytes.len() < total_len {
        return Err(RacError::format(format!(
            "truncated index: {} chunk records need {total_len} bytes, have {}",
            header.chunk_count,
            bytes.len()
        )));
    }

    let mut stored = [0u8; CHECKSUM_SIZE as usize];
    stored.copy_from_slice(&bytes[body_len..total_len]);
    let stored = u64::from_le_bytes(stored);
    let computed = xxh3_64(&bytes[..body_len]);
    if stored != computed {
        return Err(RacError::format(format!(
            "index checksum mismatch: expected {stored:016x}, got {computed:016x}"
        )));
    }

    let chunks = bytes[HEADER_SIZE as usize..body_len]
        .chunks_exact(RECORD_SIZE as usize)
        .map(|rec| {
            let mut buf = [0u8; RECORD_SIZE as usize];
            buf.copy_from_slice(rec);
            ChunkDescriptor::from_bytes(&buf)
        })
        .collect();
    let table = ChunkDescriptorTable::new(chunks, header.total_d_size, header.total_c_size)?;
    Ok((header, table))
}

/// Find and parse the index of the container in `source`.
///
/// A leading index magic whose header says "start" is tried first. Otherwise
/// the fixed trailer at the very end names the index offset. The parsed
/// `total_c_size` must match the source length exactly.
pub fn read_table<S: ReadAt + ?Sized>(source: &S) -> Result<(ChunkDescriptorTable, IndexLocation)> {
    let source_len = source.len()?;

    let start_attempt = if source_len >= HEADER_SIZE {
        let mut head = [0u8; HEADER_SIZE as usize];
        source.read_exact_at(&mut head, 0)?;
        let leading_magic = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
        if leading_magic == INDEX_MAGIC && head[6] == IndexLocation::Start.as_byte() {
            Some(read_index_at(source, 0, source_len, IndexLocation::Start))
        } else {
            None
        }
    } else {
        None
    };
    if let Some(Ok(table)) = start_attempt {
        return Ok((table, IndexLocation::Start));
    }

    match read_trailer(source, source_len)? {
        Some(trailer) => {
            let table = read_index_at(source, trailer.index_offset, source_len, IndexLocation::End)?;
            Ok((table, IndexLocation::End))
        }
        None => match start_attempt {
            Some(Err(e)) => Err(e),
            _ => Err(RacError::format("no RAC index found at start or end of input")),
        },
    }
}

fn read_trailer<S: ReadAt + ?Sized>(source: &S, source_len: u64) -> Result<Option<Trailer>> {
    if source_len < TRAILER_SIZE {
        return Ok(None);
    }
    let mut buf = [0u8; TRAILER_SIZE as usize];
    source.read_exact_at(&mut buf, source_len - TRAILER_SIZE)?;
    Ok(Trailer::from_bytes(&buf))
}

fn read_index_at<S: ReadAt + ?Sized>(
    source: &S,
    offset: u64,
    source_len: u64,
    expected: IndexLocation,
) -> Result<ChunkDescriptorTable> {
    let limit = match expected {
        IndexLocation::Start => source_len,
        IndexLocation::End => source_len - TRAILER_SIZE,
    };
    if offset.checked_add(HEADER_SIZE).map_or(true, |end| end > limit) {
        return Err(RacError::format(format!(
            "index offset {offset} leaves no room for a header in {source_len}-byte input"
        )));
    }

    let mut head = [0u8; HEADER_SIZE as usize];
    source.read_exact_at(&mut head, offset)?;
    let header = IndexHeader::from_bytes(&head)?;
    let len = index_len(header.chunk_count as u64);
    if offset + len > limit {
        return Err(RacError::format(format!(
            "truncated index: {} chunk records at offset {offset} run past end of input",
            header.chunk_count
        )));
    }
    if expected == IndexLocation::End && offset + len != limit {
        return Err(RacError::format(format!(
            "index at offset {offset} does not end at the trailer"
        )));
    }

    let bytes = source.read_vec_at(offset, len)?;
    let (header, table) = decode_index(&bytes)?;
    if header.location != expected {
        return Err(RacError::format(format!(
            "index header says {:?} but index was found at {:?}",
            header.location, expected
        )));
    }
    if header.total_c_size != source_len {
        return Err(RacError::format(format!(
            "header declares {} container bytes but input has {source_len}",
            header.total_c_size
        )));
    }

    // Chunk bytes may not share CSpace with the index or the trailer.
    let reserved_end = match expected {
        IndexLocation::Start => offset + len,
        IndexLocation::End => source_len,
    };
    if let Some((i, chunk)) = table
        .chunks()
        .iter()
        .enumerate()
        .find(|(_, c)| c.c_length > 0 && c.c_offset < reserved_end && c.c_end() > offset)
    {
        return Err(RacError::format(format!(
            "chunk {i} at CSpace {}..{} overlaps the index region {offset}..{reserved_end}",
            chunk.c_offset,
            chunk.c_end()
        )));
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{CODEC_STORED, CODEC_ZSTD};

    fn sample_table(total_c: u64) -> ChunkDescriptorTable {
        ChunkDescriptorTable::new(
            vec![
                ChunkDescriptor {
                    d_offset: 0,
                    d_length: 100,
                    c_offset: 0,
                    c_length: 40,
                    codec_id: CODEC_ZSTD,
                    dictionary_id: 0,
                },
                ChunkDescriptor {
                    d_offset: 100,
                    d_length: 50,
                    c_offset: 40,
                    c_length: 50,
                    codec_id: CODEC_STORED,
                    dictionary_id: 1,
                },
            ],
            150,
            total_c,
        )
        .unwrap()
    }

    #[test]
    fn encode_then_decode_preserves_every_field() {
        let table = sample_table(200);
        let bytes = encode_index(&table, IndexLocation::End).unwrap();
        assert_eq!(bytes.len() as u64, index_len(2));
        let (header, decoded) = decode_index(&bytes).unwrap();
        assert_eq!(header.location, IndexLocation::End);
        assert_eq!(decoded, table);
    }

    #[test]
    fn any_flipped_byte_is_a_format_error() {
        let table = sample_table(200);
        let bytes = encode_index(&table, IndexLocation::Start).unwrap();
        for i in 0..bytes.len() {
            let mut corrupt = bytes.clone();
            corrupt[i] ^= 0x40;
            let err = decode_index(&corrupt).unwrap_err();
            assert!(matches!(err, RacError::Format(_)), "byte {i}: {err}");
        }
    }

    #[test]
    fn truncated_index_is_rejected() {
        let bytes = encode_index(&sample_table(200), IndexLocation::Start).unwrap();
        let err = decode_index(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(err.to_string().contains("truncated"), "{err}");
    }

    #[test]
    fn read_table_finds_index_via_trailer() {
        let chunk_bytes = 90u64;
        let total = chunk_bytes + index_len(2) + TRAILER_SIZE;
        let table = sample_table(total);
        let mut container = vec![0xAAu8; chunk_bytes as usize];
        container.extend(encode_index(&table, IndexLocation::End).unwrap());
        container.extend_from_slice(&Trailer { index_offset: chunk_bytes }.to_bytes());

        let (found, location) = read_table(&container).unwrap();
        assert_eq!(location, IndexLocation::End);
        assert_eq!(found, table);
    }

    #[test]
    fn read_table_rejects_size_mismatch() {
        let table = sample_table(999);
        let mut container = vec![0u8; 90];
        container.extend(encode_index(&table, IndexLocation::End).unwrap());
        container.extend_from_slice(&Trailer { index_offset: 90 }.to_bytes());
        assert!(matches!(read_table(&container), Err(RacError::Format(_))));
    }

    #[test]
    fn chunk_inside_leading_index_is_rejected() {
        let total = index_len(2) + 90;
        let table = sample_table(total);
        let mut container = encode_index(&table, IndexLocation::Start).unwrap();
        container.extend(vec![0u8; 90]);

        let err = read_table(&container).unwrap_err();
        assert!(matches!(err, RacError::Format(_)), "{err}");
        assert!(err.to_string().contains("overlaps the index"), "{err}");
    }

    #[test]
    fn chunk_running_into_trailing_index_is_rejected() {
        let chunk_bytes = 90u64;
        let total = chunk_bytes + index_len(2) + TRAILER_SIZE;
        let mut chunks = sample_table(total).chunks().to_vec();
        chunks[1].c_offset = 60;
        let table = ChunkDescriptorTable::new(chunks, 150, total).unwrap();
        let mut container = vec![0xAAu8; chunk_bytes as usize];
        container.extend(encode_index(&table, IndexLocation::End).unwrap());
        container.extend_from_slice(&Trailer { index_offset: chunk_bytes }.to_bytes());

        let err = read_table(&container).unwrap_err();
        assert!(err.to_string().contains("overlaps the index"), "{err}");
    }

    #[test]
    fn read_table_without_index_fails() {
        let junk = vec![7u8; 64];
        assert!(matches!(read_table(&junk), Err(RacError::Format(_))));
    }
}
