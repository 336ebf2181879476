use serde::{Deserialize, Serialize};

use crate::error::{RacError, Result};

/// Magic at the start of every index: "RACi".
pub const INDEX_MAGIC: u32 = u32::from_le_bytes(*b"RACi");

/// Magic at the start of the index-at-end trailer: "RACt".
pub const TRAILER_MAGIC: u32 = u32::from_le_bytes(*b"RACt");

pub const FORMAT_VERSION: u16 = 1;

/// Fixed size of the index header in bytes.
///   magic:u32 + version:u16 + index_location:u8 + chunk_count:u32
///   + total_d_size:u64 + total_c_size:u64
///   = 4 + 2 + 1 + 4 + 8 + 8 = 27
pub const HEADER_SIZE: u64 = 27;

/// Size of each chunk record in the index, in bytes.
///   d_offset:u64 + d_length:u64 + c_offset:u64 + c_length:u64
///   + codec_id:u32 + dictionary_id:u32
///   = 8 + 8 + 8 + 8 + 4 + 4 = 40
pub const RECORD_SIZE: u64 = 40;

/// xxh3-64 over header and records, stored after the last record.
pub const CHECKSUM_SIZE: u64 = 8;

/// Index-at-end trailer: magic:u32 + index_offset:u64.
pub const TRAILER_SIZE: u64 = 12;

/// Default decompressed chunk size: 64 KiB.
pub const DEFAULT_D_CHUNK_SIZE: u64 = 64 * 1024;

/// `dictionary_id` value meaning "no dictionary".
pub const NO_DICTIONARY: u32 = 0;

// ── Codec IDs ──────────────────────────────────────────────────────────────

pub const CODEC_STORED: u32 = 0;
pub const CODEC_ZLIB: u32 = 1;
pub const CODEC_LZ4: u32 = 2;
pub const CODEC_ZSTD: u32 = 3;

/// Total encoded length of an index holding `chunk_count` records.
pub fn index_len(chunk_count: u64) -> u64 {
    HEADER_SIZE + chunk_count * RECORD_SIZE + CHECKSUM_SIZE
}

// ── Index location ─────────────────────────────────────────────────────────

/// Where the index lives in the container. Fixed at encode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexLocation {
    /// `[index][pad?][chunks...]`: smaller and cheaper to open, but the encoder
    /// has to hold all chunk bytes until the chunk count is known.
    #[default]
    Start,
    /// `[chunks...][index][trailer]`: chunks stream straight to the output.
    End,
}

impl IndexLocation {
    pub fn as_byte(self) -> u8 {
        match self {
            IndexLocation::Start => 0,
            IndexLocation::End => 1,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(IndexLocation::Start),
            1 => Ok(IndexLocation::End),
            other => Err(RacError::format(format!("invalid index location byte {other}"))),
        }
    }
}

impl std::str::FromStr for IndexLocation {
    type Err = RacError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(IndexLocation::Start),
            "end" => Ok(IndexLocation::End),
            other => Err(RacError::Config(format!(
                "unknown index location '{other}', expected 'start' or 'end'"
            ))),
        }
    }
}

// ── Header ─────────────────────────────────────────────────────────────────

/// Decoded representation of the 27-byte index header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHeader {
    pub version: u16,
    pub location: IndexLocation,
    pub chunk_count: u32,
    pub total_d_size: u64,
    pub total_c_size: u64,
}

impl IndexHeader {
    /// Serialize to exactly `HEADER_SIZE` bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&INDEX_MAGIC.to_le_bytes());
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6] = self.location.as_byte();
        buf[7..11].copy_from_slice(&self.chunk_count.to_le_bytes());
        buf[11..19].copy_from_slice(&self.total_d_size.to_le_bytes());
        buf[19..27].copy_from_slice(&self.total_c_size.to_le_bytes());
        buf
    }

    /// Deserialize from `HEADER_SIZE` bytes, checking magic and version.
    pub fn from_bytes(buf: &[u8; HEADER_SIZE as usize]) -> Result<Self> {
        let magic = u32::from_le_bytes(le(&buf[0..4]));
        if magic != INDEX_MAGIC {
            return Err(RacError::format(format!(
                "bad index magic {magic:#010x}, not a RAC index"
            )));
        }
        let version = u16::from_le_bytes(le(&buf[4..6]));
        if version != FORMAT_VERSION {
            return Err(RacError::format(format!(
                "unsupported RAC version {version} (only version {FORMAT_VERSION} is supported)"
            )));
        }
        Ok(Self {
            version,
            location: IndexLocation::from_byte(buf[6])?,
            chunk_count: u32::from_le_bytes(le(&buf[7..11])),
            total_d_size: u64::from_le_bytes(le(&buf[11..19])),
            total_c_size: u64::from_le_bytes(le(&buf[19..27])),
        })
    }
}

// ── Chunk record ───────────────────────────────────────────────────────────

/// One compressed unit: where it sits in DSpace and CSpace, and how to
/// decode it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub d_offset: u64,
    pub d_length: u64,
    /// Absolute offset of the chunk's first compressed byte in the container.
    pub c_offset: u64,
    /// Compressed length, excluding any padding before the chunk.
    pub c_length: u64,
    pub codec_id: u32,
    /// `NO_DICTIONARY` or a resource id.
    pub dictionary_id: u32,
}

impl ChunkDescriptor {
    #[inline]
    pub fn d_end(&self) -> u64 {
        self.d_offset + self.d_length
    }

    #[inline]
    pub fn c_end(&self) -> u64 {
        self.c_offset + self.c_length
    }

    pub fn dictionary(&self) -> Option<u32> {
        (self.dictionary_id != NO_DICTIONARY).then_some(self.dictionary_id)
    }

    /// Serialize to exactly `RECORD_SIZE` bytes.
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE as usize] {
        let mut buf = [0u8; RECORD_SIZE as usize];
        buf[0..8].copy_from_slice(&self.d_offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.d_length.to_le_bytes());
        buf[16..24].copy_from_slice(&self.c_offset.to_le_bytes());
        buf[24..32].copy_from_slice(&self.c_length.to_le_bytes());
        buf[32..36].copy_from_slice(&self.codec_id.to_le_bytes());
        buf[36..40].copy_from_slice(&self.dictionary_id.to_le_bytes());
        buf
    }

    /// Deserialize from `RECORD_SIZE` bytes.
    pub fn from_bytes(buf: &[u8; RECORD_SIZE as usize]) -> Self {
        Self {
            d_offset: u64::from_le_bytes(le(&buf[0..8])),
            d_length: u64::from_le_bytes(le(&buf[8..16])),
            c_offset: u64::from_le_bytes(le(&buf[16..24])),
            c_length: u64::from_le_bytes(le(&buf[24..32])),
            codec_id: u32::from_le_bytes(le(&buf[32..36])),
            dictionary_id: u32::from_le_bytes(le(&buf[36..40])),
        }
    }
}

// ── Trailer ────────────────────────────────────────────────────────────────

/// Fixed-size footer of an index-at-end container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    pub index_offset: u64,
}

impl Trailer {
    pub fn to_bytes(&self) -> [u8; TRAILER_SIZE as usize] {
        let mut buf = [0u8; TRAILER_SIZE as usize];
        buf[0..4].copy_from_slice(&TRAILER_MAGIC.to_le_bytes());
        buf[4..12].copy_from_slice(&self.index_offset.to_le_bytes());
        buf
    }

    /// `None` when the bytes do not start with the trailer magic.
    pub fn from_bytes(buf: &[u8; TRAILER_SIZE as usize]) -> Option<Self> {
        if u32::from_le_bytes(le(&buf[0..4])) != TRAILER_MAGIC {
            return None;
        }
        Some(Self {
            index_offset: u64::from_le_bytes(le(&buf[4..12])),
        })
    }
}

/// Copy a fixed-width little-endian field out of a slice whose length the
/// caller has already pinned.
#[inline]
fn le<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_27_bytes_little_endian() {
        let header = IndexHeader {
            version: FORMAT_VERSION,
            location: IndexLocation::End,
            chunk_count: 3,
            total_d_size: 150_000,
            total_c_size: 0x0102_0304,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], b"RACi");
        assert_eq!(bytes[6], 1);
        assert_eq!(&bytes[7..11], &3u32.to_le_bytes());
        assert_eq!(IndexHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn header_rejects_unknown_version() {
        let mut bytes = IndexHeader {
            version: FORMAT_VERSION,
            location: IndexLocation::Start,
            chunk_count: 0,
            total_d_size: 0,
            total_c_size: 35,
        }
        .to_bytes();
        bytes[4] = 9;
        let err = IndexHeader::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, RacError::Format(_)), "got {err}");
    }

    #[test]
    fn record_field_order_is_fixed() {
        let d = ChunkDescriptor {
            d_offset: 1,
            d_length: 2,
            c_offset: 3,
            c_length: 4,
            codec_id: CODEC_ZSTD,
            dictionary_id: 7,
        };
        let bytes = d.to_bytes();
        assert_eq!(&bytes[16..24], &3u64.to_le_bytes());
        assert_eq!(&bytes[32..36], &3u32.to_le_bytes());
        assert_eq!(&bytes[36..40], &7u32.to_le_bytes());
        assert_eq!(ChunkDescriptor::from_bytes(&bytes), d);
    }

    #[test]
    fn trailer_requires_magic() {
        let t = Trailer { index_offset: 4096 };
        assert_eq!(Trailer::from_bytes(&t.to_bytes()), Some(t));
        assert_eq!(Trailer::from_bytes(&[0u8; TRAILER_SIZE as usize]), None);
    }

    #[test]
    fn index_len_counts_header_records_and_checksum() {
        assert_eq!(index_len(0), 35);
        assert_eq!(index_len(3), 27 + 120 + 8);
    }
}
