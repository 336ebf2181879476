//! Random Access Compression (RAC) containers.
//!
//! A RAC container splits its input into independently compressed chunks and
//! carries an index mapping decompressed (DSpace) ranges to compressed
//! (CSpace) ranges, so any byte range can be decoded without touching the
//! chunks before it.

pub mod codec;
pub mod error;
pub mod format;
pub mod index;
pub mod planner;
pub mod range;
pub mod reader;
mod scheduler;
pub mod source;
pub mod spill;
pub mod table;
pub mod writer;

pub use codec::{Codec, CodecRegistry, Dictionaries};
pub use error::{RacError, Result};
pub use format::{ChunkDescriptor, IndexLocation};
pub use range::{resolve, DecodeRequest, ResolvedRange};
pub use reader::{Concurrency, DecodeOptions, Reader};
pub use source::ReadAt;
pub use spill::{MemorySpill, Spill};
pub use table::ChunkDescriptorTable;
pub use writer::{encode_all, encode_all_with_spill, EncodeOptions, EncodeSummary, Writer};
