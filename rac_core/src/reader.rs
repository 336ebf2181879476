use std::sync::Arc;

use log::debug;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::codec::{CodecRegistry, Dictionaries};
use crate::error::{RacError, Result};
use crate::format::IndexLocation;
use crate::index::read_table;
use crate::range::{resolve, DecodeRequest};
use crate::scheduler::{decode_parallel, decode_sequential, ChunkDecoder};
use crate::source::ReadAt;
use crate::table::ChunkDescriptorTable;

/// How chunks of one request are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Concurrency {
    /// In order on the calling thread. Lowest total CPU time.
    SingleThreaded,
    /// On a dedicated pool of `workers` threads; 0 means one per available
    /// CPU. Lowest wall-clock time.
    Parallel { workers: usize },
}

impl Default for Concurrency {
    fn default() -> Self {
        Concurrency::Parallel { workers: 0 }
    }
}

/// Decoder settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeOptions {
    /// Default: parallel, one worker per CPU
    pub concurrency: Concurrency,
}

/// Random-access reader for RAC containers.
///
/// # Open sequence
/// 1. Locate the index: at offset 0 if the input starts with an
///    index-at-start header, otherwise through the fixed trailer at the end.
/// 2. Verify the index checksum, then the table invariants.
/// 3. Keep the table in RAM: 40 bytes per chunk, so a 100 GB input in 64 KiB
///    chunks needs about 60 MB.
///
/// # Access pattern
/// [`read_range`](Reader::read_range) resolves a DSpace range to the minimal
/// run of chunks, decodes only those (in parallel by default), and trims the
/// result to the exact bytes asked for. No other chunk is read.
pub struct Reader<S: ReadAt> {
    source: S,
    table: ChunkDescriptorTable,
    location: IndexLocation,
    registry: Arc<CodecRegistry>,
    dictionaries: Arc<Dictionaries>,
    pool: Option<ThreadPool>,
    /// Worker count `pool` was built from, 0 meaning one per CPU.
    pool_workers: usize,
}

impl<S: ReadAt> Reader<S> {
    /// Open a container with default (parallel) decoding.
    pub fn open(source: S, registry: Arc<CodecRegistry>, dictionaries: Arc<Dictionaries>) -> Result<Self> {
        Self::open_with_options(source, registry, dictionaries, &DecodeOptions::default())
    }

    pub fn open_with_options(
        source: S,
        registry: Arc<CodecRegistry>,
        dictionaries: Arc<Dictionaries>,
        options: &DecodeOptions,
    ) -> Result<Self> {
        let (table, location) = read_table(&source)?;
        debug!(
            "opened RAC container: {} chunks, {} DSpace bytes, {} CSpace bytes, index at {:?}",
            table.len(),
            table.total_d_size(),
            table.total_c_size(),
            location
        );
        let pool = build_pool(options.concurrency)?;
        let pool_workers = match options.concurrency {
            Concurrency::Parallel { workers } => workers,
            Concurrency::SingleThreaded => 0,
        };
        Ok(Self {
            source,
            table,
            location,
            registry,
            dictionaries,
            pool,
            pool_workers,
        })
    }

    pub fn table(&self) -> &ChunkDescriptorTable {
        &self.table
    }

    pub fn index_location(&self) -> IndexLocation {
        self.location
    }

    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.table.len()
    }

    /// Total decompressed size in bytes.
    #[inline]
    pub fn d_size(&self) -> u64 {
        self.table.total_d_size()
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    fn decoder(&self) -> ChunkDecoder<'_, S> {
        ChunkDecoder {
            source: &self.source,
            registry: &self.registry,
            dictionaries: &self.dictionaries,
        }
    }

    /// Decompress chunk `idx` on its own.
    pub fn read_chunk(&self, idx: usize) -> Result<Vec<u8>> {
        let chunk = self.table.get(idx).ok_or_else(|| {
            RacError::Config(format!(
                "chunk index {idx} out of range (total {})",
                self.table.len()
            ))
        })?;
        self.decoder().decode(idx, chunk)
    }

    /// Decompress exactly the bytes of `request` with the reader's
    /// concurrency mode.
    ///
    /// Either the whole range comes back or an error does; a failed chunk
    /// never yields a shortened buffer.
    pub fn read_range(&self, request: DecodeRequest) -> Result<Vec<u8>> {
        self.decode(request, self.pool.as_ref())
    }

    /// Like [`read_range`](Reader::read_range), with the concurrency mode
    /// chosen for this request only. The reader's pool is reused when it
    /// matches; otherwise a pool is built for the call.
    pub fn read_range_with(&self, request: DecodeRequest, concurrency: Concurrency) -> Result<Vec<u8>> {
        match (concurrency, &self.pool) {
            (Concurrency::SingleThreaded, _) => self.decode(request, None),
            (Concurrency::Parallel { workers }, Some(pool))
                if pool_fits(workers, self.pool_workers, pool.current_num_threads()) =>
            {
                self.decode(request, Some(pool))
            }
            (Concurrency::Parallel { .. }, _) => {
                let pool = build_pool(concurrency)?;
                self.decode(request, pool.as_ref())
            }
        }
    }

    fn decode(&self, request: DecodeRequest, pool: Option<&ThreadPool>) -> Result<Vec<u8>> {
        let range = resolve(&self.table, request)?;
        if range.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            "decoding {request}: chunks {}..{}",
            range.first_index,
            range.first_index + range.chunks.len()
        );
        let decoder = self.decoder();
        match pool {
            Some(pool) if range.chunks.len() > 1 => decode_parallel(&decoder, &range, pool),
            _ => decode_sequential(&decoder, &range),
        }
    }

    /// Decompress the whole container.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        self.read_range(DecodeRequest::all())
    }
}

/// Whether a pool built from `built_with` workers serves a request for
/// `requested`. A per-CPU request only matches a per-CPU pool.
fn pool_fits(requested: usize, built_with: usize, threads: usize) -> bool {
    requested == built_with || (requested != 0 && requested == threads)
}

fn build_pool(concurrency: Concurrency) -> Result<Option<ThreadPool>> {
    match concurrency {
        Concurrency::SingleThreaded => Ok(None),
        Concurrency::Parallel { workers } => ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("rac-decode-{i}"))
            .build()
            .map(Some)
            .map_err(|e| RacError::Config(format!("failed to build decode thread pool: {e}"))),
    }
}
