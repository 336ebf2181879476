use std::io::{self, Read, Write};
use std::sync::Arc;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::codec::{Codec, CodecRegistry, Dictionaries};
use crate::error::{RacError, Result};
use crate::format::{
    index_len, ChunkDescriptor, IndexLocation, Trailer, CODEC_ZLIB, NO_DICTIONARY, TRAILER_SIZE,
};
use crate::index::encode_index;
use crate::planner::{padding_for, ChunkCutter, Cut, Planner};
use crate::spill::{MemorySpill, Spill};
use crate::table::ChunkDescriptorTable;

/// Encoder settings. Chunk sizes of zero mean "unset"; see
/// [`crate::planner::ChunkSizing::from_targets`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeOptions {
    /// Codec for every chunk unless changed with [`Writer::set_codec`].
    /// Default: zlib
    pub codec_id: u32,
    /// Target compressed size per chunk.
    pub c_chunk_size: u64,
    /// Target decompressed size per chunk. Default (when both are 0): 64 KiB
    pub d_chunk_size: u64,
    /// Align every chunk's CSpace offset to this many bytes. 0 disables.
    pub c_page_size: u64,
    /// Default: start
    pub index_location: IndexLocation,
    /// Dictionary threaded through every chunk unless changed with
    /// [`Writer::set_dictionary`].
    pub dictionary_id: Option<u32>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            codec_id: CODEC_ZLIB,
            c_chunk_size: 0,
            d_chunk_size: 0,
            c_page_size: 0,
            index_location: IndexLocation::Start,
            dictionary_id: None,
        }
    }
}

/// What [`Writer::finish`] produced.
#[derive(Debug, Clone)]
pub struct EncodeSummary {
    pub table: ChunkDescriptorTable,
    pub index_location: IndexLocation,
    /// Zero bytes inserted for page alignment, including after an
    /// index-at-start index.
    pub padding_bytes: u64,
}

impl EncodeSummary {
    pub fn chunk_count(&self) -> usize {
        self.table.len()
    }
}

/// Where compressed chunks go while encoding.
enum ChunkSink<W> {
    /// Index at end: chunks stream straight to the output.
    Direct(W),
    /// Index at start: chunks wait in the spill until the index is written.
    Spilled { out: W, spill: Box<dyn Spill> },
}

impl<W: Write> ChunkSink<W> {
    fn stream(&mut self) -> &mut dyn Write {
        match self {
            ChunkSink::Direct(out) => out as &mut dyn Write,
            ChunkSink::Spilled { spill, .. } => spill as &mut dyn Write,
        }
    }
}

/// Streaming RAC encoder.
///
/// # Write contract
/// Call [`write`](Writer::write) any number of times with arbitrary-sized byte
/// slices. The writer buffers input and emits an independently compressed
/// chunk whenever a boundary can be decided. Call [`finish`](Writer::finish)
/// to flush the tail, write the index (and trailer), and get the resulting
/// table back.
///
/// # Layout written
/// ```text
/// index at end:   [CHUNK 0][pad][CHUNK 1]...[INDEX][TRAILER]   (streamed)
/// index at start: [INDEX][pad][CHUNK 0][pad][CHUNK 1]...      (chunks spilled first)
/// ```
pub struct Writer<W: Write> {
    sink: ChunkSink<W>,
    location: IndexLocation,
    registry: Arc<CodecRegistry>,
    dictionaries: Arc<Dictionaries>,
    planner: Planner,
    cutter: ChunkCutter,
    codec: Arc<dyn Codec>,
    dictionary_id: u32,
    /// Raw bytes not yet assigned to a chunk.
    pending: Vec<u8>,
    /// Chunk records with `c_offset` relative to the chunk stream start.
    chunks: Vec<ChunkDescriptor>,
    /// Bytes written to the chunk stream, padding included.
    stream_offset: u64,
    d_offset: u64,
    padding: u64,
}

impl<W: Write> Writer<W> {
    /// Create an encoder writing to `output`. Index-at-start containers buffer
    /// their chunks in memory; use [`Writer::with_spill`] to choose otherwise.
    pub fn new(
        output: W,
        options: &EncodeOptions,
        registry: Arc<CodecRegistry>,
        dictionaries: Arc<Dictionaries>,
    ) -> Result<Self> {
        Self::with_spill(output, options, registry, dictionaries, Box::new(MemorySpill::new()))
    }

    /// Like [`Writer::new`], with `spill` holding chunk bytes when the index
    /// goes first. Ignored for index-at-end.
    pub fn with_spill(
        output: W,
        options: &EncodeOptions,
        registry: Arc<CodecRegistry>,
        dictionaries: Arc<Dictionaries>,
        spill: Box<dyn Spill>,
    ) -> Result<Self> {
        let planner = Planner::from_targets(
            options.c_chunk_size,
            options.d_chunk_size,
            options.c_page_size,
        )?;
        let codec = encode_codec(&registry, options.codec_id)?;
        let dictionary_id = checked_dictionary(&dictionaries, options.dictionary_id)?;
        let sink = match options.index_location {
            IndexLocation::End => ChunkSink::Direct(output),
            IndexLocation::Start => ChunkSink::Spilled { out: output, spill },
        };
        debug!(
            "encoding with codec {} ({:?}), page size {}, index at {:?}",
            codec.name(),
            planner.sizing(),
            planner.page_size(),
            options.index_location
        );
        Ok(Self {
            sink,
            location: options.index_location,
            registry,
            dictionaries,
            cutter: planner.cutter(),
            planner,
            codec,
            dictionary_id,
            pending: Vec::new(),
            chunks: Vec::new(),
            stream_offset: 0,
            d_offset: 0,
            padding: 0,
        })
    }

    /// Buffer `data` and emit every chunk whose boundary is now decided.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.pending.extend_from_slice(data);
        self.drain(false)
    }

    /// Cut whatever is pending into chunks now, as if the input ended here.
    /// Later writes start a new chunk.
    pub fn flush_chunk(&mut self) -> Result<()> {
        self.drain(true)
    }

    /// Use codec `id` for chunks cut after this call, including bytes still
    /// pending. Call [`flush_chunk`](Writer::flush_chunk) first to pin pending
    /// bytes to the previous codec.
    pub fn set_codec(&mut self, id: u32) -> Result<()> {
        self.codec = encode_codec(&self.registry, id)?;
        // Any prefix compressed while searching for a boundary used the old codec.
        self.cutter.reset();
        Ok(())
    }

    /// Use dictionary `id` (or none) for chunks cut after this call.
    pub fn set_dictionary(&mut self, id: Option<u32>) -> Result<()> {
        self.dictionary_id = checked_dictionary(&self.dictionaries, id)?;
        self.cutter.reset();
        Ok(())
    }

    fn drain(&mut self, at_eof: bool) -> Result<()> {
        loop {
            let codec = &self.codec;
            let dict = self.dictionaries.get(self.dictionary_id).map(|d| &d[..]);
            let chunk = self.chunks.len();
            let d_offset = self.d_offset;
            let cut = self.cutter.next_cut(&self.pending, at_eof, |raw| {
                compress_chunk(codec.as_ref(), raw, dict, chunk, d_offset)
            })?;
            match cut {
                Some(cut) => self.emit(cut)?,
                None => return Ok(()),
            }
        }
    }

    fn emit(&mut self, cut: Cut) -> Result<()> {
        let chunk = self.chunks.len();
        let raw = &self.pending[..cut.d_length];
        let compressed = match cut.compressed {
            Some(c) => c,
            None => {
                let dict = self.dictionaries.get(self.dictionary_id).map(|d| &d[..]);
                compress_chunk(self.codec.as_ref(), raw, dict, chunk, self.d_offset)?
            }
        };

        let pad = self.planner.padding_before(self.stream_offset);
        let stream = self.sink.stream();
        write_zeros(stream, pad)?;
        stream.write_all(&compressed)?;

        let descriptor = ChunkDescriptor {
            d_offset: self.d_offset,
            d_length: cut.d_length as u64,
            c_offset: self.stream_offset + pad,
            c_length: compressed.len() as u64,
            codec_id: self.codec.id(),
            dictionary_id: self.dictionary_id,
        };
        trace!(
            "chunk {chunk}: {} raw -> {} compressed at stream offset {} (+{pad} pad)",
            descriptor.d_length,
            descriptor.c_length,
            descriptor.c_offset
        );
        self.chunks.push(descriptor);
        self.padding += pad;
        self.stream_offset = descriptor.c_end();
        self.d_offset = descriptor.d_end();
        self.pending.drain(..cut.d_length);
        Ok(())
    }

    /// Flush the trailing chunk, write the index (and trailer), and seal the
    /// container.
    pub fn finish(mut self) -> Result<EncodeSummary> {
        self.drain(true)?;

        let Writer {
            sink,
            location,
            planner,
            mut chunks,
            stream_offset,
            d_offset,
            mut padding,
            ..
        } = self;
        let ilen = index_len(chunks.len() as u64);

        let table = match sink {
            ChunkSink::Direct(mut out) => {
                let index_offset = stream_offset;
                let total_c = index_offset + ilen + TRAILER_SIZE;
                let table = ChunkDescriptorTable::new(chunks, d_offset, total_c)?;
                out.write_all(&encode_index(&table, location)?)?;
                out.write_all(&Trailer { index_offset }.to_bytes())?;
                out.flush()?;
                table
            }
            ChunkSink::Spilled { mut out, mut spill } => {
                let index_pad = padding_for(ilen, planner.page_size());
                let data_start = ilen + index_pad;
                for c in &mut chunks {
                    c.c_offset += data_start;
                }
                let total_c = data_start + stream_offset;
                let table = ChunkDescriptorTable::new(chunks, d_offset, total_c)?;
                out.write_all(&encode_index(&table, location)?)?;
                write_zeros(&mut out, index_pad)?;
                spill.replay(&mut out)?;
                out.flush()?;
                padding += index_pad;
                table
            }
        };

        debug!(
            "wrote {} chunks: {} DSpace bytes -> {} container bytes ({} padding)",
            table.len(),
            table.total_d_size(),
            table.total_c_size(),
            padding
        );
        Ok(EncodeSummary {
            table,
            index_location: location,
            padding_bytes: padding,
        })
    }
}

/// Encode everything `input` yields into a container written to `output`.
pub fn encode_all<R: Read, W: Write>(
    input: R,
    output: W,
    options: &EncodeOptions,
    registry: Arc<CodecRegistry>,
    dictionaries: Arc<Dictionaries>,
) -> Result<EncodeSummary> {
    let spill = Box::new(MemorySpill::new());
    encode_all_with_spill(input, output, options, registry, dictionaries, spill)
}

/// Like [`encode_all`], with `spill` holding chunk bytes when the index goes
/// first.
pub fn encode_all_with_spill<R: Read, W: Write>(
    mut input: R,
    output: W,
    options: &EncodeOptions,
    registry: Arc<CodecRegistry>,
    dictionaries: Arc<Dictionaries>,
    spill: Box<dyn Spill>,
) -> Result<EncodeSummary> {
    let mut writer = Writer::with_spill(output, options, registry, dictionaries, spill)?;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        writer.write(&buf[..n])?;
    }
    writer.finish()
}

fn encode_codec(registry: &CodecRegistry, id: u32) -> Result<Arc<dyn Codec>> {
    registry
        .get(id)
        .cloned()
        .ok_or_else(|| RacError::Config(format!("codec id {id} is not registered")))
}

fn checked_dictionary(dictionaries: &Dictionaries, id: Option<u32>) -> Result<u32> {
    match id {
        None | Some(NO_DICTIONARY) => Ok(NO_DICTIONARY),
        Some(id) if dictionaries.get(id).is_some() => Ok(id),
        Some(id) => Err(RacError::Config(format!("dictionary id {id} was not supplied"))),
    }
}

fn compress_chunk(
    codec: &dyn Codec,
    raw: &[u8],
    dictionary: Option<&[u8]>,
    chunk: usize,
    d_offset: u64,
) -> Result<Vec<u8>> {
    codec
        .compress(raw, dictionary)
        .map_err(|e| RacError::codec(chunk, d_offset, e))
}

fn write_zeros(out: &mut dyn Write, n: u64) -> io::Result<()> {
    if n > 0 {
        io::copy(&mut io::repeat(0).take(n), out)?;
    }
    Ok(())
}
