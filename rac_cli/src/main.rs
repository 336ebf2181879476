use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;
use memmap2::Mmap;

use rac_codecs::{codec_by_name, default_registry};
use rac_core::format::DEFAULT_D_CHUNK_SIZE;
use rac_core::{
    encode_all_with_spill, Concurrency, DecodeOptions, DecodeRequest, Dictionaries,
    EncodeOptions, IndexLocation, MemorySpill, ReadAt, Reader, Spill,
};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "ractool",
    about = "Random Access Compression: encode files, decode byte ranges, inspect indexes",
    version
)]
struct Cli {
    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a file into a RAC container
    Encode {
        /// Source file ("-" or omitted reads stdin)
        input: Option<PathBuf>,
        /// Destination container ("-" or omitted writes stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Codec: zlib | lz4 | zstd | stored
        #[arg(short, long, default_value = "zlib")]
        codec: String,
        /// Compression level; codec default when omitted
        #[arg(long)]
        level: Option<i32>,
        /// Target compressed bytes per chunk (e.g. 256k); excludes --dchunksize
        #[arg(long, value_parser = parse_size)]
        cchunksize: Option<u64>,
        /// Target decompressed bytes per chunk (default 64k)
        #[arg(long, value_parser = parse_size)]
        dchunksize: Option<u64>,
        /// Align every chunk's compressed offset to this many bytes
        #[arg(long, value_parser = parse_size, default_value = "0")]
        cpagesize: u64,
        /// Where the index goes: start | end
        #[arg(long, default_value = "start")]
        indexlocation: IndexLocation,
        /// Comma-separated dictionary files; the first one is used for every chunk
        #[arg(long, value_delimiter = ',')]
        resources: Vec<PathBuf>,
        /// Directory for the chunk spill when the index goes first
        /// (buffered in memory when omitted)
        #[arg(long)]
        tmpdir: Option<PathBuf>,
    },
    /// Decompress a byte range (the whole file by default)
    Decode {
        /// Container file ("-" or omitted reads stdin)
        input: Option<PathBuf>,
        /// Destination ("-" or omitted writes stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// DSpace range "i..j"; either bound may be omitted
        #[arg(long, default_value = "..")]
        drange: DecodeRequest,
        /// Decode chunks one at a time on the main thread
        #[arg(long, conflicts_with = "workers")]
        singlethreaded: bool,
        /// Decode threads (0 = one per CPU)
        #[arg(long, default_value_t = 0)]
        workers: usize,
        /// Comma-separated dictionary files, in the order used at encode time
        #[arg(long, value_delimiter = ',')]
        resources: Vec<PathBuf>,
    },
    /// Print index metadata and chunk statistics
    Inspect {
        /// Container file
        file: PathBuf,
        /// Print per-chunk details
        #[arg(long)]
        chunks: bool,
        /// Print the index as JSON
        #[arg(long)]
        json: bool,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

/// Parse a byte count with an optional `k`/`K` (KiB) or `m`/`M` (MiB) suffix.
fn parse_size(s: &str) -> Result<u64, String> {
    let (digits, multiplier) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 1 << 10),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 1 << 20),
        _ => (s, 1),
    };
    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| format!("invalid size '{s}': expected a number with optional k/K/m/M suffix"))
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn is_stdio(path: &Option<PathBuf>) -> bool {
    path.as_deref().map_or(true, |p| p == Path::new("-"))
}

fn open_output(path: &Option<PathBuf>) -> anyhow::Result<Box<dyn Write>> {
    if is_stdio(path) {
        return Ok(Box::new(BufWriter::new(io::stdout().lock())));
    }
    let path = path.as_deref().unwrap_or(Path::new("-"));
    let file = File::create(path).with_context(|| format!("creating output file {:?}", path))?;
    Ok(Box::new(BufWriter::new(file)))
}

fn load_dictionaries(paths: &[PathBuf]) -> anyhow::Result<Dictionaries> {
    let resources = paths
        .iter()
        .map(|p| std::fs::read(p).with_context(|| format!("reading resource {:?}", p)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Dictionaries::from_ordered(resources))
}

/// Chunk spill backed by an anonymous temporary file.
struct TempFileSpill {
    file: BufWriter<File>,
    len: u64,
}

impl TempFileSpill {
    fn new_in(dir: &Path) -> io::Result<Self> {
        Ok(Self {
            file: BufWriter::new(tempfile::tempfile_in(dir)?),
            len: 0,
        })
    }
}

impl Write for TempFileSpill {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.len += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Spill for TempFileSpill {
    fn len(&self) -> u64 {
        self.len
    }

    fn replay(&mut self, out: &mut dyn Write) -> io::Result<u64> {
        self.file.flush()?;
        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(0))?;
        io::copy(file, out)
    }
}

/// A container to decode: mapped when it is a file, buffered when it comes
/// from stdin.
enum Container {
    Mapped(Mmap),
    Buffered(Vec<u8>),
}

impl Container {
    fn open(path: &Option<PathBuf>) -> anyhow::Result<Self> {
        if is_stdio(path) {
            let mut buf = Vec::new();
            io::stdin().lock().read_to_end(&mut buf).context("reading stdin")?;
            return Ok(Container::Buffered(buf));
        }
        let path = path.as_deref().unwrap_or(Path::new("-"));
        let file = File::open(path).with_context(|| format!("opening input file {:?}", path))?;
        if file.metadata()?.len() == 0 {
            return Ok(Container::Buffered(Vec::new()));
        }
        // SAFETY: the map is read-only and the file is not modified while
        // the reader holds it.
        let map = unsafe { Mmap::map(&file) }.with_context(|| format!("mapping {:?}", path))?;
        Ok(Container::Mapped(map))
    }

    fn bytes(&self) -> &[u8] {
        match self {
            Container::Mapped(map) => map,
            Container::Buffered(buf) => buf,
        }
    }
}

impl ReadAt for Container {
    fn len(&self) -> io::Result<u64> {
        Ok(self.bytes().len() as u64)
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        self.bytes().read_exact_at(buf, offset)
    }
}

// ── Subcommand implementations ─────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn run_encode(
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    codec_name: &str,
    level: Option<i32>,
    cchunksize: Option<u64>,
    dchunksize: Option<u64>,
    cpagesize: u64,
    indexlocation: IndexLocation,
    resources: Vec<PathBuf>,
    tmpdir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let codec = codec_by_name(codec_name, level)?;
    let codec_display = codec.name();
    let codec_id = codec.id();
    let registry = Arc::new(default_registry().with(codec));
    let dictionaries = Arc::new(load_dictionaries(&resources)?);

    let options = EncodeOptions {
        codec_id,
        c_chunk_size: cchunksize.unwrap_or(0),
        d_chunk_size: dchunksize.unwrap_or(0),
        c_page_size: cpagesize,
        index_location: indexlocation,
        dictionary_id: (!dictionaries.is_empty()).then_some(1),
    };

    let spill: Box<dyn Spill> = match &tmpdir {
        Some(dir) => Box::new(
            TempFileSpill::new_in(dir).with_context(|| format!("creating spill file in {:?}", dir))?,
        ),
        None => Box::new(MemorySpill::new()),
    };

    let src: Box<dyn Read> = if is_stdio(&input) {
        Box::new(io::stdin().lock())
    } else {
        let path = input.as_deref().unwrap_or(Path::new("-"));
        let file = File::open(path).with_context(|| format!("opening input file {:?}", path))?;
        Box::new(BufReader::new(file))
    };

    let t0 = Instant::now();
    let summary = encode_all_with_spill(
        src,
        open_output(&output)?,
        &options,
        registry,
        dictionaries,
        spill,
    )?;
    let elapsed = t0.elapsed();

    let table = &summary.table;
    info!("  codec       : {}", codec_display);
    info!(
        "  chunk size  : {}",
        match (cchunksize, dchunksize) {
            (Some(c), _) => format!("<= {} compressed", human_bytes(c)),
            (_, d) => format!("{} raw", human_bytes(d.unwrap_or(DEFAULT_D_CHUNK_SIZE))),
        }
    );
    info!("  chunks      : {}", summary.chunk_count());
    info!("  index at    : {:?}", summary.index_location);
    info!("  raw size    : {}", human_bytes(table.total_d_size()));
    info!("  container   : {}", human_bytes(table.total_c_size()));
    info!("  padding     : {}", human_bytes(summary.padding_bytes));
    info!("  ratio       : {:.2}x", table.ratio());
    info!(
        "  throughput  : {}/s",
        human_bytes((table.total_d_size() as f64 / elapsed.as_secs_f64()) as u64)
    );
    info!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_decode(
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    drange: DecodeRequest,
    singlethreaded: bool,
    workers: usize,
    resources: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let concurrency = if singlethreaded {
        Concurrency::SingleThreaded
    } else {
        Concurrency::Parallel { workers }
    };
    let dictionaries = Arc::new(load_dictionaries(&resources)?);
    let reader = Reader::open_with_options(
        Container::open(&input)?,
        Arc::new(default_registry()),
        dictionaries,
        &DecodeOptions { concurrency },
    )?;

    let t0 = Instant::now();
    let raw = reader.read_range(drange)?;
    let mut dst = open_output(&output)?;
    dst.write_all(&raw)?;
    dst.flush()?;
    let elapsed = t0.elapsed();

    info!("  range       : {}", drange);
    info!(
        "  container   : {} chunks, {} raw",
        reader.chunk_count(),
        human_bytes(reader.d_size())
    );
    info!("  decoded     : {}", human_bytes(raw.len() as u64));
    info!(
        "  throughput  : {}/s",
        human_bytes((raw.len() as f64 / elapsed.as_secs_f64()) as u64)
    );
    info!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_inspect(file: PathBuf, show_chunks: bool, json: bool) -> anyhow::Result<()> {
    let reader = Reader::open_with_options(
        Container::open(&Some(file.clone()))?,
        Arc::new(default_registry()),
        Arc::new(Dictionaries::new()),
        &DecodeOptions {
            concurrency: Concurrency::SingleThreaded,
        },
    )
    .with_context(|| format!("reading index of {:?}", file))?;
    let table = reader.table();

    if json {
        let doc = serde_json::json!({
            "index_location": reader.index_location(),
            "chunk_count": table.len(),
            "total_d_size": table.total_d_size(),
            "total_c_size": table.total_c_size(),
            "chunks": table.chunks(),
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    let registry = default_registry();
    let codec_name = |id: u32| registry.get(id).map_or("unknown", |c| c.name());

    println!("=== RAC file: {:?} ===", file);
    println!();
    println!("  index at       : {:?}", reader.index_location());
    println!("  chunk count    : {}", table.len());
    println!("  raw size       : {}", human_bytes(reader.d_size()));
    println!("  chunk payload  : {}", human_bytes(table.payload_c_size()));
    println!("  file on disk   : {}", human_bytes(table.total_c_size()));
    println!("  ratio          : {:.2}x", table.ratio());

    if show_chunks {
        println!();
        println!(
            "  {:>8}  {:>14}  {:>12}  {:>14}  {:>12}  {:>6}  {:>4}",
            "chunk", "d offset", "raw", "c offset", "compressed", "codec", "dict"
        );
        println!("  {}", "-".repeat(84));
        for (i, c) in table.chunks().iter().enumerate() {
            println!(
                "  {:>8}  {:>14}  {:>12}  {:>14}  {:>12}  {:>6}  {:>4}",
                i,
                c.d_offset,
                human_bytes(c.d_length),
                c.c_offset,
                human_bytes(c.c_length),
                codec_name(c.codec_id),
                c.dictionary_id
            );
        }
    }

    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.quiet { "error" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_target(false)
        .format_timestamp(None)
        .init();

    match cli.command {
        Commands::Encode {
            input,
            output,
            codec,
            level,
            cchunksize,
            dchunksize,
            cpagesize,
            indexlocation,
            resources,
            tmpdir,
        } => run_encode(
            input,
            output,
            &codec,
            level,
            cchunksize,
            dchunksize,
            cpagesize,
            indexlocation,
            resources,
            tmpdir,
        ),
        Commands::Decode {
            input,
            output,
            drange,
            singlethreaded,
            workers,
            resources,
        } => run_decode(input, output, drange, singlethreaded, workers, resources),
        Commands::Inspect { file, chunks, json } => run_inspect(file, chunks, json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sizes_with_suffixes() {
        assert_eq!(parse_size("4096"), Ok(4096));
        assert_eq!(parse_size("256k"), Ok(256 * 1024));
        assert_eq!(parse_size("256K"), Ok(256 * 1024));
        assert_eq!(parse_size("1m"), Ok(1 << 20));
        assert_eq!(parse_size("2M"), Ok(2 << 20));
        assert!(parse_size("").is_err());
        assert!(parse_size("k").is_err());
        assert!(parse_size("12g").is_err());
        assert!(parse_size("-1").is_err());
    }

    #[test]
    fn human_bytes_picks_a_unit() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(64 * 1024), "64.00 KiB");
        assert_eq!(human_bytes(3 << 20), "3.00 MiB");
    }

    #[test]
    fn temp_file_spill_replays_what_was_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut spill = TempFileSpill::new_in(dir.path()).unwrap();
        spill.write_all(b"chunk one ").unwrap();
        spill.write_all(b"chunk two").unwrap();
        assert_eq!(Spill::len(&spill), 19);

        let mut out = Vec::new();
        assert_eq!(spill.replay(&mut out).unwrap(), 19);
        assert_eq!(out, b"chunk one chunk two");
    }

    #[test]
    fn encode_through_temp_file_spill_then_decode_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let container_path = dir.path().join("data.rac");

        let summary = encode_all_with_spill(
            &data[..],
            File::create(&container_path).unwrap(),
            &EncodeOptions {
                c_page_size: 4096,
                ..Default::default()
            },
            Arc::new(default_registry()),
            Arc::new(Dictionaries::new()),
            Box::new(TempFileSpill::new_in(dir.path()).unwrap()),
        )
        .unwrap();
        assert_eq!(summary.index_location, IndexLocation::Start);

        let reader = Reader::open(
            Container::open(&Some(container_path)).unwrap(),
            Arc::new(default_registry()),
            Arc::new(Dictionaries::new()),
        )
        .unwrap();
        assert_eq!(
            reader.read_range("1000..2000".parse().unwrap()).unwrap(),
            &data[1000..2000]
        );
        assert_eq!(reader.d_size(), data.len() as u64);
        assert!(matches!(reader.into_inner(), Container::Mapped(_)));
    }
}
