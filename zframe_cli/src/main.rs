use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::LevelFilter;
use xxhash_rust::xxh3::{xxh3_64, Xxh3};

use zframe_codecs::codec_by_name;
use zframe_core::format::DEFAULT_FRAME_SIZE;
use zframe_core::{FramePipeline, FrameReader, PipelineConfig, Summary, ThreadPool};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "zframe",
    about = "Multi-threaded framed compression: compress, decompress, and inspect zframe streams",
    version
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a file into a framed stream
    Compress {
        /// Source file to compress ("-" reads stdin)
        input: PathBuf,
        /// Destination stream ("-" writes to stdout)
        output: PathBuf,
        /// Codec to use: zstd | lz4 | passthrough
        #[arg(short, long, default_value = "zstd")]
        codec: String,
        /// Compression level (0 = fastest; clamped to the codec's maximum)
        #[arg(short, long, default_value_t = 0)]
        level: u32,
        /// Worker threads (default: available parallelism)
        #[arg(short, long)]
        threads: Option<usize>,
        /// Raw bytes per frame (default: 1048576 = 1 MiB)
        #[arg(short, long, default_value_t = DEFAULT_FRAME_SIZE)]
        frame_size: usize,
    },
    /// Decompress a framed stream back to raw bytes
    Decompress {
        /// Source stream ("-" reads stdin)
        input: PathBuf,
        /// Destination file ("-" writes to stdout)
        output: PathBuf,
        /// Codec the stream was written with
        #[arg(short, long, default_value = "zstd")]
        codec: String,
        /// Worker threads (default: available parallelism)
        #[arg(short, long)]
        threads: Option<usize>,
        /// Compare the xxh3 digest of the output with this file's
        #[arg(long)]
        verify_against: Option<PathBuf>,
    },
    /// Print frame statistics without decoding payloads
    Inspect {
        /// Stream to inspect
        file: PathBuf,
        /// Codec the stream was written with
        #[arg(short, long, default_value = "zstd")]
        codec: String,
        /// Print per-frame details
        #[arg(long)]
        frames: bool,
    },
    /// Decompress a single frame by index
    ReadFrame {
        /// Stream file
        file: PathBuf,
        /// Zero-based frame index to read
        #[arg(short, long)]
        index: usize,
        /// Codec the stream was written with
        #[arg(short, long, default_value = "zstd")]
        codec: String,
        /// Write raw bytes to a file instead of printing a hex dump
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
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

fn open_input(path: &Path) -> anyhow::Result<Box<dyn Read + Send>> {
    if path.to_str() == Some("-") {
        return Ok(Box::new(io::stdin()));
    }
    let file = File::open(path).with_context(|| format!("opening input file {:?}", path))?;
    Ok(Box::new(BufReader::new(file)))
}

fn open_output(path: &Path) -> anyhow::Result<Box<dyn Write + Send>> {
    if path.to_str() == Some("-") {
        return Ok(Box::new(io::stdout()));
    }
    let file = File::create(path).with_context(|| format!("creating output file {:?}", path))?;
    Ok(Box::new(BufWriter::new(file)))
}

fn thread_pool(threads: Option<usize>) -> anyhow::Result<ThreadPool> {
    let threads = threads.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });
    ThreadPool::new(threads).context("starting worker threads")
}

fn print_summary(summary: &Summary, elapsed_secs: f64, raw_bytes: u64) {
    eprintln!("  frames      : {}", summary.frames);
    eprintln!("  read        : {}", human_bytes(summary.bytes_in));
    eprintln!("  written     : {}", human_bytes(summary.bytes_out));
    eprintln!(
        "  throughput  : {}/s",
        human_bytes((raw_bytes as f64 / elapsed_secs.max(1e-9)) as u64)
    );
    eprintln!("  elapsed     : {:.3}s", elapsed_secs);
}

/// Forwards writes while hashing them.
struct HashingWriter<W> {
    inner: W,
    hasher: Xxh3,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn file_digest(path: &Path) -> anyhow::Result<u64> {
    let mut file = File::open(path).with_context(|| format!("opening {:?}", path))?;
    let mut hasher = Xxh3::new();
    let mut buf = vec![0u8; 1 << 16];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.digest())
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_compress(
    input: PathBuf,
    output: PathBuf,
    codec_name: &str,
    level: u32,
    threads: Option<usize>,
    frame_size: usize,
) -> anyhow::Result<()> {
    let codec = codec_by_name(codec_name)?;
    let pool = thread_pool(threads)?;
    let config = PipelineConfig::default().with_frame_size(frame_size);
    let pipeline = FramePipeline::with_config(codec, config);

    let source = open_input(&input)?;
    let sink = open_output(&output)?;

    let t0 = Instant::now();
    let summary = pipeline
        .compress(&pool, source, sink, level)
        .with_context(|| format!("compressing {:?}", input))?;
    let elapsed = t0.elapsed().as_secs_f64();

    let ratio = if summary.bytes_out == 0 {
        1.0
    } else {
        summary.bytes_in as f64 / summary.bytes_out as f64
    };
    eprintln!("  codec       : {}", pipeline.codec().name());
    eprintln!("  threads     : {}", pool.size());
    eprintln!("  frame size  : {}", human_bytes(pipeline.config().frame_size as u64));
    print_summary(&summary, elapsed, summary.bytes_in);
    eprintln!("  ratio       : {:.2}x", ratio);
    Ok(())
}

fn run_decompress(
    input: PathBuf,
    output: PathBuf,
    codec_name: &str,
    threads: Option<usize>,
    verify_against: Option<PathBuf>,
) -> anyhow::Result<()> {
    let codec = codec_by_name(codec_name)?;
    let pool = thread_pool(threads)?;
    let pipeline = FramePipeline::new(codec);

    let source = open_input(&input)?;
    let mut sink = HashingWriter {
        inner: open_output(&output)?,
        hasher: Xxh3::new(),
    };

    let t0 = Instant::now();
    let summary = pipeline
        .decompress(&pool, source, &mut sink)
        .with_context(|| format!("decompressing {:?}", input))?;
    let elapsed = t0.elapsed().as_secs_f64();

    let digest = sink.hasher.digest();
    eprintln!("  threads     : {}", pool.size());
    print_summary(&summary, elapsed, summary.bytes_out);
    eprintln!("  xxh3        : {:016x}", digest);

    if let Some(original) = verify_against {
        let expected = file_digest(&original)?;
        if expected != digest {
            anyhow::bail!(
                "output digest {:016x} does not match {:?} ({:016x})",
                digest,
                original,
                expected
            );
        }
        eprintln!("  verified    : matches {:?}", original);
    }
    Ok(())
}

fn run_inspect(file: PathBuf, codec_name: &str, show_frames: bool) -> anyhow::Result<()> {
    let codec = codec_by_name(codec_name)?;
    let handle = File::open(&file).with_context(|| format!("opening {:?}", file))?;
    let file_size = handle.metadata()?.len();
    let reader = FrameReader::open(BufReader::new(handle), codec)
        .with_context(|| format!("scanning frames in {:?}", file))?;

    println!("=== zframe stream: {:?} ===", file);
    println!();
    println!("  codec          : {}", codec_name);
    println!("  frames         : {}", reader.frame_count());
    println!("  raw size       : {}", human_bytes(reader.raw_size()));
    println!("  compressed     : {}", human_bytes(reader.compressed_size()));
    println!("  file on disk   : {}", human_bytes(file_size));
    println!("  ratio          : {:.2}x", reader.ratio());
    if reader.trailing_bytes() > 0 {
        println!("  trailing bytes : {}", reader.trailing_bytes());
    }

    if show_frames {
        println!();
        println!(
            "  {:>8}  {:>14}  {:>12}  {:>12}",
            "frame", "file offset", "compressed", "raw"
        );
        println!("  {}", "-".repeat(52));
        for (i, e) in reader.entries().iter().enumerate() {
            println!(
                "  {:>8}  {:>14}  {:>12}  {:>12}",
                i,
                e.offset,
                human_bytes(e.compressed_size as u64),
                human_bytes(e.source_size as u64),
            );
        }
    }

    Ok(())
}

fn run_read_frame(
    file: PathBuf,
    index: usize,
    codec_name: &str,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let codec = codec_by_name(codec_name)?;
    let handle = File::open(&file).with_context(|| format!("opening {:?}", file))?;
    let mut reader = FrameReader::open(BufReader::new(handle), codec)?;

    if let Some(entry) = reader.entries().get(index) {
        eprintln!(
            "seeking to frame {} (offset {} bytes from stream start)...",
            index, entry.offset
        );
    }

    let t0 = Instant::now();
    let raw = reader.read_frame(index)?;
    let elapsed = t0.elapsed();

    eprintln!(
        "  decoded {} in {:.3}ms (xxh3 {:016x})",
        human_bytes(raw.len() as u64),
        elapsed.as_secs_f64() * 1000.0,
        xxh3_64(&raw)
    );

    match output {
        Some(path) => {
            std::fs::write(&path, &raw)?;
            eprintln!("  written to {:?}", path);
        }
        None => {
            // Print a hex dump of the first 256 bytes
            let preview = &raw[..raw.len().min(256)];
            println!("--- frame {} ({} bytes, first {} shown) ---", index, raw.len(), preview.len());
            for (i, chunk) in preview.chunks(16).enumerate() {
                print!("  {:04x}  ", i * 16);
                for b in chunk {
                    print!("{:02x} ", b);
                }
                for _ in chunk.len()..16 {
                    print!("   ");
                }
                print!("  |");
                for b in chunk {
                    if b.is_ascii_graphic() || *b == b' ' {
                        print!("{}", *b as char);
                    } else {
                        print!(".");
                    }
                }
                println!("|");
            }
            if raw.len() > 256 {
                println!("  ... ({} bytes remaining not shown)", raw.len() - 256);
            }
        }
    }

    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.parse_default_env();
    builder.init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Commands::Compress {
            input,
            output,
            codec,
            level,
            threads,
            frame_size,
        } => run_compress(input, output, &codec, level, threads, frame_size),
        Commands::Decompress {
            input,
            output,
            codec,
            threads,
            verify_against,
        } => run_decompress(input, output, &codec, threads, verify_against),
        Commands::Inspect {
            file,
            codec,
            frames,
        } => run_inspect(file, &codec, frames),
        Commands::ReadFrame {
            file,
            index,
            codec,
            output,
        } => run_read_frame(file, index, &codec, output),
    }
}
