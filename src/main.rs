//! Offload load generator
//!
//! Writes a temporary file of sequential little-endian `u32` counters, opens
//! one queue per priority tier and hammers them with random 64-byte-aligned
//! reads from several threads. Every destination is checked against the
//! counter pattern, so a run doubles as an end-to-end correctness check.
//!
//! With `--compressed`, each thread also issues in-memory zlib requests on a
//! dedicated Realtime queue and checks the inflated bytes.
//!
//! # Output Format
//!
//! One summary line on stderr:
//! `requests=N bytes=N failed=N mismatched=N elapsed_ms=N throughput_mib_s=N`
//!
//! # Exit Codes
//!
//! - `0`: every request completed and validated
//! - `1`: a request failed or a destination did not match
//! - `2`: invalid arguments or setup failure

use env_logger::Builder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::LevelFilter;
use offload_rs::{
    Decompression, DestBuffer, Destination, ErrorCode, FileHandle, Priority, Queue, QueueDesc,
    Request, Scheduler, SchedulerConfig, StatusArray,
};
use std::env;
use std::error::Error;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

const MAX_READ: u64 = 64 * 1024;
const BATCH: u32 = 32;
const MEMORY_BLOCK: usize = 64 * 1024;
const MEMORY_BLOCKS: usize = 8;

fn print_usage(exe: &std::ffi::OsStr) {
    eprintln!(
        "usage: {} [OPTIONS]

OPTIONS:
    --file-size=<MiB>       Size of the generated counter file (default: 64)
    --requests=<N>          Reads issued per thread (default: 2000)
    --threads=<N>           Caller threads (default: 4)
    --compressed            Also issue in-memory zlib requests
    --help, -h              Show this help message",
        exe.to_string_lossy()
    );
}

struct Options {
    file_mib: u64,
    requests: u32,
    threads: usize,
    compressed: bool,
}

#[derive(Default)]
struct Totals {
    requests: AtomicU64,
    bytes: AtomicU64,
    failed: AtomicU64,
    mismatched: AtomicU64,
}

/// Marsaglia xorshift; plenty for picking offsets.
struct XorShift64(u64);

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self(if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed })
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, bound: u64) -> u64 {
        self.next_u64() % bound
    }
}

fn init_logger() {
    let mut builder = Builder::new();
    builder
        .filter_level(LevelFilter::Warn)
        .filter_module("offload_rs", LevelFilter::Info)
        .format_timestamp_millis()
        .parse_default_env();
    let _ = builder.try_init();
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: &str) -> T {
    value.parse().unwrap_or_else(|_| {
        eprintln!("invalid {flag} value: {value}");
        std::process::exit(2);
    })
}

fn parse_args() -> Options {
    let mut args = env::args_os();
    let exe = args.next().unwrap_or_else(|| "offload-rs".into());
    let mut opts = Options {
        file_mib: 64,
        requests: 2000,
        threads: 4,
        compressed: false,
    };

    for arg in args {
        let Some(flag) = arg.to_str() else {
            print_usage(&exe);
            std::process::exit(2);
        };
        if let Some(value) = flag.strip_prefix("--file-size=") {
            opts.file_mib = parse_value("--file-size", value);
            continue;
        }
        if let Some(value) = flag.strip_prefix("--requests=") {
            opts.requests = parse_value("--requests", value);
            continue;
        }
        if let Some(value) = flag.strip_prefix("--threads=") {
            opts.threads = parse_value("--threads", value);
            continue;
        }
        match flag {
            "--compressed" => opts.compressed = true,
            "--help" | "-h" => {
                print_usage(&exe);
                std::process::exit(0);
            }
            _ => {
                eprintln!("unknown argument: {flag}");
                print_usage(&exe);
                std::process::exit(2);
            }
        }
    }

    if opts.file_mib == 0 || opts.threads == 0 || opts.requests == 0 {
        eprintln!("--file-size, --threads and --requests must be >= 1");
        std::process::exit(2);
    }
    opts
}

/// Counter bytes covering `[offset, offset + len)`; `offset` is 4-aligned.
fn counters(offset: u64, len: usize) -> Vec<u8> {
    let first = (offset / 4) as u32;
    (0..len as u32 / 4)
        .flat_map(|i| first.wrapping_add(i).to_le_bytes())
        .collect()
}

fn write_counter_file(path: &Path, bytes: u64) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for i in 0..(bytes / 4) as u32 {
        out.write_all(&i.to_le_bytes())?;
    }
    out.flush()
}

fn zlib(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::fast());
    enc.write_all(bytes)?;
    enc.finish()
}

/// Poll a status slot the way a latency-sensitive caller would.
fn wait_status(array: &StatusArray, index: u32) -> ErrorCode {
    while !array.is_complete(index) {
        thread::yield_now();
    }
    array.get_result(index)
}

struct MemoryBlock {
    packed: Arc<[u8]>,
    plain: Vec<u8>,
}

fn worker(
    seed: u64,
    requests: u32,
    file: &FileHandle,
    queue: &Queue,
    memory: Option<(&Queue, &[MemoryBlock])>,
    totals: &Totals,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut rng = XorShift64::new(seed);
    let status = StatusArray::new(2, Some("loadgen"));
    let file_size = file.size();
    let mut issued = 0;

    while issued < requests {
        let batch = BATCH.min(requests - issued);
        let mut pending = Vec::with_capacity(batch as usize);
        for _ in 0..batch {
            let len = (4 * (1 + rng.below(MAX_READ / 4))).min(file_size);
            let offset = rng.below((file_size - len) / 64 + 1) * 64;
            let dest = DestBuffer::new(len as usize);
            queue.enqueue_request(
                Request::read_file(file, offset, len as u32, Destination::Buffer(dest.clone()))
                    .with_tag(seed),
            )?;
            pending.push((offset, dest));
        }
        queue.enqueue_status(&status, 0)?;
        queue.submit();

        let mut inflated = None;
        if let Some((mq, blocks)) = memory {
            let block = &blocks[rng.below(blocks.len() as u64) as usize];
            let dest = DestBuffer::new(block.plain.len());
            mq.enqueue_request(Request::from_memory(
                Arc::clone(&block.packed),
                Destination::Buffer(dest.clone()),
                block.plain.len() as u32,
                Decompression::Zlib {
                    intermediate_size: 0,
                },
            ))?;
            mq.enqueue_status(&status, 1)?;
            mq.submit();
            inflated = Some((block, dest));
        }

        let result = wait_status(&status, 0);
        if !result.is_ok() {
            log::error!("batch failed: {result}");
            totals.failed.fetch_add(1, Ordering::Relaxed);
        }
        for (offset, dest) in &pending {
            let got = dest.to_vec();
            if got != counters(*offset, got.len()) {
                log::error!("mismatch at offset {offset} len {}", got.len());
                totals.mismatched.fetch_add(1, Ordering::Relaxed);
            }
            totals.bytes.fetch_add(got.len() as u64, Ordering::Relaxed);
        }
        if let Some((block, dest)) = inflated {
            let result = wait_status(&status, 1);
            if !result.is_ok() {
                totals.failed.fetch_add(1, Ordering::Relaxed);
            } else if dest.to_vec() != block.plain {
                totals.mismatched.fetch_add(1, Ordering::Relaxed);
            }
            totals.requests.fetch_add(1, Ordering::Relaxed);
        }

        issued += batch;
        totals.requests.fetch_add(batch as u64, Ordering::Relaxed);
    }
    Ok(())
}

fn run(opts: &Options, path: &Path) -> Result<Totals, Box<dyn Error + Send + Sync>> {
    let file_bytes = opts.file_mib * 1024 * 1024;
    write_counter_file(path, file_bytes)?;

    let scheduler = Scheduler::new(SchedulerConfig::default())?;
    let file = scheduler.open_file(path)?;
    let queues = Priority::ALL
        .iter()
        .map(|&p| scheduler.create_queue(QueueDesc::new(0x200, p).with_name(format!("{p:?}"))))
        .collect::<Result<Vec<_>, _>>()?;

    let (memory_queue, blocks) = if opts.compressed {
        let queue = scheduler
            .create_queue(QueueDesc::new(0x80, Priority::Realtime).with_name("memory-zlib"))?;
        let blocks = (0..MEMORY_BLOCKS)
            .map(|i| {
                let plain = counters((i * MEMORY_BLOCK) as u64, MEMORY_BLOCK);
                Ok(MemoryBlock {
                    packed: zlib(&plain)?.into(),
                    plain,
                })
            })
            .collect::<io::Result<Vec<_>>>()?;
        (Some(queue), blocks)
    } else {
        (None, Vec::new())
    };

    let totals = Totals::default();
    thread::scope(|s| {
        let handles: Vec<_> = (0..opts.threads)
            .map(|t| {
                let queue = &queues[t % queues.len()];
                let memory = memory_queue.as_ref().map(|q| (q, blocks.as_slice()));
                let (file, totals) = (&file, &totals);
                s.spawn(move || worker(t as u64 + 1, opts.requests, file, queue, memory, totals))
            })
            .collect();
        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log::error!("worker failed: {err}");
                    totals.failed.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    log::error!("worker panicked");
                    totals.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    for queue in queues.iter().chain(memory_queue.iter()) {
        let record = queue.retrieve_error_record();
        if let Some(first) = record.first_failure {
            log::warn!(
                "queue {:?}: {} failures, first {} at offset {}",
                queue.name(),
                record.failure_count,
                first.code,
                first.offset
            );
        }
    }
    let stats = scheduler.staging_stats();
    log::info!("staging high water {} bytes", stats.high_water);
    Ok(totals)
}

fn main() {
    let opts = parse_args();
    init_logger();

    let path: PathBuf = env::temp_dir().join(format!("offload-rs-{}.bin", std::process::id()));
    let start = Instant::now();
    let outcome = run(&opts, &path);
    let elapsed = start.elapsed();
    let _ = fs::remove_file(&path);

    let totals = match outcome {
        Ok(totals) => totals,
        Err(err) => {
            eprintln!("setup failed: {err}");
            std::process::exit(2);
        }
    };

    let bytes = totals.bytes.load(Ordering::Relaxed);
    let failed = totals.failed.load(Ordering::Relaxed);
    let mismatched = totals.mismatched.load(Ordering::Relaxed);
    let secs = elapsed.as_secs_f64();
    let throughput_mib = if secs > 0.0 {
        (bytes as f64 / (1024.0 * 1024.0)) / secs
    } else {
        0.0
    };
    eprintln!(
        "requests={} bytes={} failed={} mismatched={} elapsed_ms={} throughput_mib_s={:.2}",
        totals.requests.load(Ordering::Relaxed),
        bytes,
        failed,
        mismatched,
        elapsed.as_millis(),
        throughput_mib,
    );

    if failed > 0 || mismatched > 0 {
        std::process::exit(1);
    }
}
