//! Ad hoc timing comparison for the page mapper and write composition
//! path across a few page sizes and write shapes. Not a `criterion`
//! harness — run with `cargo run --release --example mapper_bench` and
//! read the printed table.

use std::sync::Arc;
use std::time::Instant;

use hermes_buffer::backend::posix::PosixBackend;
use hermes_buffer::config::Config;
use hermes_buffer::io::IoEngine;
use hermes_buffer::mapper;
use hermes_buffer::scope::ScopeFilter;
use hermes_buffer::store::BlobStore;

struct Row {
    label: &'static str,
    page_size: u32,
    writes: usize,
    write_size: usize,
    elapsed_ms: f64,
    throughput_mbps: f64,
}

impl Row {
    fn print_header() {
        println!(
            "\n{:<28} {:>10} {:>8} {:>10} {:>12} {:>14}",
            "Workload", "PageSize", "Writes", "WriteLen", "Elapsed(ms)", "Throughput"
        );
        println!("{}", "=".repeat(88));
    }

    fn print(&self) {
        println!(
            "{:<28} {:>10} {:>8} {:>10} {:>12.2} {:>10.2} MB/s",
            self.label, self.page_size, self.writes, self.write_size, self.elapsed_ms, self.throughput_mbps
        );
    }
}

fn bench_mapper(label: &'static str, page_size: u32, writes: usize, write_size: usize) -> Row {
    let start = Instant::now();
    let mut offset = 0u64;
    for _ in 0..writes {
        let _ = mapper::map(offset, write_size as u64, page_size).unwrap();
        offset += write_size as u64;
    }
    let elapsed = start.elapsed();
    let total_mb = (writes * write_size) as f64 / (1024.0 * 1024.0);
    Row {
        label,
        page_size,
        writes,
        write_size,
        elapsed_ms: elapsed.as_secs_f64() * 1000.0,
        throughput_mbps: total_mb / elapsed.as_secs_f64().max(1e-9),
    }
}

fn bench_write_path(
    label: &'static str,
    page_size: u32,
    writes: usize,
    write_size: usize,
    dir: &std::path::Path,
) -> Row {
    let path = dir.join(format!("{label}.bin"));
    let path_str = path.to_str().unwrap();
    let store = Arc::new(BlobStore::new());
    let backend = Arc::new(PosixBackend);
    let scope = Arc::new(ScopeFilter::new(Config::default()));
    let engine = IoEngine::new(store.clone(), backend, scope, page_size);
    let bucket = store.get_or_create_bucket(path_str);

    let data = vec![0x42u8; write_size];
    let start = Instant::now();
    let mut size = 0u64;
    for i in 0..writes {
        let offset = (i * write_size) as u64;
        let result = engine.write(bucket, path_str, offset, &data, size).unwrap();
        size = result.new_size;
    }
    let elapsed = start.elapsed();
    let total_mb = (writes * write_size) as f64 / (1024.0 * 1024.0);
    Row {
        label,
        page_size,
        writes,
        write_size,
        elapsed_ms: elapsed.as_secs_f64() * 1000.0,
        throughput_mbps: total_mb / elapsed.as_secs_f64().max(1e-9),
    }
}

fn main() {
    tracing_subscriber::fmt::init();
    let dir = tempfile::tempdir().unwrap();

    Row::print_header();
    bench_mapper("mapper/aligned/64K", 65536, 10_000, 65536).print();
    bench_mapper("mapper/unaligned/4K", 65536, 10_000, 4096).print();
    bench_mapper("mapper/straddling/1M", 1024 * 1024, 2_000, 3 * 1024 * 1024).print();

    bench_write_path("write/sequential/64K", 65536, 200, 65536, dir.path()).print();
    bench_write_path("write/sequential/1M", 1024 * 1024, 50, 1024 * 1024, dir.path()).print();
}
