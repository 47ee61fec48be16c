//! Small buffered writes.

use bufhandle_bench::scratch_path;
use bufhandle_core::{Registry, api};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

fn bench_small_writes(c: &mut Criterion) {
    let reg = Registry::default();
    let mut group = c.benchmark_group("small_writes");
    let record = b"0123456789abcdef";
    group.throughput(Throughput::Bytes((record.len() * 1024) as u64));

    for (name, selector) in [("unbuffered", 0), ("line", 1), ("block", 2)] {
        let path = scratch_path(name);
        let h = api::open(&reg, &path, ">b").unwrap();
        api::set_buffer_mode(&h, selector).unwrap();
        group.bench_with_input(BenchmarkId::new("16B_x1024", name), &h, |b, h| {
            b.iter(|| {
                api::seek(h, 0, bufhandle_core::Whence::Set).unwrap();
                for _ in 0..1024 {
                    api::write(h, criterion::black_box(record)).unwrap();
                }
                api::flush(h).unwrap();
            });
        });
        api::close(&reg, &h).unwrap();
        let _ = std::fs::remove_file(&path);
    }
    group.finish();
}

fn bench_printf(c: &mut Criterion) {
    let reg = Registry::default();
    let path = scratch_path("printf");
    let h = api::open(&reg, &path, ">").unwrap();

    c.bench_function("printf_formatted_line", |b| {
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            api::printf(&h, format_args!("record {n:>10} value {:.3}\n", n as f64 / 7.0)).unwrap();
        });
    });
    api::close(&reg, &h).unwrap();
    let _ = std::fs::remove_file(&path);
}

criterion_group!(benches, bench_small_writes, bench_printf);
criterion_main!(benches);
