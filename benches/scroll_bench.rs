use criterion::{black_box, criterion_group, criterion_main, Criterion};
use scrolls::dispatch::DispatchTable;
use scrolls::scroll::{MemoryScroll, SectorScroll};
use scrolls::{ScrollExt, ScrollOptions};
use std::any::TypeId;

fn bench_fixed_values(c: &mut Criterion) {
    let values: Vec<u64> = (0..64 * 1024).collect();

    c.bench_function("memory_insert_remove_span_512kb", |b| {
        b.iter(|| {
            let mut scroll = MemoryScroll::new();
            scroll.insert_span(black_box(&values)).unwrap();
            scroll.rewind();
            let mut out = vec![0u64; values.len()];
            scroll.remove_span(&mut out).unwrap();
            out
        })
    });

    c.bench_function("memory_insert_value_64k", |b| {
        b.iter(|| {
            let mut scroll = MemoryScroll::new();
            for v in &values {
                scroll.insert_value(black_box(*v)).unwrap();
            }
            scroll
        })
    });
}

fn bench_sectors(c: &mut Criterion) {
    let data = vec![42u8; 1024 * 1024];
    let options = ScrollOptions::default();

    c.bench_function("sector_fifo_1mb_64k_sectors", |b| {
        b.iter(|| {
            let mut scroll = SectorScroll::in_memory(options.clone());
            scroll.insert_span(black_box(&data[..])).unwrap();
            let mut out = vec![0u8; data.len()];
            scroll.remove_span(&mut out).unwrap();
            out
        })
    });

    c.bench_function("ring_fifo_1mb", |b| {
        b.iter(|| {
            let mut scroll = SectorScroll::ring(options.clone());
            let mut out = vec![0u8; 4096];
            for chunk in data.chunks(4096) {
                scroll.insert_span(black_box(chunk)).unwrap();
                scroll.remove_span(&mut out[..chunk.len()]).unwrap();
            }
        })
    });
}

fn bench_dispatch(c: &mut Criterion) {
    let table = DispatchTable::with_builtins();
    let descriptor = scrolls::TypeDescriptor::of::<String>();
    let text = String::from("dispatch benchmark payload");

    c.bench_function("dispatch_resolve_cached", |b| {
        b.iter(|| table.resolve(TypeId::of::<MemoryScroll>(), black_box(&descriptor)).unwrap())
    });

    c.bench_function("dispatch_object_roundtrip_1k", |b| {
        b.iter(|| {
            let mut scroll = MemoryScroll::new();
            for _ in 0..1024 {
                table.insert_object(&mut scroll, Some(black_box(&text))).unwrap();
            }
            scroll.rewind();
            for _ in 0..1024 {
                table.remove_object(&mut scroll).unwrap();
            }
        })
    });
}

criterion_group!(benches, bench_fixed_values, bench_sectors, bench_dispatch);
criterion_main!(benches);
