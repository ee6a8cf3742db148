//! Benchmarks for cache reads, edit splicing and code point stepping.
//!
//! Run with: cargo bench -p kbsync-text --bench window_cache_bench

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use kbsync_core::{Edit, Span};
use kbsync_text::{Region, Side, TextWindowCache};
use std::hint::black_box;

// ── Fixtures ────────────────────────────────────────────────────────────

/// Mixed BMP and supplementary text of roughly `units` code units.
fn document(units: usize) -> String {
    let mut text = String::with_capacity(units * 2);
    let mut len = 0;
    let mut i = 0usize;
    while len < units {
        if i % 7 == 0 {
            text.push('😀');
            len += 2;
        } else {
            text.push(char::from(b'a' + (i % 26) as u8));
            len += 1;
        }
        i += 1;
    }
    text
}

fn seeded(text: &str) -> TextWindowCache {
    let mut cache = TextWindowCache::new();
    let len = kbsync_core::unicode::utf16_len(text);
    let mid = kbsync_core::unicode::prefix_units(text, len / 2);
    let cursor = kbsync_core::unicode::utf16_len(mid);
    cache.seed_window(0, text, Span::caret(cursor), true, true);
    cache
}

// ── Benchmark Functions ─────────────────────────────────────────────────

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("window_cache/read");
    for &size in &[100, 1_000, 10_000] {
        let cache = seeded(&document(size));
        group.bench_with_input(BenchmarkId::new("before", size), &cache, |b, cache| {
            b.iter(|| black_box(cache.read(Region::Before, 0, black_box(size / 4))));
        });
        group.bench_with_input(BenchmarkId::new("after", size), &cache, |b, cache| {
            b.iter(|| black_box(cache.read(Region::After, 0, black_box(size / 4))));
        });
    }
    group.finish();
}

fn bench_edit(c: &mut Criterion) {
    let mut group = c.benchmark_group("window_cache/apply_edit");
    for &size in &[100, 1_000, 10_000] {
        let cache = seeded(&document(size));
        group.bench_with_input(BenchmarkId::new("insert", size), &cache, |b, cache| {
            b.iter(|| {
                let mut cache = cache.clone();
                let Some(selection) = cache.selection() else {
                    return;
                };
                cache.apply_edit(
                    Edit::new(selection.start, 0, 1),
                    "x",
                    Span::caret(selection.start + 1),
                );
                black_box(cache.selection());
            });
        });
    }
    group.finish();
}

fn bench_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("window_cache/step");
    for &points in &[1isize, 16, 256] {
        let cache = seeded(&document(4_000));
        group.bench_with_input(BenchmarkId::new("left", points), &cache, |b, cache| {
            b.iter(|| black_box(cache.step(Side::Left, -black_box(points))));
        });
        group.bench_with_input(BenchmarkId::new("right", points), &cache, |b, cache| {
            b.iter(|| black_box(cache.step(Side::Right, black_box(points))));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_read, bench_edit, bench_step);
criterion_main!(benches);
