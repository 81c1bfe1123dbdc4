use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rug::Integer;

use gapforge::arith::MIN_TEST_DIFFICULTY;
use gapforge::pow::GapPow;
use gapforge::sieve::GapSieve;
use gapforge::GapProcessor;

struct DropHits;

impl GapProcessor for DropHits {
    fn process(&mut self, _pow: &GapPow) -> bool {
        true
    }
}

fn test_pow() -> GapPow {
    let hash = (Integer::from(1u32) << 255u32) + 0x1234u32;
    GapPow::new(hash, 14, Integer::new(), MIN_TEST_DIFFICULTY)
}

fn drop_hits() -> Box<dyn GapProcessor> {
    Box::new(DropHits)
}

fn bench_engine_construction(c: &mut Criterion) {
    c.bench_function("GapSieve::new(100k primes)", |b| {
        b.iter(|| GapSieve::new(drop_hits(), black_box(100_000), black_box(1 << 20)));
    });
}

fn bench_segment_scan(c: &mut Criterion) {
    let mut sieve = GapSieve::new(drop_hits(), 10_000, 1 << 16);
    let mut pow = test_pow();
    c.bench_function("run_sieve(2^16 bits, 10k primes)", |b| {
        b.iter(|| sieve.run_sieve(black_box(&mut pow), black_box(&[])));
    });
}

fn bench_segment_scan_deep_filter(c: &mut Criterion) {
    let mut sieve = GapSieve::new(drop_hits(), 100_000, 1 << 16);
    let mut pow = test_pow();
    c.bench_function("run_sieve(2^16 bits, 100k primes)", |b| {
        b.iter(|| sieve.run_sieve(black_box(&mut pow), black_box(&[])));
    });
}

criterion_group!(
    benches,
    bench_engine_construction,
    bench_segment_scan,
    bench_segment_scan_deep_filter,
);
criterion_main!(benches);
