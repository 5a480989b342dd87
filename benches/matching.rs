//! Benchmarks for counterparty selection and field encryption.
//!
//! ## Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench
//!
//! # Run specific benchmark
//! cargo bench -- select_counterparty
//! ```
//!
//! Results are saved to `target/criterion/` with HTML reports.

use std::time::Duration;

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use uuid::Uuid;

use dark_settlement::crypto::{open, seal, FieldCipher, OrderTerms};
use dark_settlement::engine::select_counterparty;
use dark_settlement::repository::OrderRow;
use dark_settlement::{Order, OrderStatus, Owner, Side};

// ============================================================================
// HELPER FUNCTIONS - Deterministic order generation
// ============================================================================

/// Resting book of `count` orders, FIFO ordered, mixed sides and owners.
///
/// The only eligible SELL from another owner sits at the back, so selection
/// has to walk the whole queue.
fn worst_case_book(count: usize, seed: u64) -> Vec<Order> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut book: Vec<Order> = (0..count.saturating_sub(1))
        .map(|_| {
            let price = Decimal::new(rng.gen_range(9_900..=10_100), 2);
            let size = Decimal::new(rng.gen_range(1..=10_000), 3);
            // Either our own sell or someone else's buy
            if rng.gen_bool(0.5) {
                Order::new("0xme", Side::Sell, "Z", "USDT", size, price)
            } else {
                Order::new(format!("0x{:04x}", rng.gen_range(1..=500u32)), Side::Buy, "Z", "USDT", size, price)
            }
        })
        .collect();
    book.push(Order::new("0xlast", Side::Sell, "Z", "USDT", Decimal::ONE, Decimal::ONE_HUNDRED));
    book
}

fn sample_terms() -> OrderTerms {
    let size = Decimal::new(15, 1);
    let price = Decimal::new(10_025, 2);
    OrderTerms {
        side: Side::Buy,
        size,
        price,
        order_value: size * price,
        filled: Decimal::ZERO,
    }
}

// ============================================================================
// BENCHMARK: Counterparty selection
// ============================================================================

fn bench_select_counterparty(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_counterparty");
    let incoming = Order::new("0xme", Side::Buy, "Z", "USDT", Decimal::ONE, Decimal::ONE_HUNDRED);

    for &size in &[10usize, 100, 1_000, 10_000] {
        let book = worst_case_book(size, 42);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &book, |b, book| {
            b.iter(|| black_box(select_counterparty(black_box(&incoming), book)))
        });
    }

    group.finish();
}

// ============================================================================
// BENCHMARK: Field encryption
// ============================================================================
// Every candidate in the matching queue is decrypted, so `open` bounds
// matching latency as the book grows.

fn bench_field_cipher(c: &mut Criterion) {
    let mut group = c.benchmark_group("field_cipher");
    group.measurement_time(Duration::from_secs(5));

    let cipher = FieldCipher::new(Some("bench-secret".to_string()));
    let terms = sample_terms();
    // Pay for key derivation once, outside the measurement
    let sealed = seal(&cipher, &terms).unwrap();

    let now = Utc::now();
    let row = OrderRow {
        id: Uuid::new_v4(),
        owner: Owner::new("0xbench"),
        asset: "Z".to_string(),
        quote_asset: "USDT".to_string(),
        sealed,
        status: OrderStatus::Open,
        settlement_reference: None,
        claim: None,
        seq: 1,
        created_at: now,
        updated_at: now,
    };

    group.bench_function("seal_order", |b| {
        b.iter(|| black_box(seal(&cipher, black_box(&terms)).unwrap()))
    });

    group.bench_function("open_order", |b| {
        b.iter(|| black_box(open(&cipher, black_box(&row)).unwrap()))
    });

    group.bench_function("encrypt_single_field", |b| {
        b.iter(|| black_box(cipher.encrypt(black_box("12345.678901")).unwrap()))
    });

    group.finish();
}

// ============================================================================
// CRITERION ENTRY POINT
// ============================================================================

criterion_group!(benches, bench_select_counterparty, bench_field_cipher);

criterion_main!(benches);
