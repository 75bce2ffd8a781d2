use hdrhistogram::Histogram;
use std::time::Instant;
use tickmatch::message::{Order, Side};
use tickmatch::OrderBook;

fn main() {
    println!("Preparing latency benchmark...");

    let mut book = OrderBook::new(1 << 20);
    let mut trades = Vec::with_capacity(16);
    let mut histogram = Histogram::<u64>::new_with_bounds(1, 100_000, 3).unwrap();

    const ITERATIONS: u64 = 1_000_000;

    // Seed some standing depth on both sides so submissions exercise the
    // whole path: crossing at the touch, resting behind it.
    for i in 0..1_000u64 {
        let price = 99.0 + (i % 100) as f64 * 0.01;
        book.submit_limit_order(Order::limit(1, Side::Buy, price, 10, 1), &mut trades);
        book.submit_limit_order(Order::limit(1, Side::Sell, price + 2.0, 10, 1), &mut trades);
    }

    println!("Running {ITERATIONS} iterations...");
    let mut total = std::time::Duration::ZERO;

    for i in 0..ITERATIONS {
        let side = if i % 2 == 0 { Side::Buy } else { Side::Sell };
        let price = 100.0 + (i % 200) as f64 * 0.01;
        let order = Order::limit(2, side, price, 10, 1);

        let start = Instant::now();
        std::hint::black_box(book.submit_limit_order(order, &mut trades));
        let elapsed = start.elapsed();

        histogram.record(elapsed.as_nanos() as u64).unwrap_or(());
        total += elapsed;
    }

    println!("\n=== Latency Report (ns) ===");
    println!("Total ops:  {ITERATIONS}");
    println!("Throughput: {:.2} ops/sec", ITERATIONS as f64 / total.as_secs_f64());
    println!("---------------------------");
    println!("Min:    {:6} ns", histogram.min());
    println!("P50:    {:6} ns", histogram.value_at_quantile(0.50));
    println!("P90:    {:6} ns", histogram.value_at_quantile(0.90));
    println!("P99:    {:6} ns", histogram.value_at_quantile(0.99));
    println!("P99.9:  {:6} ns", histogram.value_at_quantile(0.999));
    println!("Max:    {:6} ns", histogram.max());
    println!("---------------------------");
    println!("Resting orders at exit: {}", book.size());
}
