//! Fuzz: the pool-backed book against a naive but obviously-correct
//! reference implementation, driven by seeded random flow.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};
use tickmatch::message::{Order, Side};
use tickmatch::OrderBook;

/// Reference book: vectors of (order_id, qty) per price, keyed by the price
/// bit pattern (finite positive doubles sort by bits).
struct ReferenceBook {
    bids: BTreeMap<u64, Vec<(u64, u64)>>,
    asks: BTreeMap<u64, Vec<(u64, u64)>>,
    orders: HashMap<u64, (Side, u64)>,
}

impl ReferenceBook {
    fn new() -> Self {
        Self { bids: BTreeMap::new(), asks: BTreeMap::new(), orders: HashMap::new() }
    }

    fn best_bid(&self) -> Option<f64> {
        self.bids.keys().next_back().map(|&bits| f64::from_bits(bits))
    }

    fn best_ask(&self) -> Option<f64> {
        self.asks.keys().next().map(|&bits| f64::from_bits(bits))
    }

    /// Cross then rest, mirroring price-time priority. Returns total traded
    /// quantity and whether a residual rested under `order_id`.
    fn place(&mut self, order_id: u64, side: Side, price: f64, mut qty: u64) -> (u64, bool) {
        let mut traded = 0u64;
        let price_bits = price.to_bits();

        match side {
            Side::Buy => {
                let crossable: Vec<u64> =
                    self.asks.range(..=price_bits).map(|(&p, _)| p).collect();
                for level in crossable {
                    if qty == 0 {
                        break;
                    }
                    let orders = self.asks.get_mut(&level).unwrap();
                    while !orders.is_empty() && qty > 0 {
                        let fill = orders[0].1.min(qty);
                        orders[0].1 -= fill;
                        qty -= fill;
                        traded += fill;
                        if orders[0].1 == 0 {
                            let (maker, _) = orders.remove(0);
                            self.orders.remove(&maker);
                        }
                    }
                    if orders.is_empty() {
                        self.asks.remove(&level);
                    }
                }
                if qty > 0 {
                    self.bids.entry(price_bits).or_default().push((order_id, qty));
                    self.orders.insert(order_id, (Side::Buy, price_bits));
                }
            }
            Side::Sell => {
                let crossable: Vec<u64> =
                    self.bids.range(price_bits..).rev().map(|(&p, _)| p).collect();
                for level in crossable {
                    if qty == 0 {
                        break;
                    }
                    let orders = self.bids.get_mut(&level).unwrap();
                    while !orders.is_empty() && qty > 0 {
                        let fill = orders[0].1.min(qty);
                        orders[0].1 -= fill;
                        qty -= fill;
                        traded += fill;
                        if orders[0].1 == 0 {
                            let (maker, _) = orders.remove(0);
                            self.orders.remove(&maker);
                        }
                    }
                    if orders.is_empty() {
                        self.bids.remove(&level);
                    }
                }
                if qty > 0 {
                    self.asks.entry(price_bits).or_default().push((order_id, qty));
                    self.orders.insert(order_id, (Side::Sell, price_bits));
                }
            }
        }

        (traded, qty > 0)
    }

    fn cancel(&mut self, order_id: u64) -> bool {
        let Some((side, price_bits)) = self.orders.remove(&order_id) else {
            return false;
        };
        let book = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        if let Some(orders) = book.get_mut(&price_bits) {
            orders.retain(|&(id, _)| id != order_id);
            if orders.is_empty() {
                book.remove(&price_bits);
            }
        }
        true
    }

    fn order_count(&self) -> usize {
        self.orders.len()
    }
}

fn run_fuzz(seed: u64, steps: usize) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut book = OrderBook::new(200_000);
    let mut reference = ReferenceBook::new();
    let mut trades = Vec::new();
    let mut live: Vec<u64> = Vec::new();

    for step in 0..steps {
        if live.is_empty() || rng.gen_bool(0.75) {
            let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
            let price = rng.gen_range(9_800..10_200) as f64 * 0.01;
            let qty = rng.gen_range(1..200);

            let id = book.submit_limit_order(Order::limit(1, side, price, qty, 1), &mut trades);
            let traded: u64 = trades.iter().map(|t| t.quantity).sum();

            // drive the reference with the engine-assigned id so cancels line up
            let ref_id = if id != 0 { id } else { u64::MAX - step as u64 };
            let (ref_traded, ref_rested) = reference.place(ref_id, side, price, qty);

            assert_eq!(traded, ref_traded, "traded qty diverged at step {step}");
            assert_eq!(id != 0, ref_rested, "rest decision diverged at step {step}");
            if id != 0 {
                live.push(id);
            }
        } else {
            let idx = rng.gen_range(0..live.len());
            let id = live.swap_remove(idx);
            assert_eq!(book.cancel_order(id), reference.cancel(id), "cancel diverged at step {step}");
        }

        let tob = book.top_of_book();
        assert_eq!(tob.has_bid.then_some(tob.bid_price), reference.best_bid(), "best bid diverged at step {step}");
        assert_eq!(tob.has_ask.then_some(tob.ask_price), reference.best_ask(), "best ask diverged at step {step}");

        if step % 100 == 0 {
            live.retain(|&id| book.contains_order(id));
            assert_eq!(book.size(), reference.order_count(), "order count diverged at step {step}");
        }
    }
}

#[test]
fn fuzz_against_reference_small() {
    run_fuzz(0xF00D, 2_000);
}

#[test]
fn fuzz_against_reference_large() {
    run_fuzz(0xBEEF, 20_000);
}

#[test]
fn fuzz_multiple_seeds() {
    for seed in 0..5 {
        run_fuzz(seed, 1_000);
    }
}
