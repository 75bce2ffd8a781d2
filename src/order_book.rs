//! Order book - price-time priority limit order book.
//!
//! Two price-indexed level maps (bids descending via last entry, asks
//! ascending via first entry), a pool-backed intrusive FIFO chain per level,
//! and an order-id index for O(1) cancellation. The book owns the id, trade
//! and timestamp allocators; all three are strictly increasing from 1.

use crate::arena::{OrderPool, NULL_INDEX};
use crate::message::{Order, Side, TopOfBook, Trade};
use crate::price_level::PriceLevel;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// Level-map key wrapping the IEEE-754 bit pattern of a price. Finite
/// positive doubles order identically to their bit patterns, so `Ord` on the
/// bits is `Ord` on the price without committing to a tick size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct PriceKey(u64);

impl PriceKey {
    #[inline]
    fn new(price: f64) -> Self {
        debug_assert!(price.is_finite() && price > 0.0, "price must be finite positive");
        Self(price.to_bits())
    }

    #[inline]
    fn price(self) -> f64 {
        f64::from_bits(self.0)
    }
}

/// Lightweight resting-order reference: side + price locate the level,
/// `idx` locates the node within the pool.
#[derive(Clone, Copy, Debug)]
struct OrderRef {
    side: Side,
    price: f64,
    idx: u32,
}

pub struct OrderBook {
    bids: BTreeMap<PriceKey, PriceLevel>,
    asks: BTreeMap<PriceKey, PriceLevel>,
    index: FxHashMap<u64, OrderRef>,
    pool: OrderPool,
    next_order_id: u64,
    next_trade_id: u64,
    next_ts: u64,
}

impl OrderBook {
    /// Create a book backed by a pool of `pool_capacity` resting-order slots.
    pub fn new(pool_capacity: u32) -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            index: FxHashMap::default(),
            pool: OrderPool::new(pool_capacity),
            next_order_id: 1,
            next_trade_id: 1,
            next_ts: 1,
        }
    }

    #[inline]
    fn alloc_order_id(&mut self) -> u64 {
        let id = self.next_order_id;
        self.next_order_id += 1;
        id
    }

    #[inline]
    fn alloc_trade_id(&mut self) -> u64 {
        let id = self.next_trade_id;
        self.next_trade_id += 1;
        id
    }

    #[inline]
    fn alloc_timestamp(&mut self) -> u64 {
        let ts = self.next_ts;
        self.next_ts += 1;
        ts
    }

    /// Submit a limit order. Crosses against the opposite side while
    /// marketable, appending fills to `out_trades`; any residual rests on
    /// the book. Returns the id of the resting residual, or 0 when the
    /// order filled completely (or had zero quantity).
    pub fn submit_limit_order(&mut self, order: Order, out_trades: &mut Vec<Trade>) -> u64 {
        out_trades.clear();
        if order.quantity == 0 {
            return 0;
        }

        let mut incoming = order;
        if incoming.order_id == 0 {
            incoming.order_id = self.alloc_order_id();
        }
        if incoming.ts_ns == 0 {
            incoming.ts_ns = self.alloc_timestamp();
        }
        incoming.remaining = incoming.quantity;

        match incoming.side {
            Side::Buy => self.match_buy(&mut incoming, out_trades),
            Side::Sell => self.match_sell(&mut incoming, out_trades),
        }

        if incoming.remaining > 0 {
            self.rest(&incoming);
            incoming.order_id
        } else {
            0
        }
    }

    /// Cancel a resting order by id: unlink from its level, release the pool
    /// node and evict the level if it emptied. Unknown ids return `false`.
    pub fn cancel_order(&mut self, order_id: u64) -> bool {
        let Some(oref) = self.index.remove(&order_id) else {
            return false;
        };
        let key = PriceKey::new(oref.price);
        let levels = match oref.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let Some(level) = levels.get_mut(&key) else {
            return false;
        };
        let empty = level.remove(&mut self.pool, oref.idx);
        self.pool.release(oref.idx);
        if empty {
            levels.remove(&key);
        }
        true
    }

    /// Best bid/ask with quantities summed along each best level's chain.
    pub fn top_of_book(&self) -> TopOfBook {
        let mut tob = TopOfBook::default();
        if let Some((&key, level)) = self.bids.last_key_value() {
            tob.has_bid = true;
            tob.bid_price = key.price();
            tob.bid_quantity = level.total_quantity(&self.pool);
        }
        if let Some((&key, level)) = self.asks.first_key_value() {
            tob.has_ask = true;
            tob.ask_price = key.price();
            tob.ask_quantity = level.total_quantity(&self.pool);
        }
        tob
    }

    /// Aggregated bid levels, best (highest) price first.
    pub fn snapshot_bids(&self) -> Vec<(f64, u64)> {
        self.bids
            .iter()
            .rev()
            .map(|(key, level)| (key.price(), level.total_quantity(&self.pool)))
            .filter(|&(_, qty)| qty > 0)
            .collect()
    }

    /// Aggregated ask levels, best (lowest) price first.
    pub fn snapshot_asks(&self) -> Vec<(f64, u64)> {
        self.asks
            .iter()
            .map(|(key, level)| (key.price(), level.total_quantity(&self.pool)))
            .filter(|&(_, qty)| qty > 0)
            .collect()
    }

    /// Number of resting orders currently indexed.
    pub fn size(&self) -> usize {
        self.index.len()
    }

    /// Whether an order id is currently resting.
    #[inline]
    pub fn contains_order(&self, order_id: u64) -> bool {
        self.index.contains_key(&order_id)
    }

    /// Pool occupancy, for telemetry.
    pub fn orders_in_use(&self) -> u32 {
        self.pool.in_use()
    }

    // ------------------------------------------------------------------
    // Matching
    // ------------------------------------------------------------------

    /// Cross an incoming buy against best asks while `ask <= limit`.
    fn match_buy(&mut self, incoming: &mut Order, out_trades: &mut Vec<Trade>) {
        while incoming.remaining > 0 {
            let Some((&key, level)) = self.asks.first_key_value() else {
                break;
            };
            let level_price = key.price();
            if level_price > incoming.price {
                break;
            }

            let mut idx = level.head;
            while idx != NULL_INDEX && incoming.remaining > 0 {
                let (next, resting_qty, resting_id, resting_user) = {
                    let node = self.pool.get(idx);
                    (node.next, node.quantity, node.order_id, node.user_id)
                };
                let fill = incoming.remaining.min(resting_qty);

                let trade_id = self.alloc_trade_id();
                let ts_ns = self.alloc_timestamp();
                out_trades.push(Trade {
                    trade_id,
                    buy_order_id: incoming.order_id,
                    sell_order_id: resting_id,
                    price: level_price,
                    quantity: fill,
                    instrument_id: incoming.instrument_id,
                    buy_user_id: incoming.user_id,
                    sell_user_id: resting_user,
                    ts_ns,
                });

                incoming.remaining -= fill;
                self.pool.get_mut(idx).quantity -= fill;

                if self.pool.get(idx).quantity == 0 {
                    self.index.remove(&resting_id);
                    let level = self.asks.get_mut(&key).expect("best ask level");
                    level.remove(&mut self.pool, idx);
                    self.pool.release(idx);
                }
                idx = next;
            }

            if self.asks.get(&key).is_some_and(|l| l.is_empty()) {
                self.asks.remove(&key);
            }
        }
    }

    /// Cross an incoming sell against best bids while `bid >= limit`.
    fn match_sell(&mut self, incoming: &mut Order, out_trades: &mut Vec<Trade>) {
        while incoming.remaining > 0 {
            let Some((&key, level)) = self.bids.last_key_value() else {
                break;
            };
            let level_price = key.price();
            if level_price < incoming.price {
                break;
            }

            let mut idx = level.head;
            while idx != NULL_INDEX && incoming.remaining > 0 {
                let (next, resting_qty, resting_id, resting_user) = {
                    let node = self.pool.get(idx);
                    (node.next, node.quantity, node.order_id, node.user_id)
                };
                let fill = incoming.remaining.min(resting_qty);

                let trade_id = self.alloc_trade_id();
                let ts_ns = self.alloc_timestamp();
                out_trades.push(Trade {
                    trade_id,
                    buy_order_id: resting_id,
                    sell_order_id: incoming.order_id,
                    price: level_price,
                    quantity: fill,
                    instrument_id: incoming.instrument_id,
                    buy_user_id: resting_user,
                    sell_user_id: incoming.user_id,
                    ts_ns,
                });

                incoming.remaining -= fill;
                self.pool.get_mut(idx).quantity -= fill;

                if self.pool.get(idx).quantity == 0 {
                    self.index.remove(&resting_id);
                    let level = self.bids.get_mut(&key).expect("best bid level");
                    level.remove(&mut self.pool, idx);
                    self.pool.release(idx);
                }
                idx = next;
            }

            if self.bids.get(&key).is_some_and(|l| l.is_empty()) {
                self.bids.remove(&key);
            }
        }
    }

    /// Rest the residual on its side's price level and index it.
    fn rest(&mut self, o: &Order) {
        let idx = self.pool.allocate();
        {
            let node = self.pool.get_mut(idx);
            node.order_id = o.order_id;
            node.user_id = o.user_id;
            node.side = o.side;
            node.price = o.price;
            node.quantity = o.remaining;
            node.instrument_id = o.instrument_id;
            node.ts_ns = o.ts_ns;
        }

        let key = PriceKey::new(o.price);
        let level = match o.side {
            Side::Buy => self.bids.entry(key).or_default(),
            Side::Sell => self.asks.entry(key).or_default(),
        };
        level.push_back(&mut self.pool, idx);

        self.index.insert(o.order_id, OrderRef { side: o.side, price: o.price, idx });
    }
}
