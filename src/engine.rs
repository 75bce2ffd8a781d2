//! Matching engine - single worker thread that owns the order book, both
//! PnL engines and the order-id attribution map.
//!
//! Producers register before `start()` and each gets its own SPSC channel
//! into the engine; the engine drains them round-robin in bounded batches,
//! applies messages to the book, attributes PnL, and emits diff-based
//! TOB/L2 telemetry on the output channel. Output pushes are best-effort:
//! telemetry may be dropped under backpressure, state transitions are not.

use crate::config::EngineConfig;
use crate::message::{
    msg_type, Ack, CancelOrder, ClientMessage, NewOrder, Order, ServerMessage, Side, TopOfBook,
    Trade,
};
use crate::order_book::OrderBook;
use crate::pnl::PnlEngine;
use crate::spsc::{self, Consumer, Producer};
use log::{info, warn};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Messages drained from the input channels per engine iteration.
pub const BATCH_SIZE: usize = 1024;

/// Producer-side handle: a dedicated SPSC channel into the engine, so each
/// producer/engine pair keeps the single-producer contract. Pushes return
/// `false` when the channel is full; the producer decides retry or drop.
pub struct ClientHandle {
    tx: Producer<ClientMessage>,
}

impl ClientHandle {
    /// Non-blocking enqueue of a new order.
    #[inline]
    pub fn submit_new_order(&mut self, m: NewOrder) -> bool {
        self.tx.push(ClientMessage::New(m)).is_ok()
    }

    /// Non-blocking enqueue of a cancel request.
    #[inline]
    pub fn submit_cancel(&mut self, order_id: u64) -> bool {
        self.tx.push(ClientMessage::Cancel(CancelOrder { order_id })).is_ok()
    }
}

/// Per-message engine state machine, kept separate from the thread plumbing
/// so it can be driven synchronously in tests.
struct EngineCore {
    book: OrderBook,
    /// order_id -> user_id for resting orders; drives fill attribution.
    order_users: FxHashMap<u64, u64>,
    pnl: Arc<PnlEngine>,
    bot_pnl: Arc<PnlEngine>,
    last_tob: Option<TopOfBook>,
    trades: Vec<Trade>,
}

impl EngineCore {
    fn new(cfg: &EngineConfig, pnl: Arc<PnlEngine>, bot_pnl: Arc<PnlEngine>) -> Self {
        Self {
            book: OrderBook::new(cfg.pool_capacity),
            order_users: FxHashMap::default(),
            pnl,
            bot_pnl,
            last_tob: None,
            trades: Vec::with_capacity(16),
        }
    }

    /// Apply one client message; effects land on `out` in protocol order:
    /// TRADE*, ACK, TOB?, PNL_UPDATE*, L2_UPDATE*.
    fn process(&mut self, msg: ClientMessage, out: &mut Vec<ServerMessage>) {
        let prev_bids = self.book.snapshot_bids();
        let prev_asks = self.book.snapshot_asks();

        match msg {
            ClientMessage::New(m) => self.apply_new_order(m, out),
            ClientMessage::Cancel(c) => self.apply_cancel(c, out),
        }

        self.emit_tob_and_pnl(out);
        diff_side(&prev_bids, &self.book.snapshot_bids(), Side::Buy, out);
        diff_side(&prev_asks, &self.book.snapshot_asks(), Side::Sell, out);
    }

    fn apply_new_order(&mut self, m: NewOrder, out: &mut Vec<ServerMessage>) {
        let order = Order::limit(m.user_id, m.side, m.price, m.quantity, m.instrument_id);
        let mut trades = std::mem::take(&mut self.trades);
        let assigned = self.book.submit_limit_order(order, &mut trades);

        if assigned != 0 {
            self.order_users.insert(assigned, m.user_id);
        }

        for tr in &trades {
            self.attribute(tr, &m);
        }
        // Resting counterparties that filled completely no longer need
        // attribution entries.
        for tr in &trades {
            for id in [tr.buy_order_id, tr.sell_order_id] {
                if id != assigned && !self.book.contains_order(id) {
                    self.order_users.remove(&id);
                }
            }
        }

        for tr in &trades {
            out.push(ServerMessage::Trade(*tr));
        }
        out.push(ServerMessage::Ack(Ack {
            ok: true,
            req_type: msg_type::NEW_ORDER,
            order_id: assigned,
            user_id: m.user_id,
            instrument_id: m.instrument_id,
        }));

        trades.clear();
        self.trades = trades;
    }

    fn apply_cancel(&mut self, c: CancelOrder, out: &mut Vec<ServerMessage>) {
        let ok = self.book.cancel_order(c.order_id);
        if ok {
            self.order_users.remove(&c.order_id);
        }
        out.push(ServerMessage::Ack(Ack {
            ok,
            req_type: msg_type::CANCEL,
            order_id: c.order_id,
            user_id: 0,
            instrument_id: 0,
        }));
    }

    /// Route one fill to the tracked user's and the bot's PnL engines.
    /// The incoming order's user decides first; resting sides are resolved
    /// through the attribution map.
    fn attribute(&self, tr: &Trade, incoming: &NewOrder) {
        let tracked = self.pnl.user_id();
        let bot = self.bot_pnl.user_id();

        let mut user_is_buy = false;
        let mut user_is_sell = false;
        let mut bot_is_buy = false;
        let mut bot_is_sell = false;

        if incoming.user_id == tracked {
            match incoming.side {
                Side::Buy => user_is_buy = true,
                Side::Sell => user_is_sell = true,
            }
        }
        if incoming.user_id == bot {
            match incoming.side {
                Side::Buy => bot_is_buy = true,
                Side::Sell => bot_is_sell = true,
            }
        }

        if let Some(&u) = self.order_users.get(&tr.buy_order_id) {
            if u == tracked {
                user_is_buy = true;
                user_is_sell = false;
            }
            if u == bot {
                bot_is_buy = true;
                bot_is_sell = false;
            }
        }
        if let Some(&u) = self.order_users.get(&tr.sell_order_id) {
            if u == tracked {
                user_is_sell = true;
                user_is_buy = false;
            }
            if u == bot {
                bot_is_sell = true;
                bot_is_buy = false;
            }
        }

        if user_is_buy || user_is_sell {
            self.pnl.on_trade(user_is_buy, tr.price, tr.quantity);
        }
        if bot_is_buy || bot_is_sell {
            self.bot_pnl.on_trade(bot_is_buy, tr.price, tr.quantity);
        }
    }

    /// Emit TOB when any field changed since the last emission, and drive
    /// both PnL engines with the derived mid.
    fn emit_tob_and_pnl(&mut self, out: &mut Vec<ServerMessage>) {
        let tob = self.book.top_of_book();
        if self.last_tob.is_some_and(|last| last == tob) {
            return;
        }
        self.last_tob = Some(tob);
        out.push(ServerMessage::Tob(tob));

        if let Some(mid) = tob.mid() {
            if mid > 0.0 {
                self.pnl.on_midprice(mid);
                out.push(ServerMessage::Pnl(self.pnl.snapshot()));
                self.bot_pnl.on_midprice(mid);
                out.push(ServerMessage::Pnl(self.bot_pnl.snapshot()));
            }
        }
    }
}

/// Ordered-merge diff of two aggregated L2 snapshots (both sorted best
/// first). Emits one update per price whose aggregate changed; quantity 0
/// signals level removal.
fn diff_side(prev: &[(f64, u64)], new: &[(f64, u64)], side: Side, out: &mut Vec<ServerMessage>) {
    let before = |a: f64, b: f64| match side {
        Side::Buy => a > b,
        Side::Sell => a < b,
    };
    let mut i = 0;
    let mut j = 0;
    loop {
        match (prev.get(i), new.get(j)) {
            (Some(&(pp, pq)), Some(&(np, nq))) => {
                if pp == np {
                    if pq != nq {
                        out.push(ServerMessage::L2(crate::message::L2Update {
                            side,
                            price: np,
                            quantity: nq,
                        }));
                    }
                    i += 1;
                    j += 1;
                } else if before(pp, np) {
                    out.push(ServerMessage::L2(crate::message::L2Update {
                        side,
                        price: pp,
                        quantity: 0,
                    }));
                    i += 1;
                } else {
                    out.push(ServerMessage::L2(crate::message::L2Update {
                        side,
                        price: np,
                        quantity: nq,
                    }));
                    j += 1;
                }
            }
            (Some(&(pp, _)), None) => {
                out.push(ServerMessage::L2(crate::message::L2Update {
                    side,
                    price: pp,
                    quantity: 0,
                }));
                i += 1;
            }
            (None, Some(&(np, nq))) => {
                out.push(ServerMessage::L2(crate::message::L2Update {
                    side,
                    price: np,
                    quantity: nq,
                }));
                j += 1;
            }
            (None, None) => break,
        }
    }
}

/// Engine front: owns the worker thread, the registered input channels and
/// the output channel.
pub struct MatchingServer {
    cfg: EngineConfig,
    running: Arc<AtomicBool>,
    inputs: Vec<Consumer<ClientMessage>>,
    out_tx: Option<Producer<ServerMessage>>,
    out_rx: Option<Consumer<ServerMessage>>,
    pnl: Arc<PnlEngine>,
    bot_pnl: Arc<PnlEngine>,
    thread: Option<JoinHandle<()>>,
}

impl MatchingServer {
    pub fn new(cfg: EngineConfig) -> Self {
        let (out_tx, out_rx) = spsc::channel(cfg.output_capacity);
        Self {
            running: Arc::new(AtomicBool::new(false)),
            inputs: Vec::new(),
            out_tx: Some(out_tx),
            out_rx: Some(out_rx),
            pnl: Arc::new(PnlEngine::new(cfg.tracked_user_id)),
            bot_pnl: Arc::new(PnlEngine::new(cfg.bot_user_id)),
            cfg,
            thread: None,
        }
    }

    /// Open a dedicated input channel. Must happen before `start()`.
    pub fn register_producer(&mut self) -> ClientHandle {
        assert!(self.thread.is_none(), "register producers before start()");
        let (tx, rx) = spsc::channel(self.cfg.input_capacity);
        self.inputs.push(rx);
        ClientHandle { tx }
    }

    /// Take the consuming end of the output channel (once); the broadcaster
    /// owns it from here.
    pub fn take_output(&mut self) -> Consumer<ServerMessage> {
        self.out_rx.take().expect("output consumer already taken")
    }

    /// PnL engine of the tracked UI user, readable from any thread.
    pub fn pnl(&self) -> Arc<PnlEngine> {
        Arc::clone(&self.pnl)
    }

    /// PnL engine of the market-making bot, readable from any thread.
    pub fn bot_pnl(&self) -> Arc<PnlEngine> {
        Arc::clone(&self.bot_pnl)
    }

    /// Spawn the engine loop thread.
    pub fn start(&mut self) {
        if self.thread.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let mut inputs = std::mem::take(&mut self.inputs);
        let mut out = self.out_tx.take().expect("engine already started");
        let mut core = EngineCore::new(&self.cfg, Arc::clone(&self.pnl), Arc::clone(&self.bot_pnl));
        let pin_core = self.cfg.pin_core;

        let handle = thread::Builder::new()
            .name("engine".into())
            .spawn(move || {
                if let Some(idx) = pin_core {
                    pin_to_core(idx);
                }
                info!("engine loop started ({} producers)", inputs.len());
                let mut scratch: Vec<ServerMessage> = Vec::with_capacity(64);
                let mut dropped = 0u64;

                while running.load(Ordering::Relaxed) {
                    let mut processed = 0usize;
                    'batch: loop {
                        let mut any = false;
                        for input in inputs.iter_mut() {
                            let Some(msg) = input.pop() else { continue };
                            any = true;
                            core.process(msg, &mut scratch);
                            for sm in scratch.drain(..) {
                                if out.push(sm).is_err() {
                                    dropped += 1;
                                }
                            }
                            processed += 1;
                            if processed >= BATCH_SIZE {
                                break 'batch;
                            }
                        }
                        if !any {
                            break;
                        }
                    }
                    if processed == 0 {
                        thread::sleep(Duration::from_micros(100));
                    }
                }

                if dropped > 0 {
                    warn!("output channel full: {dropped} telemetry messages dropped");
                }
                info!("engine loop stopped ({} resting orders)", core.book.size());
            })
            .expect("spawn engine thread");
        self.thread = Some(handle);
    }

    /// Raise the stop flag and join the worker.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MatchingServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pin_to_core(idx: usize) {
    if let Some(cores) = core_affinity::get_core_ids() {
        if let Some(core) = cores.into_iter().find(|c| c.id == idx) {
            core_affinity::set_for_current(core);
        }
    }
}
