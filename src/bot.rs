//! Black–Scholes market-making bot.
//!
//! Quotes a two-sided market around the model's theoretical value on the
//! option instrument and delta-hedges in the underlying. Inventory is moved
//! only by observed fills on the broadcast stream, never by submissions;
//! the optimistic hedge adjustment is reconciled by the same stream. Quote
//! order ids are learned from acks addressed to the bot's user id, so the
//! previous quotes can be cancelled before each refresh.

use crate::bs;
use crate::config::{BotConfig, OptionType};
use crate::engine::ClientHandle;
use crate::message::{msg_type, NewOrder, ServerMessage, Side};
use crate::spsc::Consumer;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub struct BsBot {
    cfg: BotConfig,
    iv: Arc<Mutex<f64>>,
    running: Arc<AtomicBool>,
    io: Option<(ClientHandle, Consumer<ServerMessage>)>,
    thread: Option<JoinHandle<()>>,
}

impl BsBot {
    pub fn new(cfg: BotConfig, handle: ClientHandle, feed: Consumer<ServerMessage>) -> Self {
        Self {
            iv: Arc::new(Mutex::new(cfg.iv)),
            cfg,
            running: Arc::new(AtomicBool::new(false)),
            io: Some((handle, feed)),
            thread: None,
        }
    }

    /// Update the implied volatility used for pricing; callable from any
    /// thread while the bot runs.
    pub fn set_iv(&self, iv: f64) {
        *self.iv.lock().unwrap() = iv;
    }

    /// Spawn the quoting/hedging thread.
    pub fn start(&mut self) {
        if self.thread.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let iv = Arc::clone(&self.iv);
        let (handle, feed) = self.io.take().expect("bot already started");
        let cfg = self.cfg;
        let thread = thread::Builder::new()
            .name("bs-bot".into())
            .spawn(move || run(cfg, iv, handle, feed, running))
            .expect("spawn bs-bot thread");
        self.thread = Some(thread);
    }

    /// Raise the stop flag and join the worker.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for BsBot {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    cfg: BotConfig,
    iv: Arc<Mutex<f64>>,
    mut handle: ClientHandle,
    mut feed: Consumer<ServerMessage>,
    running: Arc<AtomicBool>,
) {
    let mut last_mid = 0.0f64;
    let mut option_inventory = 0.0f64;
    let mut hedge_inventory = 0.0f64;
    let mut active_option_orders: Vec<u64> = Vec::new();

    // backdate so the first quote goes out as soon as a mid is known
    let mut last_update = Instant::now().checked_sub(cfg.update_interval).unwrap_or_else(Instant::now);
    let mut last_log = Instant::now();

    info!(
        "bs-bot started (strike={}, spread={}, qty={}, hedge_tolerance={})",
        cfg.strike, cfg.spread, cfg.qty, cfg.hedge_tolerance
    );

    while running.load(Ordering::Relaxed) {
        // consume the broadcast stream: mid, own fills, own acks
        while let Some(sm) = feed.pop() {
            match sm {
                ServerMessage::Tob(tob) => {
                    last_mid = tob.mid().unwrap_or(0.0);
                }
                ServerMessage::Trade(t) => {
                    if t.instrument_id == cfg.option_instrument {
                        if t.buy_user_id == cfg.user_id {
                            option_inventory += t.quantity as f64;
                        } else if t.sell_user_id == cfg.user_id {
                            option_inventory -= t.quantity as f64;
                        }
                    }
                    if t.instrument_id == cfg.underlying_instrument {
                        if t.buy_user_id == cfg.user_id {
                            hedge_inventory += t.quantity as f64;
                        } else if t.sell_user_id == cfg.user_id {
                            hedge_inventory -= t.quantity as f64;
                        }
                    }
                }
                ServerMessage::Ack(a) => {
                    if a.ok
                        && a.req_type == msg_type::NEW_ORDER
                        && a.user_id == cfg.user_id
                        && a.instrument_id == cfg.option_instrument
                        && a.order_id != 0
                    {
                        active_option_orders.push(a.order_id);
                    }
                }
                _ => {}
            }
        }

        if last_update.elapsed() < cfg.update_interval {
            thread::sleep(Duration::from_millis(10));
            continue;
        }
        last_update = Instant::now();

        let s = last_mid;
        if s <= 0.0 {
            thread::sleep(Duration::from_millis(20));
            continue;
        }

        let tau = (cfg.expiry_seconds / 365.0).max(1e-6);
        let sigma = *iv.lock().unwrap();
        let is_call = cfg.opt_type == OptionType::Call;
        let theo = bs::price(s, cfg.strike, cfg.r, sigma, tau, is_call);
        let delta = bs::delta(s, cfg.strike, cfg.r, sigma, tau, is_call);

        let (bid, ask) = quote_prices(&cfg, s, theo);

        // replace the previous quotes; cancel of an already-gone id is harmless
        for id in active_option_orders.drain(..) {
            handle.submit_cancel(id);
        }
        let qty = cfg.qty.max(1.0) as u64;
        post(&mut handle, &cfg, cfg.option_instrument, Side::Buy, bid, qty);
        post(&mut handle, &cfg, cfg.option_instrument, Side::Sell, ask, qty);

        if let Some((side, price, qty)) = hedge_order(&cfg, delta, option_inventory, hedge_inventory, s) {
            post(&mut handle, &cfg, cfg.underlying_instrument, side, price, qty);
            // optimistic; the trade stream remains authoritative
            hedge_inventory += match side {
                Side::Buy => qty as f64,
                Side::Sell => -(qty as f64),
            };
        }

        if last_log.elapsed() >= Duration::from_secs(1) {
            last_log = Instant::now();
            info!(
                "bs-bot: S={s:.2} theo={theo:.2} delta={delta:.3} opt_inv={option_inventory} hedge_inv={hedge_inventory}"
            );
        }
    }

    info!("bs-bot stopped");
}

/// Bid/ask around theoretical value, clamped to the configured band and
/// capped relative to the spot to prevent runaway quotes.
fn quote_prices(cfg: &BotConfig, s: f64, theo: f64) -> (f64, f64) {
    let mut bid = (theo - 0.5 * cfg.spread).max(cfg.min_price);
    let mut ask = (theo + 0.5 * cfg.spread).min(cfg.max_price);
    let cap = (10.0 * s).max(1.0);
    if bid > cap {
        bid = cap;
    }
    if ask > cap {
        ask = cap;
    }
    (bid, ask)
}

/// The single underlying order that moves net delta back inside tolerance,
/// or `None` when the book is already balanced enough.
fn hedge_order(
    cfg: &BotConfig,
    delta: f64,
    option_inventory: f64,
    hedge_inventory: f64,
    s: f64,
) -> Option<(Side, f64, u64)> {
    let target = -delta * option_inventory;
    let need = target - hedge_inventory;
    if need.abs() <= cfg.hedge_tolerance {
        return None;
    }
    let side = if need > 0.0 { Side::Buy } else { Side::Sell };
    let price = match side {
        Side::Buy => s + 0.01,
        Side::Sell => s - 0.01,
    }
    .clamp(cfg.min_price, cfg.max_price);
    let qty = need.abs().min(100.0) as u64;
    if qty == 0 {
        return None;
    }
    Some((side, price, qty))
}

fn post(handle: &mut ClientHandle, cfg: &BotConfig, instrument_id: u32, side: Side, price: f64, quantity: u64) {
    let price = price.clamp(cfg.min_price, cfg.max_price);
    let pushed = handle.submit_new_order(NewOrder {
        user_id: cfg.user_id,
        side,
        price,
        quantity,
        instrument_id,
    });
    if !pushed {
        debug!("engine input full; dropping bot order");
    }
}
