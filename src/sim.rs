//! Market simulator - synthetic two-sided and crossing flow.
//!
//! The reference price follows an Ornstein–Uhlenbeck process on the log
//! price: `d log s = kappa (log mean - log s) dt + sigma dW`, quantized to
//! the tick. Each step posts passive depth half a point around the mid and
//! a crossing pair just inside it with a shared quantity, guaranteeing
//! trades. Under a fixed seed the produced flow is fully reproducible.

use crate::config::SimConfig;
use crate::engine::ClientHandle;
use crate::message::{NewOrder, Side};
use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub struct MarketSimulator {
    cfg: SimConfig,
    running: Arc<AtomicBool>,
    handle: Option<ClientHandle>,
    thread: Option<JoinHandle<()>>,
}

impl MarketSimulator {
    pub fn new(cfg: SimConfig, handle: ClientHandle) -> Self {
        Self {
            cfg,
            running: Arc::new(AtomicBool::new(false)),
            handle: Some(handle),
            thread: None,
        }
    }

    /// Spawn the simulation thread.
    pub fn start(&mut self) {
        if self.thread.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let handle = self.handle.take().expect("simulator already started");
        let cfg = self.cfg;
        let thread = thread::Builder::new()
            .name("market-sim".into())
            .spawn(move || run(cfg, handle, running))
            .expect("spawn market-sim thread");
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

impl Drop for MarketSimulator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(cfg: SimConfig, mut handle: ClientHandle, running: Arc<AtomicBool>) {
    let mut rng = match cfg.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };
    let mut s = cfg.s0;
    info!(
        "market simulator started (s0={}, sigma={}, dt={}s, tick={})",
        cfg.s0, cfg.sigma, cfg.dt, cfg.tick
    );

    while running.load(Ordering::Relaxed) {
        let z: f64 = rng.sample(StandardNormal);
        s = ou_step(s, &cfg, z);

        let mut mid = round_to_tick(s, cfg.tick);
        if mid <= 0.0 {
            mid = cfg.tick;
        }

        // passive depth around the mid
        let passive_bid = round_to_tick(mid - 0.5, cfg.tick);
        let passive_ask = round_to_tick(mid + 0.5, cfg.tick);
        if passive_bid > 0.0 {
            send(&mut handle, &cfg, Side::Buy, passive_bid, rng.gen_range(1..=20));
        }
        send(&mut handle, &cfg, Side::Sell, passive_ask, rng.gen_range(1..=20));

        // crossing pair just inside the mid; buy first so they trade
        let aggressive_bid = round_to_tick(mid + 0.05, cfg.tick);
        let aggressive_ask = round_to_tick(mid - 0.05, cfg.tick);
        if aggressive_ask < aggressive_bid {
            let qty = rng.gen_range(1..=20);
            send(&mut handle, &cfg, Side::Buy, aggressive_bid, qty);
            send(&mut handle, &cfg, Side::Sell, aggressive_ask, qty);
        }

        thread::sleep(Duration::from_secs_f64(cfg.dt));
    }

    info!("market simulator stopped");
}

/// One step of the mean-reverting log-price process.
fn ou_step(s: f64, cfg: &SimConfig, z: f64) -> f64 {
    let mut log_s = s.max(cfg.tick).ln();
    let log_mean = cfg.mean_level.ln();
    log_s += cfg.kappa * (log_mean - log_s) * cfg.dt + cfg.sigma * cfg.dt.sqrt() * z;
    log_s.exp()
}

#[inline]
fn round_to_tick(x: f64, tick: f64) -> f64 {
    (x / tick).round() * tick
}

fn send(handle: &mut ClientHandle, cfg: &SimConfig, side: Side, price: f64, quantity: u64) {
    let pushed = handle.submit_new_order(NewOrder {
        user_id: cfg.user_id,
        side,
        price,
        quantity,
        instrument_id: cfg.instrument_id,
    });
    if !pushed {
        debug!("engine input full; dropping simulator order");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_rounding() {
        assert!((round_to_tick(100.004, 0.01) - 100.0).abs() < 1e-9);
        assert!((round_to_tick(100.006, 0.01) - 100.01).abs() < 1e-9);
        assert!((round_to_tick(99.995, 0.01) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn ou_pulls_towards_mean() {
        let cfg = SimConfig { mean_level: 100.0, kappa: 1.0, sigma: 0.0, dt: 0.1, ..SimConfig::default() };
        // no noise: starting above the mean must move down, below must move up
        let above = ou_step(120.0, &cfg, 0.0);
        assert!(above < 120.0 && above > 100.0);
        let below = ou_step(80.0, &cfg, 0.0);
        assert!(below > 80.0 && below < 100.0);
    }

    #[test]
    fn ou_survives_degenerate_price() {
        let cfg = SimConfig::default();
        // a price at/below zero clamps to the tick before taking the log
        let next = ou_step(0.0, &cfg, 0.0);
        assert!(next.is_finite() && next > 0.0);
    }
}
