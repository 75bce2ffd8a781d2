//! Per-user PnL attribution: signed position with a VWAP average price,
//! realized PnL on closing fills and unrealized PnL under a moving mid.
//!
//! State sits behind a mutex so snapshots can be read from any thread; none
//! of this is on the matching hot path.

use crate::message::PnlUpdate;
use std::sync::Mutex;

#[derive(Default)]
struct PnlState {
    position: f64,
    avg_price: f64,
    realized: f64,
    unrealized: f64,
    last_mid: f64,
}

impl PnlState {
    fn mark(&mut self) {
        if self.position == 0.0 {
            self.unrealized = 0.0;
        } else if self.position > 0.0 {
            self.unrealized = (self.last_mid - self.avg_price) * self.position.abs();
        } else {
            self.unrealized = (self.avg_price - self.last_mid) * self.position.abs();
        }
    }
}

pub struct PnlEngine {
    user_id: u64,
    state: Mutex<PnlState>,
}

impl PnlEngine {
    pub fn new(user_id: u64) -> Self {
        Self { user_id, state: Mutex::new(PnlState::default()) }
    }

    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    /// Apply a fill for this user. `is_buy` is the user's side of the trade.
    ///
    /// A fill opposite to the open position first closes up to the open
    /// quantity, realizing `(price - avg)` per unit when long and
    /// `(avg - price)` when short; any residual then opens or extends a
    /// position and the average price becomes the volume-weighted mean over
    /// absolute quantities.
    pub fn on_trade(&self, is_buy: bool, price: f64, qty: u64) {
        let mut s = self.state.lock().unwrap();
        let mut signed_qty = if is_buy { qty as f64 } else { -(qty as f64) };

        if s.position != 0.0 && s.position * signed_qty < 0.0 {
            let close_qty = s.position.abs().min(signed_qty.abs());
            if s.position > 0.0 {
                s.realized += (price - s.avg_price) * close_qty;
            } else {
                s.realized += (s.avg_price - price) * close_qty;
            }

            signed_qty = if signed_qty.abs() > close_qty {
                if signed_qty > 0.0 { signed_qty - close_qty } else { signed_qty + close_qty }
            } else {
                0.0
            };

            if s.position.abs() <= close_qty {
                s.position = 0.0;
                s.avg_price = 0.0;
            } else if s.position > 0.0 {
                s.position -= close_qty;
            } else {
                s.position += close_qty;
            }
        }

        if signed_qty != 0.0 {
            if s.position == 0.0 {
                s.avg_price = price;
                s.position = signed_qty;
            } else {
                // same sign as the remaining position: extend at the VWAP
                let new_pos = s.position + signed_qty;
                s.avg_price =
                    (s.avg_price * s.position.abs() + price * signed_qty.abs()) / new_pos.abs();
                s.position = new_pos;
            }
        }

        if s.last_mid > 0.0 {
            s.mark();
        }
    }

    /// Update the cached mid and recompute unrealized PnL against it.
    pub fn on_midprice(&self, mid: f64) {
        let mut s = self.state.lock().unwrap();
        s.last_mid = mid;
        s.mark();
    }

    /// Thread-safe snapshot; `equity = realized + unrealized`.
    pub fn snapshot(&self) -> PnlUpdate {
        let s = self.state.lock().unwrap();
        PnlUpdate {
            user_id: self.user_id as u32,
            realized: s.realized,
            unrealized: s.unrealized,
            position: s.position,
            avg_price: s.avg_price,
            equity: s.realized + s.unrealized,
        }
    }
}
