//! Component configuration. Everything runs from built-in defaults - there
//! are no flags, environment variables or config files - but every knob the
//! components care about lives here rather than in compile-time constants.

use std::time::Duration;

/// Matching engine configuration.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Capacity of each producer's input channel (rounded up to a power of two).
    pub input_capacity: usize,
    /// Capacity of the engine output channel.
    pub output_capacity: usize,
    /// Resting-order pool capacity; exhaustion is fatal.
    pub pool_capacity: u32,
    /// User whose PnL is streamed for the UI.
    pub tracked_user_id: u64,
    /// User id the market-making bot trades under.
    pub bot_user_id: u64,
    /// Pin the engine thread to this core if set.
    pub pin_core: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input_capacity: 4096,
            output_capacity: 4096,
            pool_capacity: 1 << 20,
            tracked_user_id: 1,
            bot_user_id: 9999,
            pin_core: None,
        }
    }
}

/// Market simulator configuration. The price follows a mean-reverting
/// process on the log price, quantized to `tick`.
#[derive(Clone, Copy, Debug)]
pub struct SimConfig {
    pub user_id: u64,
    pub instrument_id: u32,
    /// Starting price.
    pub s0: f64,
    /// Annualized-ish volatility of the log process.
    pub sigma: f64,
    /// Step length in seconds; also the pacing sleep.
    pub dt: f64,
    pub tick: f64,
    /// Level the log price reverts towards.
    pub mean_level: f64,
    /// Mean-reversion speed.
    pub kappa: f64,
    /// Fixed RNG seed for reproducible flow; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            user_id: 0,
            instrument_id: 1,
            s0: 100.0,
            sigma: 0.20,
            dt: 0.15,
            tick: 0.01,
            mean_level: 100.0,
            kappa: 1.0,
            seed: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionType {
    Call,
    Put,
}

/// Black–Scholes market-maker configuration.
#[derive(Clone, Copy, Debug)]
pub struct BotConfig {
    pub user_id: u64,
    pub underlying_instrument: u32,
    pub option_instrument: u32,
    pub opt_type: OptionType,
    pub strike: f64,
    /// Time to expiry in seconds.
    pub expiry_seconds: f64,
    /// Risk-free rate (annualized).
    pub r: f64,
    /// Initial implied volatility (annualized); mutable at runtime.
    pub iv: f64,
    /// Absolute quoted spread around theoretical value.
    pub spread: f64,
    /// Per-leg quote size.
    pub qty: f64,
    /// Net delta the bot tolerates before hedging.
    pub hedge_tolerance: f64,
    pub min_price: f64,
    pub max_price: f64,
    /// How often quotes are refreshed.
    pub update_interval: Duration,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            user_id: 9999,
            underlying_instrument: 1,
            option_instrument: 2,
            opt_type: OptionType::Call,
            strike: 100.0,
            expiry_seconds: 3600.0 * 24.0,
            r: 0.0,
            iv: 0.20,
            spread: 0.5,
            qty: 5.0,
            hedge_tolerance: 0.5,
            min_price: 0.0001,
            max_price: 1e7,
            update_interval: Duration::from_millis(200),
        }
    }
}

/// TCP fan-out configuration.
#[derive(Clone, Copy, Debug)]
pub struct NetConfig {
    pub port: u16,
    /// Per-client send buffer cap; a client lagging past this is dropped.
    pub max_send_buffer: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self { port: 9001, max_send_buffer: 8 << 20 }
    }
}

/// Everything the entry point starts.
#[derive(Clone, Copy, Debug, Default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub sim: SimConfig,
    pub bot: BotConfig,
    pub net: NetConfig,
}
