//! # tickmatch
//!
//! An in-process electronic trading platform: a price-time priority limit
//! order book served by a single-threaded matching engine, fed by producer
//! strategies over bounded SPSC channels, with PnL attribution and a framed
//! TCP fan-out for market-data and order-entry clients.
//!
//! ## Design principles
//!
//! - **Single-writer**: one thread owns the order book, the attribution map
//!   and both PnL engines exclusively (no locks in the matching path)
//! - **O(1) operations**: rest, cancel and per-fill work are constant time
//!   via a pool-backed intrusive FIFO per price level and an order-id index
//! - **Bounded everything**: SPSC rings, batch sizes and the order pool are
//!   fixed at construction; backpressure is explicit, telemetry best-effort
//!
//! ## Architecture
//!
//! ```text
//! [Market Sim] --\
//! [BS Bot]     ---> [SPSC in-channels] --> [Engine Thread] --> [SPSC out]
//! [TCP Decode] --/                                                 |
//!                                                           [Broadcaster]
//!                                                            /         \
//!                                                    [BS Bot feed] [TCP clients]
//! ```

pub mod arena;
pub mod bot;
pub mod bs;
pub mod codec;
pub mod config;
pub mod demux;
pub mod engine;
pub mod message;
pub mod net;
pub mod order_book;
pub mod pnl;
pub mod price_level;
pub mod sim;
pub mod spsc;

// Re-exports for convenience
pub use arena::{OrderNode, OrderPool, NULL_INDEX};
pub use bot::BsBot;
pub use config::{AppConfig, BotConfig, EngineConfig, NetConfig, OptionType, SimConfig};
pub use demux::Demux;
pub use engine::{ClientHandle, MatchingServer, BATCH_SIZE};
pub use message::{
    Ack, CancelOrder, ClientMessage, L2Update, NewOrder, Order, PnlUpdate, ServerMessage, Side,
    TopOfBook, Trade,
};
pub use net::NetworkServer;
pub use order_book::OrderBook;
pub use pnl::PnlEngine;
pub use price_level::PriceLevel;
pub use sim::MarketSimulator;
