use anyhow::Result;
use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tickmatch::{AppConfig, BsBot, Demux, MarketSimulator, MatchingServer, NetworkServer};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = AppConfig::default();

    info!("=== starting matching engine ===");
    let mut engine = MatchingServer::new(cfg.engine);
    let sim_handle = engine.register_producer();
    let bot_handle = engine.register_producer();
    let net_handle = engine.register_producer();

    let mut demux = Demux::new(engine.take_output());
    let bot_feed = demux.subscribe(cfg.engine.output_capacity);
    let net_feed = demux.subscribe(cfg.engine.output_capacity);

    engine.start();
    demux.start();

    info!("=== starting market simulator ===");
    let mut sim = MarketSimulator::new(cfg.sim, sim_handle);
    sim.start();

    info!("=== starting black-scholes market maker ===");
    let mut bot = BsBot::new(cfg.bot, bot_handle, bot_feed);
    bot.start();

    info!("=== starting tcp server on port {} ===", cfg.net.port);
    let mut net = NetworkServer::start(cfg.net, net_handle, net_feed)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&shutdown);
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;
    }

    info!("system ready; press ctrl-c to exit");
    while !shutdown.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(200));
    }

    info!("shutting down");
    bot.stop();
    sim.stop();
    net.stop();
    demux.stop();
    engine.stop();
    info!("clean shutdown");
    Ok(())
}
