//! Output demultiplexer - the broadcaster thread's upstream.
//!
//! The engine's out-channel has exactly one consumer: this thread. Every
//! server message is copied to every subscriber's private SPSC channel, so
//! in-process strategies and the network fan-out observe the same stream
//! without racing each other for it. Forwarding is best-effort: a full
//! subscriber drops the message, never blocks the stream.

use crate::message::ServerMessage;
use crate::spsc::{self, Consumer, Producer};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub struct Demux {
    running: Arc<AtomicBool>,
    source: Option<Consumer<ServerMessage>>,
    taps: Vec<Producer<ServerMessage>>,
    thread: Option<JoinHandle<()>>,
}

impl Demux {
    pub fn new(source: Consumer<ServerMessage>) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            source: Some(source),
            taps: Vec::new(),
            thread: None,
        }
    }

    /// Open a subscriber channel. Must happen before `start()`.
    pub fn subscribe(&mut self, capacity: usize) -> Consumer<ServerMessage> {
        assert!(self.thread.is_none(), "subscribe before start()");
        let (tx, rx) = spsc::channel(capacity);
        self.taps.push(tx);
        rx
    }

    /// Spawn the forwarding thread.
    pub fn start(&mut self) {
        if self.thread.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let mut source = self.source.take().expect("demux already started");
        let mut taps = std::mem::take(&mut self.taps);

        let handle = thread::Builder::new()
            .name("broadcast".into())
            .spawn(move || {
                info!("broadcaster started ({} subscribers)", taps.len());
                let mut dropped = 0u64;
                while running.load(Ordering::Relaxed) {
                    let mut forwarded = false;
                    while let Some(msg) = source.pop() {
                        forwarded = true;
                        for tap in taps.iter_mut() {
                            if tap.push(msg).is_err() {
                                dropped += 1;
                            }
                        }
                    }
                    if !forwarded {
                        thread::sleep(Duration::from_micros(100));
                    }
                }
                if dropped > 0 {
                    warn!("lagging subscribers dropped {dropped} messages");
                }
                info!("broadcaster stopped");
            })
            .expect("spawn broadcast thread");
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

impl Drop for Demux {
    fn drop(&mut self) {
        self.stop();
    }
}
