//! TCP fan-out - framed order entry in, framed market data out.
//!
//! One worker thread services every connection with non-blocking sockets:
//! accept, read and deframe client messages into the engine, drain the
//! broadcast subscription, and write the encoded stream to every client
//! with partial-write handling. A malformed frame is logged and dropped;
//! an oversized frame or a client lagging past its send-buffer cap costs
//! the connection.

use crate::codec;
use crate::config::NetConfig;
use crate::engine::ClientHandle;
use crate::message::{ClientMessage, ServerMessage};
use crate::spsc::Consumer;
use anyhow::Context;
use bytes::{Buf, BytesMut};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct ClientConn {
    stream: TcpStream,
    peer: String,
    recv: BytesMut,
    send: BytesMut,
}

pub struct NetworkServer {
    running: Arc<AtomicBool>,
    local_addr: std::net::SocketAddr,
    thread: Option<JoinHandle<()>>,
}

impl NetworkServer {
    /// Bind, listen and spawn the worker thread.
    pub fn start(
        cfg: NetConfig,
        engine: ClientHandle,
        feed: Consumer<ServerMessage>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", cfg.port))
            .with_context(|| format!("bind 0.0.0.0:{}", cfg.port))?;
        listener.set_nonblocking(true).context("set listener non-blocking")?;
        let local_addr = listener.local_addr().context("local_addr")?;
        info!("listening on {local_addr}");

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name("net".into())
            .spawn(move || run_loop(cfg, listener, engine, feed, flag))
            .context("spawn net thread")?;

        Ok(Self { running, local_addr, thread: Some(thread) })
    }

    /// Address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close all clients and join the worker.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for NetworkServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    cfg: NetConfig,
    listener: TcpListener,
    mut engine: ClientHandle,
    mut feed: Consumer<ServerMessage>,
    running: Arc<AtomicBool>,
) {
    let mut clients: HashMap<u64, ClientConn> = HashMap::new();
    let mut next_id = 0u64;
    let mut frame = BytesMut::with_capacity(256);

    while running.load(Ordering::Relaxed) {
        let mut busy = false;
        let mut dead: Vec<u64> = Vec::new();

        // accept as many pending connections as there are
        loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    stream.set_nonblocking(true).ok();
                    stream.set_nodelay(true).ok();
                    info!("client connected: {addr}");
                    clients.insert(
                        next_id,
                        ClientConn {
                            stream,
                            peer: addr.to_string(),
                            recv: BytesMut::with_capacity(4096),
                            send: BytesMut::with_capacity(4096),
                        },
                    );
                    next_id += 1;
                    busy = true;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept failed: {e}");
                    break;
                }
            }
        }

        // read order entry from every client
        for (&id, conn) in clients.iter_mut() {
            if read_client(conn, &mut engine) {
                busy = true;
            } else {
                dead.push(id);
            }
        }

        // broadcast: encode each message once, append to every send buffer
        while let Some(msg) = feed.pop() {
            busy = true;
            frame.clear();
            codec::encode_server_message(&msg, &mut frame);
            for (&id, conn) in clients.iter_mut() {
                if conn.send.len() + frame.len() > cfg.max_send_buffer {
                    warn!("client {} lagging past {} bytes, dropping", conn.peer, cfg.max_send_buffer);
                    dead.push(id);
                    continue;
                }
                conn.send.extend_from_slice(&frame);
            }
        }

        // flush what the sockets will take
        for (&id, conn) in clients.iter_mut() {
            if !flush_client(conn) {
                dead.push(id);
            } else if !conn.send.is_empty() {
                busy = true;
            }
        }

        dead.sort_unstable();
        dead.dedup();
        for id in dead {
            if let Some(conn) = clients.remove(&id) {
                info!("client disconnected: {}", conn.peer);
            }
        }

        if !busy {
            thread::sleep(Duration::from_millis(1));
        }
    }

    info!("network server stopped ({} clients closed)", clients.len());
}

/// Read everything available from one client and feed complete frames to the
/// engine. Returns `false` when the connection should be dropped.
fn read_client(conn: &mut ClientConn, engine: &mut ClientHandle) -> bool {
    let mut tmp = [0u8; 4096];
    loop {
        match conn.stream.read(&mut tmp) {
            Ok(0) => return false,
            Ok(n) => {
                conn.recv.extend_from_slice(&tmp[..n]);
                loop {
                    match codec::extract_frame(&mut conn.recv) {
                        Ok(Some(payload)) => dispatch_payload(&payload, &conn.peer, engine),
                        Ok(None) => break,
                        Err(e) => {
                            warn!("closing {}: {e}", conn.peer);
                            return false;
                        }
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return true,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("read from {} failed: {e}", conn.peer);
                return false;
            }
        }
    }
}

fn dispatch_payload(payload: &[u8], peer: &str, engine: &mut ClientHandle) {
    match codec::decode_client_payload(payload) {
        Ok(ClientMessage::New(m)) => {
            if !engine.submit_new_order(m) {
                warn!("engine input full; dropping order from {peer}");
            }
        }
        Ok(ClientMessage::Cancel(c)) => {
            if !engine.submit_cancel(c.order_id) {
                warn!("engine input full; dropping cancel from {peer}");
            }
        }
        // malformed frame: drop it, keep the connection
        Err(e) => warn!("bad frame from {peer}: {e}"),
    }
}

/// Write as much pending output as the socket accepts. Returns `false` when
/// the connection should be dropped.
fn flush_client(conn: &mut ClientConn) -> bool {
    while !conn.send.is_empty() {
        match conn.stream.write(&conn.send) {
            Ok(0) => return false,
            Ok(n) => conn.send.advance(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return true,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("write to {} failed: {e}", conn.peer);
                return false;
            }
        }
    }
    true
}
