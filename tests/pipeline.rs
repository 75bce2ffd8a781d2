//! Threaded end-to-end tests: producer handles -> engine thread ->
//! broadcaster -> subscribers, plus the TCP fan-out.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tickmatch::codec;
use tickmatch::message::{msg_type, ClientMessage, NewOrder, ServerMessage, Side};
use tickmatch::spsc::Consumer;
use tickmatch::{Demux, EngineConfig, MatchingServer, NetConfig, NetworkServer};

const DEADLINE: Duration = Duration::from_secs(5);

fn new_order(user: u64, side: Side, price: f64, qty: u64) -> NewOrder {
    NewOrder { user_id: user, side, price, quantity: qty, instrument_id: 1 }
}

/// Drain the subscription until `pred` matches or the deadline passes.
fn wait_for<F>(feed: &mut Consumer<ServerMessage>, mut pred: F) -> Option<ServerMessage>
where
    F: FnMut(&ServerMessage) -> bool,
{
    let deadline = Instant::now() + DEADLINE;
    while Instant::now() < deadline {
        match feed.pop() {
            Some(msg) if pred(&msg) => return Some(msg),
            Some(_) => {}
            None => thread::sleep(Duration::from_millis(1)),
        }
    }
    None
}

#[test]
fn order_lifecycle_reaches_subscribers() {
    let mut engine = MatchingServer::new(EngineConfig::default());
    let mut producer = engine.register_producer();
    let mut demux = Demux::new(engine.take_output());
    let mut feed = demux.subscribe(4096);
    engine.start();
    demux.start();

    assert!(producer.submit_new_order(new_order(2, Side::Sell, 100.0, 10)));

    let ack = wait_for(&mut feed, |m| matches!(m, ServerMessage::Ack(_))).expect("rest ack");
    let rested_id = match ack {
        ServerMessage::Ack(a) => {
            assert!(a.ok);
            assert_eq!(a.req_type, msg_type::NEW_ORDER);
            assert_ne!(a.order_id, 0);
            a.order_id
        }
        _ => unreachable!(),
    };
    wait_for(&mut feed, |m| matches!(m, ServerMessage::Tob(t) if t.has_ask)).expect("tob");

    // crossing buy: trade first, then its ack with no residual
    assert!(producer.submit_new_order(new_order(1, Side::Buy, 100.0, 10)));
    let trade = wait_for(&mut feed, |m| matches!(m, ServerMessage::Trade(_))).expect("trade");
    match trade {
        ServerMessage::Trade(t) => {
            assert_eq!(t.sell_order_id, rested_id);
            assert_eq!(t.quantity, 10);
            assert_eq!(t.price, 100.0);
        }
        _ => unreachable!(),
    }
    wait_for(
        &mut feed,
        |m| matches!(m, ServerMessage::Ack(a) if a.req_type == msg_type::NEW_ORDER && a.order_id == 0),
    )
    .expect("full-fill ack");

    // cancel of the consumed id is a miss surfaced via the ack status
    assert!(producer.submit_cancel(rested_id));
    let ack = wait_for(&mut feed, |m| matches!(m, ServerMessage::Ack(a) if a.req_type == msg_type::CANCEL))
        .expect("cancel ack");
    match ack {
        ServerMessage::Ack(a) => assert!(!a.ok),
        _ => unreachable!(),
    }

    demux.stop();
    engine.stop();
}

#[test]
fn per_producer_fifo_is_preserved() {
    let mut engine = MatchingServer::new(EngineConfig::default());
    let mut producer = engine.register_producer();
    let mut demux = Demux::new(engine.take_output());
    let mut feed = demux.subscribe(8192);
    engine.start();
    demux.start();

    // non-crossing rests at distinct prices; acks must come back in
    // submission order with strictly increasing assigned ids
    for i in 0..100u64 {
        let price = 90.0 - i as f64 * 0.01;
        while !producer.submit_new_order(new_order(1, Side::Buy, price, 1)) {
            thread::sleep(Duration::from_millis(1));
        }
    }

    let mut last_id = 0u64;
    for _ in 0..100 {
        let ack = wait_for(&mut feed, |m| matches!(m, ServerMessage::Ack(_))).expect("ack");
        match ack {
            ServerMessage::Ack(a) => {
                assert!(a.order_id > last_id, "acks out of order");
                last_id = a.order_id;
            }
            _ => unreachable!(),
        }
    }

    demux.stop();
    engine.stop();
}

#[test]
fn tracked_user_round_trip_pnl() {
    let mut engine = MatchingServer::new(EngineConfig::default());
    let mut producer = engine.register_producer();
    let pnl = engine.pnl();
    let mut demux = Demux::new(engine.take_output());
    let mut feed = demux.subscribe(4096);
    engine.start();
    demux.start();

    // tracked user (1) buys 10 @ 100 from user 2, then sells 10 @ 105 to user 2
    producer.submit_new_order(new_order(2, Side::Sell, 100.0, 10));
    producer.submit_new_order(new_order(1, Side::Buy, 100.0, 10));
    producer.submit_new_order(new_order(2, Side::Buy, 105.0, 10));
    producer.submit_new_order(new_order(1, Side::Sell, 105.0, 10));

    // wait for the second fill to be attributed
    let deadline = Instant::now() + DEADLINE;
    loop {
        let snap = pnl.snapshot();
        if snap.realized == 50.0 || Instant::now() >= deadline {
            assert_eq!(snap.realized, 50.0);
            assert_eq!(snap.position, 0.0);
            assert_eq!(snap.avg_price, 0.0);
            assert_eq!(snap.unrealized, 0.0);
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }

    // PNL_UPDATE frames for the tracked user made it to subscribers
    wait_for(&mut feed, |m| matches!(m, ServerMessage::Pnl(p) if p.user_id == 1)).expect("pnl");

    demux.stop();
    engine.stop();
}

#[test]
fn open_position_marked_to_mid() {
    let mut engine = MatchingServer::new(EngineConfig::default());
    let mut producer = engine.register_producer();
    let pnl = engine.pnl();
    let mut demux = Demux::new(engine.take_output());
    let _feed = demux.subscribe(4096);
    engine.start();
    demux.start();

    // tracked user buys 4 @ 50 and stays long
    producer.submit_new_order(new_order(2, Side::Sell, 50.0, 4));
    producer.submit_new_order(new_order(1, Side::Buy, 50.0, 4));
    // standing quotes put the mid at 52
    producer.submit_new_order(new_order(2, Side::Buy, 51.0, 1));
    producer.submit_new_order(new_order(2, Side::Sell, 53.0, 1));

    let deadline = Instant::now() + DEADLINE;
    loop {
        let snap = pnl.snapshot();
        if snap.unrealized == 8.0 || Instant::now() >= deadline {
            assert_eq!(snap.unrealized, 8.0);
            assert_eq!(snap.realized, 0.0);
            assert_eq!(snap.equity, 8.0);
            assert_eq!(snap.position, 4.0);
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }

    demux.stop();
    engine.stop();
}

#[test]
fn tcp_round_trip() {
    let mut engine = MatchingServer::new(EngineConfig::default());
    let net_handle = engine.register_producer();
    let mut demux = Demux::new(engine.take_output());
    let net_feed = demux.subscribe(4096);
    engine.start();
    demux.start();

    let cfg = NetConfig { port: 0, ..NetConfig::default() };
    let mut net = NetworkServer::start(cfg, net_handle, net_feed).expect("start net");
    let addr = net.local_addr();

    let mut client = TcpStream::connect(addr).expect("connect");
    client.set_read_timeout(Some(DEADLINE)).unwrap();

    // send a framed NEW_ORDER over the wire
    let mut framed = BytesMut::new();
    codec::encode_client_message(
        &ClientMessage::New(new_order(7, Side::Buy, 99.5, 5)),
        &mut framed,
    );
    client.write_all(&framed).expect("send order");

    // read frames until the ack arrives
    let mut recv = BytesMut::new();
    let mut tmp = [0u8; 4096];
    let deadline = Instant::now() + DEADLINE;
    let mut saw_ack = false;
    let mut saw_tob = false;
    'outer: while Instant::now() < deadline {
        let n = client.read(&mut tmp).expect("read");
        if n == 0 {
            break;
        }
        recv.extend_from_slice(&tmp[..n]);
        while let Some(payload) = codec::extract_frame(&mut recv).expect("frame") {
            match payload[0] {
                msg_type::ACK => {
                    assert_eq!(payload[1], 0, "ack status ok");
                    assert_eq!(payload[2], msg_type::NEW_ORDER);
                    saw_ack = true;
                }
                msg_type::TOB => saw_tob = true,
                _ => {}
            }
            if saw_ack && saw_tob {
                break 'outer;
            }
        }
    }
    assert!(saw_ack, "no ACK frame received over TCP");
    assert!(saw_tob, "no TOB frame received over TCP");

    net.stop();
    demux.stop();
    engine.stop();
}
