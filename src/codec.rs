//! Wire codec - length-prefixed binary frames.
//!
//! Every frame is a 4-byte big-endian length followed by the payload. All
//! multi-byte integers are big-endian; doubles travel as their IEEE-754 bit
//! pattern, also big-endian. Frames claiming more than [`MAX_FRAME_LEN`]
//! bytes are rejected and the connection torn down.

use crate::message::{
    msg_type, Ack, CancelOrder, ClientMessage, L2Update, NewOrder, PnlUpdate, ServerMessage, Side,
    TopOfBook, Trade,
};
use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Sanity cap on a single frame's payload length.
pub const MAX_FRAME_LEN: usize = 10 * 1024 * 1024;

/// Length-prefix header size.
pub const HEADER_LEN: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame length {0} exceeds {MAX_FRAME_LEN} byte cap")]
    Oversized(usize),
    #[error("payload truncated: need {expected} bytes, have {got}")]
    Truncated { expected: usize, got: usize },
    #[error("unknown message type {0}")]
    UnknownType(u8),
    #[error("invalid side {0}")]
    InvalidSide(u8),
}

/// Split one complete frame payload off the front of `buf`. Returns
/// `Ok(None)` while the frame is still partial. An oversized length is an
/// error; the caller should drop the connection.
pub fn extract_frame(buf: &mut BytesMut) -> Result<Option<BytesMut>, FrameError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::Oversized(len));
    }
    if buf.len() < HEADER_LEN + len {
        return Ok(None);
    }
    buf.advance(HEADER_LEN);
    Ok(Some(buf.split_to(len)))
}

#[inline]
fn need(buf: &impl Buf, n: usize) -> Result<(), FrameError> {
    if buf.remaining() < n {
        Err(FrameError::Truncated { expected: n, got: buf.remaining() })
    } else {
        Ok(())
    }
}

/// Decode a client payload (the bytes after the length prefix).
///
/// The wire does not carry an instrument id; orders arriving over TCP get
/// instrument 0.
pub fn decode_client_payload(payload: &[u8]) -> Result<ClientMessage, FrameError> {
    let mut buf = payload;
    need(&buf, 1)?;
    let ty = buf.get_u8();
    match ty {
        msg_type::NEW_ORDER => {
            need(&buf, 8 + 1 + 8 + 8)?;
            let user_id = buf.get_u64();
            let side_raw = buf.get_u8();
            let side = Side::from_u8(side_raw).ok_or(FrameError::InvalidSide(side_raw))?;
            let price = buf.get_f64();
            let quantity = buf.get_u64();
            Ok(ClientMessage::New(NewOrder { user_id, side, price, quantity, instrument_id: 0 }))
        }
        msg_type::CANCEL => {
            need(&buf, 8)?;
            let order_id = buf.get_u64();
            Ok(ClientMessage::Cancel(CancelOrder { order_id }))
        }
        other => Err(FrameError::UnknownType(other)),
    }
}

/// Append one framed client message to `dst`.
pub fn encode_client_message(msg: &ClientMessage, dst: &mut BytesMut) {
    let start = begin_frame(dst);
    match msg {
        ClientMessage::New(m) => {
            dst.put_u8(msg_type::NEW_ORDER);
            dst.put_u64(m.user_id);
            dst.put_u8(m.side.as_u8());
            dst.put_f64(m.price);
            dst.put_u64(m.quantity);
        }
        ClientMessage::Cancel(c) => {
            dst.put_u8(msg_type::CANCEL);
            dst.put_u64(c.order_id);
        }
    }
    end_frame(dst, start);
}

/// Append one framed server message to `dst`.
pub fn encode_server_message(msg: &ServerMessage, dst: &mut BytesMut) {
    let start = begin_frame(dst);
    match msg {
        ServerMessage::Trade(t) => encode_trade(t, dst),
        ServerMessage::Ack(a) => encode_ack(a, dst),
        ServerMessage::Tob(t) => encode_tob(t, dst),
        ServerMessage::L2(l) => encode_l2(l, dst),
        ServerMessage::Pnl(p) => encode_pnl(p, dst),
    }
    end_frame(dst, start);
}

#[inline]
fn begin_frame(dst: &mut BytesMut) -> usize {
    let start = dst.len();
    dst.put_u32(0); // length backfilled by end_frame
    start
}

#[inline]
fn end_frame(dst: &mut BytesMut, start: usize) {
    let len = (dst.len() - start - HEADER_LEN) as u32;
    dst[start..start + HEADER_LEN].copy_from_slice(&len.to_be_bytes());
}

fn encode_trade(t: &Trade, dst: &mut BytesMut) {
    dst.put_u8(msg_type::TRADE);
    dst.put_u64(t.trade_id);
    dst.put_u64(t.buy_order_id);
    dst.put_u64(t.buy_user_id);
    dst.put_u64(t.sell_order_id);
    dst.put_u64(t.sell_user_id);
    dst.put_f64(t.price);
    dst.put_u64(t.quantity);
}

fn encode_ack(a: &Ack, dst: &mut BytesMut) {
    dst.put_u8(msg_type::ACK);
    dst.put_u8(if a.ok { 0 } else { 1 });
    dst.put_u8(a.req_type);
    dst.put_u64(a.order_id);
}

fn encode_tob(t: &TopOfBook, dst: &mut BytesMut) {
    dst.put_u8(msg_type::TOB);
    dst.put_f64(if t.has_bid { t.bid_price } else { 0.0 });
    dst.put_u64(if t.has_bid { t.bid_quantity } else { 0 });
    dst.put_f64(if t.has_ask { t.ask_price } else { 0.0 });
    dst.put_u64(if t.has_ask { t.ask_quantity } else { 0 });
}

fn encode_l2(l: &L2Update, dst: &mut BytesMut) {
    dst.put_u8(msg_type::L2_UPDATE);
    dst.put_u8(l.side.as_u8());
    dst.put_f64(l.price);
    dst.put_u64(l.quantity);
}

fn encode_pnl(p: &PnlUpdate, dst: &mut BytesMut) {
    dst.put_u8(msg_type::PNL_UPDATE);
    dst.put_u32(p.user_id);
    dst.put_f64(p.realized);
    dst.put_f64(p.unrealized);
    dst.put_f64(p.position);
    dst.put_f64(p.avg_price);
    dst.put_f64(p.equity);
}
