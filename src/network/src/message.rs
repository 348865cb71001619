//! Wire messages and framing
//!
//! Every frame is a 4-byte little-endian payload length, a 1-byte type
//! tag, then a bincode payload. Tags unknown to this node are skipped so
//! protocol extensions never break old peers; a known tag with an
//! undecodable payload is a protocol violation.

use crate::error::{NetError, Result};
use bytes::{Buf, BufMut, BytesMut};
use lattice_types::{Block, Hash256};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio_util::codec::{Decoder, Encoder};

pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on a frame payload; larger lengths are treated as garbage.
pub const MAX_FRAME_LEN: u32 = 8 * 1024 * 1024;

const LEN_WIDTH: usize = 4;
const TAG_WIDTH: usize = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionPayload {
    pub protocol_version: u32,
    /// Random per-node identity, the key for duplicate-connection checks.
    pub identity: u64,
    pub best_height: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    Version(VersionPayload),
    VerAck,
    Ping(u64),
    Pong(u64),
    Block(Block),
    GetBlock(Hash256),
    LevelSet(Vec<Block>),
    GetLevelSet(Hash256),
    GetAddr,
    Addr(Vec<SocketAddr>),
}

impl Message {
    fn tag(&self) -> u8 {
        match self {
            Message::Version(_) => 0,
            Message::VerAck => 1,
            Message::Ping(_) => 2,
            Message::Pong(_) => 3,
            Message::Block(_) => 4,
            Message::GetBlock(_) => 5,
            Message::LevelSet(_) => 6,
            Message::GetLevelSet(_) => 7,
            Message::GetAddr => 8,
            Message::Addr(_) => 9,
        }
    }

    fn payload(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            Message::Version(p) => bincode::serialize(p)?,
            Message::VerAck | Message::GetAddr => Vec::new(),
            Message::Ping(n) | Message::Pong(n) => bincode::serialize(n)?,
            Message::Block(b) => bincode::serialize(b)?,
            Message::GetBlock(h) | Message::GetLevelSet(h) => bincode::serialize(h)?,
            Message::LevelSet(blocks) => bincode::serialize(blocks)?,
            Message::Addr(addrs) => bincode::serialize(addrs)?,
        };
        Ok(bytes)
    }

    fn decode(tag: u8, payload: &[u8]) -> Result<Option<Message>> {
        let msg = match tag {
            0 => Message::Version(bincode::deserialize(payload)?),
            1 => Message::VerAck,
            2 => Message::Ping(bincode::deserialize(payload)?),
            3 => Message::Pong(bincode::deserialize(payload)?),
            4 => Message::Block(bincode::deserialize(payload)?),
            5 => Message::GetBlock(bincode::deserialize(payload)?),
            6 => Message::LevelSet(bincode::deserialize(payload)?),
            7 => Message::GetLevelSet(bincode::deserialize(payload)?),
            8 => Message::GetAddr,
            9 => Message::Addr(bincode::deserialize(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(msg))
    }
}

#[derive(Debug, Default)]
pub struct MessageCodec;

impl Encoder<Message> for MessageCodec {
    type Error = NetError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<()> {
        let payload = msg.payload()?;
        dst.reserve(LEN_WIDTH + TAG_WIDTH + payload.len());
        dst.put_u32_le(payload.len() as u32);
        dst.put_u8(msg.tag());
        dst.put_slice(&payload);
        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = NetError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        // Loop so unknown-tag frames are consumed and skipped in place.
        loop {
            if src.len() < LEN_WIDTH + TAG_WIDTH {
                return Ok(None);
            }
            let len = u32::from_le_bytes(src[..LEN_WIDTH].try_into().expect("4 bytes"));
            if len > MAX_FRAME_LEN {
                return Err(NetError::Protocol(format!("frame length {len} too large")));
            }
            let frame_len = LEN_WIDTH + TAG_WIDTH + len as usize;
            if src.len() < frame_len {
                src.reserve(frame_len - src.len());
                return Ok(None);
            }

            let tag = src[LEN_WIDTH];
            let frame = src.split_to(frame_len);
            let payload = &frame[LEN_WIDTH + TAG_WIDTH..];

            match Message::decode(tag, payload)? {
                Some(msg) => return Ok(Some(msg)),
                None => {
                    tracing::debug!(tag, len, "skipping unknown message type");
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: Message) -> Message {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::new();
        codec.encode(msg, &mut buf).unwrap();
        codec.decode(&mut buf).unwrap().unwrap()
    }

    #[test]
    fn version_round_trip() {
        let msg = round_trip(Message::Version(VersionPayload {
            protocol_version: PROTOCOL_VERSION,
            identity: 42,
            best_height: 7,
        }));
        match msg {
            Message::Version(p) => {
                assert_eq!(p.identity, 42);
                assert_eq!(p.best_height, 7);
            }
            other => panic!("wrong message: {other:?}"),
        }
    }

    #[test]
    fn unknown_tag_is_skipped_not_fatal() {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::new();

        // Unknown frame, then a valid ping.
        buf.put_u32_le(3);
        buf.put_u8(200);
        buf.put_slice(b"xyz");
        codec.encode(Message::Ping(9), &mut buf).unwrap();

        match codec.decode(&mut buf).unwrap() {
            Some(Message::Ping(9)) => {}
            other => panic!("expected ping, got {other:?}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let mut codec = MessageCodec;
        let mut full = BytesMut::new();
        codec.encode(Message::GetAddr, &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..3]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn garbage_payload_is_a_protocol_violation() {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::new();
        buf.put_u32_le(2);
        buf.put_u8(0); // Version tag with a 2-byte payload
        buf.put_slice(b"no");
        assert!(matches!(
            codec.decode(&mut buf),
            Err(NetError::Protocol(_))
        ));
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::new();
        buf.put_u32_le(MAX_FRAME_LEN + 1);
        buf.put_u8(2);
        assert!(matches!(codec.decode(&mut buf), Err(NetError::Protocol(_))));
    }
}
