//! Wire packet codec.
//!
//! First byte is always a type tag. HELO and STATUS are variable-length,
//! NUL-terminated text payloads bounded to a fixed maximum; DATA and
//! KEY-PRESS are fixed-size. All multi-byte integers are little-endian,
//! matching the rest of the stack's wire codecs.
//!
//! Modeled on the manual arrayvec-based packing style used for this
//! stack's other network framing (length-prefixed tag byte, scratch
//! buffer filled in place, no serde).

use arrayvec::ArrayVec;
use thiserror::Error;

use crate::{BlockIndex, MONO_BLOCK_SIZE, NAME_LEN, SHELO_STR_LEN, STEREO_BLOCK_SIZE};

/// Largest datagram this codec ever produces or accepts.
pub const MAX_DATAGRAM_SIZE: usize = 1200;

pub const PACKET_HELO: u8 = 1;
pub const PACKET_DATA: u8 = 2;
pub const PACKET_KEY_PRESS: u8 = 3;
pub const PACKET_STATUS: u8 = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("datagram too short for its declared type")]
    TooShort,
    #[error("unrecognized packet type tag {0}")]
    BadTag(u8),
    #[error("unsupported protocol version {0}")]
    BadVersion(u8),
    #[error("text field missing its NUL terminator")]
    Unterminated,
}

type Buf = ArrayVec<u8, MAX_DATAGRAM_SIZE>;

fn push_bounded_cstr(buf: &mut Buf, s: &str, max_len: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(max_len - 1);
    buf.try_extend_from_slice(&bytes[..n]).expect("within capacity");
    buf.push(0);
}

fn read_bounded_cstr(bytes: &[u8]) -> Result<&str, PacketError> {
    let nul = bytes.iter().position(|&b| b == 0).ok_or(PacketError::Unterminated)?;
    Ok(std::str::from_utf8(&bytes[..nul]).unwrap_or_default())
}

/// Client's opening request to join the room.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientHelo {
    pub version: u8,
    pub aio_latency: f32,
    pub db_adj: f32,
    pub name: String,
}

impl ClientHelo {
    pub fn encode(&self) -> Buf {
        let mut buf = Buf::new();
        buf.push(PACKET_HELO);
        buf.push(self.version);
        buf.try_extend_from_slice(&self.aio_latency.to_le_bytes()).unwrap();
        buf.try_extend_from_slice(&self.db_adj.to_le_bytes()).unwrap();
        push_bounded_cstr(&mut buf, &self.name, NAME_LEN);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < 10 {
            return Err(PacketError::TooShort);
        }
        if bytes[0] != PACKET_HELO {
            return Err(PacketError::BadTag(bytes[0]));
        }
        let version = bytes[1];
        let aio_latency = f32::from_le_bytes(bytes[2..6].try_into().unwrap());
        let db_adj = f32::from_le_bytes(bytes[6..10].try_into().unwrap());
        let name = read_bounded_cstr(&bytes[10..])?.to_string();
        Ok(Self { version, aio_latency, db_adj, name })
    }
}

/// Server's reply admitting a client, carrying its assigned slot id.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerHelo {
    pub client_id: u8,
    pub init_block_index: BlockIndex,
    pub help: String,
}

impl ServerHelo {
    pub fn encode(&self) -> Buf {
        let mut buf = Buf::new();
        buf.push(PACKET_HELO);
        buf.push(self.client_id);
        buf.try_extend_from_slice(&self.init_block_index.to_le_bytes()).unwrap();
        push_bounded_cstr(&mut buf, &self.help, SHELO_STR_LEN);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < 6 {
            return Err(PacketError::TooShort);
        }
        if bytes[0] != PACKET_HELO {
            return Err(PacketError::BadTag(bytes[0]));
        }
        let client_id = bytes[1];
        let init_block_index = u32::from_le_bytes(bytes[2..6].try_into().unwrap());
        let help = read_bounded_cstr(&bytes[6..])?.to_string();
        Ok(Self { client_id, init_block_index, help })
    }
}

/// One mono block of singer audio, fixed-size.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientData {
    pub client_id: u8,
    pub block_index: BlockIndex,
    pub play_block_index: BlockIndex,
    pub block: [f32; MONO_BLOCK_SIZE],
}

const CLIENT_DATA_LEN: usize = 1 + 1 + 4 + 4 + MONO_BLOCK_SIZE * 4;

impl ClientData {
    pub fn encode(&self) -> Buf {
        let mut buf = Buf::new();
        buf.push(PACKET_DATA);
        buf.push(self.client_id);
        buf.try_extend_from_slice(&self.block_index.to_le_bytes()).unwrap();
        buf.try_extend_from_slice(&self.play_block_index.to_le_bytes()).unwrap();
        for s in &self.block {
            buf.try_extend_from_slice(&s.to_le_bytes()).unwrap();
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() != CLIENT_DATA_LEN {
            return Err(PacketError::TooShort);
        }
        if bytes[0] != PACKET_DATA {
            return Err(PacketError::BadTag(bytes[0]));
        }
        let client_id = bytes[1];
        let block_index = u32::from_le_bytes(bytes[2..6].try_into().unwrap());
        let play_block_index = u32::from_le_bytes(bytes[6..10].try_into().unwrap());
        let mut block = [0f32; MONO_BLOCK_SIZE];
        for (i, chunk) in bytes[10..].chunks_exact(4).enumerate() {
            block[i] = f32::from_le_bytes(chunk.try_into().unwrap());
        }
        Ok(Self { client_id, block_index, play_block_index, block })
    }
}

/// One stereo mix block returned to a client, fixed-size.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerData {
    pub block_index: BlockIndex,
    pub block: Box<[f32; STEREO_BLOCK_SIZE]>,
}

const SERVER_DATA_LEN: usize = 1 + 4 + STEREO_BLOCK_SIZE * 4;

impl ServerData {
    pub fn encode(&self) -> Buf {
        let mut buf = Buf::new();
        buf.push(PACKET_DATA);
        buf.try_extend_from_slice(&self.block_index.to_le_bytes()).unwrap();
        for s in self.block.iter() {
            buf.try_extend_from_slice(&s.to_le_bytes()).unwrap();
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() != SERVER_DATA_LEN {
            return Err(PacketError::TooShort);
        }
        if bytes[0] != PACKET_DATA {
            return Err(PacketError::BadTag(bytes[0]));
        }
        let block_index = u32::from_le_bytes(bytes[1..5].try_into().unwrap());
        let mut block = Box::new([0f32; STEREO_BLOCK_SIZE]);
        for (i, chunk) in bytes[5..].chunks_exact(4).enumerate() {
            block[i] = f32::from_le_bytes(chunk.try_into().unwrap());
        }
        Ok(Self { block_index, block })
    }
}

/// Reorder (or reserved metronome) command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPress {
    pub client_id: u8,
    pub play_block_index: BlockIndex,
    pub key: u8,
}

const KEY_PRESS_LEN: usize = 1 + 1 + 4 + 1;

impl KeyPress {
    pub fn encode(&self) -> Buf {
        let mut buf = Buf::new();
        buf.push(PACKET_KEY_PRESS);
        buf.push(self.client_id);
        buf.try_extend_from_slice(&self.play_block_index.to_le_bytes()).unwrap();
        buf.push(self.key);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() != KEY_PRESS_LEN {
            return Err(PacketError::TooShort);
        }
        if bytes[0] != PACKET_KEY_PRESS {
            return Err(PacketError::BadTag(bytes[0]));
        }
        let client_id = bytes[1];
        let play_block_index = u32::from_le_bytes(bytes[2..6].try_into().unwrap());
        let key = bytes[6];
        Ok(Self { client_id, play_block_index, key })
    }
}

/// One page of a paginated status broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusStr {
    pub packets_cnt: u32,
    pub packet_index: u32,
    pub status_index: u32,
    pub text: String,
}

impl StatusStr {
    pub fn encode(&self) -> Buf {
        let mut buf = Buf::new();
        buf.push(PACKET_STATUS);
        buf.try_extend_from_slice(&self.packets_cnt.to_le_bytes()).unwrap();
        buf.try_extend_from_slice(&self.packet_index.to_le_bytes()).unwrap();
        buf.try_extend_from_slice(&self.status_index.to_le_bytes()).unwrap();
        push_bounded_cstr(&mut buf, &self.text, MAX_DATAGRAM_SIZE - buf.len() - 1);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < 13 {
            return Err(PacketError::TooShort);
        }
        if bytes[0] != PACKET_STATUS {
            return Err(PacketError::BadTag(bytes[0]));
        }
        let packets_cnt = u32::from_le_bytes(bytes[1..5].try_into().unwrap());
        let packet_index = u32::from_le_bytes(bytes[5..9].try_into().unwrap());
        let status_index = u32::from_le_bytes(bytes[9..13].try_into().unwrap());
        let text = read_bounded_cstr(&bytes[13..])?.to_string();
        Ok(Self { packets_cnt, packet_index, status_index, text })
    }
}

/// Peek the type tag without committing to a full decode.
pub fn peek_tag(bytes: &[u8]) -> Option<u8> {
    bytes.first().copied()
}
