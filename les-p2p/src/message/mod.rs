// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

//! Messages carried in RLPx frames. A frame body is `RLP(msg-id) || RLP(payload)`.

use bytes::Bytes;

use les_base::encoding::{DecodeError, RlpDecode, RlpEncode, RlpReader, RlpWrite};

pub use {p2p::*, status::*};

mod p2p;
mod status;

pub const P2P_HELLO: u64 = 0x00;
pub const P2P_DISCONNECT: u64 = 0x01;
pub const P2P_PING: u64 = 0x02;
pub const P2P_PONG: u64 = 0x03;

/// First id after the base protocol range, where the negotiated sub-protocol starts.
pub const SUB_PROTOCOL_OFFSET: u64 = 0x10;

pub const LES_STATUS: u64 = SUB_PROTOCOL_OFFSET;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello(Hello),
    Disconnect(P2pDisconnect),
    Ping,
    Pong,
    Status(Status),

    /// Any other message; `payload` is still RLP encoded.
    Other { id: u64, payload: Bytes },
}

impl Message {
    pub fn id(&self) -> u64 {
        match self {
            Self::Hello(_) => P2P_HELLO,
            Self::Disconnect(_) => P2P_DISCONNECT,
            Self::Ping => P2P_PING,
            Self::Pong => P2P_PONG,
            Self::Status(_) => LES_STATUS,
            Self::Other { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello(_) => "Hello",
            Self::Disconnect(_) => "Disconnect",
            Self::Ping => "Ping",
            Self::Pong => "Pong",
            Self::Status(_) => "Status",
            Self::Other { .. } => "Other",
        }
    }

    #[inline]
    pub fn is_p2p(&self) -> bool {
        self.id() < SUB_PROTOCOL_OFFSET
    }

    /// Frame body for this message.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u64(self.id());
        match self {
            Self::Hello(hello) => hello.rlp_encode(&mut buf),
            Self::Disconnect(reason) => reason.rlp_encode(&mut buf),
            Self::Ping | Self::Pong => buf.write_empty_list(),
            Self::Status(status) => status.rlp_encode(&mut buf),
            Self::Other { payload, .. } => buf.write_raw(payload),
        }
        buf
    }

    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let mut r = RlpReader::new(body);
        let id = r.read_u64()?;
        let message = match id {
            P2P_HELLO => Self::Hello(Hello::rlp_decode(&mut r)?),
            P2P_DISCONNECT => Self::Disconnect(P2pDisconnect::rlp_decode(&mut r)?),
            P2P_PING | P2P_PONG => {
                if !r.is_empty() {
                    r.skip_item()?;
                }
                if id == P2P_PING { Self::Ping } else { Self::Pong }
            }
            LES_STATUS => Self::Status(Status::rlp_decode(&mut r)?),
            _ => {
                let payload = Bytes::copy_from_slice(r.rest());
                return Ok(Self::Other { id, payload });
            }
        };

        r.finish()?;
        Ok(message)
    }
}
