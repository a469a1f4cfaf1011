// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use les_base::encoding::{DecodeError, RlpDecode, RlpEncode, RlpReader, RlpWrite};
use les_base::UInt512;

pub const P2P_VERSION: u64 = 0x03;

/// A sub-protocol name and version, e.g. `les/2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub version: u32,
}

impl Capability {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self { name: name.into(), version }
    }
}

impl Display for Capability {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

impl RlpEncode for Capability {
    fn rlp_encode<W: RlpWrite>(&self, w: &mut W) {
        w.write_list(|buf| {
            buf.write_string(self.name.as_bytes());
            buf.write_u64(self.version as u64);
        });
    }
}

impl RlpDecode for Capability {
    fn rlp_decode(r: &mut RlpReader<'_>) -> Result<Self, DecodeError> {
        let mut list = r.read_list()?;
        let name = list.read_utf8()?;
        let version = list.read_u32()?;
        Ok(Self { name, version })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub p2p_version: u64,
    pub client_id: String,
    pub capabilities: Vec<Capability>,
    pub listen_port: u16,
    pub node_id: UInt512,
}

impl Hello {
    pub fn has_capability(&self, capability: &Capability) -> bool {
        self.capabilities.iter().any(|cap| cap == capability)
    }
}

impl RlpEncode for Hello {
    fn rlp_encode<W: RlpWrite>(&self, w: &mut W) {
        w.write_list(|buf| {
            buf.write_u64(self.p2p_version);
            buf.write_string(self.client_id.as_bytes());
            buf.write_list(|caps| self.capabilities.iter().for_each(|cap| cap.rlp_encode(caps)));
            buf.write_u64(self.listen_port as u64);
            self.node_id.rlp_encode(buf);
        });
    }
}

impl RlpDecode for Hello {
    /// Trailing list items are ignored, newer peers append fields.
    fn rlp_decode(r: &mut RlpReader<'_>) -> Result<Self, DecodeError> {
        let mut list = r.read_list()?;
        let p2p_version = list.read_u64()?;
        let client_id = list.read_utf8()?;

        let mut caps = list.read_list()?;
        let mut capabilities = Vec::new();
        while !caps.is_empty() {
            capabilities.push(Capability::rlp_decode(&mut caps)?);
        }

        let listen_port = list.read_u16()?;
        let node_id = UInt512::rlp_decode(&mut list)?;
        Ok(Self { p2p_version, client_id, capabilities, listen_port, node_id })
    }
}

/// Disconnect reasons of the devp2p base protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum P2pDisconnect {
    Requested = 0x00,
    TcpError = 0x01,
    BreachOfProtocol = 0x02,
    UselessPeer = 0x03,
    TooManyPeers = 0x04,
    AlreadyConnected = 0x05,
    IncompatibleVersion = 0x06,
    NullNodeIdentity = 0x07,
    ClientQuitting = 0x08,
    UnexpectedIdentity = 0x09,
    ConnectedToSelf = 0x0a,
    Timeout = 0x0b,
    Other = 0x10,
}

impl P2pDisconnect {
    /// Unlisted codes map to [`P2pDisconnect::Other`].
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => Self::Requested,
            0x01 => Self::TcpError,
            0x02 => Self::BreachOfProtocol,
            0x03 => Self::UselessPeer,
            0x04 => Self::TooManyPeers,
            0x05 => Self::AlreadyConnected,
            0x06 => Self::IncompatibleVersion,
            0x07 => Self::NullNodeIdentity,
            0x08 => Self::ClientQuitting,
            0x09 => Self::UnexpectedIdentity,
            0x0a => Self::ConnectedToSelf,
            0x0b => Self::Timeout,
            _ => Self::Other,
        }
    }

    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "disconnect requested",
            Self::TcpError => "tcp sub-system error",
            Self::BreachOfProtocol => "breach of protocol",
            Self::UselessPeer => "useless peer",
            Self::TooManyPeers => "too many peers",
            Self::AlreadyConnected => "already connected",
            Self::IncompatibleVersion => "incompatible p2p protocol version",
            Self::NullNodeIdentity => "null node identity received",
            Self::ClientQuitting => "client quitting",
            Self::UnexpectedIdentity => "unexpected identity",
            Self::ConnectedToSelf => "connected to self",
            Self::Timeout => "ping timeout",
            Self::Other => "other",
        }
    }
}

impl Display for P2pDisconnect {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RlpEncode for P2pDisconnect {
    fn rlp_encode<W: RlpWrite>(&self, w: &mut W) {
        w.write_list(|buf| buf.write_u64(self.code() as u64));
    }
}

impl RlpDecode for P2pDisconnect {
    /// Accepts both `[reason]` and a bare `reason`; some clients send the latter.
    fn rlp_decode(r: &mut RlpReader<'_>) -> Result<Self, DecodeError> {
        let code = if r.next_is_list() {
            let mut list = r.read_list()?;
            if list.is_empty() { 0 } else { list.read_u8()? }
        } else {
            r.read_u8()?
        };
        Ok(Self::from_code(code))
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;
    use crate::codec::vectors::*;

    #[test]
    fn test_hello_vector() {
        let body = initiator_hello_body();
        // body[0] is the message id
        let hello = Hello::from_rlp(&body[1..]).expect("decode should be ok");
        assert_eq!(hello.p2p_version, 3);
        assert_eq!(hello.client_id, "");
        assert_eq!(hello.capabilities, vec![Capability::new("a", 0), Capability::new("b", 2)]);
        assert_eq!(hello.listen_port, 0);
        assert_eq!(hello.node_id.as_bytes(), &INITIATOR_NODE_ID);
        assert!(hello.has_capability(&Capability::new("b", 2)));
        assert!(!hello.has_capability(&Capability::new("b", 3)));

        assert_eq!(hello.to_rlp(), &body[1..]);
    }

    #[test]
    fn test_hello_with_extra_fields() {
        let mut hello = Hello::from_rlp(&initiator_hello_body()[1..]).expect("decode");
        hello.client_id = "les-rs/v0.4.0".into();
        hello.listen_port = 30303;

        // Re-wrap with one more trailing item.
        let mut inner = Vec::new();
        hello.rlp_encode(&mut inner);
        let mut items = RlpReader::new(&inner).read_list().expect("list").rest().to_vec();
        items.extend_from_slice(&hex!("8201ff"));

        let mut extended = Vec::new();
        extended.write_list(|buf| buf.write_raw(&items));
        assert_eq!(Hello::from_rlp(&extended).expect("decode"), hello);
    }

    #[test]
    fn test_disconnect_codec() {
        assert_eq!(P2pDisconnect::TooManyPeers.to_rlp(), hex!("c104"));
        assert_eq!(P2pDisconnect::Requested.to_rlp(), hex!("c180"));

        assert_eq!(P2pDisconnect::from_rlp(&hex!("c104")).unwrap(), P2pDisconnect::TooManyPeers);
        assert_eq!(P2pDisconnect::from_rlp(&hex!("04")).unwrap(), P2pDisconnect::TooManyPeers);
        assert_eq!(P2pDisconnect::from_rlp(&hex!("c0")).unwrap(), P2pDisconnect::Requested);
        assert_eq!(P2pDisconnect::from_rlp(&hex!("c10e")).unwrap(), P2pDisconnect::Other);
        assert_eq!(P2pDisconnect::from_code(0x0b).as_str(), "ping timeout");
    }
}
