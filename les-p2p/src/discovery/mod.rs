// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

//! Node discovery v4 over UDP.
//!
//! `packet = hash(32) || signature(65) || packet-type(1) || RLP(packet-data)` where
//! `hash = keccak256(signature || packet-type || packet-data)` and the signature
//! is over `keccak256(packet-type || packet-data)`.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use subtle::ConstantTimeEq;

use les_base::encoding::{DecodeError, RlpDecode, RlpEncode, RlpReader, RlpWrite};
use les_base::hash::{Keccak256, SlicesKeccak256};
use les_base::{UInt256, UInt512};
use les_crypto::ecdsa::{self, RecoverError, Secp256k1Sign, RECOVERABLE_SIGN_SIZE};
use les_crypto::{PrivateKey, PublicKey};

use crate::endpoint::Enode;

pub use client::*;

mod client;

pub const DISCOVERY_VERSION: u64 = 4;

pub const PACKET_PING: u8 = 0x01;
pub const PACKET_PONG: u8 = 0x02;
pub const PACKET_FIND_NEIGHBOURS: u8 = 0x03;
pub const PACKET_NEIGHBOURS: u8 = 0x04;

/// hash || signature || packet-type
pub const PACKET_HEADER_SIZE: usize = 32 + RECOVERABLE_SIGN_SIZE + 1;

pub const MAX_PACKET_SIZE: usize = 1280;

/// Lifetime stamped on the packets we send.
pub const PACKET_TTL: Duration = Duration::from_secs(20);

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("discovery: packet of {0} bytes is too short")]
    TooShort(usize),

    #[error("discovery: packet of {0} bytes exceeds {}", MAX_PACKET_SIZE)]
    TooLarge(usize),

    #[error("discovery: packet hash mismatch")]
    HashMismatch,

    #[error("discovery: unknown packet type {0}")]
    UnknownType(u8),

    #[error("discovery: packet expired at {0}")]
    Expired(u64),

    #[error("discovery: {0}")]
    Recover(#[from] RecoverError),

    #[error("discovery: {0}")]
    Decode(#[from] DecodeError),

    #[error("discovery: reply from unexpected node {0}")]
    UnexpectedSender(UInt512),

    #[error("discovery: no reply within {0:?}")]
    Timeout(Duration),

    #[error("discovery: io error: {0}")]
    Io(#[from] io::Error),
}

/// Seconds since the unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
}

#[inline]
pub fn expiration_after(ttl: Duration) -> u64 {
    unix_now() + ttl.as_secs()
}

#[inline]
pub fn is_expired(expiration: u64) -> bool {
    expiration < unix_now()
}

/// An address as carried in discovery packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisEndpoint {
    pub ip: IpAddr,
    pub udp_port: u16,
    pub tcp_port: u16,
}

impl DisEndpoint {
    pub fn new(ip: IpAddr, udp_port: u16, tcp_port: u16) -> Self {
        Self { ip, udp_port, tcp_port }
    }

    #[inline]
    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.udp_port)
    }

    fn encode_fields(&self, buf: &mut Vec<u8>) {
        match self.ip {
            IpAddr::V4(ip) => buf.write_string(&ip.octets()),
            IpAddr::V6(ip) => buf.write_string(&ip.octets()),
        }
        buf.write_u64(self.udp_port as u64);
        buf.write_u64(self.tcp_port as u64);
    }

    fn decode_fields(r: &mut RlpReader<'_>) -> Result<Self, DecodeError> {
        let ip = match r.read_string()? {
            [a, b, c, d] => IpAddr::V4(Ipv4Addr::new(*a, *b, *c, *d)),
            bytes if bytes.len() == 16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(bytes);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            // some peers leave the sender address empty
            [] => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            _ => return Err(DecodeError::InvalidValue("ip")),
        };
        Ok(Self { ip, udp_port: r.read_u16()?, tcp_port: r.read_u16()? })
    }
}

impl From<&Enode> for DisEndpoint {
    fn from(enode: &Enode) -> Self {
        Self { ip: enode.ip, udp_port: enode.udp_port, tcp_port: enode.tcp_port }
    }
}

impl RlpEncode for DisEndpoint {
    fn rlp_encode<W: RlpWrite>(&self, w: &mut W) {
        w.write_list(|buf| self.encode_fields(buf));
    }
}

impl RlpDecode for DisEndpoint {
    fn rlp_decode(r: &mut RlpReader<'_>) -> Result<Self, DecodeError> {
        Self::decode_fields(&mut r.read_list()?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ping {
    pub version: u64,
    pub from: DisEndpoint,
    pub to: DisEndpoint,
    pub expiration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pong {
    pub to: DisEndpoint,

    /// Hash of the Ping packet being answered.
    pub ping_hash: UInt256,
    pub expiration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindNeighbours {
    pub target: UInt512,
    pub expiration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbour {
    pub endpoint: DisEndpoint,
    pub node_id: UInt512,
}

impl Neighbour {
    #[inline]
    pub fn to_enode(&self) -> Enode {
        Enode::new(self.node_id, self.endpoint.ip, self.endpoint.tcp_port, self.endpoint.udp_port)
    }
}

/// The node is flattened into `[ip, udp, tcp, node-id]`.
impl RlpEncode for Neighbour {
    fn rlp_encode<W: RlpWrite>(&self, w: &mut W) {
        w.write_list(|buf| {
            self.endpoint.encode_fields(buf);
            self.node_id.rlp_encode(buf);
        });
    }
}

impl RlpDecode for Neighbour {
    fn rlp_decode(r: &mut RlpReader<'_>) -> Result<Self, DecodeError> {
        let mut list = r.read_list()?;
        let endpoint = DisEndpoint::decode_fields(&mut list)?;
        let node_id = UInt512::rlp_decode(&mut list)?;
        Ok(Self { endpoint, node_id })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbours {
    pub nodes: Vec<Neighbour>,
    pub expiration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisPacket {
    Ping(Ping),
    Pong(Pong),
    FindNeighbours(FindNeighbours),
    Neighbours(Neighbours),
}

impl DisPacket {
    pub fn packet_type(&self) -> u8 {
        match self {
            Self::Ping(_) => PACKET_PING,
            Self::Pong(_) => PACKET_PONG,
            Self::FindNeighbours(_) => PACKET_FIND_NEIGHBOURS,
            Self::Neighbours(_) => PACKET_NEIGHBOURS,
        }
    }

    pub fn expiration(&self) -> u64 {
        match self {
            Self::Ping(ping) => ping.expiration,
            Self::Pong(pong) => pong.expiration,
            Self::FindNeighbours(find) => find.expiration,
            Self::Neighbours(neighbours) => neighbours.expiration,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping(_) => "Ping",
            Self::Pong(_) => "Pong",
            Self::FindNeighbours(_) => "FindNeighbours",
            Self::Neighbours(_) => "Neighbours",
        }
    }

    fn encode_data(&self, buf: &mut Vec<u8>) {
        buf.write_list(|list| match self {
            Self::Ping(ping) => {
                list.write_u64(ping.version);
                ping.from.rlp_encode(list);
                ping.to.rlp_encode(list);
                list.write_u64(ping.expiration);
            }
            Self::Pong(pong) => {
                pong.to.rlp_encode(list);
                pong.ping_hash.rlp_encode(list);
                list.write_u64(pong.expiration);
            }
            Self::FindNeighbours(find) => {
                find.target.rlp_encode(list);
                list.write_u64(find.expiration);
            }
            Self::Neighbours(neighbours) => {
                list.write_list(|nodes| neighbours.nodes.iter().for_each(|node| node.rlp_encode(nodes)));
                list.write_u64(neighbours.expiration);
            }
        });
    }

    /// Trailing list items are ignored, newer peers append fields.
    fn decode_data(packet_type: u8, data: &[u8]) -> Result<Self, DiscoveryError> {
        let mut r = RlpReader::new(data);
        let mut list = r.read_list()?;
        let packet = match packet_type {
            PACKET_PING => Self::Ping(Ping {
                version: list.read_u64()?,
                from: DisEndpoint::rlp_decode(&mut list)?,
                to: DisEndpoint::rlp_decode(&mut list)?,
                expiration: list.read_u64()?,
            }),
            PACKET_PONG => Self::Pong(Pong {
                to: DisEndpoint::rlp_decode(&mut list)?,
                ping_hash: UInt256::rlp_decode(&mut list)?,
                expiration: list.read_u64()?,
            }),
            PACKET_FIND_NEIGHBOURS => Self::FindNeighbours(FindNeighbours {
                target: UInt512::rlp_decode(&mut list)?,
                expiration: list.read_u64()?,
            }),
            PACKET_NEIGHBOURS => {
                let mut items = list.read_list()?;
                let mut nodes = Vec::new();
                while !items.is_empty() {
                    nodes.push(Neighbour::rlp_decode(&mut items)?);
                }
                Self::Neighbours(Neighbours { nodes, expiration: list.read_u64()? })
            }
            other => return Err(DiscoveryError::UnknownType(other)),
        };
        Ok(packet)
    }

    /// Signs and frames this packet; also returns the packet hash, which a Pong echoes.
    pub fn encode(&self, key: &PrivateKey) -> (Vec<u8>, UInt256) {
        let mut signed = vec![self.packet_type()];
        self.encode_data(&mut signed);

        let sign = key.sign_recoverable(&signed.keccak256());
        let hash = [&sign[..], &signed[..]].iter().slices_keccak256();

        let mut packet = Vec::with_capacity(PACKET_HEADER_SIZE - 1 + signed.len());
        packet.extend_from_slice(&hash);
        packet.extend_from_slice(&sign);
        packet.extend_from_slice(&signed);
        (packet, UInt256::new(hash))
    }

    /// Checks the hash, recovers the sender and decodes the packet. Expiration is not checked here.
    pub fn decode(buf: &[u8]) -> Result<DecodedPacket, DiscoveryError> {
        if buf.len() > MAX_PACKET_SIZE {
            return Err(DiscoveryError::TooLarge(buf.len()));
        }
        if buf.len() <= PACKET_HEADER_SIZE {
            return Err(DiscoveryError::TooShort(buf.len()));
        }

        let (hash, rest) = buf.split_at(32);
        let computed = rest.keccak256();
        if !bool::from(computed[..].ct_eq(hash)) {
            return Err(DiscoveryError::HashMismatch);
        }

        let (sign, signed) = rest.split_at(RECOVERABLE_SIGN_SIZE);
        let sender = ecdsa::recover(&signed.keccak256(), sign)?;
        let packet = Self::decode_data(signed[0], &signed[1..])?;

        let mut packet_hash = [0u8; 32];
        packet_hash.copy_from_slice(hash);
        Ok(DecodedPacket { hash: UInt256::new(packet_hash), sender, packet })
    }
}

/// A verified inbound packet.
#[derive(Debug, Clone)]
pub struct DecodedPacket {
    pub hash: UInt256,
    pub sender: PublicKey,
    pub packet: DisPacket,
}

impl DecodedPacket {
    /// Rejects packets whose expiration has passed.
    pub fn check_expiration(&self) -> Result<(), DiscoveryError> {
        let expiration = self.packet.expiration();
        if is_expired(expiration) {
            return Err(DiscoveryError::Expired(expiration));
        }
        Ok(())
    }
}
