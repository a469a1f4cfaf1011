// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use les_base::{UInt256, UInt512};
use les_crypto::Keypair;

use crate::discovery::*;
use crate::endpoint::{Enode, NodeEndpoint, Route};

/// Neighbours per reply packet; keeps a Neighbours packet under `MAX_PACKET_SIZE`.
const NEIGHBOURS_PER_PACKET: usize = 12;

/// Peers answer FindNeighbours with at most one bucket.
const MAX_NEIGHBOURS: usize = 16;

/// Discovery v4 over one UDP socket.
pub struct DiscoveryClient {
    socket: UdpSocket,
    keypair: Arc<Keypair>,
    local: DisEndpoint,
    reply_timeout: Duration,
    known: Mutex<Vec<Neighbour>>,
}

impl DiscoveryClient {
    /// `tcp_port` is announced as our RLPx port.
    pub async fn bind(
        addr: SocketAddr,
        keypair: Arc<Keypair>,
        tcp_port: u16,
        reply_timeout: Duration,
    ) -> Result<Self, DiscoveryError> {
        let socket = UdpSocket::bind(addr).await?;
        let bound = socket.local_addr()?;
        let local = DisEndpoint::new(bound.ip(), bound.port(), tcp_port);
        Ok(Self { socket, keypair, local, reply_timeout, known: Mutex::new(Vec::new()) })
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local.udp_addr()
    }

    /// Nodes handed out when a peer asks us for neighbours.
    pub fn add_known(&self, enode: &Enode) {
        let neighbour = Neighbour { endpoint: enode.into(), node_id: enode.node_id };
        let mut known = self.known.lock();
        if !known.contains(&neighbour) {
            known.push(neighbour);
        }
    }

    async fn send(&self, packet: &DisPacket, to: SocketAddr) -> Result<UInt256, DiscoveryError> {
        let (buf, hash) = packet.encode(&self.keypair.private_key);
        self.socket.send_to(&buf, to).await?;
        log::trace!("discovery: sent {} to {}", packet.name(), to);
        Ok(hash)
    }

    /// Next verified, unexpired packet before `deadline`.
    async fn recv(&self, deadline: Instant) -> Result<(DecodedPacket, SocketAddr), DiscoveryError> {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        loop {
            let received = timeout_at(deadline, self.socket.recv_from(&mut buf)).await;
            let (size, from) = received.map_err(|_| DiscoveryError::Timeout(self.reply_timeout))??;

            let decoded = match DisPacket::decode(&buf[..size]) {
                Ok(decoded) => decoded,
                Err(err) => {
                    log::debug!("discovery: drop packet from {}: {}", from, err);
                    continue;
                }
            };
            if let Err(err) = decoded.check_expiration() {
                log::debug!("discovery: drop {} from {}: {}", decoded.packet.name(), from, err);
                continue;
            }
            return Ok((decoded, from));
        }
    }

    /// Answers requests addressed to us. Returns true if `decoded` was one.
    async fn respond(&self, decoded: &DecodedPacket, from: SocketAddr) -> Result<bool, DiscoveryError> {
        match &decoded.packet {
            DisPacket::Ping(ping) => {
                let pong = Pong {
                    to: DisEndpoint::new(from.ip(), from.port(), ping.from.tcp_port),
                    ping_hash: decoded.hash,
                    expiration: expiration_after(PACKET_TTL),
                };
                self.send(&DisPacket::Pong(pong), from).await?;
                Ok(true)
            }
            DisPacket::FindNeighbours(_) => {
                let known: Vec<Neighbour> = self.known.lock().iter().take(MAX_NEIGHBOURS).cloned().collect();
                for nodes in known.chunks(NEIGHBOURS_PER_PACKET) {
                    let expiration = expiration_after(PACKET_TTL);
                    let neighbours = Neighbours { nodes: nodes.to_vec(), expiration };
                    self.send(&DisPacket::Neighbours(neighbours), from).await?;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn check_sender(decoded: &DecodedPacket, enode: &Enode) -> Result<(), DiscoveryError> {
        let sender = decoded.sender.node_id();
        if sender != enode.node_id {
            return Err(DiscoveryError::UnexpectedSender(sender));
        }
        Ok(())
    }

    /// Pings `enode` and waits for the Pong that echoes our ping hash.
    pub async fn ping(&self, enode: &Enode) -> Result<Pong, DiscoveryError> {
        let to = enode.udp_addr();
        let ping = Ping {
            version: DISCOVERY_VERSION,
            from: self.local,
            to: enode.into(),
            expiration: expiration_after(PACKET_TTL),
        };
        let ping_hash = self.send(&DisPacket::Ping(ping), to).await?;

        let deadline = Instant::now() + self.reply_timeout;
        loop {
            let (decoded, from) = self.recv(deadline).await?;
            if from != to {
                let _ = self.respond(&decoded, from).await?;
                continue;
            }

            Self::check_sender(&decoded, enode)?;
            match decoded.packet {
                DisPacket::Pong(pong) if pong.ping_hash == ping_hash => return Ok(pong),
                DisPacket::Pong(_) => log::debug!("discovery: stale Pong from {}", from),
                _ => {
                    let _ = self.respond(&decoded, from).await?;
                }
            }
        }
    }

    /// Asks `enode` for the nodes closest to `target`. Collects replies until the
    /// reply timeout or a full bucket.
    pub async fn find_neighbours(&self, enode: &Enode, target: UInt512) -> Result<Vec<Neighbour>, DiscoveryError> {
        let to = enode.udp_addr();
        let find = FindNeighbours { target, expiration: expiration_after(PACKET_TTL) };
        self.send(&DisPacket::FindNeighbours(find), to).await?;

        let deadline = Instant::now() + self.reply_timeout;
        let mut found: Vec<Neighbour> = Vec::new();
        while found.len() < MAX_NEIGHBOURS {
            let (decoded, from) = match self.recv(deadline).await {
                Ok(received) => received,
                Err(DiscoveryError::Timeout(_)) if !found.is_empty() => break,
                Err(err) => return Err(err),
            };
            if from != to {
                let _ = self.respond(&decoded, from).await?;
                continue;
            }

            Self::check_sender(&decoded, enode)?;
            match decoded.packet {
                DisPacket::Neighbours(neighbours) => found.extend(neighbours.nodes),
                _ => {
                    let _ = self.respond(&decoded, from).await?;
                }
            }
        }

        found.truncate(MAX_NEIGHBOURS);
        log::debug!("discovery: {} returned {} neighbours", enode, found.len());
        Ok(found)
    }

    /// Answers Ping and FindNeighbours until cancelled.
    pub async fn serve(&self, cancel: CancellationToken) {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => return,
                received = self.socket.recv_from(&mut buf) => received,
            };

            let (size, from) = match received {
                Ok(received) => received,
                Err(err) => {
                    log::warn!("discovery: recv err: {}", err);
                    continue;
                }
            };

            let decoded = match DisPacket::decode(&buf[..size]).and_then(|d| d.check_expiration().map(|_| d)) {
                Ok(decoded) => decoded,
                Err(err) => {
                    log::debug!("discovery: drop packet from {}: {}", from, err);
                    continue;
                }
            };
            if let Err(err) = self.respond(&decoded, from).await {
                log::debug!("discovery: reply to {} err: {}", from, err);
            }
        }
    }
}

/// Pings `endpoint` over its own UDP route, opening the route if needed, and
/// waits for the Pong that echoes the ping. `tcp_port` is announced as ours.
pub async fn ping_endpoint(
    endpoint: &mut NodeEndpoint,
    keypair: &Keypair,
    tcp_port: u16,
    reply_timeout: Duration,
) -> Result<Pong, DiscoveryError> {
    if !endpoint.is_open(Route::Udp) {
        endpoint.open(Route::Udp, reply_timeout).await?;
    }

    let local = endpoint.local_addr(Route::Udp)?;
    let ping = DisPacket::Ping(Ping {
        version: DISCOVERY_VERSION,
        from: DisEndpoint::new(local.ip(), local.port(), tcp_port),
        to: endpoint.enode().into(),
        expiration: expiration_after(PACKET_TTL),
    });
    let (buf, ping_hash) = ping.encode(&keypair.private_key);
    endpoint.send(Route::Udp, &buf, reply_timeout).await?;

    let deadline = Instant::now() + reply_timeout;
    let mut buf = [0u8; MAX_PACKET_SIZE];
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        let size = match endpoint.recv(Route::Udp, &mut buf, left).await {
            Ok(size) => size,
            Err(err) if err.kind() == io::ErrorKind::TimedOut => return Err(DiscoveryError::Timeout(reply_timeout)),
            Err(err) => return Err(err.into()),
        };

        let decoded = match DisPacket::decode(&buf[..size]).and_then(|d| d.check_expiration().map(|_| d)) {
            Ok(decoded) => decoded,
            Err(err) => {
                log::debug!("discovery: drop packet from {}: {}", endpoint.udp_addr(), err);
                continue;
            }
        };
        DiscoveryClient::check_sender(&decoded, endpoint.enode())?;
        match decoded.packet {
            DisPacket::Pong(pong) if pong.ping_hash == ping_hash => return Ok(pong),
            other => log::debug!("discovery: ignore {} from {}", other.name(), endpoint.udp_addr()),
        }
    }
}
