// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

//! The LES peer connection layer: RLPx handshake and framing, the per-peer
//! connection task, node endpoints and discovery v4.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use les_base::UInt256;

pub use {codec::*, discovery::*, endpoint::*, error::*, handshake::*, message::*, node::*, registry::*};

pub mod codec;
pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod handshake;
pub mod message;
pub mod node;
pub mod registry;

pub const DEFAULT_CLIENT_ID: &str = concat!("les-rs/v", env!("CARGO_PKG_VERSION"));

pub const MAINNET_NETWORK_ID: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEventKind {
    StateChanged(NodeState),

    /// The peer's Hello, after capability negotiation succeeded.
    Hello(Hello),
    Status(Status),

    /// A sub-protocol message other than Status, payload still RLP encoded.
    Message { id: u64, payload: Bytes },
    Disconnected(DisconnectReason),
}

impl NodeEventKind {
    #[inline]
    pub fn with_node(self, id: UInt256) -> NodeEvent {
        NodeEvent { id, kind: self }
    }
}

/// An event of one node, `id` is the hash of the node's endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEvent {
    pub id: UInt256,
    pub kind: NodeEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("send: timeout after {0:?}")]
    Timeout(Duration),

    #[error("send: channel has fulled")]
    Fulled,

    #[error("send: channel has closed")]
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pConfig {
    /// Announced in our Hello
    pub client_id: String,
    pub listen_port: u16,

    /// Ordered by preference, the first one the peer also has wins.
    pub capabilities: Vec<Capability>,
    pub network_id: u64,

    pub connect_timeout: Duration,

    /// Bound of every single read or write. A connected peer quiet for this
    /// long is pinged and dropped if another one passes without a frame.
    pub io_timeout: Duration,
    pub hello_timeout: Duration,
    pub status_timeout: Duration,
    pub discovery_timeout: Duration,

    pub max_frame_size: usize,
    pub max_peers: usize,

    /// Enodes to dial when nothing else is known.
    pub bootstrap: Vec<String>,

    /// Refuse peers not listening on the standard port.
    pub standard_port_only: bool,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.into(),
            listen_port: STANDARD_PORT,
            capabilities: vec![Capability::new("les", 2), Capability::new("pip", 1)],
            network_id: MAINNET_NETWORK_ID,
            connect_timeout: Duration::from_secs(3),
            io_timeout: Duration::from_secs(10),
            hello_timeout: Duration::from_secs(10),
            status_timeout: Duration::from_secs(10),
            discovery_timeout: Duration::from_secs(5),
            max_frame_size: MAX_FRAME_SIZE,
            max_peers: 16,
            bootstrap: BOOTSTRAP_LES_ENODES.iter().map(|&x| x.into()).collect(),
            standard_port_only: false,
        }
    }
}

impl P2pConfig {
    /// Parses `bootstrap`, skipping entries that are not valid enodes.
    pub fn bootstrap_enodes(&self) -> Vec<Enode> {
        self.bootstrap
            .iter()
            .filter_map(|enode| match enode.parse() {
                Ok(enode) => Some(enode),
                Err(err) => {
                    log::warn!("config: skip bootstrap '{}': {}", enode, err);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
#[ctor::ctor]
fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = P2pConfig::default();
        assert_eq!(config.capabilities[0].to_string(), "les/2");
        assert_eq!(config.bootstrap_enodes().len(), BOOTSTRAP_LES_ENODES.len());
        assert!(config.client_id.starts_with("les-rs/v"));

        let mut config = config;
        config.bootstrap = vec!["enode://bad".into(), BOOTSTRAP_LES_ENODES[0].into()];
        assert_eq!(config.bootstrap_enodes().len(), 1);
    }

    #[test]
    fn test_event_with_node() {
        let id = UInt256::from_u64(7);
        let event = NodeEventKind::StateChanged(NodeState::Connecting).with_node(id);
        assert_eq!(event.id, id);
        assert_eq!(event.kind, NodeEventKind::StateChanged(NodeState::Connecting));
    }
}
