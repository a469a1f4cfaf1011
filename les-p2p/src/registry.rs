// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};

use les_base::UInt256;

use crate::{DisconnectReason, Node, NodeState};

/// The nodes known to one local peer, keyed by endpoint hash.
/// Owned by the caller and shared by cloning.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    nodes: Arc<DashMap<UInt256, Node>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { nodes: Arc::new(DashMap::with_capacity(capacity)) }
    }

    /// Returns the node already registered under the same id, if any, leaving it in place.
    pub fn insert(&self, node: Node) -> Option<Node> {
        match self.nodes.entry(node.id()) {
            Entry::Occupied(existing) => Some(existing.get().clone()),
            Entry::Vacant(vacant) => {
                vacant.insert(node);
                None
            }
        }
    }

    #[inline]
    pub fn get(&self, id: &UInt256) -> Option<Node> {
        self.nodes.get(id).map(|node| node.value().clone())
    }

    #[inline]
    pub fn remove(&self, id: &UInt256) -> Option<Node> {
        self.nodes.remove(id).map(|(_, node)| node)
    }

    #[inline]
    pub fn contains(&self, id: &UInt256) -> bool {
        self.nodes.contains_key(id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn in_state(&self, state: NodeState) -> Vec<Node> {
        self.nodes
            .iter()
            .filter(|node| node.value().state() == state)
            .map(|node| node.value().clone())
            .collect()
    }

    #[inline]
    pub fn connected(&self) -> Vec<Node> {
        self.in_state(NodeState::Connected)
    }

    /// Disconnects every node and empties the registry. Returns how many teardowns started.
    pub fn shutdown(&self) -> usize {
        let nodes: Vec<Node> = self.nodes.iter().map(|node| node.value().clone()).collect();
        self.nodes.clear();

        let started = nodes.iter().filter(|node| node.disconnect(DisconnectReason::Requested)).count();
        log::info!("registry: shutdown {} nodes, {} were active", nodes.len(), started);
        started
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use les_crypto::Random;

    use super::*;
    use crate::{Enode, NodeContext, NodeEndpoint, P2pConfig, Status};

    #[tokio::test]
    async fn test_registry() {
        let mut rng = Random::with_nonce(b"registry", b"test");
        let (events, _events_rx) = mpsc::channel(16);
        let context = NodeContext::new(
            tokio::runtime::Handle::current(),
            P2pConfig::default(),
            rng.gen_keypair(),
            Status::default(),
            events,
        );

        let remote = rng.gen_keypair();
        let enode = Enode::new(remote.node_id(), "127.0.0.1".parse().unwrap(), 30303, 30303);
        let node = Node::new(context.clone(), NodeEndpoint::new(enode.clone())).expect("node");

        let registry = NodeRegistry::with_capacity(4);
        assert!(registry.insert(node.clone()).is_none());
        assert!(registry.contains(&enode.hash()));

        let again = Node::new(context, NodeEndpoint::new(enode.clone())).expect("node");
        assert!(registry.insert(again).is_some());
        assert_eq!(registry.len(), 1);
        assert!(registry.connected().is_empty());
        assert_eq!(registry.in_state(NodeState::Disconnected).len(), 1);

        // nothing is active, so nothing to tear down
        assert_eq!(registry.shutdown(), 0);
        assert!(registry.is_empty());
        assert!(registry.get(&enode.hash()).is_none());
    }
}
