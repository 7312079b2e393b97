use std::collections::BTreeMap;

use crate::error::PaxosError;
use crate::paxos::{quorum, NodeId, Peer};

/// Every peer a node talks to, itself included. Frozen once built.
pub struct PeerRegistry {
    peers: BTreeMap<NodeId, Box<dyn Peer>>,
    peer_count: usize,
    majority: usize,
}

impl PeerRegistry {
    /// Build the registry for `owner`. The peer count and majority computed
    /// here never change afterwards.
    pub fn wire_up(
        owner: NodeId,
        peers: BTreeMap<NodeId, Box<dyn Peer>>,
    ) -> Result<Self, PaxosError> {
        if peers.is_empty() {
            return Err(PaxosError::EmptyRegistry(owner));
        }
        if let Some((key, peer)) = peers.iter().find(|(key, peer)| peer.node_id() != **key) {
            return Err(PaxosError::MisregisteredPeer {
                key: *key,
                reported: peer.node_id(),
            });
        }
        let peer_count = peers.len();
        Ok(PeerRegistry {
            peers,
            peer_count,
            majority: quorum::majority(peer_count),
        })
    }

    pub fn peer_count(&self) -> usize {
        self.peer_count
    }

    pub fn majority(&self) -> usize {
        self.majority
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.peers.contains_key(&id)
    }

    /// Peers in ascending node-id order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &dyn Peer)> {
        self.peers.iter().map(|(id, peer)| (*id, peer.as_ref()))
    }
}

impl std::fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("peers", &self.peers.keys().collect::<Vec<_>>())
            .field("majority", &self.majority)
            .finish()
    }
}
