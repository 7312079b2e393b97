use crate::paxos::{NodeId, ProposalId};

/// Produces `node_id, node_id + N, node_id + 2N, ...` where `N` is the peer
/// count frozen at wiring time. Two nodes sharing `N` never collide because
/// their IDs differ modulo `N`.
#[derive(Debug, Clone)]
pub struct ProposalIdGenerator {
    node_id: NodeId,
    peer_count: u64,
    last: Option<ProposalId>,
}

impl ProposalIdGenerator {
    pub fn new(node_id: NodeId, peer_count: usize) -> Self {
        ProposalIdGenerator {
            node_id,
            peer_count: peer_count as u64,
            last: None,
        }
    }

    pub fn next_id(&mut self) -> ProposalId {
        let next = match self.last {
            None => ProposalId::new(self.node_id),
            Some(prev) => ProposalId::new(prev.get() + self.peer_count),
        };
        self.last = Some(next);
        next
    }

    /// The most recently generated ID, if any.
    pub fn last(&self) -> Option<ProposalId> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn kth_id_follows_stride() {
        let mut ids = ProposalIdGenerator::new(2, 3);
        let got: Vec<u64> = (0..5).map(|_| ids.next_id().get()).collect();
        assert_eq!(got, vec![2, 5, 8, 11, 14]);
        assert_eq!(ids.last(), Some(ProposalId::new(14)));
    }

    #[test]
    fn distinct_nodes_never_collide() {
        let peers = 5;
        let mut seen = HashSet::new();
        for node in 1..=peers as u64 {
            let mut ids = ProposalIdGenerator::new(node, peers);
            for k in 1..=200u64 {
                let id = ids.next_id();
                assert_eq!(id.get(), node + (k - 1) * peers as u64);
                assert!(seen.insert(id), "id {} generated twice", id);
            }
        }
    }

    #[test]
    fn single_peer_counts_by_one() {
        let mut ids = ProposalIdGenerator::new(1, 1);
        assert_eq!(ids.next_id().get(), 1);
        assert_eq!(ids.next_id().get(), 2);
    }
}
