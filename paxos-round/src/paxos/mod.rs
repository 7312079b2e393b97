pub mod acceptor;
pub mod proposal_id;
pub mod proposer;
pub mod quorum;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PaxosError;

/// Identifier of a node, unique within `1..=N`.
pub type NodeId = u64;

/// The decree a round agrees on.
pub type Value = u64;

/// Fencing token ordering competing proposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProposalId(u64);

impl ProposalId {
    pub fn new(raw: u64) -> Self {
        ProposalId(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Reply to a Prepare request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrepareResponse {
    Reject,
    Promise {
        promised_id: ProposalId,
    },
    PromiseWithValue {
        promised_id: ProposalId,
        accepted_id: ProposalId,
        accepted_value: Value,
    },
}

/// Reply to an Accept request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcceptResponse {
    Reject,
    Accepted {
        accepted_id: ProposalId,
        accepted_value: Value,
    },
}

/// Anything a quorum can be counted over.
pub trait PeerResponse {
    fn is_reject(&self) -> bool;
}

impl PeerResponse for PrepareResponse {
    fn is_reject(&self) -> bool {
        matches!(self, PrepareResponse::Reject)
    }
}

impl PeerResponse for AcceptResponse {
    fn is_reject(&self) -> bool {
        matches!(self, AcceptResponse::Reject)
    }
}

/// The interface every node exposes to every other node, itself included.
pub trait Peer: Send + Sync {
    /// Node this handle talks to.
    fn node_id(&self) -> NodeId;

    /// Phase 1: ask the peer's acceptor to promise `proposal_id`.
    fn prepare(&self, from: NodeId, proposal_id: ProposalId)
        -> Result<PrepareResponse, PaxosError>;

    /// Phase 2: ask the peer's acceptor to accept `value` under `proposal_id`.
    fn accept(
        &self,
        from: NodeId,
        proposal_id: ProposalId,
        value: Value,
    ) -> Result<AcceptResponse, PaxosError>;
}
