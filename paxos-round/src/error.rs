use std::time::Duration;

use thiserror::Error;

use crate::paxos::{NodeId, ProposalId};

/// Which half of the protocol an attempt failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Phase {
    Prepare,
    Accept,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Prepare => f.write_str("prepare"),
            Phase::Accept => f.write_str("accept"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaxosError {
    #[error("proposal {proposal_id} rejected by {rejections} peer(s) in {phase} phase")]
    RejectedProposal {
        proposal_id: ProposalId,
        phase: Phase,
        rejections: usize,
    },

    #[error("proposal {proposal_id} got {granted} of {majority} required responses in {phase} phase")]
    QuorumNotReached {
        proposal_id: ProposalId,
        phase: Phase,
        granted: usize,
        majority: usize,
    },

    #[error("peer {peer} is unreachable")]
    PeerUnreachable { peer: NodeId },

    #[error("round did not finish within {elapsed:?}")]
    TimeoutExceeded { elapsed: Duration },

    #[error("round cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },

    #[error("round gave up after {attempts} attempt(s)")]
    RetriesExhausted { attempts: u32 },

    #[error("node {0} has no peer registry; call wire_up first")]
    NotWired(NodeId),

    #[error("node {0} is already wired")]
    AlreadyWired(NodeId),

    #[error("peer registry for node {0} is empty")]
    EmptyRegistry(NodeId),

    #[error("peer registered as node {key} answers as node {reported}")]
    MisregisteredPeer { key: NodeId, reported: NodeId },
}

impl PaxosError {
    /// Errors the round driver recovers from by starting a fresh attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaxosError::RejectedProposal { .. }
                | PaxosError::QuorumNotReached { .. }
                | PaxosError::PeerUnreachable { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] yaml_rust::ScanError),

    #[error("config file contains no document")]
    Empty,

    #[error("config key `{key}` must be {expected}")]
    InvalidValue { key: &'static str, expected: &'static str },
}
