use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::error::PaxosError;
use crate::logger::{LogSink, NodeLogger};
use crate::network::registry::PeerRegistry;
use crate::network::simulation::{spawn_acceptor, ChannelPeer, NetworkOptions};
use crate::paxos::acceptor::AcceptorState;
use crate::paxos::proposal_id::ProposalIdGenerator;
use crate::paxos::proposer::{CancellationToken, ProposerState, RetryPolicy, RoundDriver, RoundOutcome};
use crate::paxos::{NodeId, Peer};
use crate::state_machine::LocalLog;

/// One cluster member: a proposer, a handle to its own acceptor service and
/// its local log. Nothing in here is shared with other nodes.
pub struct Node {
    id: NodeId,
    logger: NodeLogger,
    handle: ChannelPeer,
    registry: Option<PeerRegistry>,
    ids: Option<ProposalIdGenerator>,
    proposer: ProposerState,
    log: LocalLog,
}

impl Node {
    /// Create node `id` and start its acceptor service. The returned join
    /// handle yields the acceptor's final state once every handle to it
    /// (this node's and its peers') has been dropped.
    pub fn new(
        id: NodeId,
        sink: Arc<dyn LogSink>,
        network: &NetworkOptions,
    ) -> io::Result<(Node, JoinHandle<AcceptorState>)> {
        let logger = NodeLogger::new(id, sink);
        let (handle, acceptor) = spawn_acceptor(id, logger.clone(), network)?;
        let node = Node {
            id,
            logger,
            handle,
            registry: None,
            ids: None,
            proposer: ProposerState::default(),
            log: LocalLog::new(),
        };
        Ok((node, acceptor))
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// A fresh handle other nodes use to reach this node's acceptor.
    pub fn handle(&self) -> ChannelPeer {
        self.handle.clone()
    }

    /// Register every peer, self included. Only allowed once.
    pub fn wire_up(&mut self, peers: BTreeMap<NodeId, Box<dyn Peer>>) -> Result<(), PaxosError> {
        if self.registry.is_some() {
            return Err(PaxosError::AlreadyWired(self.id));
        }
        let registry = PeerRegistry::wire_up(self.id, peers)?;
        if !registry.contains(self.id) {
            self.logger
                .warn("Wired without a handle to itself; its own acceptor will not vote");
        }
        self.logger.debug(format!(
            "Wired to {} peer(s), majority {}",
            registry.peer_count(),
            registry.majority()
        ));
        self.ids = Some(ProposalIdGenerator::new(self.id, registry.peer_count()));
        self.registry = Some(registry);
        Ok(())
    }

    pub fn majority(&self) -> Option<usize> {
        self.registry.as_ref().map(PeerRegistry::majority)
    }

    /// Run one round to completion (including retries).
    pub fn run_round(
        &mut self,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<RoundOutcome, PaxosError> {
        let (Some(registry), Some(ids)) = (self.registry.as_ref(), self.ids.as_mut()) else {
            return Err(PaxosError::NotWired(self.id));
        };
        let result = RoundDriver::new(
            self.id,
            registry,
            ids,
            &mut self.proposer,
            &mut self.log,
            &self.logger,
        )
        .run(policy, cancel);

        if let Err(err) = &result {
            self.logger.error(format!("Round ended without consensus: {}", err));
        }
        result
    }

    pub fn local_log(&self) -> &LocalLog {
        &self.log
    }

    pub fn proposer_state(&self) -> ProposerState {
        self.proposer
    }

    /// Ask this node's acceptor service for its current state.
    pub fn acceptor_state(&self) -> Result<AcceptorState, PaxosError> {
        self.handle.inspect()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("registry", &self.registry)
            .field("log", &self.log)
            .finish()
    }
}
