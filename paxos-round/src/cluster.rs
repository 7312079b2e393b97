use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::Serialize;

use crate::config::ClusterConfig;
use crate::error::PaxosError;
use crate::logger::LogSink;
use crate::node::Node;
use crate::paxos::acceptor::AcceptorState;
use crate::paxos::proposer::{CancellationToken, RetryPolicy, RoundOutcome};
use crate::paxos::{NodeId, Peer, Value};

/// Builds the nodes, wires them together and runs their rounds.
pub struct Cluster {
    nodes: Vec<Node>,
    acceptors: Vec<(NodeId, JoinHandle<AcceptorState>)>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub node_id: NodeId,
    pub outcome: Option<RoundOutcome>,
    pub error: Option<String>,
    pub local_log: BTreeMap<Value, u64>,
    pub acceptor: Option<AcceptorState>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterReport {
    pub nodes: Vec<NodeReport>,
}

impl ClusterReport {
    /// Distinct values committed anywhere in the cluster.
    pub fn committed_values(&self) -> Vec<Value> {
        let mut values: Vec<Value> = self
            .nodes
            .iter()
            .filter_map(|n| n.outcome.map(|o| o.value))
            .collect();
        values.sort_unstable();
        values.dedup();
        values
    }
}

impl Cluster {
    /// Construct `config.nodes` nodes with ids `1..=n` and give every node a
    /// handle to every node, itself included.
    pub fn new(config: &ClusterConfig, sink: Arc<dyn LogSink>) -> anyhow::Result<Self> {
        config.validate()?;
        let network = config.network_options();

        let mut nodes = Vec::with_capacity(config.nodes);
        let mut acceptors = Vec::with_capacity(config.nodes);
        for id in 1..=config.nodes as NodeId {
            let (node, acceptor) = Node::new(id, sink.clone(), &network)?;
            nodes.push(node);
            acceptors.push((id, acceptor));
        }

        let handles: Vec<_> = nodes.iter().map(|n| (n.id(), n.handle())).collect();
        for node in nodes.iter_mut() {
            let peers: BTreeMap<NodeId, Box<dyn Peer>> = handles
                .iter()
                .map(|(id, handle)| (*id, Box::new(handle.clone()) as Box<dyn Peer>))
                .collect();
            node.wire_up(peers)?;
        }
        log::info!("Cluster of {} node(s) wired", nodes.len());

        Ok(Cluster {
            nodes,
            acceptors,
            policy: config.retry_policy(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    /// Token that stops every running round at its next attempt.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one round on node `id` while the others stay idle.
    pub fn run_round(&mut self, id: NodeId) -> Option<Result<RoundOutcome, PaxosError>> {
        let node = self.nodes.iter_mut().find(|n| n.id() == id)?;
        Some(node.run_round(&self.policy, &self.cancel))
    }

    /// Start one round per node, each on its own thread, and wait for all of them.
    pub fn run_round_all(&mut self) -> Vec<(NodeId, Result<RoundOutcome, PaxosError>)> {
        let policy = &self.policy;
        let cancel = &self.cancel;
        thread::scope(|s| {
            let running: Vec<_> = self
                .nodes
                .iter_mut()
                .map(|node| {
                    let id = node.id();
                    (id, s.spawn(move || node.run_round(policy, cancel)))
                })
                .collect();

            running
                .into_iter()
                .map(|(id, handle)| {
                    let result = handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
                    (id, result)
                })
                .collect()
        })
    }

    /// Drop every node, wait for the acceptor services to drain and report
    /// what each node ended with.
    pub fn shutdown(
        self,
        results: Vec<(NodeId, Result<RoundOutcome, PaxosError>)>,
    ) -> ClusterReport {
        let mut results: BTreeMap<NodeId, Result<RoundOutcome, PaxosError>> =
            results.into_iter().collect();
        let logs: Vec<(NodeId, BTreeMap<Value, u64>)> = self
            .nodes
            .iter()
            .map(|n| (n.id(), n.local_log().entries().clone()))
            .collect();
        drop(self.nodes);

        let mut acceptors: BTreeMap<NodeId, AcceptorState> = BTreeMap::new();
        for (id, handle) in self.acceptors {
            match handle.join() {
                Ok(state) => {
                    acceptors.insert(id, state);
                }
                Err(_) => log::error!("Acceptor service for node {} panicked", id),
            }
        }

        let nodes = logs
            .into_iter()
            .map(|(node_id, local_log)| {
                let (outcome, error) = match results.remove(&node_id) {
                    Some(Ok(outcome)) => (Some(outcome), None),
                    Some(Err(err)) => (None, Some(err.to_string())),
                    None => (None, None),
                };
                NodeReport {
                    node_id,
                    outcome,
                    error,
                    local_log,
                    acceptor: acceptors.remove(&node_id),
                }
            })
            .collect();
        ClusterReport { nodes }
    }
}
