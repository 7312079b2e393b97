use std::{
    io,
    sync::mpsc,
    thread::{self, JoinHandle},
    time::Duration,
};

use rand::Rng;

use crate::error::PaxosError;
use crate::logger::NodeLogger;
use crate::paxos::{
    acceptor::{Acceptor, AcceptorState},
    AcceptResponse, NodeId, Peer, PrepareResponse, ProposalId, Value,
};

/// Knobs for the in-process network between nodes.
#[derive(Debug, Clone, Default)]
pub struct NetworkOptions {
    /// How long a caller waits for a reply before treating the peer as unreachable.
    pub call_timeout: Option<Duration>,
    /// Upper bound of the random delay added before an acceptor handles a request.
    pub max_delay: Option<Duration>,
}

enum Request {
    Prepare {
        proposal_id: ProposalId,
        from: NodeId,
        reply: mpsc::Sender<PrepareResponse>,
    },
    Accept {
        proposal_id: ProposalId,
        value: Value,
        from: NodeId,
        reply: mpsc::Sender<AcceptResponse>,
    },
    Inspect {
        reply: mpsc::Sender<AcceptorState>,
    },
}

/// Handle to a node's acceptor service. Cloning it hands out another sender;
/// the service thread exits once every handle is gone.
#[derive(Clone)]
pub struct ChannelPeer {
    node_id: NodeId,
    tx: mpsc::Sender<Request>,
    call_timeout: Option<Duration>,
}

impl ChannelPeer {
    fn call<R>(&self, build: impl FnOnce(mpsc::Sender<R>) -> Request) -> Result<R, PaxosError> {
        let unreachable = PaxosError::PeerUnreachable { peer: self.node_id };
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(build(reply_tx))
            .map_err(|_| unreachable.clone())?;
        match self.call_timeout {
            Some(timeout) => reply_rx.recv_timeout(timeout).map_err(|_| unreachable),
            None => reply_rx.recv().map_err(|_| unreachable),
        }
    }

    /// Snapshot of the remote acceptor's state.
    pub fn inspect(&self) -> Result<AcceptorState, PaxosError> {
        self.call(|reply| Request::Inspect { reply })
    }
}

impl std::fmt::Debug for ChannelPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPeer")
            .field("node_id", &self.node_id)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl Peer for ChannelPeer {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn prepare(
        &self,
        from: NodeId,
        proposal_id: ProposalId,
    ) -> Result<PrepareResponse, PaxosError> {
        self.call(|reply| Request::Prepare {
            proposal_id,
            from,
            reply,
        })
    }

    fn accept(
        &self,
        from: NodeId,
        proposal_id: ProposalId,
        value: Value,
    ) -> Result<AcceptResponse, PaxosError> {
        self.call(|reply| Request::Accept {
            proposal_id,
            value,
            from,
            reply,
        })
    }
}

/// Start the acceptor service for `node_id` on its own thread.
///
/// The thread owns the acceptor outright and applies requests one at a time
/// in arrival order. When the last handle is dropped it returns the final
/// acceptor state through the join handle.
pub fn spawn_acceptor(
    node_id: NodeId,
    logger: NodeLogger,
    options: &NetworkOptions,
) -> io::Result<(ChannelPeer, JoinHandle<AcceptorState>)> {
    let (tx, rx) = mpsc::channel();
    let max_delay = options.max_delay;
    let handle = thread::Builder::new()
        .name(format!("acceptor-{}", node_id))
        .spawn(move || acceptor_node(Acceptor::new(logger), rx, max_delay))?;

    let peer = ChannelPeer {
        node_id,
        tx,
        call_timeout: options.call_timeout,
    };
    Ok((peer, handle))
}

fn acceptor_node(
    mut acceptor: Acceptor,
    rx: mpsc::Receiver<Request>,
    max_delay: Option<Duration>,
) -> AcceptorState {
    for request in rx {
        match request {
            Request::Prepare {
                proposal_id,
                from,
                reply,
            } => {
                simulate_delay(max_delay);
                log::trace!("Prepare({}) from node {}", proposal_id, from);
                // The caller may have given up waiting; that is its problem.
                let _ = reply.send(acceptor.prepare(proposal_id));
            }
            Request::Accept {
                proposal_id,
                value,
                from,
                reply,
            } => {
                simulate_delay(max_delay);
                log::trace!("Accept({}, {}) from node {}", proposal_id, value, from);
                let _ = reply.send(acceptor.accept(proposal_id, value));
            }
            Request::Inspect { reply } => {
                let _ = reply.send(acceptor.state());
            }
        }
    }
    acceptor.state()
}

/// Sleep for a random duration in `0..=max`, like a message crossing a network.
fn simulate_delay(max: Option<Duration>) {
    let Some(max) = max else { return };
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return;
    }
    let delay = rand::rng().random_range(0..=max_ms);
    thread::sleep(Duration::from_millis(delay));
}
