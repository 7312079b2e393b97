use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Serialize;

use crate::error::{PaxosError, Phase};
use crate::logger::NodeLogger;
use crate::network::registry::PeerRegistry;
use crate::paxos::{
    proposal_id::ProposalIdGenerator, quorum, AcceptResponse, NodeId, PeerResponse,
    PrepareResponse, ProposalId, Value,
};
use crate::state_machine::LocalLog;

/// Bounds on the retry loop. The default retries forever with no pause.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    /// Checked before every attempt and before every peer call, so a round
    /// can overrun it by at most one call (bounded by the call timeout).
    pub round_timeout: Option<Duration>,
    /// Upper bound of a random sleep taken before each retry.
    pub backoff: Option<Duration>,
}

/// Shared flag that stops a running round at its next attempt boundary.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Working state of the attempt in flight; cleared at the start of every attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProposerState {
    pub proposed_id: Option<ProposalId>,
    pub proposed_value: Option<Value>,
}

/// A committed round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoundOutcome {
    pub node_id: NodeId,
    pub value: Value,
    pub proposal_id: ProposalId,
    pub attempts: u32,
    /// Where the value landed in the node's local log.
    pub offset: u64,
}

struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    fn check(&self) -> Result<(), PaxosError> {
        let elapsed = self.started.elapsed();
        match self.limit {
            Some(limit) if elapsed >= limit => Err(PaxosError::TimeoutExceeded { elapsed }),
            _ => Ok(()),
        }
    }
}

/// Drives one node's proposer through a full round, borrowing the pieces
/// of the node it needs.
pub struct RoundDriver<'a> {
    node_id: NodeId,
    registry: &'a PeerRegistry,
    ids: &'a mut ProposalIdGenerator,
    state: &'a mut ProposerState,
    log: &'a mut LocalLog,
    logger: &'a NodeLogger,
}

impl<'a> RoundDriver<'a> {
    pub fn new(
        node_id: NodeId,
        registry: &'a PeerRegistry,
        ids: &'a mut ProposalIdGenerator,
        state: &'a mut ProposerState,
        log: &'a mut LocalLog,
        logger: &'a NodeLogger,
    ) -> Self {
        RoundDriver {
            node_id,
            registry,
            ids,
            state,
            log,
            logger,
        }
    }

    /// Attempt until a value commits or the policy / token says stop.
    pub fn run(
        &mut self,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<RoundOutcome, PaxosError> {
        let deadline = Deadline {
            started: Instant::now(),
            limit: policy.round_timeout,
        };
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                self.logger
                    .warn(format!("Round cancelled after {} attempt(s)", attempts));
                return Err(PaxosError::Cancelled { attempts });
            }
            deadline.check()?;
            if policy.max_attempts.is_some_and(|max| attempts >= max) {
                self.logger
                    .warn(format!("Giving up after {} attempt(s)", attempts));
                return Err(PaxosError::RetriesExhausted { attempts });
            }

            attempts += 1;
            match self.attempt(attempts, &deadline) {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_retryable() => {
                    self.logger
                        .warn(format!("Attempt {} failed: {}; retrying", attempts, err));
                    pause(policy.backoff);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn attempt(&mut self, attempt: u32, deadline: &Deadline) -> Result<RoundOutcome, PaxosError> {
        *self.state = ProposerState::default();
        let proposal_id = self.ids.next_id();
        self.state.proposed_id = Some(proposal_id);
        self.logger.debug(format!(
            "Attempt {}: proposing with id {}",
            attempt, proposal_id
        ));

        // --- Phase 1: Prepare ---
        let (promises, unreachable) = self.broadcast_prepare(proposal_id, deadline)?;
        self.require_quorum(Phase::Prepare, proposal_id, &promises, unreachable)?;

        let value = match carried_value(&promises) {
            Some(value) => {
                self.logger.debug(format!(
                    "Proposal {}: carrying forward previously accepted value {}",
                    proposal_id, value
                ));
                value
            }
            None => self.log.next_fresh_value(),
        };
        self.state.proposed_value = Some(value);

        // --- Phase 2: Accept ---
        let (accepts, unreachable) = self.broadcast_accept(proposal_id, value, deadline)?;
        self.require_quorum(Phase::Accept, proposal_id, &accepts, unreachable)?;

        let offset = self.log.commit(value);
        self.logger.info(format!(
            "Consensus reached on value {} (proposal {}, attempt {})",
            value, proposal_id, attempt
        ));
        self.logger
            .info(format!("Local log is now {:?}", self.log.entries()));

        Ok(RoundOutcome {
            node_id: self.node_id,
            value,
            proposal_id,
            attempts: attempt,
            offset,
        })
    }

    /// Send Prepare to every peer, self included. Returns one response per
    /// peer and how many of them were unreachable (recorded as `Reject`).
    fn broadcast_prepare(
        &self,
        proposal_id: ProposalId,
        deadline: &Deadline,
    ) -> Result<(Vec<PrepareResponse>, usize), PaxosError> {
        let mut responses = Vec::with_capacity(self.registry.peer_count());
        let mut unreachable = 0;
        for (peer_id, peer) in self.registry.iter() {
            deadline.check()?;
            self.logger.debug(format!(
                "Sending Prepare({}) to node {}",
                proposal_id, peer_id
            ));
            let response = match peer.prepare(self.node_id, proposal_id) {
                Ok(response) => response,
                Err(err) => {
                    self.logger.warn(format!("Prepare to node {} failed: {}", peer_id, err));
                    unreachable += 1;
                    PrepareResponse::Reject
                }
            };
            responses.push(response);
        }
        Ok((responses, unreachable))
    }

    fn broadcast_accept(
        &self,
        proposal_id: ProposalId,
        value: Value,
        deadline: &Deadline,
    ) -> Result<(Vec<AcceptResponse>, usize), PaxosError> {
        let mut responses = Vec::with_capacity(self.registry.peer_count());
        let mut unreachable = 0;
        for (peer_id, peer) in self.registry.iter() {
            deadline.check()?;
            self.logger.debug(format!(
                "Sending Accept({}, {}) to node {}",
                proposal_id, value, peer_id
            ));
            let response = match peer.accept(self.node_id, proposal_id, value) {
                Ok(response) => response,
                Err(err) => {
                    self.logger.warn(format!("Accept to node {} failed: {}", peer_id, err));
                    unreachable += 1;
                    AcceptResponse::Reject
                }
            };
            responses.push(response);
        }
        Ok((responses, unreachable))
    }

    fn require_quorum<R: PeerResponse + std::fmt::Debug>(
        &self,
        phase: Phase,
        proposal_id: ProposalId,
        responses: &[R],
        unreachable: usize,
    ) -> Result<(), PaxosError> {
        let majority = self.registry.majority();
        let granted = quorum::granted(responses);
        let reached = quorum::evaluate(responses, majority);
        self.logger.debug(format!(
            "Quorum check for proposal {} in {} phase: {} of {} granted, need {} -> {} {:?}",
            proposal_id,
            phase,
            granted,
            responses.len(),
            majority,
            if reached { "reached" } else { "missed" },
            responses
        ));
        if reached {
            return Ok(());
        }

        let rejections = responses.len() - granted - unreachable;
        if rejections > 0 {
            Err(PaxosError::RejectedProposal {
                proposal_id,
                phase,
                rejections,
            })
        } else {
            Err(PaxosError::QuorumNotReached {
                proposal_id,
                phase,
                granted,
                majority,
            })
        }
    }
}

/// The value accepted under the strictly greatest accepted id among the
/// promises, if any promise carried one. Ties keep the first one seen.
pub fn carried_value(promises: &[PrepareResponse]) -> Option<Value> {
    let mut best: Option<(ProposalId, Value)> = None;
    for promise in promises {
        if let PrepareResponse::PromiseWithValue {
            accepted_id,
            accepted_value,
            ..
        } = *promise
        {
            if best.map_or(true, |(id, _)| accepted_id > id) {
                best = Some((accepted_id, accepted_value));
            }
        }
    }
    best.map(|(_, value)| value)
}

fn pause(backoff: Option<Duration>) {
    let Some(max) = backoff else { return };
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return;
    }
    thread::sleep(Duration::from_millis(rand::rng().random_range(0..=max_ms)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::MemorySink;
    use crate::paxos::Peer;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn id(raw: u64) -> ProposalId {
        ProposalId::new(raw)
    }

    fn with_value(accepted_id: u64, value: Value) -> PrepareResponse {
        PrepareResponse::PromiseWithValue {
            promised_id: id(99),
            accepted_id: id(accepted_id),
            accepted_value: value,
        }
    }

    #[test]
    fn carried_value_picks_highest_accepted_id() {
        let promises = [
            with_value(2, 20),
            PrepareResponse::Promise { promised_id: id(99) },
            with_value(7, 70),
            with_value(4, 40),
        ];
        assert_eq!(carried_value(&promises), Some(70));
    }

    #[test]
    fn carried_value_keeps_first_on_tie() {
        assert_eq!(carried_value(&[with_value(3, 1), with_value(3, 2)]), Some(1));
    }

    #[test]
    fn carried_value_absent_without_value_promises() {
        let promises = [PrepareResponse::Reject, PrepareResponse::Promise { promised_id: id(1) }];
        assert_eq!(carried_value(&promises), None);
        assert_eq!(carried_value(&[with_value(1, 0)]), Some(0));
    }

    /// In-process acceptor behind a mutex; enough to drive the round without threads.
    struct LocalPeer {
        id: NodeId,
        acceptor: Mutex<crate::paxos::acceptor::Acceptor>,
    }

    impl LocalPeer {
        fn new(id: NodeId, sink: Arc<MemorySink>) -> Self {
            LocalPeer {
                id,
                acceptor: Mutex::new(crate::paxos::acceptor::Acceptor::new(NodeLogger::new(id, sink))),
            }
        }
    }

    impl Peer for LocalPeer {
        fn node_id(&self) -> NodeId {
            self.id
        }
        fn prepare(&self, _: NodeId, proposal_id: ProposalId) -> Result<PrepareResponse, PaxosError> {
            Ok(self.acceptor.lock().unwrap().prepare(proposal_id))
        }
        fn accept(&self, _: NodeId, proposal_id: ProposalId, value: Value) -> Result<AcceptResponse, PaxosError> {
            Ok(self.acceptor.lock().unwrap().accept(proposal_id, value))
        }
    }

    struct Unreachable(NodeId);

    impl Peer for Unreachable {
        fn node_id(&self) -> NodeId {
            self.0
        }
        fn prepare(&self, _: NodeId, _: ProposalId) -> Result<PrepareResponse, PaxosError> {
            Err(PaxosError::PeerUnreachable { peer: self.0 })
        }
        fn accept(&self, _: NodeId, _: ProposalId, _: Value) -> Result<AcceptResponse, PaxosError> {
            Err(PaxosError::PeerUnreachable { peer: self.0 })
        }
    }

    /// Promises every Prepare but refuses every Accept.
    struct PromiseThenReject(NodeId);

    impl Peer for PromiseThenReject {
        fn node_id(&self) -> NodeId {
            self.0
        }
        fn prepare(&self, _: NodeId, proposal_id: ProposalId) -> Result<PrepareResponse, PaxosError> {
            Ok(PrepareResponse::Promise { promised_id: proposal_id })
        }
        fn accept(&self, _: NodeId, _: ProposalId, _: Value) -> Result<AcceptResponse, PaxosError> {
            Ok(AcceptResponse::Reject)
        }
    }

    /// Answers like a fresh acceptor, but only after sleeping.
    struct Slow(NodeId, Duration);

    impl Peer for Slow {
        fn node_id(&self) -> NodeId {
            self.0
        }
        fn prepare(&self, _: NodeId, proposal_id: ProposalId) -> Result<PrepareResponse, PaxosError> {
            thread::sleep(self.1);
            Ok(PrepareResponse::Promise { promised_id: proposal_id })
        }
        fn accept(&self, _: NodeId, proposal_id: ProposalId, value: Value) -> Result<AcceptResponse, PaxosError> {
            thread::sleep(self.1);
            Ok(AcceptResponse::Accepted {
                accepted_id: proposal_id,
                accepted_value: value,
            })
        }
    }

    fn count_lines(sink: &MemorySink, prefix: &str) -> usize {
        sink.entries_for(1)
            .into_iter()
            .filter(|e| e.message.starts_with(prefix))
            .count()
    }

    struct Harness {
        registry: PeerRegistry,
        ids: ProposalIdGenerator,
        state: ProposerState,
        log: LocalLog,
        logger: NodeLogger,
    }

    impl Harness {
        fn new(peers: BTreeMap<NodeId, Box<dyn Peer>>, sink: Arc<MemorySink>) -> Self {
            let registry = PeerRegistry::wire_up(1, peers).unwrap();
            let ids = ProposalIdGenerator::new(1, registry.peer_count());
            Harness {
                registry,
                ids,
                state: ProposerState::default(),
                log: LocalLog::new(),
                logger: NodeLogger::new(1, sink),
            }
        }

        fn run(&mut self, policy: &RetryPolicy) -> Result<RoundOutcome, PaxosError> {
            RoundDriver::new(
                1,
                &self.registry,
                &mut self.ids,
                &mut self.state,
                &mut self.log,
                &self.logger,
            )
            .run(policy, &CancellationToken::new())
        }
    }

    #[test]
    fn lone_proposer_commits_fresh_value_first_try() {
        let sink = Arc::new(MemorySink::new());
        let peers = (1..=3)
            .map(|i| (i, Box::new(LocalPeer::new(i, sink.clone())) as Box<dyn Peer>))
            .collect();
        let mut h = Harness::new(peers, sink.clone());

        let outcome = h.run(&RetryPolicy::default()).unwrap();
        assert_eq!(outcome.value, 1);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.proposal_id, id(1));
        assert_eq!(outcome.offset, 2);
        assert_eq!(h.log.offset_of(1), Some(2));
        assert_eq!(h.state.proposed_value, Some(1));

        let sends = sink
            .entries_for(1)
            .into_iter()
            .filter(|e| e.message.starts_with("Sending Prepare"))
            .count();
        assert_eq!(sends, 3);
    }

    #[test]
    fn minority_of_unreachable_peers_still_commits() {
        let sink = Arc::new(MemorySink::new());
        let mut peers: BTreeMap<NodeId, Box<dyn Peer>> = BTreeMap::new();
        peers.insert(1, Box::new(LocalPeer::new(1, sink.clone())));
        peers.insert(2, Box::new(LocalPeer::new(2, sink.clone())));
        peers.insert(3, Box::new(Unreachable(3)));
        let mut h = Harness::new(peers, sink);

        assert_eq!(h.run(&RetryPolicy::default()).unwrap().value, 1);
    }

    #[test]
    fn majority_unreachable_exhausts_attempts() {
        let sink = Arc::new(MemorySink::new());
        let mut peers: BTreeMap<NodeId, Box<dyn Peer>> = BTreeMap::new();
        peers.insert(1, Box::new(LocalPeer::new(1, sink.clone())));
        peers.insert(2, Box::new(Unreachable(2)));
        peers.insert(3, Box::new(Unreachable(3)));
        let mut h = Harness::new(peers, sink.clone());

        let policy = RetryPolicy {
            max_attempts: Some(3),
            ..RetryPolicy::default()
        };
        assert_eq!(h.run(&policy), Err(PaxosError::RetriesExhausted { attempts: 3 }));
        // Three fresh ids were burned: 1, 4, 7.
        assert_eq!(h.ids.last(), Some(id(7)));
        assert_eq!(h.log.len(), 1);

        let retries: Vec<String> = sink
            .entries_for(1)
            .into_iter()
            .filter(|e| e.message.contains("retrying"))
            .map(|e| e.message)
            .collect();
        assert_eq!(retries.len(), 3);
        assert!(retries[0].contains("got 1 of 2 required"));
    }

    #[test]
    fn cancelled_token_stops_before_first_attempt() {
        let sink = Arc::new(MemorySink::new());
        let peers = (1..=3)
            .map(|i| (i, Box::new(Unreachable(i)) as Box<dyn Peer>))
            .collect();
        let mut h = Harness::new(peers, sink);
        let token = CancellationToken::new();
        token.cancel();

        let result = RoundDriver::new(1, &h.registry, &mut h.ids, &mut h.state, &mut h.log, &h.logger)
            .run(&RetryPolicy::default(), &token);
        assert_eq!(result, Err(PaxosError::Cancelled { attempts: 0 }));
        assert_eq!(h.ids.last(), None);
    }

    #[test]
    fn zero_timeout_is_exceeded_immediately() {
        let sink = Arc::new(MemorySink::new());
        let peers = (1..=1)
            .map(|i| (i, Box::new(LocalPeer::new(i, sink.clone())) as Box<dyn Peer>))
            .collect();
        let mut h = Harness::new(peers, sink);
        let policy = RetryPolicy {
            round_timeout: Some(Duration::ZERO),
            ..RetryPolicy::default()
        };
        assert!(matches!(h.run(&policy), Err(PaxosError::TimeoutExceeded { .. })));
    }

    #[test]
    fn failed_accept_phase_restarts_with_fresh_prepare() {
        let sink = Arc::new(MemorySink::new());
        let mut peers: BTreeMap<NodeId, Box<dyn Peer>> = BTreeMap::new();
        peers.insert(1, Box::new(LocalPeer::new(1, sink.clone())));
        peers.insert(2, Box::new(PromiseThenReject(2)));
        peers.insert(3, Box::new(PromiseThenReject(3)));
        let mut h = Harness::new(peers, sink.clone());

        let policy = RetryPolicy {
            max_attempts: Some(3),
            ..RetryPolicy::default()
        };
        assert_eq!(h.run(&policy), Err(PaxosError::RetriesExhausted { attempts: 3 }));

        // Each attempt ran a new Prepare round under a new id before failing in Accept.
        assert_eq!(h.ids.last(), Some(id(7)));
        assert_eq!(count_lines(&sink, "Sending Prepare(1)"), 3);
        assert_eq!(count_lines(&sink, "Sending Prepare(4)"), 3);
        assert_eq!(count_lines(&sink, "Sending Prepare(7)"), 3);
        assert_eq!(count_lines(&sink, "Sending Accept("), 9);
        assert_eq!(count_lines(&sink, "Consensus reached"), 0);

        // Nothing is committed without an accept quorum.
        assert_eq!(h.log.len(), 1);
        assert_eq!(h.log.offset_of(1), None);
        assert_eq!(h.state.proposed_value, Some(1));

        let retries: Vec<String> = sink
            .entries_for(1)
            .into_iter()
            .filter(|e| e.message.contains("retrying"))
            .map(|e| e.message)
            .collect();
        assert_eq!(retries.len(), 3);
        assert!(retries
            .iter()
            .all(|line| line.contains("rejected by 2 peer(s) in accept phase")));
    }

    #[test]
    fn deadline_is_checked_between_peer_calls() {
        let sink = Arc::new(MemorySink::new());
        let peers = (1..=3)
            .map(|i| (i, Box::new(Slow(i, Duration::from_millis(25))) as Box<dyn Peer>))
            .collect();
        let mut h = Harness::new(peers, sink.clone());

        let policy = RetryPolicy {
            round_timeout: Some(Duration::from_millis(30)),
            ..RetryPolicy::default()
        };
        assert!(matches!(h.run(&policy), Err(PaxosError::TimeoutExceeded { .. })));
        // The third peer is never called: 25ms + 25ms is already past 30ms.
        assert!(count_lines(&sink, "Sending Prepare(1)") < 3);
        assert_eq!(count_lines(&sink, "Sending Accept("), 0);
    }
}
