use serde::{Deserialize, Serialize};

use crate::logger::NodeLogger;
use crate::paxos::{AcceptResponse, PrepareResponse, ProposalId, Value};

/// What an acceptor has promised and accepted so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptorState {
    pub promised_id: Option<ProposalId>,
    pub accepted: Option<(ProposalId, Value)>,
}

/// The acceptor half of a node. It is driven only by incoming Prepare and
/// Accept requests; the node's own proposer reaches it through its peer
/// handle like everyone else.
#[derive(Debug)]
pub struct Acceptor {
    state: AcceptorState,
    logger: NodeLogger,
}

impl Acceptor {
    pub fn new(logger: NodeLogger) -> Self {
        Acceptor {
            state: AcceptorState::default(),
            logger,
        }
    }

    pub fn state(&self) -> AcceptorState {
        self.state
    }

    pub fn prepare(&mut self, proposal_id: ProposalId) -> PrepareResponse {
        if let Some(promised) = self.state.promised_id {
            if proposal_id <= promised {
                self.logger.warn(format!(
                    "Acceptor: Rejected Prepare({}) (already promised {})",
                    proposal_id, promised
                ));
                return PrepareResponse::Reject;
            }
        }

        self.state.promised_id = Some(proposal_id);
        match self.state.accepted {
            Some((accepted_id, accepted_value)) => {
                self.logger.debug(format!(
                    "Acceptor: Promised {} carrying accepted ({}, {})",
                    proposal_id, accepted_id, accepted_value
                ));
                PrepareResponse::PromiseWithValue {
                    promised_id: proposal_id,
                    accepted_id,
                    accepted_value,
                }
            }
            None => {
                self.logger
                    .debug(format!("Acceptor: Promised {}", proposal_id));
                PrepareResponse::Promise {
                    promised_id: proposal_id,
                }
            }
        }
    }

    pub fn accept(&mut self, proposal_id: ProposalId, value: Value) -> AcceptResponse {
        if let Some(promised) = self.state.promised_id {
            if proposal_id < promised {
                self.logger.warn(format!(
                    "Acceptor: Rejected Accept({}, {}) (promised {})",
                    proposal_id, value, promised
                ));
                return AcceptResponse::Reject;
            }
        }

        self.state.accepted = Some((proposal_id, value));
        self.logger.debug(format!(
            "Acceptor: Accepted proposal {} with value {}",
            proposal_id, value
        ));
        AcceptResponse::Accepted {
            accepted_id: proposal_id,
            accepted_value: value,
        }
    }
}
