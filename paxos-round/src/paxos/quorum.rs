use crate::paxos::PeerResponse;

/// `floor(n / 2) + 1`.
pub fn majority(peer_count: usize) -> usize {
    peer_count / 2 + 1
}

/// Number of responses that are not a rejection.
pub fn granted<R: PeerResponse>(responses: &[R]) -> usize {
    responses.iter().filter(|r| !r.is_reject()).count()
}

/// True when at least `majority` responses are not rejections.
pub fn evaluate<R: PeerResponse>(responses: &[R], majority: usize) -> bool {
    granted(responses) >= majority
}
