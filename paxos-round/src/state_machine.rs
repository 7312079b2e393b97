use std::collections::BTreeMap;

use serde::Serialize;

use crate::paxos::Value;

/// Per-node record of committed values, keyed by value with a stored offset.
///
/// Starts as `{0 -> 0}`. Committing `v` stores
/// `v -> offset(greatest existing key) + 2`. Nothing is persisted and
/// nothing is replicated to other nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalLog {
    entries: BTreeMap<Value, u64>,
}

impl LocalLog {
    const OFFSET_STRIDE: u64 = 2;

    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(0, 0);
        LocalLog { entries }
    }

    /// The greatest key recorded so far.
    pub fn latest_key(&self) -> Value {
        self.entries
            .last_key_value()
            .map(|(k, _)| *k)
            .unwrap_or_default()
    }

    /// The value a proposer offers when no acceptor reported an earlier one.
    pub fn next_fresh_value(&self) -> Value {
        self.latest_key() + 1
    }

    /// Record `value` and return the offset it was stored at.
    pub fn commit(&mut self, value: Value) -> u64 {
        let base = self
            .entries
            .last_key_value()
            .map(|(_, offset)| *offset)
            .unwrap_or_default();
        let offset = base + Self::OFFSET_STRIDE;
        self.entries.insert(value, offset);
        offset
    }

    pub fn offset_of(&self, value: Value) -> Option<u64> {
        self.entries.get(&value).copied()
    }

    pub fn entries(&self) -> &BTreeMap<Value, u64> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for LocalLog {
    fn default() -> Self {
        LocalLog::new()
    }
}
