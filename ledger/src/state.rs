use dashmap::DashMap;

use cipherscore_fhe::{Address, CiphertextHandle};

/// One record per player. Created on the first successful submission,
/// never deleted; the handle is mutated only by compare-and-replace.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    pub owner: Address,
    pub top_score_handle: CiphertextHandle,
    pub has_score: bool,
}

/// Ledger-owned player records.
#[derive(Default)]
pub struct LedgerState {
    pub(crate) records: DashMap<Address, PlayerRecord>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, player: &Address) -> Option<PlayerRecord> {
        self.records.get(player).map(|r| r.clone())
    }
}
