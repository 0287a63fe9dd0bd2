//! Score ledger contract logic.
//!
//! `record_score` is the correctness-critical path: proof validation against
//! the (ledger, caller) binding, then an atomic homomorphic
//! compare-and-replace per player. The ledger never observes a plaintext.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use log::{debug, info};
use thiserror::Error;

use cipherscore_fhe::{Address, CiphertextHandle, Coprocessor, EncryptedInput, FheError};

use crate::state::{LedgerState, PlayerRecord};

/// Revert reason when a player has no recorded score.
pub const NO_SCORE_REASON: &str = "No Pac-Man score found for this player";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// The encrypted input failed proof validation (malformed, replayed, or
    /// bound to a different contract/submitter).
    #[error("invalid encrypted input: {0}")]
    InvalidProof(FheError),

    /// No score recorded for the queried player.
    #[error("{NO_SCORE_REASON}")]
    NotFound,

    /// The encryption backend rejected a homomorphic operation.
    #[error("fhe executor failure: {0}")]
    Fhe(FheError),
}

/// The encrypted score ledger.
pub struct ScoreLedger {
    address: Address,
    coprocessor: Arc<Coprocessor>,
    state: LedgerState,
}

impl ScoreLedger {
    pub fn new(address: Address, coprocessor: Arc<Coprocessor>) -> Self {
        Self {
            address,
            coprocessor,
            state: LedgerState::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Records an encrypted score for `caller`.
    ///
    /// First submission stores the handle as-is; later submissions keep the
    /// homomorphic maximum of the old and new values. The compare-and-replace
    /// runs under the player's record lock, so no two submissions from the
    /// same address can interleave it.
    pub fn record_score(
        &self,
        caller: Address,
        input: &EncryptedInput,
    ) -> Result<(), LedgerError> {
        let handles = self
            .coprocessor
            .verify_input(input, self.address, caller)
            .map_err(LedgerError::InvalidProof)?;
        if handles.len() != 1 {
            return Err(LedgerError::InvalidProof(FheError::InvalidProof(
                "record_score takes exactly one encrypted argument",
            )));
        }
        let new_handle = handles[0];

        let stored = match self.state.records.entry(caller) {
            Entry::Occupied(mut record) => {
                let current = record.get().top_score_handle;
                let is_higher = self
                    .coprocessor
                    .gt(new_handle, current)
                    .map_err(LedgerError::Fhe)?;
                let selected = self
                    .coprocessor
                    .select(is_higher, new_handle, current)
                    .map_err(LedgerError::Fhe)?;
                record.get_mut().top_score_handle = selected;
                debug!("compare-and-replace for {caller}: stored {selected}");
                selected
            }
            Entry::Vacant(slot) => {
                slot.insert(PlayerRecord {
                    owner: caller,
                    top_score_handle: new_handle,
                    has_score: true,
                });
                info!("first score recorded for {caller}");
                new_handle
            }
        };

        // Owner and ledger both keep decryption rights on the stored handle.
        self.coprocessor
            .allow(stored, caller)
            .map_err(LedgerError::Fhe)?;
        self.coprocessor
            .allow(stored, self.address)
            .map_err(LedgerError::Fhe)?;

        Ok(())
    }

    /// The current encrypted top score for `player`.
    pub fn view_top_score(&self, player: Address) -> Result<CiphertextHandle, LedgerError> {
        self.state
            .get(&player)
            .map(|record| record.top_score_handle)
            .ok_or(LedgerError::NotFound)
    }

    /// Whether `player` has at least one confirmed submission.
    pub fn has_score(&self, player: Address) -> bool {
        self.state
            .get(&player)
            .map(|record| record.has_score)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cipherscore_fhe::authorization::{DecryptionAuthorization, unix_now};
    use cipherscore_fhe::{EncryptedInputBuilder, Keypair};

    struct Fixture {
        coprocessor: Arc<Coprocessor>,
        ledger: ScoreLedger,
    }

    fn fixture() -> Fixture {
        let coprocessor = Arc::new(Coprocessor::new(31337));
        let ledger = ScoreLedger::new(Address([0xed; 20]), Arc::clone(&coprocessor));
        Fixture {
            coprocessor,
            ledger,
        }
    }

    fn submit(fx: &Fixture, player: &Keypair, score: u32) {
        let input = EncryptedInputBuilder::new(fx.ledger.address(), player.address())
            .add32(score)
            .encrypt(&fx.coprocessor.session())
            .expect("encryption should succeed");
        fx.ledger
            .record_score(player.address(), &input)
            .expect("record_score should succeed");
    }

    fn decrypt_top(fx: &Fixture, player: &Keypair) -> u32 {
        let handle = fx.ledger.view_top_score(player.address()).unwrap();
        let auth =
            DecryptionAuthorization::issue(player, fx.ledger.address(), unix_now() + 600);
        fx.coprocessor
            .user_decrypt(handle, &auth)
            .unwrap()
            .open_u32(player.decryption_secret())
            .unwrap()
    }

    #[test]
    fn test_query_before_any_play_fails() {
        let fx = fixture();
        let alice = Keypair::new_random();

        let err = fx.ledger.view_top_score(alice.address()).unwrap_err();
        assert_eq!(err, LedgerError::NotFound);
        assert_eq!(err.to_string(), NO_SCORE_REASON);
    }

    #[test]
    fn test_records_first_score() {
        let fx = fixture();
        let alice = Keypair::new_random();

        submit(&fx, &alice, 42);
        assert_eq!(decrypt_top(&fx, &alice), 42);
    }

    #[test]
    fn test_higher_score_replaces() {
        let fx = fixture();
        let alice = Keypair::new_random();

        submit(&fx, &alice, 15);
        submit(&fx, &alice, 88);
        assert_eq!(decrypt_top(&fx, &alice), 88);
    }

    #[test]
    fn test_lower_score_ignored() {
        let fx = fixture();
        let alice = Keypair::new_random();

        submit(&fx, &alice, 77);
        submit(&fx, &alice, 22);
        assert_eq!(decrypt_top(&fx, &alice), 77);
    }

    #[test]
    fn test_players_keep_independent_scores() {
        let fx = fixture();
        let alice = Keypair::new_random();
        let bob = Keypair::new_random();

        submit(&fx, &alice, 55);
        submit(&fx, &bob, 99);

        assert_eq!(decrypt_top(&fx, &alice), 55);
        assert_eq!(decrypt_top(&fx, &bob), 99);
    }

    #[test]
    fn test_has_score_flips_after_first_submission() {
        let fx = fixture();
        let alice = Keypair::new_random();

        assert!(!fx.ledger.has_score(alice.address()));
        submit(&fx, &alice, 66);
        assert!(fx.ledger.has_score(alice.address()));
    }

    #[test]
    fn test_input_bound_to_other_caller_rejected() {
        let fx = fixture();
        let alice = Keypair::new_random();
        let mallory = Keypair::new_random();

        let input = EncryptedInputBuilder::new(fx.ledger.address(), alice.address())
            .add32(1_000_000)
            .encrypt(&fx.coprocessor.session())
            .unwrap();

        let result = fx.ledger.record_score(mallory.address(), &input);
        assert!(matches!(result, Err(LedgerError::InvalidProof(_))));
        assert!(!fx.ledger.has_score(mallory.address()));
    }

    #[test]
    fn test_replayed_input_rejected() {
        let fx = fixture();
        let alice = Keypair::new_random();

        let input = EncryptedInputBuilder::new(fx.ledger.address(), alice.address())
            .add32(50)
            .encrypt(&fx.coprocessor.session())
            .unwrap();

        fx.ledger.record_score(alice.address(), &input).unwrap();
        assert!(matches!(
            fx.ledger.record_score(alice.address(), &input),
            Err(LedgerError::InvalidProof(_))
        ));
    }

    #[test]
    fn test_non_owner_cannot_decrypt_stored_score() {
        let fx = fixture();
        let alice = Keypair::new_random();
        let bob = Keypair::new_random();

        submit(&fx, &alice, 73);
        let handle = fx.ledger.view_top_score(alice.address()).unwrap();

        let bob_auth =
            DecryptionAuthorization::issue(&bob, fx.ledger.address(), unix_now() + 600);
        assert!(matches!(
            fx.coprocessor.user_decrypt(handle, &bob_auth),
            Err(FheError::AccessDenied { .. })
        ));
    }
}
