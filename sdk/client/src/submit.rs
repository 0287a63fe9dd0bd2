//! Submission orchestrator.
//!
//! The client-side state machine for `submit_score`: encrypt, submit, await
//! confirmation, refresh the local handle cache. Exactly one submission may
//! be in flight per session; a second call is rejected with
//! [`SubmitError::AlreadyInFlight`] rather than queued.
//!
//! The session owns its lifecycle: `reset` bumps a generation counter, and
//! any step completing under a stale generation is discarded instead of
//! corrupting the reset state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::watch;

use cipherscore_fhe::{Address, CiphertextHandle};

use crate::chain::{ChainError, ScoreChain, TxHash};
use crate::codec::{CiphertextCodec, CodecError};

/// Lifecycle of one `submit_score` call.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionState {
    Idle,
    Encrypting,
    AwaitingSignature,
    Pending(TxHash),
    Confirmed,
    Failed(SubmitError),
}

impl SubmissionState {
    /// States in which a new submission may start.
    fn at_rest(&self) -> bool {
        matches!(
            self,
            SubmissionState::Idle | SubmissionState::Confirmed | SubmissionState::Failed(_)
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubmitError {
    /// A submission is already in flight for this session.
    #[error("a submission is already in flight for this session")]
    AlreadyInFlight,

    /// Plaintext-to-ciphertext encoding failed.
    #[error("encryption failed: {0}")]
    Encryption(CodecError),

    /// The transaction could not be submitted (wallet rejection, RPC error).
    #[error("submission failed: {0}")]
    Submission(String),

    /// The transaction reverted or never confirmed.
    #[error("chain error: {0}")]
    Chain(ChainError),
}

impl SubmitError {
    /// Whether re-invoking `submit_score` from an at-rest state may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SubmitError::AlreadyInFlight => false,
            SubmitError::Encryption(_) => false,
            SubmitError::Submission(_) => true,
            SubmitError::Chain(_) => true,
        }
    }
}

/// One submission session, exclusively owned by a single caller identity.
pub struct SubmissionOrchestrator {
    codec: CiphertextCodec,
    chain: Arc<dyn ScoreChain>,
    contract: Address,
    caller: Address,
    state: Mutex<SubmissionState>,
    generation: AtomicU64,
    status: watch::Sender<String>,
    /// Read-through cache of the caller's top-score handle; invalidated
    /// after every successful submission, safely stale otherwise.
    top_score: Mutex<Option<CiphertextHandle>>,
}

impl SubmissionOrchestrator {
    pub fn new(
        codec: CiphertextCodec,
        chain: Arc<dyn ScoreChain>,
        contract: Address,
        caller: Address,
    ) -> Self {
        let (status, _) = watch::channel(String::new());
        Self {
            codec,
            chain,
            contract,
            caller,
            state: Mutex::new(SubmissionState::Idle),
            generation: AtomicU64::new(0),
            status,
            top_score: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SubmissionState {
        self.state.lock().expect("state lock poisoned").clone()
    }

    /// Human-readable status text, updated at every state transition.
    pub fn status(&self) -> watch::Receiver<String> {
        self.status.subscribe()
    }

    /// Last fetched top-score handle for this caller, if any.
    pub fn cached_top_score(&self) -> Option<CiphertextHandle> {
        *self.top_score.lock().expect("cache lock poisoned")
    }

    /// Abandons any in-flight submission and returns the session to `Idle`.
    /// A late response from the abandoned attempt is ignored.
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().expect("state lock poisoned") = SubmissionState::Idle;
        let _ = self.status.send_replace(String::new());
        debug!("submission session reset for {}", self.caller);
    }

    /// Submits an encrypted score and waits for on-chain confirmation.
    ///
    /// Success means the ledger accepted the submission; whether the value
    /// became the stored maximum is the ledger's own call and is never
    /// second-guessed here.
    pub async fn submit_score(&self, value: u32) -> Result<(), SubmitError> {
        let generation = {
            let mut state = self.state.lock().expect("state lock poisoned");
            if !state.at_rest() {
                return Err(SubmitError::AlreadyInFlight);
            }
            *state = SubmissionState::Encrypting;
            self.generation.load(Ordering::SeqCst)
        };
        self.announce(generation, format!("Encrypting score {value}..."));

        let input = match self.codec.encrypt(value, self.contract, self.caller).await {
            Ok(input) => input,
            Err(e) => return Err(self.fail(generation, SubmitError::Encryption(e))),
        };

        self.transition(
            generation,
            SubmissionState::AwaitingSignature,
            "Submitting encrypted score...".into(),
        );

        let tx_hash = match self.chain.submit_record_score(self.caller, input).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => return Err(self.fail(generation, SubmitError::Submission(e.to_string()))),
        };

        self.transition(
            generation,
            SubmissionState::Pending(tx_hash),
            "Waiting for blockchain confirmation...".into(),
        );

        let receipt = match self.chain.confirm(tx_hash).await {
            Ok(receipt) => receipt,
            Err(e) => return Err(self.fail(generation, SubmitError::Chain(e))),
        };

        if !receipt.confirmed {
            return Err(self.fail(
                generation,
                SubmitError::Chain(ChainError::ConfirmationTimeout),
            ));
        }

        // Invalidate and refresh the read-through handle cache. A failed
        // refresh is not a failed submission.
        *self.top_score.lock().expect("cache lock poisoned") = None;
        match self.chain.view_top_score(self.caller).await {
            Ok(handle) => {
                if self.generation.load(Ordering::SeqCst) == generation {
                    *self.top_score.lock().expect("cache lock poisoned") = Some(handle);
                }
            }
            Err(e) => warn!("top-score refresh failed after submission: {e}"),
        }

        self.transition(
            generation,
            SubmissionState::Confirmed,
            format!("Your score ({value}) is submitted!"),
        );
        info!(
            "score submission confirmed for {} (tx {tx_hash})",
            self.caller
        );
        Ok(())
    }

    /// Applies a state transition unless the session was reset underneath us.
    fn transition(&self, generation: u64, next: SubmissionState, message: String) {
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("discarding late transition to {next:?} after reset");
            return;
        }
        *self.state.lock().expect("state lock poisoned") = next;
        let _ = self.status.send_replace(message);
    }

    fn announce(&self, generation: u64, message: String) {
        if self.generation.load(Ordering::SeqCst) == generation {
            let _ = self.status.send_replace(message);
        }
    }

    fn fail(&self, generation: u64, error: SubmitError) -> SubmitError {
        warn!("submission failed for {}: {error}", self.caller);
        self.transition(
            generation,
            SubmissionState::Failed(error.clone()),
            format!("recordScore() failed: {error}"),
        );
        error
    }
}
