//! Chain access for the score ledger.
//!
//! [`ScoreChain`] is the wire contract the client pipelines talk to, split
//! into a submit phase and a confirmation phase the way wallet flows are:
//! submission yields a transaction hash immediately, reverts surface at
//! confirmation. [`InProcessChain`] adapts a local [`ScoreLedger`] behind
//! it, serializing writes the way a consensus layer would.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use log::debug;
use thiserror::Error;
use tokio::sync::Mutex;

use cipherscore_fhe::{Address, CiphertextHandle, EncryptedInput};
use cipherscore_ledger::{LedgerError, ScoreLedger};

/// Gas limit attached to `record_score` transactions.
pub const RECORD_SCORE_GAS_LIMIT: u64 = 350_000;

#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub gas_limit: u64,
    /// How long to wait for a submitted transaction to confirm.
    pub confirmation_timeout: Duration,
    /// Attempts per read call before a transport failure is surfaced.
    pub max_retries: u32,
    /// Delay between read retries.
    pub retry_delay: Duration,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            gas_limit: RECORD_SCORE_GAS_LIMIT,
            confirmation_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

/// Transaction hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash(pub [u8; 32]);

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TxHash({self})")
    }
}

/// Result of a confirmed transaction.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub confirmed: bool,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    /// The transaction executed and reverted; `reason` carries the revert
    /// string when the chain exposes one.
    #[error("transaction reverted: {reason}")]
    Reverted { reason: String },

    /// A read call found no record; `reason` carries the contract's revert
    /// string (expected condition, used to gate UI).
    #[error("{reason}")]
    NotFound { reason: String },

    /// The transaction was accepted but never confirmed in time.
    #[error("transaction confirmation timed out")]
    ConfirmationTimeout,

    /// Transport-level failure talking to the chain.
    #[error("rpc failure: {0}")]
    Rpc(String),
}

impl ChainError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ChainError::NotFound { .. })
    }
}

/// The ledger's wire contract, as seen from the client.
pub trait ScoreChain: Send + Sync {
    /// Submits `recordScore(handle, inputProof)` as `caller`, returning the
    /// transaction hash without waiting for inclusion. Failures here are
    /// wallet or transport failures; execution outcomes surface at
    /// [`ScoreChain::confirm`].
    fn submit_record_score(
        &self,
        caller: Address,
        input: EncryptedInput,
    ) -> BoxFuture<'static, Result<TxHash, ChainError>>;

    /// Waits for a submitted transaction to confirm. Reverts surface here,
    /// with the revert reason when the chain exposes one.
    fn confirm(&self, tx_hash: TxHash) -> BoxFuture<'static, Result<TxReceipt, ChainError>>;

    /// Reads `viewTopScore(player)`.
    fn view_top_score(
        &self,
        player: Address,
    ) -> BoxFuture<'static, Result<CiphertextHandle, ChainError>>;

    /// Reads `hasScore(player)`.
    fn has_score(&self, player: Address) -> BoxFuture<'static, Result<bool, ChainError>>;
}

/// Retries a read call on transport failures, up to `max_retries` attempts
/// with `retry_delay` between them. Contract-level outcomes (reverts,
/// missing records) are returned as-is.
async fn retry_read<T, F, Fut>(config: &ChainConfig, mut call: F) -> Result<T, ChainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChainError>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Err(ChainError::Rpc(reason)) if attempt < config.max_retries => {
                debug!(
                    "read call failed ({reason}), attempt {attempt}/{}",
                    config.max_retries
                );
                attempt += 1;
                tokio::time::sleep(config.retry_delay).await;
            }
            other => return other,
        }
    }
}

/// A local, in-process chain wrapping the ledger directly.
///
/// `submit_record_score` calls are serialized behind one async mutex: the
/// consensus layer's per-ledger write ordering, not a client-side concern.
/// Execution outcomes are parked per tx hash until `confirm` collects them.
pub struct InProcessChain {
    ledger: Arc<ScoreLedger>,
    config: ChainConfig,
    write_lock: Arc<Mutex<()>>,
    nonce: Arc<AtomicU64>,
    outcomes: Arc<DashMap<TxHash, Result<(), String>>>,
}

impl InProcessChain {
    pub fn new(ledger: Arc<ScoreLedger>, config: ChainConfig) -> Self {
        Self {
            ledger,
            config,
            write_lock: Arc::new(Mutex::new(())),
            nonce: Arc::new(AtomicU64::new(0)),
            outcomes: Arc::new(DashMap::new()),
        }
    }
}

impl ScoreChain for InProcessChain {
    fn submit_record_score(
        &self,
        caller: Address,
        input: EncryptedInput,
    ) -> BoxFuture<'static, Result<TxHash, ChainError>> {
        let ledger = Arc::clone(&self.ledger);
        let write_lock = Arc::clone(&self.write_lock);
        let nonce = Arc::clone(&self.nonce);
        let outcomes = Arc::clone(&self.outcomes);
        let gas_limit = self.config.gas_limit;

        async move {
            let _guard = write_lock.lock().await;

            let sequence = nonce.fetch_add(1, Ordering::SeqCst);
            let mut hasher = blake3::Hasher::new();
            hasher.update(caller.as_bytes());
            hasher.update(&input.proof);
            hasher.update(&sequence.to_le_bytes());
            let tx_hash = TxHash(*hasher.finalize().as_bytes());

            debug!("record_score tx {tx_hash} from {caller} (gas limit {gas_limit})");

            let outcome = ledger.record_score(caller, &input).map_err(|e| e.to_string());
            outcomes.insert(tx_hash, outcome);
            Ok(tx_hash)
        }
        .boxed()
    }

    fn confirm(&self, tx_hash: TxHash) -> BoxFuture<'static, Result<TxReceipt, ChainError>> {
        let outcomes = Arc::clone(&self.outcomes);
        let wait = self.config.confirmation_timeout;

        async move {
            let lookup = async move {
                match outcomes.remove(&tx_hash) {
                    Some((_, Ok(()))) => Ok(TxReceipt {
                        tx_hash,
                        confirmed: true,
                    }),
                    Some((_, Err(reason))) => Err(ChainError::Reverted { reason }),
                    None => Err(ChainError::Rpc(format!("unknown transaction {tx_hash}"))),
                }
            };
            match tokio::time::timeout(wait, lookup).await {
                Ok(result) => result,
                Err(_) => Err(ChainError::ConfirmationTimeout),
            }
        }
        .boxed()
    }

    fn view_top_score(
        &self,
        player: Address,
    ) -> BoxFuture<'static, Result<CiphertextHandle, ChainError>> {
        let ledger = Arc::clone(&self.ledger);
        let config = self.config.clone();
        async move {
            retry_read(&config, || {
                let ledger = Arc::clone(&ledger);
                async move {
                    ledger.view_top_score(player).map_err(|e| match e {
                        LedgerError::NotFound => ChainError::NotFound {
                            reason: e.to_string(),
                        },
                        other => ChainError::Reverted {
                            reason: other.to_string(),
                        },
                    })
                }
            })
            .await
        }
        .boxed()
    }

    fn has_score(&self, player: Address) -> BoxFuture<'static, Result<bool, ChainError>> {
        let ledger = Arc::clone(&self.ledger);
        let config = self.config.clone();
        async move {
            retry_read(&config, || {
                let ledger = Arc::clone(&ledger);
                async move { Ok(ledger.has_score(player)) }
            })
            .await
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cipherscore_fhe::{Coprocessor, EncryptedInputBuilder, Keypair};
    use cipherscore_ledger::NO_SCORE_REASON;
    use std::sync::atomic::AtomicU32;

    fn setup() -> (Arc<Coprocessor>, InProcessChain) {
        let coprocessor = Arc::new(Coprocessor::new(31337));
        let ledger = Arc::new(ScoreLedger::new(
            Address([0xed; 20]),
            Arc::clone(&coprocessor),
        ));
        (coprocessor.clone(), InProcessChain::new(ledger, ChainConfig::default()))
    }

    #[tokio::test]
    async fn test_view_before_submission_is_not_found() {
        let (_, chain) = setup();
        let err = chain.view_top_score(Address([1; 20])).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), NO_SCORE_REASON);
    }

    #[tokio::test]
    async fn test_submit_then_confirm() {
        let (coprocessor, chain) = setup();
        let alice = Keypair::new_random();

        let input = EncryptedInputBuilder::new(Address([0xed; 20]), alice.address())
            .add32(42)
            .encrypt(&coprocessor.session())
            .unwrap();

        let tx_hash = chain
            .submit_record_score(alice.address(), input)
            .await
            .unwrap();
        let receipt = chain.confirm(tx_hash).await.unwrap();

        assert!(receipt.confirmed);
        assert_eq!(receipt.tx_hash, tx_hash);
        assert!(chain.has_score(alice.address()).await.unwrap());
        assert!(chain.view_top_score(alice.address()).await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_proof_reverts_at_confirmation() {
        let (coprocessor, chain) = setup();
        let alice = Keypair::new_random();
        let mallory = Keypair::new_random();

        let input = EncryptedInputBuilder::new(Address([0xed; 20]), alice.address())
            .add32(42)
            .encrypt(&coprocessor.session())
            .unwrap();

        // Submission itself is accepted; the revert surfaces at confirmation.
        let tx_hash = chain
            .submit_record_score(mallory.address(), input)
            .await
            .unwrap();
        let err = chain.confirm(tx_hash).await.unwrap_err();
        match err {
            ChainError::Reverted { reason } => {
                assert!(reason.contains("invalid encrypted input"), "{reason}")
            }
            other => panic!("expected revert, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_confirm_unknown_transaction_is_rpc_error() {
        let (_, chain) = setup();
        let err = chain.confirm(TxHash([7; 32])).await.unwrap_err();
        assert!(matches!(err, ChainError::Rpc(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_retry_transient_rpc_failures() {
        let config = ChainConfig::default();
        let calls = Arc::new(AtomicU32::new(0));

        let result = retry_read(&config, || {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ChainError::Rpc("connection reset".into()))
                } else {
                    Ok(7u32)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_retries_are_bounded() {
        let config = ChainConfig::default();
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<u32, ChainError> = retry_read(&config, || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ChainError::Rpc("connection reset".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(ChainError::Rpc(_))));
        assert_eq!(calls.load(Ordering::SeqCst), config.max_retries);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverts_are_not_retried() {
        let config = ChainConfig::default();
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<u32, ChainError> = retry_read(&config, || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ChainError::Reverted {
                    reason: "out of gas".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(ChainError::Reverted { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
