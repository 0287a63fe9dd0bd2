//! Decryption session.
//!
//! Sequences authorization → handle fetch → backend decryption for one
//! viewer. Exactly one decryption is in flight per viewer: concurrent calls
//! coalesce onto the shared in-flight future rather than issuing duplicate
//! backend requests.
//!
//! Access control is the backend's job. This session only classifies the
//! outcome: `AccessDenied` is fatal and never retried; `BackendUnavailable`
//! is transient and safe to retry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::watch;

use cipherscore_fhe::{
    Address, CiphertextHandle, Coprocessor, DecryptionAuthorization, FheError, Keypair,
    SealedValue,
};

use crate::authorizer::{AuthError, DecryptionAuthorizer};
use crate::chain::{ChainError, ScoreChain};

/// Errors from the decryption backend, already classified by retryability.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// The viewer is not entitled to this ciphertext. Fatal.
    #[error("decryption denied: {0}")]
    AccessDenied(String),

    /// Transient infrastructure failure. Retryable.
    #[error("decryption backend unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the request (bad authorization, unknown handle).
    #[error("decryption rejected: {0}")]
    Rejected(String),
}

/// The decryption backend capability.
pub trait DecryptionBackend: Send + Sync {
    fn user_decrypt(
        &self,
        handle: CiphertextHandle,
        authorization: DecryptionAuthorization,
    ) -> BoxFuture<'static, Result<SealedValue, BackendError>>;
}

impl DecryptionBackend for Coprocessor {
    fn user_decrypt(
        &self,
        handle: CiphertextHandle,
        authorization: DecryptionAuthorization,
    ) -> BoxFuture<'static, Result<SealedValue, BackendError>> {
        let result = Coprocessor::user_decrypt(self, handle, &authorization).map_err(|e| match e {
            FheError::AccessDenied { .. } => BackendError::AccessDenied(e.to_string()),
            other => BackendError::Rejected(other.to_string()),
        });
        async move { result }.boxed()
    }
}

/// Lifecycle of one `decrypt_score` call.
#[derive(Debug, Clone, PartialEq)]
pub enum DecryptionState {
    Idle,
    Authorizing,
    Fetching,
    Decrypting,
    Ready(u32),
    Failed(DecryptError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecryptError {
    /// The viewer declined the authorization prompt. Recoverable.
    #[error("viewer declined the decryption authorization")]
    Declined,

    /// Authorization failed for a non-interactive reason.
    #[error("authorization failed: {0}")]
    Auth(AuthError),

    /// The player has no recorded score.
    #[error("no score recorded for player {0}")]
    NoScore(Address),

    /// The backend refused decryption for this viewer. Fatal; no plaintext
    /// is ever exposed on this path.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Transient backend failure; safe to retry with backoff.
    #[error("decryption backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend rejected the request outright (bad authorization,
    /// unknown handle). Fatal; retrying the same request cannot succeed.
    #[error("decryption rejected: {0}")]
    Rejected(String),

    /// A chain read failed.
    #[error("chain read failed: {0}")]
    Chain(ChainError),

    /// The sealed plaintext could not be opened with the viewer's key.
    #[error("sealed value could not be opened: {0}")]
    Unsealable(String),
}

impl DecryptError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DecryptError::Declined => true,
            DecryptError::BackendUnavailable(_) => true,
            DecryptError::Chain(_) => true,
            DecryptError::Auth(_) => false,
            DecryptError::NoScore(_) => false,
            DecryptError::AccessDenied(_) => false,
            DecryptError::Rejected(_) => false,
            DecryptError::Unsealable(_) => false,
        }
    }
}

type InFlightDecrypt = Shared<BoxFuture<'static, Result<u32, DecryptError>>>;

/// Shared pieces the in-flight future mutates.
struct SessionShared {
    state: Mutex<DecryptionState>,
    generation: AtomicU64,
    status: watch::Sender<String>,
    results: DashMap<CiphertextHandle, u32>,
}

impl SessionShared {
    fn transition(&self, generation: u64, next: DecryptionState, message: &str) {
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("discarding late decryption transition to {next:?} after reset");
            return;
        }
        *self.state.lock().expect("state lock poisoned") = next;
        let _ = self.status.send(message.to_string());
    }
}

/// One decryption session per viewer.
pub struct DecryptionSession {
    authorizer: Arc<DecryptionAuthorizer>,
    chain: Arc<dyn ScoreChain>,
    backend: Arc<dyn DecryptionBackend>,
    keys: Arc<Keypair>,
    contract: Address,
    shared: Arc<SessionShared>,
    inflight: Mutex<Option<InFlightDecrypt>>,
}

impl DecryptionSession {
    pub fn new(
        authorizer: Arc<DecryptionAuthorizer>,
        chain: Arc<dyn ScoreChain>,
        backend: Arc<dyn DecryptionBackend>,
        keys: Arc<Keypair>,
        contract: Address,
    ) -> Self {
        let (status, _) = watch::channel(String::new());
        Self {
            authorizer,
            chain,
            backend,
            keys,
            contract,
            shared: Arc::new(SessionShared {
                state: Mutex::new(DecryptionState::Idle),
                generation: AtomicU64::new(0),
                status,
                results: DashMap::new(),
            }),
            inflight: Mutex::new(None),
        }
    }

    /// The viewer this session decrypts for.
    pub fn viewer(&self) -> Address {
        self.keys.address()
    }

    pub fn state(&self) -> DecryptionState {
        self.shared.state.lock().expect("state lock poisoned").clone()
    }

    pub fn status(&self) -> watch::Receiver<String> {
        self.shared.status.subscribe()
    }

    /// Decrypted plaintext for a handle, if this session has produced one.
    pub fn result_for(&self, handle: CiphertextHandle) -> Option<u32> {
        self.shared.results.get(&handle).map(|v| *v)
    }

    /// Whether a decryption can start: the viewer has a score on the ledger
    /// and nothing is currently in flight.
    pub async fn can_decrypt(&self) -> bool {
        if self.inflight.lock().expect("inflight lock poisoned").is_some() {
            return false;
        }
        self.chain
            .has_score(self.viewer())
            .await
            .unwrap_or(false)
    }

    /// Abandons any in-flight decryption; its late result is discarded.
    pub fn reset(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        *self.inflight.lock().expect("inflight lock poisoned") = None;
        *self.shared.state.lock().expect("state lock poisoned") = DecryptionState::Idle;
        let _ = self.shared.status.send(String::new());
    }

    /// Decrypts `player`'s top score for this session's viewer.
    ///
    /// Concurrent calls while one is in flight share its result.
    pub async fn decrypt_score(&self, player: Address) -> Result<u32, DecryptError> {
        let request = {
            let mut inflight = self.inflight.lock().expect("inflight lock poisoned");
            match inflight.as_ref() {
                Some(pending) => {
                    debug!("joining in-flight decryption for viewer {}", self.viewer());
                    pending.clone()
                }
                None => {
                    let generation = self.shared.generation.load(Ordering::SeqCst);
                    let pending = Self::run(
                        Arc::clone(&self.authorizer),
                        Arc::clone(&self.chain),
                        Arc::clone(&self.backend),
                        Arc::clone(&self.keys),
                        Arc::clone(&self.shared),
                        self.contract,
                        player,
                        generation,
                    )
                    .boxed()
                    .shared();
                    *inflight = Some(pending.clone());
                    pending
                }
            }
        };

        let result = request.clone().await;
        self.clear_inflight(&request);
        result
    }

    /// Clears the in-flight slot, but only if it still holds the request we
    /// just awaited. A newer request installed by another caller in the
    /// meantime must keep coalescing and is left untouched.
    fn clear_inflight(&self, request: &InFlightDecrypt) {
        let mut inflight = self.inflight.lock().expect("inflight lock poisoned");
        if inflight
            .as_ref()
            .is_some_and(|current| current.ptr_eq(request))
        {
            *inflight = None;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        authorizer: Arc<DecryptionAuthorizer>,
        chain: Arc<dyn ScoreChain>,
        backend: Arc<dyn DecryptionBackend>,
        keys: Arc<Keypair>,
        shared: Arc<SessionShared>,
        contract: Address,
        player: Address,
        generation: u64,
    ) -> Result<u32, DecryptError> {
        let viewer = keys.address();

        shared.transition(
            generation,
            DecryptionState::Authorizing,
            "Requesting decryption authorization...",
        );
        let authorization = authorizer
            .get_or_create(viewer, contract)
            .await
            .map_err(|e| {
                let err = match e {
                    AuthError::UserDeclined => DecryptError::Declined,
                    other => DecryptError::Auth(other),
                };
                shared.transition(
                    generation,
                    DecryptionState::Failed(err.clone()),
                    "Decryption authorization failed",
                );
                err
            })?;

        shared.transition(
            generation,
            DecryptionState::Fetching,
            "Fetching encrypted top score...",
        );
        // The cached handle may be stale; always confirm against the ledger.
        let handle = match chain.view_top_score(player).await {
            Ok(handle) => handle,
            Err(e) => {
                let err = if e.is_not_found() {
                    DecryptError::NoScore(player)
                } else {
                    DecryptError::Chain(e)
                };
                shared.transition(
                    generation,
                    DecryptionState::Failed(err.clone()),
                    "Encrypted score unavailable",
                );
                return Err(err);
            }
        };

        shared.transition(generation, DecryptionState::Decrypting, "Decrypting score...");
        let sealed = backend
            .user_decrypt(handle, authorization)
            .await
            .map_err(|e| {
                let err = match e {
                    BackendError::AccessDenied(reason) => DecryptError::AccessDenied(reason),
                    BackendError::Unavailable(reason) => {
                        DecryptError::BackendUnavailable(reason)
                    }
                    BackendError::Rejected(reason) => DecryptError::Rejected(reason),
                };
                warn!("decryption failed for viewer {viewer}: {err}");
                shared.transition(
                    generation,
                    DecryptionState::Failed(err.clone()),
                    "Decryption failed",
                );
                err
            })?;

        let plaintext = sealed.open_u32(keys.decryption_secret()).map_err(|e| {
            let err = DecryptError::Unsealable(e.to_string());
            shared.transition(
                generation,
                DecryptionState::Failed(err.clone()),
                "Decryption failed",
            );
            err
        })?;

        // Publish only when the session has not been reset underneath us.
        if shared.generation.load(Ordering::SeqCst) == generation {
            shared.results.insert(handle, plaintext);
        }
        shared.transition(
            generation,
            DecryptionState::Ready(plaintext),
            "Decryption complete",
        );
        info!("decrypted top score for viewer {viewer}");
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorizer::KeypairSigner;
    use crate::chain::{ChainConfig, InProcessChain};
    use cipherscore_fhe::EncryptedInputBuilder;
    use cipherscore_ledger::ScoreLedger;
    use std::time::Duration;

    struct Harness {
        coprocessor: Arc<Coprocessor>,
        ledger: Arc<ScoreLedger>,
        chain: Arc<InProcessChain>,
        contract: Address,
    }

    fn harness() -> Harness {
        let coprocessor = Arc::new(Coprocessor::new(31337));
        let contract = Address([0xed; 20]);
        let ledger = Arc::new(ScoreLedger::new(contract, Arc::clone(&coprocessor)));
        let chain = Arc::new(InProcessChain::new(
            Arc::clone(&ledger),
            ChainConfig::default(),
        ));
        Harness {
            coprocessor,
            ledger,
            chain,
            contract,
        }
    }

    fn session_for(h: &Harness, keys: Arc<Keypair>) -> DecryptionSession {
        let signer = Arc::new(KeypairSigner::new(Arc::clone(&keys)));
        let authorizer = Arc::new(DecryptionAuthorizer::new(
            signer,
            Duration::from_secs(600),
        ));
        DecryptionSession::new(
            authorizer,
            h.chain.clone(),
            h.coprocessor.clone(),
            keys,
            h.contract,
        )
    }

    fn submit(h: &Harness, player: &Keypair, score: u32) {
        let input = EncryptedInputBuilder::new(h.contract, player.address())
            .add32(score)
            .encrypt(&h.coprocessor.session())
            .unwrap();
        h.ledger.record_score(player.address(), &input).unwrap();
    }

    #[tokio::test]
    async fn test_owner_decrypts_own_score() {
        let h = harness();
        let alice = Arc::new(Keypair::new_random());
        submit(&h, &alice, 42);

        let session = session_for(&h, Arc::clone(&alice));
        assert!(session.can_decrypt().await);

        let plaintext = session.decrypt_score(alice.address()).await.unwrap();
        assert_eq!(plaintext, 42);
        assert_eq!(session.state(), DecryptionState::Ready(42));

        let handle = h.ledger.view_top_score(alice.address()).unwrap();
        assert_eq!(session.result_for(handle), Some(42));
    }

    #[tokio::test]
    async fn test_no_score_is_gating_not_fatal() {
        let h = harness();
        let alice = Arc::new(Keypair::new_random());

        let session = session_for(&h, Arc::clone(&alice));
        assert!(!session.can_decrypt().await);

        let err = session.decrypt_score(alice.address()).await.unwrap_err();
        assert_eq!(err, DecryptError::NoScore(alice.address()));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_non_owner_gets_access_denied_without_plaintext() {
        let h = harness();
        let alice = Arc::new(Keypair::new_random());
        let bob = Arc::new(Keypair::new_random());
        submit(&h, &alice, 73);

        let session = session_for(&h, Arc::clone(&bob));
        let err = session.decrypt_score(alice.address()).await.unwrap_err();

        assert!(matches!(err, DecryptError::AccessDenied(_)));
        assert!(!err.is_retryable());

        let handle = h.ledger.view_top_score(alice.address()).unwrap();
        assert_eq!(session.result_for(handle), None);
    }

    /// Backend that fails once with a transient error, then delegates.
    struct FlakyBackend {
        inner: Arc<Coprocessor>,
        failed_once: std::sync::atomic::AtomicBool,
    }

    impl DecryptionBackend for FlakyBackend {
        fn user_decrypt(
            &self,
            handle: CiphertextHandle,
            authorization: DecryptionAuthorization,
        ) -> BoxFuture<'static, Result<SealedValue, BackendError>> {
            if !self.failed_once.swap(true, Ordering::SeqCst) {
                return async {
                    Err(BackendError::Unavailable("relayer connection reset".into()))
                }
                .boxed();
            }
            DecryptionBackend::user_decrypt(self.inner.as_ref(), handle, authorization)
        }
    }

    #[tokio::test]
    async fn test_transient_backend_failure_is_retryable() {
        let h = harness();
        let alice = Arc::new(Keypair::new_random());
        submit(&h, &alice, 55);

        let signer = Arc::new(KeypairSigner::new(Arc::clone(&alice)));
        let authorizer = Arc::new(DecryptionAuthorizer::new(
            signer,
            Duration::from_secs(600),
        ));
        let backend = Arc::new(FlakyBackend {
            inner: h.coprocessor.clone(),
            failed_once: std::sync::atomic::AtomicBool::new(false),
        });
        let session = DecryptionSession::new(
            authorizer,
            h.chain.clone(),
            backend,
            Arc::clone(&alice),
            h.contract,
        );

        let err = session.decrypt_score(alice.address()).await.unwrap_err();
        assert!(matches!(err, DecryptError::BackendUnavailable(_)));
        assert!(err.is_retryable());

        // Retry succeeds without a second authorization prompt (cached).
        assert_eq!(session.decrypt_score(alice.address()).await.unwrap(), 55);
    }

    /// Backend that rejects every request outright.
    struct RejectingBackend;

    impl DecryptionBackend for RejectingBackend {
        fn user_decrypt(
            &self,
            _handle: CiphertextHandle,
            _authorization: DecryptionAuthorization,
        ) -> BoxFuture<'static, Result<SealedValue, BackendError>> {
            async { Err(BackendError::Rejected("unknown ciphertext handle".into())) }.boxed()
        }
    }

    #[tokio::test]
    async fn test_backend_rejection_is_fatal() {
        let h = harness();
        let alice = Arc::new(Keypair::new_random());
        submit(&h, &alice, 12);

        let signer = Arc::new(KeypairSigner::new(Arc::clone(&alice)));
        let authorizer = Arc::new(DecryptionAuthorizer::new(
            signer,
            Duration::from_secs(600),
        ));
        let session = DecryptionSession::new(
            authorizer,
            h.chain.clone(),
            Arc::new(RejectingBackend),
            Arc::clone(&alice),
            h.contract,
        );

        let err = session.decrypt_score(alice.address()).await.unwrap_err();
        assert!(matches!(err, DecryptError::Rejected(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_finished_request_cleanup_spares_newer_inflight() {
        let h = harness();
        let alice = Arc::new(Keypair::new_random());
        let session = session_for(&h, Arc::clone(&alice));

        let old: InFlightDecrypt = async { Ok::<u32, DecryptError>(1) }.boxed().shared();
        let newer: InFlightDecrypt = async { Ok::<u32, DecryptError>(2) }.boxed().shared();
        *session.inflight.lock().unwrap() = Some(newer.clone());

        // A caller whose request already completed must not evict a newer
        // in-flight request installed after it; evicting it would allow a
        // second simultaneous backend decrypt for the same viewer.
        session.clear_inflight(&old);
        assert!(
            session
                .inflight
                .lock()
                .unwrap()
                .as_ref()
                .is_some_and(|current| current.ptr_eq(&newer))
        );

        // The awaiter of the live request still cleans up after itself.
        session.clear_inflight(&newer);
        assert!(session.inflight.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_decrypts_share_one_result() {
        let h = harness();
        let alice = Arc::new(Keypair::new_random());
        submit(&h, &alice, 88);

        let session = Arc::new(session_for(&h, Arc::clone(&alice)));
        let (a, b) = tokio::join!(
            session.decrypt_score(alice.address()),
            session.decrypt_score(alice.address()),
        );

        assert_eq!(a.unwrap(), 88);
        assert_eq!(b.unwrap(), 88);
    }
}
