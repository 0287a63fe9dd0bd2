//! End-to-end lifecycle tests: encrypt, submit, confirm, authorize, decrypt,
//! all against an in-process chain wrapping a real ledger and coprocessor.

use std::sync::Arc;
use std::time::Duration;

use cipherscore_client::{
    AuthError, AuthorizationSigner, ChainConfig, CiphertextCodec, DecryptError,
    DecryptionAuthorizer, DecryptionSession, InProcessChain, KeypairSigner, ScoreChain,
    SubmissionOrchestrator, SubmissionState,
};
use cipherscore_fhe::{Address, Coprocessor, DecryptionAuthorization, Keypair};
use cipherscore_ledger::{NO_SCORE_REASON, ScoreLedger};
use futures::FutureExt;
use futures::future::BoxFuture;

struct Stack {
    coprocessor: Arc<Coprocessor>,
    chain: Arc<InProcessChain>,
    contract: Address,
}

fn stack() -> Stack {
    let coprocessor = Arc::new(Coprocessor::new(31337));
    let contract = Address([0xed; 20]);
    let ledger = Arc::new(ScoreLedger::new(contract, Arc::clone(&coprocessor)));
    let chain = Arc::new(InProcessChain::new(ledger, ChainConfig::default()));
    Stack {
        coprocessor,
        chain,
        contract,
    }
}

fn orchestrator_for(stack: &Stack, player: &Keypair) -> SubmissionOrchestrator {
    let codec = CiphertextCodec::new(Some(stack.coprocessor.session())).unwrap();
    SubmissionOrchestrator::new(
        codec,
        stack.chain.clone(),
        stack.contract,
        player.address(),
    )
}

fn session_for(stack: &Stack, keys: Arc<Keypair>) -> DecryptionSession {
    let signer = Arc::new(KeypairSigner::new(Arc::clone(&keys)));
    let authorizer = Arc::new(DecryptionAuthorizer::new(signer, Duration::from_secs(600)));
    DecryptionSession::new(
        authorizer,
        stack.chain.clone(),
        stack.coprocessor.clone(),
        keys,
        stack.contract,
    )
}

#[tokio::test]
async fn test_submit_then_decrypt_roundtrip() {
    let stack = stack();
    let alice = Arc::new(Keypair::new_random());

    let orchestrator = orchestrator_for(&stack, &alice);
    orchestrator.submit_score(42).await.unwrap();
    assert_eq!(orchestrator.state(), SubmissionState::Confirmed);

    let session = session_for(&stack, Arc::clone(&alice));
    assert_eq!(session.decrypt_score(alice.address()).await.unwrap(), 42);
}

#[tokio::test]
async fn test_top_score_is_monotonic_maximum() {
    let stack = stack();
    let alice = Arc::new(Keypair::new_random());
    let orchestrator = orchestrator_for(&stack, &alice);
    let session = session_for(&stack, Arc::clone(&alice));

    orchestrator.submit_score(15).await.unwrap();
    orchestrator.submit_score(88).await.unwrap();
    assert_eq!(session.decrypt_score(alice.address()).await.unwrap(), 88);

    orchestrator.submit_score(22).await.unwrap();
    assert_eq!(session.decrypt_score(alice.address()).await.unwrap(), 88);
}

#[tokio::test]
async fn test_players_are_isolated() {
    let stack = stack();
    let alice = Arc::new(Keypair::new_random());
    let bob = Arc::new(Keypair::new_random());

    orchestrator_for(&stack, &alice).submit_score(55).await.unwrap();
    orchestrator_for(&stack, &bob).submit_score(99).await.unwrap();

    let alice_session = session_for(&stack, Arc::clone(&alice));
    let bob_session = session_for(&stack, Arc::clone(&bob));

    assert_eq!(
        alice_session.decrypt_score(alice.address()).await.unwrap(),
        55
    );
    assert_eq!(bob_session.decrypt_score(bob.address()).await.unwrap(), 99);
}

#[tokio::test]
async fn test_has_score_gates_decryption() {
    let stack = stack();
    let alice = Arc::new(Keypair::new_random());
    let session = session_for(&stack, Arc::clone(&alice));

    assert!(!stack.chain.has_score(alice.address()).await.unwrap());
    assert!(!session.can_decrypt().await);

    orchestrator_for(&stack, &alice).submit_score(10).await.unwrap();

    assert!(stack.chain.has_score(alice.address()).await.unwrap());
    assert!(session.can_decrypt().await);
}

#[tokio::test]
async fn test_missing_score_surfaces_contract_reason() {
    let stack = stack();
    let ghost = Address([9; 20]);

    let err = stack.chain.view_top_score(ghost).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), NO_SCORE_REASON);
}

#[tokio::test]
async fn test_non_owner_decryption_denied_end_to_end() {
    let stack = stack();
    let alice = Arc::new(Keypair::new_random());
    let bob = Arc::new(Keypair::new_random());

    orchestrator_for(&stack, &alice).submit_score(73).await.unwrap();

    let bob_session = session_for(&stack, Arc::clone(&bob));
    let err = bob_session.decrypt_score(alice.address()).await.unwrap_err();
    assert!(matches!(err, DecryptError::AccessDenied(_)));
    assert!(!err.is_retryable());
}

/// Signer that declines the first prompt, then delegates.
struct ReluctantSigner {
    inner: KeypairSigner,
    declined_once: std::sync::atomic::AtomicBool,
}

impl AuthorizationSigner for ReluctantSigner {
    fn sign_authorization(
        &self,
        viewer: Address,
        contract: Address,
        expires_at: u64,
    ) -> BoxFuture<'static, Result<DecryptionAuthorization, AuthError>> {
        if !self
            .declined_once
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return async { Err(AuthError::UserDeclined) }.boxed();
        }
        self.inner.sign_authorization(viewer, contract, expires_at)
    }
}

#[tokio::test]
async fn test_declined_authorization_is_recoverable() {
    let stack = stack();
    let alice = Arc::new(Keypair::new_random());
    orchestrator_for(&stack, &alice).submit_score(31).await.unwrap();

    let signer = Arc::new(ReluctantSigner {
        inner: KeypairSigner::new(Arc::clone(&alice)),
        declined_once: std::sync::atomic::AtomicBool::new(false),
    });
    let authorizer = Arc::new(DecryptionAuthorizer::new(signer, Duration::from_secs(600)));
    let session = DecryptionSession::new(
        authorizer,
        stack.chain.clone(),
        stack.coprocessor.clone(),
        Arc::clone(&alice),
        stack.contract,
    );

    let err = session.decrypt_score(alice.address()).await.unwrap_err();
    assert_eq!(err, DecryptError::Declined);
    assert!(err.is_retryable());

    // Approving on the next attempt succeeds without any reset.
    assert_eq!(session.decrypt_score(alice.address()).await.unwrap(), 31);
}

#[tokio::test]
async fn test_submissions_interleave_across_players() {
    let stack = stack();
    let players: Vec<Arc<Keypair>> =
        (0..4).map(|_| Arc::new(Keypair::new_random())).collect();

    let mut handles = Vec::new();
    for (i, player) in players.iter().enumerate() {
        let orchestrator = Arc::new(orchestrator_for(&stack, player));
        let score = 100 + i as u32;
        handles.push(tokio::spawn(async move {
            orchestrator.submit_score(score).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for (i, player) in players.iter().enumerate() {
        let session = session_for(&stack, Arc::clone(player));
        assert_eq!(
            session.decrypt_score(player.address()).await.unwrap(),
            100 + i as u32
        );
    }
}
