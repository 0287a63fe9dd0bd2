//! Scripted local walkthrough of the encrypted score ledger.
//!
//! Spins up an in-process chain and runs two players through the full
//! lifecycle: encrypted submission, homomorphic compare-and-replace,
//! authorization, and owner-only decryption.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use log::info;

use cipherscore_client::{
    ChainConfig, CiphertextCodec, DecryptError, DecryptionAuthorizer, DecryptionSession,
    InProcessChain, KeypairSigner, SubmissionOrchestrator,
};
use cipherscore_fhe::{Coprocessor, Keypair};
use cipherscore_ledger::ScoreLedger;

pub struct DemoConfig {
    pub chain_id: u64,
    pub authorization_ttl: Duration,
    pub scores: Vec<u32>,
    pub rival_score: u32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            chain_id: 31337,
            authorization_ttl: Duration::from_secs(600),
            scores: vec![15, 88, 22],
            rival_score: 99,
        }
    }
}

struct Player {
    name: &'static str,
    keys: Arc<Keypair>,
    orchestrator: SubmissionOrchestrator,
    session: DecryptionSession,
}

impl Player {
    fn new(
        name: &'static str,
        coprocessor: &Arc<Coprocessor>,
        chain: &Arc<InProcessChain>,
        contract: cipherscore_fhe::Address,
        ttl: Duration,
    ) -> anyhow::Result<Self> {
        let keys = Arc::new(Keypair::new_random());
        let codec = CiphertextCodec::new(Some(coprocessor.session()))
            .context("failed to build ciphertext codec")?;
        let orchestrator =
            SubmissionOrchestrator::new(codec, chain.clone(), contract, keys.address());

        let signer = Arc::new(KeypairSigner::new(Arc::clone(&keys)));
        let authorizer = Arc::new(DecryptionAuthorizer::new(signer, ttl));
        let session = DecryptionSession::new(
            authorizer,
            chain.clone(),
            coprocessor.clone(),
            Arc::clone(&keys),
            contract,
        );

        Ok(Self {
            name,
            keys,
            orchestrator,
            session,
        })
    }

    async fn submit(&self, score: u32) -> anyhow::Result<()> {
        println!("🎮 {} submits an encrypted score of {score}", self.name);
        self.orchestrator
            .submit_score(score)
            .await
            .with_context(|| format!("submission of {score} failed"))?;
        println!("   {}", self.orchestrator.status().borrow().clone());
        Ok(())
    }

    async fn decrypt_own(&self) -> anyhow::Result<u32> {
        let plaintext = self
            .session
            .decrypt_score(self.keys.address())
            .await
            .context("owner decryption failed")?;
        println!("🔓 {} decrypts their top score: {plaintext}", self.name);
        Ok(plaintext)
    }
}

pub async fn run_demo(config: DemoConfig) -> anyhow::Result<()> {
    println!("🔐 Starting local encrypted score ledger (chain id {})", config.chain_id);

    let coprocessor = Arc::new(Coprocessor::new(config.chain_id));
    let contract = cipherscore_fhe::Address([0xed; 20]);
    let ledger = Arc::new(ScoreLedger::new(contract, Arc::clone(&coprocessor)));
    let chain = Arc::new(InProcessChain::new(ledger, ChainConfig::default()));
    info!("ledger deployed at {contract}");

    let alice = Player::new(
        "alice",
        &coprocessor,
        &chain,
        contract,
        config.authorization_ttl,
    )?;
    let bob = Player::new(
        "bob",
        &coprocessor,
        &chain,
        contract,
        config.authorization_ttl,
    )?;

    println!();
    for score in &config.scores {
        alice.submit(*score).await?;
    }
    bob.submit(config.rival_score).await?;

    println!();
    let alice_top = alice.decrypt_own().await?;
    let bob_top = bob.decrypt_own().await?;

    let expected = config.scores.iter().copied().max().unwrap_or(0);
    anyhow::ensure!(
        alice_top == expected,
        "stored top score {alice_top} does not match expected maximum {expected}"
    );
    anyhow::ensure!(bob_top == config.rival_score, "rival score mismatch");

    // Cross-player decryption must be denied without leaking anything.
    println!();
    match bob.session.decrypt_score(alice.keys.address()).await {
        Err(DecryptError::AccessDenied(_)) => {
            println!("🚫 bob is denied decryption of alice's score, as expected");
        }
        Ok(value) => anyhow::bail!("confidentiality breach: bob read alice's score ({value})"),
        Err(other) => anyhow::bail!("unexpected failure on cross-player decryption: {other}"),
    }

    println!();
    println!("✅ Demo complete: scores stay encrypted, only the owner can read them");
    Ok(())
}
