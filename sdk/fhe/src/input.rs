//! Encrypted Inputs
//!
//! Turns plaintext integers into ciphertext handles plus a proof of
//! well-formedness, bound to a specific contract and submitter.
//!
//! ```text
//! Flow:
//! 1. Submitter generates ephemeral keypair (epk, esk)
//! 2. Shared secret = ECDH(esk, network_pk)
//! 3. Encryption key = KDF(shared_secret, epk, contract, submitter, chain)
//! 4. Ciphertext = ChaCha20-Poly1305(key, nonce, encoded values)
//! 5. Proof = (epk, nonce, ciphertext); handle_i = H(ciphertext, binding, i)
//! ```
//!
//! The binding lives in the key derivation: verifying the proof against a
//! different contract or submitter derives a different key and fails the
//! AEAD authentication check.

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::address::Address;
use crate::coprocessor::EncryptionSession;
use crate::errors::FheError;
use crate::handle::CiphertextHandle;

/// Type tag for an encrypted 32-bit unsigned integer.
pub(crate) const TAG_EUINT32: u8 = 0x04;

/// Proof layout: ephemeral pk (32) || nonce (12) || AEAD ciphertext.
pub(crate) const PROOF_HEADER_LEN: usize = 32 + 12;

/// One or more ciphertext handles plus the proof attesting they were honestly
/// derived for the declared (contract, submitter) pair. Single-use per
/// submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedInput {
    pub handles: Vec<CiphertextHandle>,
    pub proof: Vec<u8>,
}

/// Builder mirroring the backend's input API:
/// `EncryptedInputBuilder::new(contract, submitter).add32(v).encrypt(&session)`.
pub struct EncryptedInputBuilder {
    contract: Address,
    submitter: Address,
    values: Vec<u32>,
}

impl EncryptedInputBuilder {
    pub fn new(contract: Address, submitter: Address) -> Self {
        Self {
            contract,
            submitter,
            values: Vec::new(),
        }
    }

    /// Appends an encrypted 32-bit unsigned integer argument.
    pub fn add32(mut self, value: u32) -> Self {
        self.values.push(value);
        self
    }

    /// Encrypts the collected values for the session's network key,
    /// producing one handle per value and a single binding proof.
    pub fn encrypt(&self, session: &EncryptionSession) -> Result<EncryptedInput, FheError> {
        if self.values.is_empty() {
            return Err(FheError::EmptyInput);
        }

        let mut rng = rand::thread_rng();
        let ephemeral_secret = EphemeralSecret::random_from_rng(&mut rng);
        let ephemeral_pk = PublicKey::from(&ephemeral_secret);

        let network_pk = PublicKey::from(session.network_public_key);
        let shared_secret = ephemeral_secret.diffie_hellman(&network_pk);

        let key = derive_input_key(
            shared_secret.as_bytes(),
            ephemeral_pk.as_bytes(),
            self.contract,
            self.submitter,
            session.chain_id,
        );

        let mut nonce_bytes = [0u8; 12];
        use rand::RngCore;
        rng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let cipher = ChaCha20Poly1305::new_from_slice(&key).expect("valid key length");
        let ciphertext = cipher
            .encrypt(nonce, encode_values(&self.values).as_slice())
            .expect("encryption should not fail");

        let mut proof = Vec::with_capacity(PROOF_HEADER_LEN + ciphertext.len());
        proof.extend_from_slice(ephemeral_pk.as_bytes());
        proof.extend_from_slice(&nonce_bytes);
        proof.extend_from_slice(&ciphertext);

        let handles = (0..self.values.len())
            .map(|i| {
                derive_handle(
                    &ciphertext,
                    self.contract,
                    self.submitter,
                    session.chain_id,
                    i as u8,
                )
            })
            .collect();

        Ok(EncryptedInput { handles, proof })
    }
}

/// Derive the input encryption key. The (contract, submitter, chain) binding
/// is mixed into the key so a proof replayed against a different binding
/// fails AEAD authentication.
pub(crate) fn derive_input_key(
    shared_secret: &[u8],
    ephemeral_pk: &[u8],
    contract: Address,
    submitter: Address,
    chain_id: u64,
) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key("cipherscore-input-v1");
    hasher.update(shared_secret);
    hasher.update(ephemeral_pk);
    hasher.update(contract.as_bytes());
    hasher.update(submitter.as_bytes());
    hasher.update(&chain_id.to_le_bytes());
    *hasher.finalize().as_bytes()
}

/// Derive the public handle for value `index` of an input ciphertext.
pub(crate) fn derive_handle(
    ciphertext: &[u8],
    contract: Address,
    submitter: Address,
    chain_id: u64,
    index: u8,
) -> CiphertextHandle {
    let mut hasher = blake3::Hasher::new_derive_key("cipherscore-input-handle-v1");
    hasher.update(ciphertext);
    hasher.update(contract.as_bytes());
    hasher.update(submitter.as_bytes());
    hasher.update(&chain_id.to_le_bytes());
    hasher.update(&[index]);
    CiphertextHandle::from_bytes(*hasher.finalize().as_bytes())
}

/// Encode values as: count (1 byte) || [tag (1) || u32 LE (4)] per value.
pub(crate) fn encode_values(values: &[u32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(1 + values.len() * 5);
    bytes.push(values.len() as u8);
    for v in values {
        bytes.push(TAG_EUINT32);
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a value buffer produced by [`encode_values`].
pub(crate) fn decode_values(bytes: &[u8]) -> Option<Vec<u32>> {
    let (&count, mut rest) = bytes.split_first()?;
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if rest.len() < 5 || rest[0] != TAG_EUINT32 {
            return None;
        }
        values.push(u32::from_le_bytes(rest[1..5].try_into().ok()?));
        rest = &rest[5..];
    }
    if rest.is_empty() { Some(values) } else { None }
}
