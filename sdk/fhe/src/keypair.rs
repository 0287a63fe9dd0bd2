use chacha20poly1305::aead::OsRng;
use ed25519_dalek::{Signer, SigningKey};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::address::Address;

/// A viewer's key material: an Ed25519 key for signing decryption
/// authorizations and an X25519 key for receiving re-encrypted plaintexts.
/// NEVER expose this struct's internals.
pub struct Keypair {
    signing_key: SigningKey,
    decryption_key: StaticSecret,
}

impl Keypair {
    /// Generates a fresh random keypair.
    pub fn new_random() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let decryption_key = StaticSecret::random_from_rng(OsRng);

        Self {
            signing_key,
            decryption_key,
        }
    }

    /// Reconstructs a keypair from raw seed bytes.
    /// seed must be 64 bytes: 32 for the signer + 32 for decryption.
    pub fn from_seed(seed: &[u8; 64]) -> Self {
        let sign_seed: [u8; 32] = seed[0..32].try_into().unwrap();
        let dec_seed: [u8; 32] = seed[32..64].try_into().unwrap();

        Self {
            signing_key: SigningKey::from_bytes(&sign_seed),
            decryption_key: StaticSecret::from(dec_seed),
        }
    }

    /// Raw seed bytes for persistence; see [`Keypair::from_seed`].
    pub fn to_seed(&self) -> [u8; 64] {
        let mut seed = [0u8; 64];
        seed[0..32].copy_from_slice(&self.signing_key.to_bytes());
        seed[32..64].copy_from_slice(&self.decryption_key.to_bytes());
        seed
    }

    /// The account address derived from the signing key.
    pub fn address(&self) -> Address {
        Address::from_signer_pk(&self.signing_key.verifying_key().to_bytes())
    }

    /// The Ed25519 verifying key (safe to share).
    pub fn verifying_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// The X25519 public key plaintexts are re-encrypted to (safe to share).
    pub fn decryption_public_key(&self) -> [u8; 32] {
        X25519PublicKey::from(&self.decryption_key).to_bytes()
    }

    /// Signs an arbitrary message, returning the 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }

    /// The X25519 secret used to open sealed values.
    pub fn decryption_secret(&self) -> &StaticSecret {
        &self.decryption_key
    }
}
