//! Decryption Authorizations
//!
//! A time-bounded, viewer-signed credential permitting the backend to
//! re-encrypt a ciphertext to the viewer's key. The viewer signs a
//! domain-separated digest of (re-encryption key, contract, expiry); the
//! backend verifies the signature against the viewer address before
//! releasing anything.

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::address::Address;
use crate::errors::FheError;
use crate::keypair::Keypair;

/// A viewer-specific, time-bounded decryption credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecryptionAuthorization {
    pub viewer: Address,
    pub contract: Address,
    /// X25519 public key the plaintext is re-encrypted to.
    pub public_key: [u8; 32],
    /// Ed25519 signature over [`signing_digest`].
    pub signature: Vec<u8>,
    /// Verifying key the signature was made with; must derive `viewer`.
    pub verifying_key: [u8; 32],
    /// Unix timestamp (seconds) after which the credential is invalid.
    pub expires_at: u64,
}

impl DecryptionAuthorization {
    /// Issues an authorization for `keys`' own address, valid until
    /// `expires_at`. The re-encryption key is the keypair's X25519 key.
    pub fn issue(keys: &Keypair, contract: Address, expires_at: u64) -> Self {
        let public_key = keys.decryption_public_key();
        let digest = signing_digest(&public_key, contract, expires_at);

        Self {
            viewer: keys.address(),
            contract,
            public_key,
            signature: keys.sign(&digest),
            verifying_key: keys.verifying_key_bytes(),
            expires_at,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }

    /// Checks the signature and that the verifying key derives the claimed
    /// viewer address.
    pub fn verify(&self) -> Result<(), FheError> {
        if Address::from_signer_pk(&self.verifying_key) != self.viewer {
            return Err(FheError::BadAuthorization(
                "verifying key does not derive the viewer address",
            ));
        }

        let vk = VerifyingKey::from_bytes(&self.verifying_key)
            .map_err(|_| FheError::BadAuthorization("malformed verifying key"))?;
        let sig = Signature::from_slice(&self.signature)
            .map_err(|_| FheError::BadAuthorization("malformed signature"))?;

        let digest = signing_digest(&self.public_key, self.contract, self.expires_at);
        vk.verify(&digest, &sig)
            .map_err(|_| FheError::BadAuthorization("signature verification failed"))
    }
}

/// The digest a viewer signs when granting a decryption authorization.
pub fn signing_digest(public_key: &[u8; 32], contract: Address, expires_at: u64) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key("cipherscore-user-decrypt-v1");
    hasher.update(public_key);
    hasher.update(contract.as_bytes());
    hasher.update(&expires_at.to_le_bytes());
    *hasher.finalize().as_bytes()
}

/// A plaintext re-encrypted to an authorization's X25519 key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedValue {
    pub ephemeral_pk: [u8; 32],
    pub nonce: [u8; 12],
    pub ciphertext: Vec<u8>,
}

impl SealedValue {
    /// Seals a plaintext u32 to `recipient_pk`.
    pub fn seal_u32(value: u32, recipient_pk: &[u8; 32]) -> Self {
        let mut rng = rand::thread_rng();
        let ephemeral_secret = EphemeralSecret::random_from_rng(&mut rng);
        let ephemeral_pk = PublicKey::from(&ephemeral_secret);

        let recipient = PublicKey::from(*recipient_pk);
        let shared_secret = ephemeral_secret.diffie_hellman(&recipient);
        let key = derive_seal_key(shared_secret.as_bytes(), ephemeral_pk.as_bytes());

        let mut nonce_bytes = [0u8; 12];
        use rand::RngCore;
        rng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let cipher = ChaCha20Poly1305::new_from_slice(&key).expect("valid key length");
        let ciphertext = cipher
            .encrypt(nonce, value.to_le_bytes().as_slice())
            .expect("encryption should not fail");

        Self {
            ephemeral_pk: *ephemeral_pk.as_bytes(),
            nonce: nonce_bytes,
            ciphertext,
        }
    }

    /// Opens the sealed value with the recipient's X25519 secret.
    pub fn open_u32(&self, recipient_sk: &StaticSecret) -> Result<u32, FheError> {
        let ephemeral_pk = PublicKey::from(self.ephemeral_pk);
        let shared_secret = recipient_sk.diffie_hellman(&ephemeral_pk);
        let key = derive_seal_key(shared_secret.as_bytes(), &self.ephemeral_pk);

        let cipher =
            ChaCha20Poly1305::new_from_slice(&key).map_err(|_| FheError::SealOpenFailed)?;
        let nonce = Nonce::from_slice(&self.nonce);
        let plaintext = cipher
            .decrypt(nonce, self.ciphertext.as_slice())
            .map_err(|_| FheError::SealOpenFailed)?;

        let bytes: [u8; 4] = plaintext
            .as_slice()
            .try_into()
            .map_err(|_| FheError::SealOpenFailed)?;
        Ok(u32::from_le_bytes(bytes))
    }
}

fn derive_seal_key(shared_secret: &[u8], ephemeral_pk: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key("cipherscore-seal-v1");
    hasher.update(shared_secret);
    hasher.update(ephemeral_pk);
    *hasher.finalize().as_bytes()
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
