//! Mock FHE Coprocessor
//!
//! The encryption backend behind the confidential score ledger. It verifies
//! input proofs, keeps the handle registry, evaluates homomorphic
//! comparisons, and enforces per-handle access control for user decryption.
//!
//! Ledger code only ever sees opaque handles; plaintexts live here, behind
//! the network key, exactly like a mock FHE executor in a local devnet.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use chacha20poly1305::aead::OsRng;
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use dashmap::DashMap;
use log::debug;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::address::Address;
use crate::authorization::{DecryptionAuthorization, SealedValue, unix_now};
use crate::errors::FheError;
use crate::handle::CiphertextHandle;
use crate::input::{EncryptedInput, PROOF_HEADER_LEN, decode_values, derive_handle, derive_input_key};

/// Public encryption parameters a client needs to build inputs.
#[derive(Debug, Clone)]
pub struct EncryptionSession {
    pub network_public_key: [u8; 32],
    pub chain_id: u64,
}

#[derive(Clone, Copy)]
enum CiphertextValue {
    U32(u32),
    Bool(bool),
}

/// The mock FHE executor.
pub struct Coprocessor {
    network_secret: StaticSecret,
    chain_id: u64,
    ciphertexts: DashMap<CiphertextHandle, CiphertextValue>,
    acl: DashMap<CiphertextHandle, HashSet<Address>>,
    consumed_proofs: DashMap<[u8; 32], ()>,
    op_counter: AtomicU64,
}

impl Coprocessor {
    pub fn new(chain_id: u64) -> Self {
        Self {
            network_secret: StaticSecret::random_from_rng(OsRng),
            chain_id,
            ciphertexts: DashMap::new(),
            acl: DashMap::new(),
            consumed_proofs: DashMap::new(),
            op_counter: AtomicU64::new(0),
        }
    }

    /// Public parameters for client-side encryption sessions.
    pub fn session(&self) -> EncryptionSession {
        EncryptionSession {
            network_public_key: PublicKey::from(&self.network_secret).to_bytes(),
            chain_id: self.chain_id,
        }
    }

    /// Validates an encrypted input against the declared (contract,
    /// submitter) binding, registers its ciphertexts, and consumes the proof.
    pub fn verify_input(
        &self,
        input: &EncryptedInput,
        contract: Address,
        submitter: Address,
    ) -> Result<Vec<CiphertextHandle>, FheError> {
        if input.proof.len() < PROOF_HEADER_LEN + 16 {
            return Err(FheError::InvalidProof("proof too short"));
        }

        let ephemeral_pk: [u8; 32] = input.proof[..32].try_into().expect("length checked");
        let nonce_bytes: [u8; 12] = input.proof[32..44].try_into().expect("length checked");
        let ciphertext = &input.proof[PROOF_HEADER_LEN..];

        let shared_secret = self
            .network_secret
            .diffie_hellman(&PublicKey::from(ephemeral_pk));
        let key = derive_input_key(
            shared_secret.as_bytes(),
            &ephemeral_pk,
            contract,
            submitter,
            self.chain_id,
        );

        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|_| FheError::InvalidProof("bad derived key"))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext)
            .map_err(|_| FheError::InvalidProof("binding mismatch or corrupted ciphertext"))?;

        let values =
            decode_values(&plaintext).ok_or(FheError::InvalidProof("malformed value encoding"))?;
        if values.is_empty() {
            return Err(FheError::EmptyInput);
        }
        if values.len() != input.handles.len() {
            return Err(FheError::InvalidProof("handle count mismatch"));
        }
        for (i, declared) in input.handles.iter().enumerate() {
            let expected = derive_handle(ciphertext, contract, submitter, self.chain_id, i as u8);
            if expected != *declared {
                return Err(FheError::InvalidProof("handle derivation mismatch"));
            }
        }

        // Proofs are single-use; the insert doubles as the atomic check.
        let digest = *blake3::hash(&input.proof).as_bytes();
        if self.consumed_proofs.insert(digest, ()).is_some() {
            return Err(FheError::InvalidProof("proof already consumed"));
        }

        for (handle, value) in input.handles.iter().zip(values) {
            self.ciphertexts.insert(*handle, CiphertextValue::U32(value));
        }

        debug!(
            "registered {} ciphertext(s) for submitter {submitter}",
            input.handles.len()
        );
        Ok(input.handles.clone())
    }

    /// Homomorphic `lhs > rhs`, producing a fresh encrypted-bool handle.
    pub fn gt(
        &self,
        lhs: CiphertextHandle,
        rhs: CiphertextHandle,
    ) -> Result<CiphertextHandle, FheError> {
        let a = self.load_u32(lhs)?;
        let b = self.load_u32(rhs)?;
        let handle = self.fresh_handle("gt", &[lhs, rhs]);
        self.ciphertexts.insert(handle, CiphertextValue::Bool(a > b));
        Ok(handle)
    }

    /// Homomorphic branchless selection: `cond ? if_true : if_false`.
    /// Always produces a fresh handle so the taken branch is not linkable.
    pub fn select(
        &self,
        cond: CiphertextHandle,
        if_true: CiphertextHandle,
        if_false: CiphertextHandle,
    ) -> Result<CiphertextHandle, FheError> {
        let c = self.load_bool(cond)?;
        let a = self.load_u32(if_true)?;
        let b = self.load_u32(if_false)?;
        let handle = self.fresh_handle("select", &[cond, if_true, if_false]);
        self.ciphertexts
            .insert(handle, CiphertextValue::U32(if c { a } else { b }));
        Ok(handle)
    }

    /// Grants `account` decryption rights on `handle`.
    pub fn allow(&self, handle: CiphertextHandle, account: Address) -> Result<(), FheError> {
        if !self.ciphertexts.contains_key(&handle) {
            return Err(FheError::UnknownHandle(handle));
        }
        self.acl.entry(handle).or_default().insert(account);
        Ok(())
    }

    pub fn is_allowed(&self, handle: CiphertextHandle, account: Address) -> bool {
        self.acl
            .get(&handle)
            .map(|entitled| entitled.contains(&account))
            .unwrap_or(false)
    }

    /// Re-encrypts the plaintext behind `handle` to the authorization's key,
    /// provided the signature checks out, the credential has not expired,
    /// and the viewer holds decryption rights on the handle.
    pub fn user_decrypt(
        &self,
        handle: CiphertextHandle,
        authorization: &DecryptionAuthorization,
    ) -> Result<SealedValue, FheError> {
        authorization.verify()?;

        let now = unix_now();
        if authorization.is_expired(now) {
            return Err(FheError::AuthorizationExpired(authorization.expires_at));
        }

        if !self.ciphertexts.contains_key(&handle) {
            return Err(FheError::UnknownHandle(handle));
        }
        if !self.is_allowed(handle, authorization.viewer) {
            return Err(FheError::AccessDenied {
                viewer: authorization.viewer,
                handle,
            });
        }

        let value = self.load_u32(handle)?;
        Ok(SealedValue::seal_u32(value, &authorization.public_key))
    }

    fn load_u32(&self, handle: CiphertextHandle) -> Result<u32, FheError> {
        match self.ciphertexts.get(&handle) {
            Some(entry) => match *entry {
                CiphertextValue::U32(v) => Ok(v),
                CiphertextValue::Bool(_) => Err(FheError::TypeMismatch { expected: "euint32" }),
            },
            None => Err(FheError::UnknownHandle(handle)),
        }
    }

    fn load_bool(&self, handle: CiphertextHandle) -> Result<bool, FheError> {
        match self.ciphertexts.get(&handle) {
            Some(entry) => match *entry {
                CiphertextValue::Bool(v) => Ok(v),
                CiphertextValue::U32(_) => Err(FheError::TypeMismatch { expected: "ebool" }),
            },
            None => Err(FheError::UnknownHandle(handle)),
        }
    }

    /// Derives a fresh handle for the result of a homomorphic operation.
    fn fresh_handle(&self, op: &str, operands: &[CiphertextHandle]) -> CiphertextHandle {
        let counter = self.op_counter.fetch_add(1, Ordering::Relaxed);
        let mut hasher = blake3::Hasher::new_derive_key("cipherscore-op-v1");
        hasher.update(op.as_bytes());
        for operand in operands {
            hasher.update(operand.as_bytes());
        }
        hasher.update(&counter.to_le_bytes());
        hasher.update(&self.chain_id.to_le_bytes());
        CiphertextHandle::from_bytes(*hasher.finalize().as_bytes())
    }
}
