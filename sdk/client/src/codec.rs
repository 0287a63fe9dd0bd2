//! Ciphertext codec.
//!
//! Turns a plaintext score into a verifiable [`EncryptedInput`] bound to
//! (contract, submitter). Encryption is CPU-heavy, so it runs on the
//! blocking pool and never stalls other protocol steps.
//!
//! The expected encrypted-argument shape per ledger operation is a static
//! table validated once at construction, with no per-call ABI introspection.

use log::debug;
use thiserror::Error;
use tokio::task;

use cipherscore_fhe::{Address, EncryptedInput, EncryptedInputBuilder, EncryptionSession, FheError};

/// Shape of an operation's encrypted argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgShape {
    Euint32,
}

/// Logical ledger operations and the encrypted-argument shape each expects.
const OPERATIONS: &[(&str, ArgShape)] = &[("record_score", ArgShape::Euint32)];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// The encryption backend session is not initialized for the target
    /// chain.
    #[error("encryption backend session is not initialized")]
    EncryptionUnavailable,

    /// The encryption task was cancelled or panicked before completion.
    #[error("encryption task aborted before completion")]
    Aborted,

    /// The backend rejected the plaintext input.
    #[error("encryption failed: {0}")]
    Backend(FheError),

    /// No encrypted-argument shape is registered for the operation.
    #[error("no encrypted-argument shape registered for operation `{0}`")]
    UnknownOperation(String),
}

/// Client-side encryptor for ledger submissions.
pub struct CiphertextCodec {
    session: Option<EncryptionSession>,
}

impl CiphertextCodec {
    /// Builds a codec for the given session, validating the operation table
    /// up front. `None` produces a codec that fails every encryption with
    /// [`CodecError::EncryptionUnavailable`] (no backend session yet).
    pub fn new(session: Option<EncryptionSession>) -> Result<Self, CodecError> {
        Self::shape_of("record_score")
            .ok_or_else(|| CodecError::UnknownOperation("record_score".into()))?;
        Ok(Self { session })
    }

    /// The registered argument shape for a ledger operation.
    pub fn shape_of(operation: &str) -> Option<ArgShape> {
        OPERATIONS
            .iter()
            .find(|(name, _)| *name == operation)
            .map(|(_, shape)| *shape)
    }

    pub fn is_ready(&self) -> bool {
        self.session.is_some()
    }

    /// Encrypts `value` bound to exactly (contract, submitter). Runs on the
    /// blocking pool; awaiting callers stay responsive.
    pub async fn encrypt(
        &self,
        value: u32,
        contract: Address,
        submitter: Address,
    ) -> Result<EncryptedInput, CodecError> {
        let session = self
            .session
            .clone()
            .ok_or(CodecError::EncryptionUnavailable)?;

        debug!("encrypting input for {submitter} bound to {contract}");
        let joined = task::spawn_blocking(move || {
            EncryptedInputBuilder::new(contract, submitter)
                .add32(value)
                .encrypt(&session)
        })
        .await;

        match joined {
            Ok(result) => result.map_err(CodecError::Backend),
            Err(_) => Err(CodecError::Aborted),
        }
    }
}
