//! Error definitions for the FHE SDK.

use thiserror::Error;

use crate::address::Address;
use crate::handle::CiphertextHandle;

/// Errors surfaced by the encryption backend and the input codec.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FheError {
    /// The input proof is malformed, replayed, or bound to a different
    /// (contract, submitter) pair than the one declared.
    #[error("invalid input proof: {0}")]
    InvalidProof(&'static str),

    /// The handle does not reference a registered ciphertext.
    #[error("unknown ciphertext handle {0}")]
    UnknownHandle(CiphertextHandle),

    /// The handle references a ciphertext of a different encrypted type.
    #[error("ciphertext type mismatch: expected {expected}")]
    TypeMismatch { expected: &'static str },

    /// The viewer has no decryption rights on the handle.
    #[error("viewer {viewer} is not entitled to decrypt {handle}")]
    AccessDenied {
        viewer: Address,
        handle: CiphertextHandle,
    },

    /// The decryption authorization has passed its expiry.
    #[error("decryption authorization expired at {0}")]
    AuthorizationExpired(u64),

    /// The authorization signature does not verify against the viewer.
    #[error("invalid decryption authorization: {0}")]
    BadAuthorization(&'static str),

    /// An encrypted input must carry at least one value.
    #[error("encrypted input carries no values")]
    EmptyInput,

    /// A sealed value could not be opened with the provided key.
    #[error("sealed value could not be opened")]
    SealOpenFailed,
}
