//! Cipherscore FHE SDK
//!
//! Primitives for the confidential score ledger: opaque ciphertext handles,
//! encrypted inputs with a proof of well-formedness bound to a
//! (contract, submitter) pair, viewer-signed decryption authorizations, and
//! the [`Coprocessor`]: the encryption backend that registers ciphertexts,
//! evaluates homomorphic comparisons and enforces per-handle access control.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       Ciphertext lifecycle                       │
//! │                                                                  │
//! │  plaintext u32 ──▶ EncryptedInputBuilder ──▶ EncryptedInput      │
//! │                      (bound to contract+submitter)               │
//! │                            │                                     │
//! │                            ▼                                     │
//! │                 Coprocessor::verify_input                        │
//! │                 (proof check, handle registry)                   │
//! │                            │                                     │
//! │            gt / select (never decrypts on-chain state)           │
//! │                            │                                     │
//! │                            ▼                                     │
//! │        user_decrypt(handle, DecryptionAuthorization)             │
//! │        (ACL check, re-encrypt to the viewer's key)               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod address;
pub mod authorization;
pub mod coprocessor;
pub mod errors;
pub mod handle;
pub mod input;
pub mod keypair;

pub use address::Address;
pub use authorization::{DecryptionAuthorization, SealedValue, unix_now};
pub use coprocessor::{Coprocessor, EncryptionSession};
pub use errors::FheError;
pub use handle::CiphertextHandle;
pub use input::{EncryptedInput, EncryptedInputBuilder};
pub use keypair::Keypair;
