//! Cipherscore Client SDK
//!
//! The off-chain pipeline around the encrypted score ledger:
//!
//! ```text
//! plaintext score ──▶ CiphertextCodec ──▶ ScoreChain::record_score
//!                                               │
//!                                        confirmation + handle refresh
//!                                               │
//! plaintext score ◀── DecryptionSession ◀── DecryptionAuthorizer
//! ```
//!
//! [`SubmissionOrchestrator`] and [`DecryptionSession`] are explicit state
//! machines with an exclusive owner per session and an explicit reset entry
//! point; concurrent identical requests coalesce onto shared in-flight
//! futures instead of boolean busy-flags.

pub mod authorizer;
pub mod chain;
pub mod codec;
pub mod decrypt;
pub mod submit;

pub use authorizer::{AuthError, AuthorizationSigner, DecryptionAuthorizer, KeypairSigner};
pub use chain::{ChainConfig, ChainError, InProcessChain, ScoreChain, TxHash, TxReceipt};
pub use codec::{ArgShape, CiphertextCodec, CodecError};
pub use decrypt::{BackendError, DecryptError, DecryptionBackend, DecryptionSession, DecryptionState};
pub use submit::{SubmissionOrchestrator, SubmissionState, SubmitError};
