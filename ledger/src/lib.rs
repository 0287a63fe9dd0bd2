//! Encrypted Score Ledger
//!
//! The on-chain authority for confidential top scores. Stores one ciphertext
//! handle per player and replaces it only when a newly submitted value is
//! homomorphically greater, without ever decrypting either operand.

pub mod contract;
pub mod state;

pub use contract::{LedgerError, NO_SCORE_REASON, ScoreLedger};
pub use state::{LedgerState, PlayerRecord};
