use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A 20-byte account address.
///
/// Derived from an Ed25519 verifying key: `SHA256(signer_pk)[..20]`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    /// Derives the address for an Ed25519 verifying key.
    pub fn from_signer_pk(signer_pk: &[u8; 32]) -> Self {
        let digest = Sha256::digest(signer_pk);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[..20]);
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address({self})")
    }
}
