use serde::{Deserialize, Serialize};

/// An opaque reference to an encrypted value held by the encryption backend.
///
/// Handles are equality-comparable and safe to publish; they reveal nothing
/// about the underlying plaintext.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CiphertextHandle([u8; 32]);

impl CiphertextHandle {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        CiphertextHandle(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for CiphertextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for CiphertextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CiphertextHandle({self})")
    }
}
