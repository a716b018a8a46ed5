//! Content digest algorithms.

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest as _, Sha256};

use engage_types::Digest;

/// Hash used to address asset content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-1, as published in campaign asset manifests.
    #[default]
    Sha1,
    /// SHA-256.
    Sha256,
    /// BLAKE3.
    Blake3,
}

impl DigestAlgorithm {
    /// Compute the digest of `bytes`.
    pub fn digest(&self, bytes: &[u8]) -> Digest {
        match self {
            Self::Sha1 => Digest::from_hash(&Sha1::digest(bytes)),
            Self::Sha256 => Digest::from_hash(&Sha256::digest(bytes)),
            Self::Blake3 => Digest::from_hash(blake3::hash(bytes).as_bytes()),
        }
    }
}
