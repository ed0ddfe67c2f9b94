//! # Cryptographic Primitives for DeRec
//!
//! Everything key-shaped in the protocol comes from here:
//!
//! - **BIP32/BIP44** hierarchical derivation over secp256k1, so helper and
//!   version keys can be re-derived from the owner's seed by any compliant
//!   wallet.
//! - **ECDSA** (secp256k1, SHA-256) for version signatures.
//! - **SHA-256** for payload commitments and identity ids.
//!
//! Nothing here is novel. It is a typed wrapper around `k256`, `hmac` and
//! `sha2`, and it should stay that way.

pub mod derivation;
pub mod keys;

use sha2::{Digest, Sha256};

pub use derivation::{ChildIndex, DerivationError, DerivationPath, EntropySource, KeyDeriver};
pub use keys::{CompressedPublicKey, KeyPair};

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Serde adapter for byte fields as lowercase hex strings.
pub(crate) mod serde_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T: AsRef<[u8]>, S: Serializer>(
        value: &T,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(value.as_ref()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// Like [`serde_hex`], for fixed 32-byte arrays.
pub(crate) mod serde_hex32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_answer() {
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
