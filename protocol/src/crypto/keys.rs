//! # Key Material
//!
//! secp256k1 key-pairs produced by the HD deriver, plus ECDSA signing and
//! verification for version records.
//!
//! ## Security considerations
//!
//! - Private key bytes are zeroized when a [`KeyPair`] is dropped.
//! - `Debug` output shows the public key only.
//! - Key bytes are never logged. If you add logging to this module, log
//!   public keys or nothing.

use std::fmt;
use std::str::FromStr;

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::SecretKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::derivation::DerivationError;

/// Length of a SEC1 compressed secp256k1 point.
pub const COMPRESSED_PUBLIC_KEY_LENGTH: usize = 33;

/// Length of a raw secp256k1 private scalar.
pub const PRIVATE_KEY_LENGTH: usize = 32;

/// Length of a compact (r || s) ECDSA signature.
pub const SIGNATURE_LENGTH: usize = 64;

// ---------------------------------------------------------------------------
// CompressedPublicKey
// ---------------------------------------------------------------------------

/// A 33-byte SEC1 compressed secp256k1 public key.
///
/// Serializes as a hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompressedPublicKey([u8; COMPRESSED_PUBLIC_KEY_LENGTH]);

impl CompressedPublicKey {
    /// Wrap raw bytes, checking that they encode a point on the curve.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DerivationError> {
        let array: [u8; COMPRESSED_PUBLIC_KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| DerivationError::InvalidPublicKey)?;
        VerifyingKey::from_sec1_bytes(&array).map_err(|_| DerivationError::InvalidPublicKey)?;
        Ok(Self(array))
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; COMPRESSED_PUBLIC_KEY_LENGTH] {
        &self.0
    }

    /// Hex encoding, 66 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Verify a compact ECDSA signature over `message`.
    ///
    /// Returns `false` for malformed signatures rather than an error; callers
    /// only ever want a yes/no answer here.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(&self.0) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        verifying_key.verify(message, &signature).is_ok()
    }
}

impl FromStr for CompressedPublicKey {
    type Err = DerivationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| DerivationError::InvalidPublicKey)?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for CompressedPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CompressedPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompressedPublicKey({})", &self.to_hex()[..16])
    }
}

impl Serialize for CompressedPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CompressedPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// KeyPair
// ---------------------------------------------------------------------------

/// A derived secp256k1 key-pair.
///
/// Intentionally not `Serialize`: exporting a private key should be an
/// explicit call to [`KeyPair::private_key_bytes`], not a side effect of
/// dumping a struct to JSON.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    private_key: [u8; PRIVATE_KEY_LENGTH],
    #[zeroize(skip)]
    public_key: CompressedPublicKey,
}

impl KeyPair {
    /// Build a key-pair from a raw private scalar, deriving the public key.
    ///
    /// Fails if the bytes are zero or not below the curve order.
    pub fn from_private_key(private_key: &[u8; PRIVATE_KEY_LENGTH]) -> Result<Self, DerivationError> {
        let secret =
            SecretKey::from_slice(private_key).map_err(|_| DerivationError::InvalidPrivateKey)?;
        Ok(Self::from_secret_key(&secret))
    }

    pub(crate) fn from_secret_key(secret: &SecretKey) -> Self {
        let mut private_key = [0u8; PRIVATE_KEY_LENGTH];
        private_key.copy_from_slice(&secret.to_bytes());
        Self {
            private_key,
            public_key: compressed_public_key(secret),
        }
    }

    /// The public half. Safe to share.
    pub fn public_key(&self) -> &CompressedPublicKey {
        &self.public_key
    }

    /// The raw 32-byte private scalar.
    ///
    /// **Handle with care.** Don't log it, don't put it in a version record.
    pub fn private_key_bytes(&self) -> [u8; PRIVATE_KEY_LENGTH] {
        self.private_key
    }

    /// Sign `message` with ECDSA (RFC 6979 nonces, SHA-256 digest) and
    /// return the 64-byte compact signature.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, DerivationError> {
        let signing_key = SigningKey::from_slice(&self.private_key)
            .map_err(|_| DerivationError::InvalidPrivateKey)?;
        let signature: Signature = signing_key.sign(message);
        Ok(signature.to_bytes().to_vec())
    }
}

impl PartialEq for KeyPair {
    /// Key-pairs compare by public key.
    fn eq(&self, other: &Self) -> bool {
        self.public_key == other.public_key
    }
}

impl Eq for KeyPair {}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair(pub={})", self.public_key.to_hex())
    }
}

/// SEC1 compressed encoding of the public key for `secret`.
pub(crate) fn compressed_public_key(secret: &SecretKey) -> CompressedPublicKey {
    let point = secret.public_key().to_encoded_point(true);
    let mut bytes = [0u8; COMPRESSED_PUBLIC_KEY_LENGTH];
    bytes.copy_from_slice(point.as_bytes());
    CompressedPublicKey(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> KeyPair {
        KeyPair::from_private_key(&[7u8; 32]).unwrap()
    }

    #[test]
    fn public_key_is_compressed() {
        let kp = sample();
        let first = kp.public_key().as_bytes()[0];
        assert!(first == 0x02 || first == 0x03);
        assert_eq!(kp.public_key().to_hex().len(), 66);
    }

    #[test]
    fn zero_private_key_rejected() {
        assert!(matches!(
            KeyPair::from_private_key(&[0u8; 32]),
            Err(DerivationError::InvalidPrivateKey)
        ));
    }

    #[test]
    fn sign_and_verify() {
        let kp = sample();
        let signature = kp.sign(b"version 1").unwrap();
        assert_eq!(signature.len(), SIGNATURE_LENGTH);
        assert!(kp.public_key().verify(b"version 1", &signature));
        assert!(!kp.public_key().verify(b"version 2", &signature));
        assert!(!kp.public_key().verify(b"version 1", &signature[..10]));
    }

    #[test]
    fn debug_never_prints_private_key() {
        let kp = sample();
        let debug = format!("{:?}", kp);
        assert!(!debug.contains(&hex::encode(kp.private_key_bytes())));
        assert!(debug.contains(&kp.public_key().to_hex()));
    }

    #[test]
    fn public_key_hex_roundtrip() {
        let kp = sample();
        let parsed: CompressedPublicKey = kp.public_key().to_hex().parse().unwrap();
        assert_eq!(&parsed, kp.public_key());
        assert!("02abcd".parse::<CompressedPublicKey>().is_err());
    }
}
