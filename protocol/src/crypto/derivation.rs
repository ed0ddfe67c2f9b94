//! # Hierarchical Deterministic Key Derivation
//!
//! BIP32 over secp256k1, addressed BIP44-style by coin type.
//!
//! ```text
//! seed ──HMAC-SHA512("Bitcoin seed")──▶ m
//!                                       │
//!                                       ├─ 44' ─ coin' ─ secret' ─ 0 ─ helper   (pairing keys)
//!                                       │                       └─ 1 ─ version  (version signing keys)
//!                                       └─ ...
//! ```
//!
//! Output is bit-exact with the BIP32 reference vectors, so any wallet that
//! holds the same seed can re-derive the same helper and version keys. Only
//! private derivation is implemented; the owner always holds the root.

use std::fmt;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use k256::elliptic_curve::ff::PrimeField;
use k256::{FieldBytes, Scalar, SecretKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha512;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::keys::{compressed_public_key, KeyPair};
use crate::config::{BIP32_SEED_KEY, BIP44_PURPOSE, HARDENED_OFFSET, MAX_SEED_LENGTH, MIN_SEED_LENGTH};

type HmacSha512 = Hmac<Sha512>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while parsing paths or deriving keys.
///
/// Messages never contain key material.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DerivationError {
    /// The root entropy is missing or has an unsupported length.
    #[error("seed must be 16..=64 bytes, got {0}")]
    InvalidSeedLength(usize),

    /// The root entropy is not valid hex.
    #[error("seed is not valid hex")]
    InvalidSeedEncoding,

    /// A path segment could not be parsed.
    #[error("malformed path segment {0:?}")]
    MalformedSegment(String),

    /// The index does not fit below the hardened offset.
    #[error("child index {0} out of range (must be < 2^31)")]
    IndexOutOfRange(u64),

    /// The seed produced an unusable master key. Astronomically unlikely.
    #[error("seed produced an invalid master key")]
    InvalidMasterKey,

    /// The derived child key is invalid; BIP32 says skip to the next index.
    #[error("derived key at index {0} is invalid")]
    InvalidChildKey(u32),

    /// Private key bytes are zero or not below the curve order.
    #[error("invalid private key")]
    InvalidPrivateKey,

    /// Public key bytes are not a valid compressed secp256k1 point.
    #[error("invalid public key")]
    InvalidPublicKey,
}

// ---------------------------------------------------------------------------
// ChildIndex
// ---------------------------------------------------------------------------

/// One segment of a derivation path.
///
/// The index is always below 2^31; the hardened flag is kept separately and
/// only folded into the index when the child key is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChildIndex {
    index: u32,
    hardened: bool,
}

impl ChildIndex {
    /// A non-hardened index, `index < 2^31`.
    pub fn normal(index: u32) -> Result<Self, DerivationError> {
        Ok(Self {
            index: check_range(index as u64)?,
            hardened: false,
        })
    }

    /// A hardened index, `index < 2^31` (the offset is added on derivation).
    pub fn hardened(index: u32) -> Result<Self, DerivationError> {
        Ok(Self {
            index: check_range(index as u64)?,
            hardened: true,
        })
    }

    /// Whether this segment is hardened.
    pub fn is_hardened(&self) -> bool {
        self.hardened
    }

    /// The index without the hardened bit.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The 32-bit value fed to the HMAC, with the hardened bit set.
    pub fn to_u32(&self) -> u32 {
        if self.hardened {
            self.index | HARDENED_OFFSET
        } else {
            self.index
        }
    }
}

fn check_range(index: u64) -> Result<u32, DerivationError> {
    if index >= HARDENED_OFFSET as u64 {
        return Err(DerivationError::IndexOutOfRange(index));
    }
    Ok(index as u32)
}

impl FromStr for ChildIndex {
    type Err = DerivationError;

    /// Accepts `5`, `5'`, `5h` and `5H`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segment = s.trim();
        let (digits, hardened) = match segment
            .strip_suffix('\'')
            .or_else(|| segment.strip_suffix('h'))
            .or_else(|| segment.strip_suffix('H'))
        {
            Some(digits) => (digits, true),
            None => (segment, false),
        };

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DerivationError::MalformedSegment(s.to_string()));
        }
        let value: u64 = digits
            .parse()
            .map_err(|_| DerivationError::MalformedSegment(s.to_string()))?;

        Ok(Self {
            index: check_range(value)?,
            hardened,
        })
    }
}

impl fmt::Display for ChildIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hardened {
            write!(f, "{}'", self.index)
        } else {
            write!(f, "{}", self.index)
        }
    }
}

// ---------------------------------------------------------------------------
// DerivationPath
// ---------------------------------------------------------------------------

/// A sequence of child indices.
///
/// Parses `m/44'/3'/0'/0/1` as well as the relative form `0'/0/1`; both
/// yield the same segments, and whether a path is absolute or relative is
/// decided by the method it is handed to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DerivationPath {
    segments: Vec<ChildIndex>,
}

impl DerivationPath {
    /// Build from segments.
    pub fn new(segments: Vec<ChildIndex>) -> Self {
        Self { segments }
    }

    /// `m/44'/coin'`, the root a coin-type-scoped entropy request starts from.
    pub fn bip44_coin_root(coin_type: u32) -> Result<Self, DerivationError> {
        Ok(Self::new(vec![
            ChildIndex::hardened(BIP44_PURPOSE)?,
            ChildIndex::hardened(coin_type)?,
        ]))
    }

    /// `m/44'/coin'/account'/change/index`.
    pub fn bip44_address(
        coin_type: u32,
        account: u32,
        change: u32,
        address_index: u32,
    ) -> Result<Self, DerivationError> {
        Ok(Self::bip44_coin_root(coin_type)?.join(&Self::new(vec![
            ChildIndex::hardened(account)?,
            ChildIndex::normal(change)?,
            ChildIndex::normal(address_index)?,
        ])))
    }

    /// The segments, root first.
    pub fn segments(&self) -> &[ChildIndex] {
        &self.segments
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// A new path with `other`'s segments appended.
    pub fn join(&self, other: &DerivationPath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend_from_slice(&other.segments);
        Self { segments }
    }
}

impl FromStr for DerivationPath {
    type Err = DerivationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let body = match trimmed {
            "" | "m" | "M" => return Ok(Self::default()),
            _ => trimmed
                .strip_prefix("m/")
                .or_else(|| trimmed.strip_prefix("M/"))
                .unwrap_or(trimmed),
        };

        let segments = body
            .split('/')
            .map(ChildIndex::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl Serialize for DerivationPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DerivationPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Extended keys
// ---------------------------------------------------------------------------

/// A private key plus chain code: one node of the tree.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct ExtendedPrivateKey {
    key: [u8; 32],
    chain_code: [u8; 32],
}

impl ExtendedPrivateKey {
    fn master(seed: &[u8]) -> Result<Self, DerivationError> {
        if !(MIN_SEED_LENGTH..=MAX_SEED_LENGTH).contains(&seed.len()) {
            return Err(DerivationError::InvalidSeedLength(seed.len()));
        }
        let output = hmac_sha512(BIP32_SEED_KEY, &[seed])?;
        let node = Self::from_hmac_output(&output);
        // IL must be a valid, non-zero scalar.
        SecretKey::from_slice(&node.key).map_err(|_| DerivationError::InvalidMasterKey)?;
        Ok(node)
    }

    fn derive_child(&self, index: ChildIndex) -> Result<Self, DerivationError> {
        let raw_index = index.to_u32();
        let parent =
            SecretKey::from_slice(&self.key).map_err(|_| DerivationError::InvalidPrivateKey)?;

        let index_bytes = raw_index.to_be_bytes();
        let output = if index.is_hardened() {
            hmac_sha512(&self.chain_code, &[&[0u8], &self.key, &index_bytes])?
        } else {
            let public = compressed_public_key(&parent);
            hmac_sha512(&self.chain_code, &[public.as_bytes(), &index_bytes])?
        };
        let tweak_node = Self::from_hmac_output(&output);

        // child = parse256(IL) + k_par (mod n); IL >= n or child == 0 are invalid.
        let tweak: Scalar = Option::from(Scalar::from_repr(FieldBytes::from(tweak_node.key)))
            .ok_or(DerivationError::InvalidChildKey(raw_index))?;
        let child = tweak + *parent.to_nonzero_scalar();

        let mut key = [0u8; 32];
        key.copy_from_slice(&child.to_repr());
        SecretKey::from_slice(&key).map_err(|_| DerivationError::InvalidChildKey(raw_index))?;

        Ok(Self {
            key,
            chain_code: tweak_node.chain_code,
        })
    }

    fn from_hmac_output(output: &[u8; 64]) -> Self {
        let mut key = [0u8; 32];
        let mut chain_code = [0u8; 32];
        key.copy_from_slice(&output[..32]);
        chain_code.copy_from_slice(&output[32..]);
        Self { key, chain_code }
    }

    fn key_pair(&self) -> Result<KeyPair, DerivationError> {
        KeyPair::from_private_key(&self.key)
    }
}

fn hmac_sha512(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 64], DerivationError> {
    let mut mac =
        <HmacSha512 as Mac>::new_from_slice(key).map_err(|_| DerivationError::InvalidMasterKey)?;
    for part in parts {
        mac.update(part);
    }
    let mut output = [0u8; 64];
    output.copy_from_slice(&mac.finalize().into_bytes());
    Ok(output)
}

// ---------------------------------------------------------------------------
// Entropy source contract
// ---------------------------------------------------------------------------

/// A source of hierarchical key material addressed by coin type and path.
///
/// `path` is relative to the BIP44 coin root `m/44'/coin_type'`. The same
/// inputs must always produce the same key-pair.
pub trait EntropySource: Send + Sync {
    /// Key-pair at `m/44'/coin_type'/<path>`.
    fn get_entropy(&self, coin_type: u32, path: &DerivationPath) -> Result<KeyPair, DerivationError>;
}

// ---------------------------------------------------------------------------
// KeyDeriver
// ---------------------------------------------------------------------------

/// Deterministic key-pair derivation from a root seed.
///
/// Stateless after construction: every call is a pure function of the path.
///
/// ```
/// use derec_protocol::crypto::derivation::KeyDeriver;
///
/// let deriver = KeyDeriver::from_hex_seed("000102030405060708090a0b0c0d0e0f").unwrap();
/// let a = deriver.derive(3, &"0'/0/1".parse().unwrap()).unwrap();
/// let b = deriver.derive(3, &"0'/0/1".parse().unwrap()).unwrap();
/// assert_eq!(a.public_key(), b.public_key());
/// ```
#[derive(Clone)]
pub struct KeyDeriver {
    master: ExtendedPrivateKey,
}

impl KeyDeriver {
    /// Build from raw seed bytes (16 to 64 bytes).
    pub fn from_seed(seed: &[u8]) -> Result<Self, DerivationError> {
        Ok(Self {
            master: ExtendedPrivateKey::master(seed)?,
        })
    }

    /// Build from a hex-encoded seed.
    pub fn from_hex_seed(seed_hex: &str) -> Result<Self, DerivationError> {
        let mut seed =
            hex::decode(seed_hex.trim()).map_err(|_| DerivationError::InvalidSeedEncoding)?;
        let deriver = Self::from_seed(&seed);
        seed.zeroize();
        deriver
    }

    /// Key-pair at `m/44'/coin_type'/<path>`.
    pub fn derive(&self, coin_type: u32, path: &DerivationPath) -> Result<KeyPair, DerivationError> {
        let full = DerivationPath::bip44_coin_root(coin_type)?.join(path);
        self.derive_path(&full)
    }

    /// Key-pair at an absolute path from the master node.
    pub fn derive_path(&self, path: &DerivationPath) -> Result<KeyPair, DerivationError> {
        self.node_at(path)?.key_pair()
    }

    /// Key-pair at `m/44'/coin'/account'/change/address_index`.
    pub fn bip44_address_key(
        &self,
        coin_type: u32,
        account: u32,
        change: u32,
        address_index: u32,
    ) -> Result<KeyPair, DerivationError> {
        self.derive_path(&DerivationPath::bip44_address(
            coin_type,
            account,
            change,
            address_index,
        )?)
    }

    /// Chain code of the node at `path`. Exposed for cross-checking against
    /// other BIP32 implementations.
    pub fn chain_code(&self, path: &DerivationPath) -> Result<[u8; 32], DerivationError> {
        Ok(self.node_at(path)?.chain_code)
    }

    fn node_at(&self, path: &DerivationPath) -> Result<ExtendedPrivateKey, DerivationError> {
        path.segments()
            .iter()
            .try_fold(self.master.clone(), |node, segment| node.derive_child(*segment))
    }
}

impl EntropySource for KeyDeriver {
    fn get_entropy(&self, coin_type: u32, path: &DerivationPath) -> Result<KeyPair, DerivationError> {
        self.derive(coin_type, path)
    }
}

impl fmt::Debug for KeyDeriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyDeriver(<redacted>)")
    }
}
