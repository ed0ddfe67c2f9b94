//! # Identity
//!
//! Every party in DeRec, the owner as well as each helper, is identified by
//! an [`Identity`]: a display name, a contact URL for out-of-band
//! reachability, and an optional transport address the protocol actually
//! talks to.
//!
//! Identities are plain immutable values. Two identities are equal iff all
//! three fields are equal (an absent address only equals an absent address),
//! and both `Hash` and [`IdentityId`] are pure functions of those fields.
//!
//! ## IdentityId
//!
//! An [`IdentityId`] is the SHA-256 of a canonical, length-prefixed encoding
//! of the identity:
//!
//! ```text
//! "derec:identity:v1" || len(name) || name || len(contact) || contact
//!                     || 0x00                          (no address)
//!                     || 0x01 || len(address) || address
//! ```
//!
//! Lengths are big-endian `u32`. Length prefixes make the encoding
//! injective, so `("ab", "c")` and `("a", "bc")` can never collide.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{DeRecError, Result};

/// Domain separation tag for identity ids.
const IDENTITY_ID_DOMAIN: &[u8] = b"derec:identity:v1";

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A party in the protocol.
///
/// # Examples
///
/// ```
/// use derec_protocol::identity::Identity;
///
/// let alice = Identity::new("alice", "mailto:alice@example.com", Some("https://helper.example/alice")).unwrap();
/// let again = Identity::new("alice", "mailto:alice@example.com", Some("https://helper.example/alice")).unwrap();
/// assert_eq!(alice, again);
/// assert_eq!(alice.id(), again.id());
///
/// assert!(Identity::new("bob", "not a url", None).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawIdentity")]
pub struct Identity {
    /// Human-readable display name.
    name: String,

    /// Out-of-band contact (email, phone, web page) as a URL.
    contact: Url,

    /// In-protocol transport endpoint, if the party has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<Url>,
}

impl Identity {
    /// Build an identity, validating both URLs.
    ///
    /// Fails with [`DeRecError::InvalidArgument`] if the name is blank,
    /// `contact` is not an absolute URL, or `address` is given but invalid.
    pub fn new(name: &str, contact: &str, address: Option<&str>) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DeRecError::InvalidArgument(
                "identity name must not be empty".into(),
            ));
        }
        let contact = parse_url("contact", contact)?;
        let address = address.map(|a| parse_url("address", a)).transpose()?;

        Ok(Self {
            name: name.to_string(),
            contact,
            address,
        })
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Out-of-band contact URL.
    pub fn contact(&self) -> &Url {
        &self.contact
    }

    /// Transport endpoint, if any.
    pub fn address(&self) -> Option<&Url> {
        self.address.as_ref()
    }

    /// Stable 32-byte identifier for this identity.
    pub fn id(&self) -> IdentityId {
        let mut hasher = Sha256::new();
        hasher.update(IDENTITY_ID_DOMAIN);
        write_field(&mut hasher, self.name.as_bytes());
        write_field(&mut hasher, self.contact.as_str().as_bytes());
        match &self.address {
            None => hasher.update([0u8]),
            Some(address) => {
                hasher.update([1u8]);
                write_field(&mut hasher, address.as_str().as_bytes());
            }
        }
        IdentityId(hasher.finalize().into())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.contact)
    }
}

/// Wire form of an [`Identity`]; deserialization goes through
/// [`Identity::new`] so decoded identities obey the same rules.
#[derive(Deserialize)]
struct RawIdentity {
    name: String,
    contact: String,
    #[serde(default)]
    address: Option<String>,
}

impl TryFrom<RawIdentity> for Identity {
    type Error = DeRecError;

    fn try_from(raw: RawIdentity) -> Result<Self> {
        Identity::new(&raw.name, &raw.contact, raw.address.as_deref())
    }
}

fn parse_url(field: &str, value: &str) -> Result<Url> {
    Url::parse(value.trim())
        .map_err(|e| DeRecError::InvalidArgument(format!("invalid {field} URL {value:?}: {e}")))
}

fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u32).to_be_bytes());
    hasher.update(bytes);
}

// ---------------------------------------------------------------------------
// IdentityId
// ---------------------------------------------------------------------------

/// SHA-256 fingerprint of an [`Identity`]. Hex in text form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityId([u8; 32]);

impl IdentityId {
    /// Wrap raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 bytes as hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityId({})", self.short())
    }
}

impl FromStr for IdentityId {
    type Err = DeRecError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| DeRecError::InvalidArgument(format!("identity id is not hex: {e}")))?;
        let array: [u8; 32] = bytes.try_into().map_err(|_| {
            DeRecError::InvalidArgument("identity id must be 32 bytes".into())
        })?;
        Ok(Self(array))
    }
}

impl Serialize for IdentityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for IdentityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
