//! # Protocol Configuration & Constants
//!
//! Every magic number in DeRec lives here, together with [`SecretConfig`],
//! the per-secret knobs (quorum rule and timeouts) that the rest of the
//! crate reads instead of hardcoding.
//!
//! The derivation constants are fixed by BIP32/BIP44. Changing them breaks
//! compatibility with every wallet that derived keys the standard way, so
//! don't.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DeRecError, Result};

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// The full protocol version string.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Key Derivation
// ---------------------------------------------------------------------------

/// HMAC key used to turn a seed into the BIP32 master key.
pub const BIP32_SEED_KEY: &[u8] = b"Bitcoin seed";

/// Indices at or above this value are hardened.
pub const HARDENED_OFFSET: u32 = 0x8000_0000;

/// BIP44 purpose level: `m/44'/...`.
pub const BIP44_PURPOSE: u32 = 44;

/// BIP32 seeds must be between 128 and 512 bits.
pub const MIN_SEED_LENGTH: usize = 16;

/// Upper bound of the BIP32 seed length, in bytes.
pub const MAX_SEED_LENGTH: usize = 64;

/// Default SLIP-44 coin type. 3 is Dogecoin.
pub const DEFAULT_COIN_TYPE: u32 = 3;

/// Branch under a secret's account node holding per-helper pairing keys:
/// `m/44'/coin'/secret'/0/helper`.
pub const HELPER_KEY_BRANCH: u32 = 0;

/// Branch under a secret's account node holding per-version signing keys:
/// `m/44'/coin'/secret'/1/version`.
pub const VERSION_KEY_BRANCH: u32 = 1;

/// Secrets number their versions from zero. The initial bytes are version 0.
pub const INITIAL_VERSION: u64 = 0;

// ---------------------------------------------------------------------------
// Timing Constants
// ---------------------------------------------------------------------------

/// How long a helper has to complete the pairing handshake before the
/// relationship is resolved as `Removed`.
pub const DEFAULT_PAIRING_TIMEOUT: Duration = Duration::from_secs(30);

/// How long we wait for a helper to acknowledge an unpair request. Removal
/// is honored locally whether or not the helper answers.
pub const DEFAULT_UNPAIR_TIMEOUT: Duration = Duration::from_secs(10);

/// Overall deadline for an update to collect its quorum of confirmations.
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Quorum
// ---------------------------------------------------------------------------

/// How many helper confirmations make a version "safe".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quorum {
    /// More than half of the helpers the version was sent to.
    #[default]
    StrictMajority,
    /// A fixed number of confirmations, regardless of helper count.
    Fixed(usize),
}

impl Quorum {
    /// Number of confirmations required out of `helpers` paired helpers.
    ///
    /// Never returns zero: a version nobody holds is not safe.
    pub fn required(&self, helpers: usize) -> usize {
        match self {
            Quorum::StrictMajority => helpers / 2 + 1,
            Quorum::Fixed(count) => (*count).max(1),
        }
    }
}

// ---------------------------------------------------------------------------
// SecretConfig
// ---------------------------------------------------------------------------

/// Per-secret configuration: quorum rule, handshake timeouts and the coin
/// type under which helper and version keys are derived.
///
/// Deserializes from JSON with every field optional; timeouts are given in
/// milliseconds.
///
/// ```
/// use derec_protocol::config::{Quorum, SecretConfig};
///
/// let config: SecretConfig =
///     serde_json::from_str(r#"{ "quorum": { "fixed": 2 }, "update_timeout_ms": 5000 }"#).unwrap();
/// assert_eq!(config.quorum, Quorum::Fixed(2));
/// assert_eq!(config.update_timeout.as_millis(), 5000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretConfig {
    /// Confirmation rule used by `update` and `is_available`.
    pub quorum: Quorum,

    /// Per-helper pairing handshake timeout.
    #[serde(rename = "pairing_timeout_ms", with = "millis")]
    pub pairing_timeout: Duration,

    /// Per-helper unpair handshake timeout.
    #[serde(rename = "unpair_timeout_ms", with = "millis")]
    pub unpair_timeout: Duration,

    /// Overall deadline for an update to reach quorum.
    #[serde(rename = "update_timeout_ms", with = "millis")]
    pub update_timeout: Duration,

    /// SLIP-44 coin type for the BIP44 derivation root.
    pub coin_type: u32,
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            quorum: Quorum::default(),
            pairing_timeout: DEFAULT_PAIRING_TIMEOUT,
            unpair_timeout: DEFAULT_UNPAIR_TIMEOUT,
            update_timeout: DEFAULT_UPDATE_TIMEOUT,
            coin_type: DEFAULT_COIN_TYPE,
        }
    }
}

impl SecretConfig {
    /// Set the quorum rule.
    pub fn with_quorum(mut self, quorum: Quorum) -> Self {
        self.quorum = quorum;
        self
    }

    /// Set the pairing handshake timeout.
    pub fn with_pairing_timeout(mut self, timeout: Duration) -> Self {
        self.pairing_timeout = timeout;
        self
    }

    /// Set the unpair handshake timeout.
    pub fn with_unpair_timeout(mut self, timeout: Duration) -> Self {
        self.unpair_timeout = timeout;
        self
    }

    /// Set the overall update deadline.
    pub fn with_update_timeout(mut self, timeout: Duration) -> Self {
        self.update_timeout = timeout;
        self
    }

    /// Set the coin type.
    pub fn with_coin_type(mut self, coin_type: u32) -> Self {
        self.coin_type = coin_type;
        self
    }

    /// Reject configurations that could never make progress.
    pub fn validate(&self) -> Result<()> {
        if self.quorum == Quorum::Fixed(0) {
            return Err(DeRecError::InvalidArgument(
                "fixed quorum must be at least 1".into(),
            ));
        }
        for (name, timeout) in [
            ("pairing_timeout", self.pairing_timeout),
            ("unpair_timeout", self.unpair_timeout),
            ("update_timeout", self.update_timeout),
        ] {
            if timeout.is_zero() {
                return Err(DeRecError::InvalidArgument(format!(
                    "{name} must be non-zero"
                )));
            }
        }
        if self.coin_type >= HARDENED_OFFSET {
            return Err(DeRecError::InvalidArgument(format!(
                "coin type {} does not fit a hardened index",
                self.coin_type
            )));
        }
        Ok(())
    }
}

/// Serde adapter for `Duration` as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
