//! Local record of one helper relationship.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{CompressedPublicKey, DerivationPath, KeyPair};
use crate::identity::{Identity, IdentityId};

/// Where a helper relationship stands.
///
/// ```text
/// Pending ──handshake ok──▶ Paired ──remove / close──▶ Removed
///    └──────fail / timeout / remove / close──────────▶ Removed
/// ```
///
/// `Removed` is terminal. Re-adding the same identity creates a new
/// [`Pairable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingStatus {
    /// Handshake not yet resolved.
    Pending,
    /// Handshake succeeded; the helper receives versions.
    Paired,
    /// Relationship ended, or never started.
    Removed,
}

impl PairingStatus {
    /// Pending or Paired.
    pub fn is_active(&self) -> bool {
        !matches!(self, PairingStatus::Removed)
    }
}

/// Terminal result of one pairing handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingOutcome {
    /// The helper accepted the pairing.
    Paired,
    /// The helper rejected, did not answer in time, or the relationship was
    /// removed before the handshake ran.
    Removed,
}

/// One helper relationship owned by a secret.
///
/// Holds the public half only; the private key is re-derivable from
/// [`Pairable::path`] and is dropped once the record is built.
#[derive(Debug, Clone, Serialize)]
pub struct Pairable {
    identity: Identity,
    id: IdentityId,
    ordinal: u32,
    path: DerivationPath,
    public_key: CompressedPublicKey,
    status: PairingStatus,
    created_at: DateTime<Utc>,
    paired_at: Option<DateTime<Utc>>,
}

impl Pairable {
    pub(crate) fn new(identity: Identity, ordinal: u32, path: DerivationPath, key_pair: KeyPair) -> Self {
        Self {
            id: identity.id(),
            identity,
            ordinal,
            path,
            public_key: *key_pair.public_key(),
            status: PairingStatus::Pending,
            created_at: Utc::now(),
            paired_at: None,
        }
    }

    /// The helper.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The helper's identity id.
    pub fn id(&self) -> IdentityId {
        self.id
    }

    /// Position of this relationship among all helpers ever added to the
    /// secret. Never reused.
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Absolute derivation path of the relationship key.
    pub fn path(&self) -> &DerivationPath {
        &self.path
    }

    /// Public half of the relationship key, handed to the helper on pairing.
    pub fn public_key(&self) -> &CompressedPublicKey {
        &self.public_key
    }

    /// Current status.
    pub fn status(&self) -> PairingStatus {
        self.status
    }

    /// When the Pairable was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When the handshake succeeded, if it did.
    pub fn paired_at(&self) -> Option<DateTime<Utc>> {
        self.paired_at
    }

    /// Pending → Paired. No-op from any other state.
    pub(crate) fn mark_paired(&mut self) -> bool {
        if self.status != PairingStatus::Pending {
            return false;
        }
        self.status = PairingStatus::Paired;
        self.paired_at = Some(Utc::now());
        true
    }

    /// Any state → Removed.
    pub(crate) fn mark_removed(&mut self) {
        self.status = PairingStatus::Removed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Pairable {
        let identity = Identity::new("h1", "mailto:h1@example.com", None).unwrap();
        let key_pair = KeyPair::from_private_key(&[9u8; 32]).unwrap();
        Pairable::new(identity, 0, "m/44'/3'/0'/0/0".parse().unwrap(), key_pair)
    }

    #[test]
    fn lifecycle_transitions() {
        let mut p = sample();
        assert_eq!(p.status(), PairingStatus::Pending);
        assert!(p.status().is_active());

        assert!(p.mark_paired());
        assert_eq!(p.status(), PairingStatus::Paired);
        assert!(p.paired_at().is_some());
        assert!(!p.mark_paired());

        p.mark_removed();
        assert_eq!(p.status(), PairingStatus::Removed);
        assert!(!p.status().is_active());
        assert!(!p.mark_paired(), "removed is terminal");
    }

    #[test]
    fn serialization_omits_private_key() {
        let p = sample();
        let private_hex = hex::encode(KeyPair::from_private_key(&[9u8; 32]).unwrap().private_key_bytes());
        let json = serde_json::to_value(&p).unwrap();
        assert!(json.get("key_pair").is_none());
        assert!(!json.to_string().contains(&private_hex));
        assert_eq!(json["status"], "pending");
        assert_eq!(json["path"], "m/44'/3'/0'/0/0");
        assert_eq!(json["public_key"], p.public_key().to_hex());
    }
}
