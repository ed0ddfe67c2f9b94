//! # Versions
//!
//! A [`Version`] is one immutable snapshot of the protected bytes. The
//! payload, commitment and signature are fixed at creation; only the
//! per-helper acknowledgment map moves afterwards, and only forward:
//!
//! ```text
//! Pending ──ack──▶ Confirmed
//!    └──nack / timeout / cancel / close──▶ Failed
//! ```
//!
//! Each version is signed by the owner with a key derived for that version
//! number alone, so a helper holding the owner's account public key can
//! check that a version is authentic without trusting the channel it came
//! over.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::{serde_hex, serde_hex32, sha256, CompressedPublicKey, DerivationError, KeyPair};
use crate::identity::IdentityId;

/// A helper's answer for one version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    /// Sent, not yet answered.
    Pending,
    /// The helper stored the version.
    Confirmed,
    /// The helper refused, did not answer in time, or the update was
    /// abandoned.
    Failed,
}

/// One snapshot of a secret's protected bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    secret_id: Uuid,
    number: u64,
    #[serde(with = "serde_hex")]
    payload: Vec<u8>,
    #[serde(with = "serde_hex32")]
    commitment: [u8; 32],
    created_at: DateTime<Utc>,
    signer: CompressedPublicKey,
    #[serde(with = "serde_hex")]
    signature: Vec<u8>,
    acks: BTreeMap<IdentityId, AckStatus>,
}

impl Version {
    /// Build and sign a version. Every helper in `helpers` starts Pending.
    pub(crate) fn new(
        secret_id: Uuid,
        number: u64,
        payload: Vec<u8>,
        signing_key: &KeyPair,
        helpers: impl IntoIterator<Item = IdentityId>,
    ) -> Result<Self, DerivationError> {
        let commitment = sha256(&payload);
        let signature = signing_key.sign(&signing_message(secret_id, number, &commitment))?;
        Ok(Self {
            secret_id,
            number,
            payload,
            commitment,
            created_at: Utc::now(),
            signer: *signing_key.public_key(),
            signature,
            acks: helpers
                .into_iter()
                .map(|id| (id, AckStatus::Pending))
                .collect(),
        })
    }

    /// Secret this version belongs to.
    pub fn secret_id(&self) -> Uuid {
        self.secret_id
    }

    /// Version number. Strictly increasing per secret, starting at 0.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// The protected bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// SHA-256 of the payload.
    pub fn commitment(&self) -> &[u8; 32] {
        &self.commitment
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Public key of the per-version signing key.
    pub fn signer(&self) -> &CompressedPublicKey {
        &self.signer
    }

    /// Compact ECDSA signature over `secret_id || number || commitment`.
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Acknowledgment status per helper the version was sent to.
    pub fn acks(&self) -> &BTreeMap<IdentityId, AckStatus> {
        &self.acks
    }

    /// Acknowledgment status of one helper, if the version was sent to it.
    pub fn ack(&self, helper: &IdentityId) -> Option<AckStatus> {
        self.acks.get(helper).copied()
    }

    pub fn confirmed_count(&self) -> usize {
        self.count(AckStatus::Confirmed)
    }

    pub fn pending_count(&self) -> usize {
        self.count(AckStatus::Pending)
    }

    pub fn failed_count(&self) -> usize {
        self.count(AckStatus::Failed)
    }

    fn count(&self, status: AckStatus) -> usize {
        self.acks.values().filter(|s| **s == status).count()
    }

    /// Check the commitment against the payload and the signature against
    /// the signer key.
    pub fn verify_signature(&self) -> bool {
        sha256(&self.payload) == self.commitment
            && self.signer.verify(
                &signing_message(self.secret_id, self.number, &self.commitment),
                &self.signature,
            )
    }

    /// Resolve a Pending acknowledgment. Returns `false` if the helper is
    /// unknown or already resolved.
    pub(crate) fn record_ack(&mut self, helper: &IdentityId, confirmed: bool) -> bool {
        match self.acks.get_mut(helper) {
            Some(status) if *status == AckStatus::Pending => {
                *status = if confirmed {
                    AckStatus::Confirmed
                } else {
                    AckStatus::Failed
                };
                true
            }
            _ => false,
        }
    }

    /// Mark every Pending acknowledgment Failed. Returns how many changed.
    pub(crate) fn fail_pending(&mut self) -> usize {
        let mut changed = 0;
        for status in self.acks.values_mut() {
            if *status == AckStatus::Pending {
                *status = AckStatus::Failed;
                changed += 1;
            }
        }
        changed
    }
}

fn signing_message(secret_id: Uuid, number: u64, commitment: &[u8; 32]) -> Vec<u8> {
    let mut message = Vec::with_capacity(16 + 8 + 32);
    message.extend_from_slice(secret_id.as_bytes());
    message.extend_from_slice(&number.to_be_bytes());
    message.extend_from_slice(commitment);
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn helpers() -> Vec<IdentityId> {
        vec![
            IdentityId::from_bytes([1u8; 32]),
            IdentityId::from_bytes([2u8; 32]),
            IdentityId::from_bytes([3u8; 32]),
        ]
    }

    fn sample() -> Version {
        let key = KeyPair::from_private_key(&[11u8; 32]).unwrap();
        Version::new(Uuid::new_v4(), 4, b"seed words".to_vec(), &key, helpers()).unwrap()
    }

    #[test]
    fn new_version_is_signed_and_all_pending() {
        let v = sample();
        assert_eq!(v.number(), 4);
        assert_eq!(v.commitment(), &sha256(b"seed words"));
        assert_eq!(v.pending_count(), 3);
        assert!(v.verify_signature());
    }

    #[test]
    fn acks_only_move_forward() {
        let mut v = sample();
        let ids = helpers();
        assert!(v.record_ack(&ids[0], true));
        assert!(v.record_ack(&ids[1], false));
        assert!(!v.record_ack(&ids[0], false), "confirmed is final");
        assert!(!v.record_ack(&IdentityId::from_bytes([9u8; 32]), true));

        assert_eq!(v.fail_pending(), 1);
        assert_eq!(v.confirmed_count(), 1);
        assert_eq!(v.failed_count(), 2);
        assert!(!v.record_ack(&ids[2], true), "failed is final");
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let mut v = sample();
        v.payload = b"other words".to_vec();
        assert!(!v.verify_signature());

        let mut v = sample();
        v.number += 1;
        assert!(!v.verify_signature());
    }

    #[test]
    fn json_roundtrip_preserves_signature() {
        let v = sample();
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["payload"], hex::encode(b"seed words"));
        assert_eq!(json["acks"].as_object().unwrap().len(), 3);

        let parsed: Version = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, v);
        assert!(parsed.verify_signature());
    }
}
