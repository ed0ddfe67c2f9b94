//! Transport contract between the core and its helpers.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::crypto::CompressedPublicKey;
use crate::identity::Identity;
use crate::secret::Version;

/// Why a helper exchange failed.
///
/// These never reach the caller of a secret operation; they are logged and
/// folded into pairing status or acknowledgment status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The helper has no transport address.
    #[error("helper {0} has no transport address")]
    NoAddress(String),

    /// The helper answered with a refusal.
    #[error("helper refused: {0}")]
    Rejected(String),
}

/// Everything a helper needs to accept a pairing.
#[derive(Debug, Clone, Serialize)]
pub struct PairingRequest {
    /// Secret the helper is asked to hold.
    pub secret_id: Uuid,
    /// The secret's owner.
    pub owner: Identity,
    /// The helper being paired.
    pub helper: Identity,
    /// Public half of the relationship key derived for this helper.
    pub public_key: CompressedPublicKey,
}

/// How the core reaches helpers.
///
/// Implementations may take as long as they like; the core wraps every call
/// in its own timeout and treats expiry as a failed exchange.
#[async_trait]
pub trait HelperTransport: Send + Sync {
    /// Pairing handshake. `Ok` means the helper accepted.
    async fn pair(&self, request: &PairingRequest) -> Result<(), TransportError>;

    /// Tell a helper it no longer holds `secret_id`.
    async fn unpair(&self, secret_id: Uuid, helper: &Identity) -> Result<(), TransportError>;

    /// Deliver a version. `Ok` is the helper's acknowledgment.
    async fn send(&self, secret_id: Uuid, helper: &Identity, version: &Version)
        -> Result<(), TransportError>;
}
