//! In-memory helper transport.
//!
//! Stores pairings and delivered versions in process and lets each helper be
//! scripted to accept, refuse, answer late, or never answer. Used by the
//! integration tests and by `derec-cli simulate`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::transport::{HelperTransport, PairingRequest, TransportError};
use crate::crypto::CompressedPublicKey;
use crate::identity::{Identity, IdentityId};
use crate::secret::Version;

/// How a scripted helper answers one kind of request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HelperBehavior {
    /// Answer yes, immediately.
    #[default]
    Accept,
    /// Answer no, immediately.
    Reject,
    /// Answer yes after the given delay.
    Delay(Duration),
    /// Never answer.
    Silent,
}

impl HelperBehavior {
    async fn respond(self, helper: &Identity) -> Result<(), TransportError> {
        match self {
            HelperBehavior::Accept => Ok(()),
            HelperBehavior::Reject => Err(TransportError::Rejected(format!(
                "{} declined",
                helper.name()
            ))),
            HelperBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            HelperBehavior::Silent => std::future::pending().await,
        }
    }
}

#[derive(Default)]
struct Script {
    pairing: HelperBehavior,
    update: HelperBehavior,
    unpair: HelperBehavior,
}

#[derive(Default)]
struct MemoryState {
    scripts: HashMap<IdentityId, Script>,
    /// (secret, helper) → relationship key.
    pairings: HashMap<(Uuid, IdentityId), CompressedPublicKey>,
    /// (secret, helper) → version numbers received, in arrival order.
    stored: HashMap<(Uuid, IdentityId), Vec<u64>>,
    unpaired: HashSet<(Uuid, IdentityId)>,
}

/// A [`HelperTransport`] that never leaves the process.
///
/// Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    /// Every helper accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script how `helper` answers pairing requests.
    pub fn set_pairing_behavior(&self, helper: &Identity, behavior: HelperBehavior) {
        self.state.lock().scripts.entry(helper.id()).or_default().pairing = behavior;
    }

    /// Script how `helper` answers version deliveries.
    pub fn set_update_behavior(&self, helper: &Identity, behavior: HelperBehavior) {
        self.state.lock().scripts.entry(helper.id()).or_default().update = behavior;
    }

    /// Script how `helper` answers unpair requests.
    pub fn set_unpair_behavior(&self, helper: &Identity, behavior: HelperBehavior) {
        self.state.lock().scripts.entry(helper.id()).or_default().unpair = behavior;
    }

    /// Whether `helper` currently holds a pairing for `secret_id`.
    pub fn is_paired(&self, secret_id: Uuid, helper: &Identity) -> bool {
        self.state
            .lock()
            .pairings
            .contains_key(&(secret_id, helper.id()))
    }

    /// The relationship key `helper` was handed for `secret_id`.
    pub fn pairing_key(&self, secret_id: Uuid, helper: &Identity) -> Option<CompressedPublicKey> {
        self.state
            .lock()
            .pairings
            .get(&(secret_id, helper.id()))
            .copied()
    }

    /// Whether `helper` received an unpair request for `secret_id`.
    pub fn was_unpaired(&self, secret_id: Uuid, helper: &Identity) -> bool {
        self.state
            .lock()
            .unpaired
            .contains(&(secret_id, helper.id()))
    }

    /// Version numbers `helper` acknowledged for `secret_id`.
    pub fn stored_versions(&self, secret_id: Uuid, helper: &Identity) -> Vec<u64> {
        self.state
            .lock()
            .stored
            .get(&(secret_id, helper.id()))
            .cloned()
            .unwrap_or_default()
    }

    fn behavior(&self, helper: &Identity, pick: fn(&Script) -> HelperBehavior) -> HelperBehavior {
        self.state
            .lock()
            .scripts
            .get(&helper.id())
            .map(pick)
            .unwrap_or_default()
    }
}

fn require_address(helper: &Identity) -> Result<(), TransportError> {
    match helper.address() {
        Some(_) => Ok(()),
        None => Err(TransportError::NoAddress(helper.name().to_string())),
    }
}

#[async_trait]
impl HelperTransport for MemoryTransport {
    async fn pair(&self, request: &PairingRequest) -> Result<(), TransportError> {
        require_address(&request.helper)?;
        self.behavior(&request.helper, |s| s.pairing)
            .respond(&request.helper)
            .await?;

        let key = (request.secret_id, request.helper.id());
        let mut state = self.state.lock();
        state.unpaired.remove(&key);
        state.pairings.insert(key, request.public_key);
        debug!(secret = %request.secret_id, helper = request.helper.name(), "memory helper paired");
        Ok(())
    }

    async fn unpair(&self, secret_id: Uuid, helper: &Identity) -> Result<(), TransportError> {
        require_address(helper)?;
        self.behavior(helper, |s| s.unpair).respond(helper).await?;

        let key = (secret_id, helper.id());
        let mut state = self.state.lock();
        state.pairings.remove(&key);
        state.unpaired.insert(key);
        Ok(())
    }

    async fn send(
        &self,
        secret_id: Uuid,
        helper: &Identity,
        version: &Version,
    ) -> Result<(), TransportError> {
        require_address(helper)?;
        let key = (secret_id, helper.id());
        if !self.state.lock().pairings.contains_key(&key) {
            return Err(TransportError::Rejected(format!(
                "{} is not paired for secret {secret_id}",
                helper.name()
            )));
        }
        self.behavior(helper, |s| s.update).respond(helper).await?;

        self.state
            .lock()
            .stored
            .entry(key)
            .or_default()
            .push(version.number());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn helper(name: &str) -> Identity {
        Identity::new(name, "mailto:h@example.com", Some("mem://helpers")).unwrap()
    }

    fn request(secret_id: Uuid, helper: &Identity) -> PairingRequest {
        PairingRequest {
            secret_id,
            owner: Identity::new("owner", "mailto:o@example.com", None).unwrap(),
            helper: helper.clone(),
            public_key: *KeyPair::from_private_key(&[5u8; 32]).unwrap().public_key(),
        }
    }

    #[tokio::test]
    async fn pair_then_unpair() {
        let transport = MemoryTransport::new();
        let h = helper("h1");
        let secret = Uuid::new_v4();

        transport.pair(&request(secret, &h)).await.unwrap();
        assert!(transport.is_paired(secret, &h));
        assert!(transport.pairing_key(secret, &h).is_some());

        transport.unpair(secret, &h).await.unwrap();
        assert!(!transport.is_paired(secret, &h));
        assert!(transport.was_unpaired(secret, &h));
    }

    #[tokio::test]
    async fn scripted_rejection() {
        let transport = MemoryTransport::new();
        let h = helper("h1");
        transport.set_pairing_behavior(&h, HelperBehavior::Reject);

        let result = transport.pair(&request(Uuid::new_v4(), &h)).await;
        assert!(matches!(result, Err(TransportError::Rejected(_))));
    }

    #[tokio::test]
    async fn helper_without_address_is_unreachable() {
        let transport = MemoryTransport::new();
        let h = Identity::new("h1", "mailto:h@example.com", None).unwrap();
        let result = transport.pair(&request(Uuid::new_v4(), &h)).await;
        assert_eq!(result, Err(TransportError::NoAddress("h1".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_helper_never_answers() {
        let transport = MemoryTransport::new();
        let h = helper("h1");
        transport.set_pairing_behavior(&h, HelperBehavior::Silent);

        let binding = request(Uuid::new_v4(), &h);
        let pairing = transport.pair(&binding);
        let outcome = tokio::time::timeout(Duration::from_secs(3600), pairing).await;
        assert!(outcome.is_err());
    }
}
