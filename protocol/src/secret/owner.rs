//! The secret owner: creates secrets and numbers them.

use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use super::Secret;
use crate::config::{SecretConfig, HARDENED_OFFSET};
use crate::crypto::EntropySource;
use crate::error::{DeRecError, Result};
use crate::helper::HelperTransport;
use crate::identity::Identity;

/// A secret owner.
///
/// Holds the owner's identity and the two collaborators every secret needs,
/// the entropy source and the helper transport, and hands out secrets. Each
/// secret gets the next index among the owner's secrets; that index is the
/// hardened account level of every key derived for it, so secrets never
/// share key material.
pub struct Owner {
    identity: Identity,
    entropy: Arc<dyn EntropySource>,
    transport: Arc<dyn HelperTransport>,
    config: SecretConfig,
    secrets: RwLock<Vec<Secret>>,
}

impl Owner {
    /// Build an owner with the default [`SecretConfig`].
    pub fn new(
        identity: Identity,
        entropy: Arc<dyn EntropySource>,
        transport: Arc<dyn HelperTransport>,
    ) -> Self {
        Self {
            identity,
            entropy,
            transport,
            config: SecretConfig::default(),
            secrets: RwLock::new(Vec::new()),
        }
    }

    /// Replace the default configuration used by [`Owner::new_secret`].
    pub fn with_config(mut self, config: SecretConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &SecretConfig {
        &self.config
    }

    /// Create a secret with the owner's default configuration. `initial`
    /// becomes version 0.
    pub fn new_secret(&self, description: &str, initial: &[u8]) -> Result<Secret> {
        self.new_secret_with_config(description, initial, self.config.clone())
    }

    /// Create a secret with its own configuration.
    pub fn new_secret_with_config(
        &self,
        description: &str,
        initial: &[u8],
        config: SecretConfig,
    ) -> Result<Secret> {
        let mut secrets = self.secrets.write();
        let index = u32::try_from(secrets.len())
            .ok()
            .filter(|i| *i < HARDENED_OFFSET)
            .ok_or_else(|| DeRecError::InvalidArgument("too many secrets".into()))?;

        let secret = Secret::create(
            self.identity.clone(),
            index,
            description,
            initial,
            config,
            Arc::clone(&self.entropy),
            Arc::clone(&self.transport),
        )?;
        secrets.push(secret.clone());
        Ok(secret)
    }

    /// Look a secret up by id.
    pub fn secret(&self, id: Uuid) -> Option<Secret> {
        self.secrets.read().iter().find(|s| s.id() == id).cloned()
    }

    /// Every secret, in creation order.
    pub fn secrets(&self) -> Vec<Secret> {
        self.secrets.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyDeriver;
    use crate::helper::MemoryTransport;

    fn owner() -> Owner {
        Owner::new(
            Identity::new("owner", "mailto:owner@example.com", None).unwrap(),
            Arc::new(KeyDeriver::from_hex_seed("000102030405060708090a0b0c0d0e0f").unwrap()),
            Arc::new(MemoryTransport::new()),
        )
    }

    #[test]
    fn secrets_get_sequential_indices() {
        let owner = owner();
        let a = owner.new_secret("a", b"1").unwrap();
        let b = owner.new_secret("b", b"2").unwrap();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_ne!(a.id(), b.id());
        assert_eq!(owner.secret(b.id()).unwrap().description(), "b");
        assert_eq!(owner.secrets().len(), 2);
    }

    #[test]
    fn secrets_sign_with_distinct_keys() {
        let owner = owner();
        let a = owner.new_secret("a", b"same").unwrap();
        let b = owner.new_secret("b", b"same").unwrap();
        assert_ne!(
            a.latest_version().unwrap().signer(),
            b.latest_version().unwrap().signer()
        );
    }

    #[test]
    fn failed_creation_does_not_consume_an_index() {
        let owner = owner();
        assert!(matches!(
            owner.new_secret("empty", b""),
            Err(DeRecError::InvalidArgument(_))
        ));
        assert_eq!(owner.new_secret("ok", b"x").unwrap().index(), 0);
    }

    #[test]
    fn invalid_config_rejected() {
        let bad = SecretConfig::default().with_quorum(crate::config::Quorum::Fixed(0));
        assert!(owner().with_config(bad).is_err());
    }
}
