// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # DeRec Protocol: Core Library
//!
//! Decentralized recovery of secrets. An owner hands copies of a secret to a
//! set of helpers, keeps pushing new versions to them, and can later recover
//! the secret from any quorum of them. This crate is the owner's side of
//! that arrangement: the secret / helper / version state machine and the
//! hierarchical key derivation that gives every helper relationship and
//! every version its own key.
//!
//! ## Architecture
//!
//! - **config**: protocol constants and per-secret configuration.
//! - **crypto**: BIP32/BIP44 derivation over secp256k1, ECDSA, SHA-256.
//! - **identity**: parties, and their stable ids.
//! - **helper**: helper relationships and the transport contract.
//! - **secret**: secrets, versions and the owner that creates them.
//!
//! Transports and entropy sources are injected. Nothing in here opens a
//! socket or reads a global.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use derec_protocol::{Identity, KeyDeriver, MemoryTransport, Owner};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> derec_protocol::Result<()> {
//! let owner = Owner::new(
//!     Identity::new("me", "mailto:me@example.com", None)?,
//!     Arc::new(KeyDeriver::from_hex_seed("000102030405060708090a0b0c0d0e0f")?),
//!     Arc::new(MemoryTransport::new()),
//! );
//! let secret = owner.new_secret("wallet-backup", b"correct horse")?;
//! let helper = Identity::new("h1", "mailto:h1@example.com", Some("mem://h1"))?;
//! secret.add_helpers(vec![helper]).await?;
//!
//! let version = secret.update(b"correct horse battery").await?;
//! assert_eq!(version.number(), 1);
//! secret.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod helper;
pub mod identity;
pub mod secret;

pub use config::{Quorum, SecretConfig};
pub use crypto::{DerivationPath, EntropySource, KeyDeriver, KeyPair};
pub use error::{DeRecError, Result};
pub use helper::{HelperTransport, MemoryTransport, Pairable, PairingOutcome, PairingStatus};
pub use identity::{Identity, IdentityId};
pub use secret::{AckStatus, Owner, PendingPairing, PendingUpdate, Secret, SecretState, Version};
