//! # Helpers
//!
//! A helper is a third party that holds a copy of the owner's protected
//! bytes and confirms each new version. This module holds the local record
//! of one helper relationship ([`Pairable`]) and the transport contract the
//! core uses to reach helpers ([`HelperTransport`]).
//!
//! The core never talks to the network itself. Whatever reaches the helper
//! (HTTP, a message queue, a test double) implements [`HelperTransport`];
//! the core imposes every timeout on top of it.

pub mod memory;
pub mod pairable;
pub mod transport;

pub use memory::{HelperBehavior, MemoryTransport};
pub use pairable::{Pairable, PairingOutcome, PairingStatus};
pub use transport::{HelperTransport, PairingRequest, TransportError};
