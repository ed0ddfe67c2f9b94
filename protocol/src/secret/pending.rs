//! Handles returned by the non-blocking secret operations.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::version::Version;
use crate::error::{DeRecError, Result};
use crate::helper::PairingOutcome;
use crate::identity::IdentityId;

/// Result of one helper's pairing handshake, resolved when the handshake
/// terminates. Awaiting it never hangs past the pairing timeout.
#[derive(Debug)]
pub struct PendingPairing {
    helper: IdentityId,
    rx: oneshot::Receiver<PairingOutcome>,
}

impl PendingPairing {
    pub(crate) fn new(helper: IdentityId, rx: oneshot::Receiver<PairingOutcome>) -> Self {
        Self { helper, rx }
    }

    /// The helper this handshake is for.
    pub fn helper(&self) -> IdentityId {
        self.helper
    }
}

impl Future for PendingPairing {
    type Output = PairingOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the runtime is shutting down; the pairing
        // never completed.
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(PairingOutcome::Removed))
    }
}

/// An update in flight.
///
/// The version number is allocated before the handle is returned, so it is
/// known even if the update is later canceled or fails.
#[derive(Debug)]
pub struct PendingUpdate {
    version: u64,
    rx: oneshot::Receiver<Result<Version>>,
}

impl PendingUpdate {
    pub(crate) fn new(version: u64, rx: oneshot::Receiver<Result<Version>>) -> Self {
        Self { version, rx }
    }

    /// Number allocated to this update's version.
    pub fn version(&self) -> u64 {
        self.version
    }
}

impl Future for PendingUpdate {
    type Output = Result<Version>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let version = self.version;
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.unwrap_or(Err(DeRecError::Canceled { version }))
        })
    }
}
