//! # Secrets
//!
//! A [`Secret`] is the owner's handle on one piece of protected data: the
//! helpers holding it, every version ever written, and whether it is still
//! open.
//!
//! ## Lifecycle
//!
//! ```text
//! Available ──add / remove / update──▶ Available
//! Available ──close──▶ Closed (terminal)
//! ```
//!
//! ## Concurrency
//!
//! Mutating operations (pairing, removal, update fan-out, close) run one at
//! a time behind a FIFO async mutex. Inside an operation every helper is
//! contacted concurrently, one task per helper, and each task reports back
//! over a channel; the operation's coordinator is the only code that applies
//! those outcomes to the secret's state, and each application happens under
//! the state lock in one step.
//!
//! Version numbers are allocated when `update` / `update_async` is called,
//! not when the fan-out starts, so numbering always follows call order.
//! At most one `update_async` is in flight: starting another cancels the
//! previous one. Canceling an update, closing the secret, or reaching the
//! update deadline aborts every delivery of that version still in progress.
//!
//! All operations that spawn work must run inside a Tokio runtime.

mod owner;
mod pending;
mod version;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{SecretConfig, HELPER_KEY_BRANCH, INITIAL_VERSION, VERSION_KEY_BRANCH};
use crate::crypto::{ChildIndex, DerivationError, DerivationPath, EntropySource, KeyPair};
use crate::error::{DeRecError, Result};
use crate::helper::{HelperTransport, Pairable, PairingOutcome, PairingRequest, PairingStatus};
use crate::identity::{Identity, IdentityId};

pub use owner::Owner;
pub use pending::{PendingPairing, PendingUpdate};
pub use version::{AckStatus, Version};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretState {
    /// Open for helper management and updates.
    Available,
    /// Closed for good. Only read accessors work.
    Closed,
}

struct SecretData {
    state: SecretState,
    pairables: Vec<Pairable>,
    versions: BTreeMap<u64, Version>,
    next_version: u64,
    next_ordinal: u32,
}

impl SecretData {
    fn active(&self, id: &IdentityId) -> Option<&Pairable> {
        self.pairables
            .iter()
            .find(|p| p.id() == *id && p.status().is_active())
    }

    fn active_mut(&mut self, id: &IdentityId) -> Option<&mut Pairable> {
        self.pairables
            .iter_mut()
            .find(|p| p.id() == *id && p.status().is_active())
    }

    fn paired(&self) -> impl Iterator<Item = &Pairable> {
        self.pairables
            .iter()
            .filter(|p| p.status() == PairingStatus::Paired)
    }
}

struct InFlightUpdate {
    version: u64,
    cancel: oneshot::Sender<()>,
}

struct SecretInner {
    id: Uuid,
    index: u32,
    description: String,
    owner: Identity,
    config: SecretConfig,
    entropy: Arc<dyn EntropySource>,
    transport: Arc<dyn HelperTransport>,
    data: RwLock<SecretData>,
    /// Serializes mutating operations. Tokio's mutex is fair, so waiters
    /// run in arrival order.
    ops: tokio::sync::Mutex<()>,
    in_flight: Mutex<Option<InFlightUpdate>>,
    /// Flipped to `true` once, by `close`.
    closing: watch::Sender<bool>,
}

// ---------------------------------------------------------------------------
// Secret
// ---------------------------------------------------------------------------

/// Handle on one protected secret. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Secret {
    inner: Arc<SecretInner>,
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("id", &self.inner.id)
            .field("index", &self.inner.index)
            .field("description", &self.inner.description)
            .field("state", &self.inner.data.read().state)
            .finish()
    }
}

impl Secret {
    /// Create a secret whose initial bytes become version 0.
    pub(crate) fn create(
        owner: Identity,
        index: u32,
        description: &str,
        initial: &[u8],
        config: SecretConfig,
        entropy: Arc<dyn EntropySource>,
        transport: Arc<dyn HelperTransport>,
    ) -> Result<Self> {
        config.validate()?;
        if initial.is_empty() {
            return Err(DeRecError::InvalidArgument(
                "secret payload must not be empty".into(),
            ));
        }

        let id = Uuid::new_v4();
        let signing_key = entropy.get_entropy(
            config.coin_type,
            &version_key_path(index, INITIAL_VERSION)?,
        )?;
        let initial_version = Version::new(
            id,
            INITIAL_VERSION,
            initial.to_vec(),
            &signing_key,
            std::iter::empty(),
        )?;

        info!(secret = %id, index, description, "secret created");

        let mut versions = BTreeMap::new();
        versions.insert(INITIAL_VERSION, initial_version);
        let (closing, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(SecretInner {
                id,
                index,
                description: description.to_string(),
                owner,
                config,
                entropy,
                transport,
                data: RwLock::new(SecretData {
                    state: SecretState::Available,
                    pairables: Vec::new(),
                    versions,
                    next_version: INITIAL_VERSION + 1,
                    next_ordinal: 0,
                }),
                ops: tokio::sync::Mutex::new(()),
                in_flight: Mutex::new(None),
                closing,
            }),
        })
    }

    // -----------------------------------------------------------------------
    // Accessors (valid in every state)
    // -----------------------------------------------------------------------

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Position among the owner's secrets; the hardened account index of
    /// every key derived for this secret.
    pub fn index(&self) -> u32 {
        self.inner.index
    }

    pub fn description(&self) -> &str {
        &self.inner.description
    }

    pub fn config(&self) -> &SecretConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SecretState {
        self.inner.data.read().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SecretState::Closed
    }

    /// Every version ever created, oldest first, whatever its
    /// acknowledgment outcome.
    pub fn versions(&self) -> Vec<Version> {
        self.inner.data.read().versions.values().cloned().collect()
    }

    /// One version by number.
    pub fn version(&self, number: u64) -> Option<Version> {
        self.inner.data.read().versions.get(&number).cloned()
    }

    /// The highest-numbered version.
    pub fn latest_version(&self) -> Option<Version> {
        self.inner
            .data
            .read()
            .versions
            .values()
            .next_back()
            .cloned()
    }

    // -----------------------------------------------------------------------
    // Queries (open secrets only)
    // -----------------------------------------------------------------------

    /// Every helper relationship, including removed ones, in creation order.
    pub fn helpers(&self) -> Result<Vec<Pairable>> {
        let data = self.inner.data.read();
        ensure_open(&data)?;
        Ok(data.pairables.clone())
    }

    /// Whether the secret could complete a quorum-confirmed update right
    /// now: it is open, has at least one Paired helper, and the Paired
    /// count meets the quorum rule.
    pub fn is_available(&self) -> Result<bool> {
        let data = self.inner.data.read();
        ensure_open(&data)?;
        let paired = data.paired().count();
        Ok(paired > 0 && paired >= self.inner.config.quorum.required(paired))
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Add helpers and wait until every handshake has resolved.
    ///
    /// Returns one outcome per helper actually added (duplicates and helpers
    /// already Pending or Paired are skipped).
    pub async fn add_helpers(
        &self,
        helpers: impl IntoIterator<Item = Identity>,
    ) -> Result<Vec<(IdentityId, PairingOutcome)>> {
        let pending = self.add_helpers_async(helpers)?;
        let ids: Vec<IdentityId> = pending.iter().map(PendingPairing::helper).collect();
        let outcomes = join_all(pending).await;
        Ok(ids.into_iter().zip(outcomes).collect())
    }

    /// Add helpers without waiting.
    ///
    /// Keys for every new helper are derived and the Pending relationships
    /// recorded before this returns; if any derivation fails nothing is
    /// recorded. Each returned handle resolves when its handshake ends.
    pub fn add_helpers_async(
        &self,
        helpers: impl IntoIterator<Item = Identity>,
    ) -> Result<Vec<PendingPairing>> {
        let inner = &self.inner;
        let mut data = inner.data.write();
        ensure_open(&data)?;

        let mut seen = HashSet::new();
        let mut staged = Vec::new();
        let mut ordinal = data.next_ordinal;
        for identity in helpers {
            let id = identity.id();
            if !seen.insert(id) || data.active(&id).is_some() {
                debug!(secret = %inner.id, helper = %id.short(), "helper already added, skipping");
                continue;
            }
            let (path, key_pair) = inner.helper_key(ordinal)?;
            staged.push(Pairable::new(identity, ordinal, path, key_pair));
            ordinal = ordinal
                .checked_add(1)
                .ok_or(DerivationError::IndexOutOfRange(u64::from(ordinal) + 1))?;
        }

        data.next_ordinal = ordinal;
        let mut waiters = Vec::with_capacity(staged.len());
        let mut handles = Vec::with_capacity(staged.len());
        for pairable in &staged {
            let (tx, rx) = oneshot::channel();
            waiters.push((pairable.id(), tx));
            handles.push(PendingPairing::new(pairable.id(), rx));
        }
        data.pairables.extend(staged);
        drop(data);

        if !waiters.is_empty() {
            info!(secret = %inner.id, count = waiters.len(), "pairing helpers");
            tokio::spawn(run_pairing(Arc::clone(inner), waiters));
        }
        Ok(handles)
    }

    /// Remove helpers by id and wait for the unpair handshakes.
    ///
    /// Unknown or already removed ids are ignored. Matched helpers end up
    /// Removed whether or not they answered. Returns the ids removed.
    pub async fn remove_helpers(&self, ids: &[IdentityId]) -> Result<Vec<IdentityId>> {
        ensure_open(&self.inner.data.read())?;
        let _guard = self.inner.ops.lock().await;

        let targets: Vec<Identity> = {
            let data = self.inner.data.read();
            ensure_open(&data)?;
            let mut seen = HashSet::new();
            ids.iter()
                .filter(|id| seen.insert(**id))
                .filter_map(|id| data.active(id).map(|p| p.identity().clone()))
                .collect()
        };
        if targets.is_empty() {
            debug!(secret = %self.inner.id, "no matching helpers to remove");
            return Ok(Vec::new());
        }

        let timeout = self.inner.config.unpair_timeout;
        let results = join_all(targets.iter().map(|helper| {
            let transport = Arc::clone(&self.inner.transport);
            let secret_id = self.inner.id;
            async move { tokio::time::timeout(timeout, transport.unpair(secret_id, helper)).await }
        }))
        .await;

        let mut removed = Vec::with_capacity(targets.len());
        let mut data = self.inner.data.write();
        for (helper, result) in targets.iter().zip(results) {
            let id = helper.id();
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(secret = %self.inner.id, helper = %id.short(), error = %e, "unpair failed, removing locally"),
                Err(_) => warn!(secret = %self.inner.id, helper = %id.short(), "unpair timed out, removing locally"),
            }
            if let Some(pairable) = data.active_mut(&id) {
                pairable.mark_removed();
                removed.push(id);
                info!(secret = %self.inner.id, helper = %id.short(), "helper removed");
            }
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Updates
    // -----------------------------------------------------------------------

    /// Write a new version and wait until a quorum of helpers confirms it or
    /// the update deadline passes.
    ///
    /// On [`DeRecError::UpdateNotSafe`] the version stays recorded; inspect
    /// it with [`Secret::version`].
    pub async fn update(&self, payload: &[u8]) -> Result<Version> {
        let number = self.inner.record_version(payload)?;
        let (tx, rx) = oneshot::channel();
        tokio::spawn(run_update(Arc::clone(&self.inner), number, None, tx));
        PendingUpdate::new(number, rx).await
    }

    /// Write a new version without waiting, canceling any previous
    /// `update_async` that has not resolved yet.
    pub fn update_async(&self, payload: &[u8]) -> Result<PendingUpdate> {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let number = {
            // Held across allocation so concurrent callers supersede each
            // other in version order.
            let mut in_flight = self.inner.in_flight.lock();
            let number = self.inner.record_version(payload)?;
            if let Some(previous) = in_flight.replace(InFlightUpdate {
                version: number,
                cancel: cancel_tx,
            }) {
                info!(secret = %self.inner.id, canceled = previous.version, by = number, "superseding async update");
                let _ = previous.cancel.send(());
            }
            number
        };

        let (tx, rx) = oneshot::channel();
        tokio::spawn(run_update(
            Arc::clone(&self.inner),
            number,
            Some(cancel_rx),
            tx,
        ));
        Ok(PendingUpdate::new(number, rx))
    }

    // -----------------------------------------------------------------------
    // Close
    // -----------------------------------------------------------------------

    /// Close the secret. Idempotent.
    ///
    /// Cancels any in-flight `update_async`, sends best-effort unpair
    /// requests to every Pending or Paired helper without waiting for them,
    /// then marks all helpers Removed and the secret Closed in one step.
    pub async fn close(&self) {
        if self.is_closed() {
            return;
        }
        let flight = self.inner.in_flight.lock().take();
        if let Some(flight) = flight {
            let _ = flight.cancel.send(());
        }

        let _guard = self.inner.ops.lock().await;
        let targets: Vec<Identity> = {
            let mut data = self.inner.data.write();
            if data.state == SecretState::Closed {
                return;
            }
            let mut targets = Vec::new();
            for pairable in data.pairables.iter_mut().filter(|p| p.status().is_active()) {
                targets.push(pairable.identity().clone());
                pairable.mark_removed();
            }
            for version in data.versions.values_mut() {
                version.fail_pending();
            }
            data.state = SecretState::Closed;
            targets
        };
        self.inner.closing.send_replace(true);

        let timeout = self.inner.config.unpair_timeout;
        for helper in targets {
            let transport = Arc::clone(&self.inner.transport);
            let secret_id = self.inner.id;
            tokio::spawn(async move {
                match tokio::time::timeout(timeout, transport.unpair(secret_id, &helper)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(secret = %secret_id, error = %e, "unpair on close failed"),
                    Err(_) => debug!(secret = %secret_id, "unpair on close timed out"),
                }
            });
        }

        info!(secret = %self.inner.id, "secret closed");
    }
}

fn ensure_open(data: &SecretData) -> Result<()> {
    match data.state {
        SecretState::Available => Ok(()),
        SecretState::Closed => Err(DeRecError::closed()),
    }
}

fn version_key_path(index: u32, number: u64) -> std::result::Result<DerivationPath, DerivationError> {
    let number = u32::try_from(number).map_err(|_| DerivationError::IndexOutOfRange(number))?;
    Ok(DerivationPath::new(vec![
        ChildIndex::hardened(index)?,
        ChildIndex::normal(VERSION_KEY_BRANCH)?,
        ChildIndex::normal(number)?,
    ]))
}

// ---------------------------------------------------------------------------
// SecretInner: state transitions
// ---------------------------------------------------------------------------

impl SecretInner {
    /// Relationship key for helper `ordinal`, returned with its absolute path.
    fn helper_key(&self, ordinal: u32) -> Result<(DerivationPath, KeyPair)> {
        let relative = DerivationPath::new(vec![
            ChildIndex::hardened(self.index)?,
            ChildIndex::normal(HELPER_KEY_BRANCH)?,
            ChildIndex::normal(ordinal)?,
        ]);
        let key_pair = self.entropy.get_entropy(self.config.coin_type, &relative)?;
        let absolute = DerivationPath::bip44_coin_root(self.config.coin_type)?.join(&relative);
        Ok((absolute, key_pair))
    }

    /// Allocate, sign and record the next version. Every Paired helper
    /// starts Pending.
    fn record_version(&self, payload: &[u8]) -> Result<u64> {
        if payload.is_empty() {
            return Err(DeRecError::InvalidArgument(
                "update payload must not be empty".into(),
            ));
        }
        let mut data = self.data.write();
        ensure_open(&data)?;

        let number = data.next_version;
        let signing_key = self
            .entropy
            .get_entropy(self.config.coin_type, &version_key_path(self.index, number)?)?;
        let helpers: Vec<IdentityId> = data.paired().map(Pairable::id).collect();
        let version = Version::new(self.id, number, payload.to_vec(), &signing_key, helpers)?;

        info!(
            secret = %self.id,
            version = number,
            helpers = version.acks().len(),
            "version created"
        );
        data.versions.insert(number, version);
        data.next_version = number + 1;
        Ok(number)
    }

    fn apply_pairing(&self, helper: &IdentityId, result: &std::result::Result<(), String>) -> PairingOutcome {
        let mut data = self.data.write();
        let Some(pairable) = data
            .pairables
            .iter_mut()
            .find(|p| p.id() == *helper && p.status() == PairingStatus::Pending)
        else {
            return PairingOutcome::Removed;
        };
        match result {
            Ok(()) => {
                pairable.mark_paired();
                info!(secret = %self.id, helper = %helper.short(), "helper paired");
                PairingOutcome::Paired
            }
            Err(reason) => {
                pairable.mark_removed();
                warn!(secret = %self.id, helper = %helper.short(), reason = %reason, "pairing failed");
                PairingOutcome::Removed
            }
        }
    }

    fn record_ack(&self, number: u64, helper: &IdentityId, confirmed: bool) {
        if let Some(version) = self.data.write().versions.get_mut(&number) {
            if version.record_ack(helper, confirmed) {
                debug!(secret = %self.id, version = number, helper = %helper.short(), confirmed, "ack recorded");
            }
        }
    }

    fn fail_pending(&self, number: u64) -> usize {
        self.data
            .write()
            .versions
            .get_mut(&number)
            .map(Version::fail_pending)
            .unwrap_or(0)
    }

    /// (confirmed, pending) for one version.
    fn ack_counts(&self, number: u64) -> (usize, usize) {
        self.data
            .read()
            .versions
            .get(&number)
            .map(|v| (v.confirmed_count(), v.pending_count()))
            .unwrap_or((0, 0))
    }

    fn snapshot(&self, number: u64) -> Option<Version> {
        self.data.read().versions.get(&number).cloned()
    }

    fn clear_in_flight(&self, number: u64) {
        let mut in_flight = self.in_flight.lock();
        if in_flight.as_ref().map(|f| f.version) == Some(number) {
            in_flight.take();
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinators
// ---------------------------------------------------------------------------

type Reply = Option<oneshot::Sender<Result<Version>>>;

/// Run the pairing handshakes for freshly added helpers and resolve their
/// handles.
async fn run_pairing(
    inner: Arc<SecretInner>,
    waiters: Vec<(IdentityId, oneshot::Sender<PairingOutcome>)>,
) {
    let _guard = inner.ops.lock().await;
    let mut waiters: HashMap<IdentityId, oneshot::Sender<PairingOutcome>> =
        waiters.into_iter().collect();

    // Helpers removed (or a secret closed) while waiting for the lock are
    // no longer Pending and get no handshake.
    let requests: Vec<PairingRequest> = {
        let data = inner.data.read();
        waiters
            .keys()
            .filter_map(|id| {
                data.pairables
                    .iter()
                    .find(|p| p.id() == *id && p.status() == PairingStatus::Pending)
                    .map(|p| PairingRequest {
                        secret_id: inner.id,
                        owner: inner.owner.clone(),
                        helper: p.identity().clone(),
                        public_key: *p.public_key(),
                    })
            })
            .collect()
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    for request in requests {
        let transport = Arc::clone(&inner.transport);
        let timeout = inner.config.pairing_timeout;
        let tx = tx.clone();
        tokio::spawn(async move {
            let helper = request.helper.id();
            let result = match tokio::time::timeout(timeout, transport.pair(&request)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("no answer within {timeout:?}")),
            };
            let _ = tx.send((helper, result));
        });
    }
    drop(tx);

    while let Some((helper, result)) = rx.recv().await {
        let outcome = inner.apply_pairing(&helper, &result);
        if let Some(waiter) = waiters.remove(&helper) {
            let _ = waiter.send(outcome);
        }
    }
    for (_, waiter) in waiters {
        let _ = waiter.send(PairingOutcome::Removed);
    }
}

async fn wait_closed(closing: &mut watch::Receiver<bool>) {
    // The sender lives as long as the secret, so an error never fires early.
    let _ = closing.wait_for(|closed| *closed).await;
}

async fn wait_canceled(cancel: &mut Option<oneshot::Receiver<()>>) {
    match cancel {
        // A dropped sender also counts: the slot was taken by close or a
        // newer update.
        Some(rx) => {
            let _ = rx.await;
        }
        None => std::future::pending().await,
    }
}

/// Fan a recorded version out to its helpers and resolve the caller once
/// the outcome is known. Keeps recording late acknowledgments until every
/// send has finished or the deadline has passed.
async fn run_update(
    inner: Arc<SecretInner>,
    number: u64,
    mut cancel: Option<oneshot::Receiver<()>>,
    reply: oneshot::Sender<Result<Version>>,
) {
    let mut reply: Reply = Some(reply);
    let mut closing = inner.closing.subscribe();

    let guard = tokio::select! {
        guard = inner.ops.lock() => guard,
        _ = wait_canceled(&mut cancel) => {
            finish_canceled(&inner, number, &mut reply);
            return;
        }
    };
    let mut guard = Some(guard);

    // Snapshot targets: helpers removed since allocation fail right away.
    let (version, targets, closed) = {
        let mut data = inner.data.write();
        let closed = data.state == SecretState::Closed;
        let helpers: Vec<IdentityId> = data
            .versions
            .get(&number)
            .map(|v| v.acks().keys().copied().collect())
            .unwrap_or_default();
        let mut targets = Vec::new();
        let mut gone = Vec::new();
        for id in helpers {
            match data.paired().find(|p| p.id() == id) {
                Some(p) if !closed => targets.push(p.identity().clone()),
                _ => gone.push(id),
            }
        }
        if let Some(version) = data.versions.get_mut(&number) {
            for id in &gone {
                version.record_ack(id, false);
            }
        }
        (data.versions.get(&number).cloned().map(Arc::new), targets, closed)
    };

    let Some(version) = version else {
        return;
    };
    if closed {
        inner.fail_pending(number);
        if let Some(reply) = reply.take() {
            let _ = reply.send(Err(DeRecError::closed()));
        }
        return;
    }

    let required = inner.config.quorum.required(version.acks().len());
    let deadline = Instant::now() + inner.config.update_timeout;
    debug!(secret = %inner.id, version = number, required, helpers = targets.len(), "fanning out version");

    let mut sends = JoinSet::new();
    for helper in targets {
        let transport = Arc::clone(&inner.transport);
        let version = Arc::clone(&version);
        let secret_id = inner.id;
        sends.spawn(async move {
            let confirmed = matches!(
                tokio::time::timeout_at(deadline, transport.send(secret_id, &helper, &version)).await,
                Ok(Ok(()))
            );
            (helper.id(), confirmed)
        });
    }

    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);

    loop {
        if reply.is_some() && try_resolve(&inner, number, required, &mut reply, false) {
            guard.take();
        }
        tokio::select! {
            joined = sends.join_next() => match joined {
                Some(Ok((helper, confirmed))) => inner.record_ack(number, &helper, confirmed),
                Some(Err(e)) => warn!(secret = %inner.id, version = number, error = %e, "delivery task failed"),
                None => break,
            },
            _ = &mut sleep => break,
            _ = wait_canceled(&mut cancel), if reply.is_some() => {
                sends.abort_all();
                finish_canceled(&inner, number, &mut reply);
                return;
            }
            _ = wait_closed(&mut closing) => {
                sends.abort_all();
                let failed = inner.fail_pending(number);
                debug!(secret = %inner.id, version = number, failed, "secret closed during delivery");
                if let Some(reply) = reply.take() {
                    let _ = reply.send(Err(DeRecError::closed()));
                }
                return;
            }
        }
    }
    sends.abort_all();

    let failed = inner.fail_pending(number);
    if failed > 0 {
        debug!(secret = %inner.id, version = number, failed, "pending acks failed at deadline");
    }
    if reply.is_some() {
        try_resolve(&inner, number, required, &mut reply, true);
    }
    drop(guard);
}

/// Resolve the caller if the outcome is decided: quorum reached, quorum
/// unreachable, or (`final_check`) nothing more will arrive.
fn try_resolve(
    inner: &SecretInner,
    number: u64,
    required: usize,
    reply: &mut Reply,
    final_check: bool,
) -> bool {
    let (confirmed, pending) = inner.ack_counts(number);
    let result = if confirmed >= required {
        info!(secret = %inner.id, version = number, confirmed, required, "quorum reached");
        match inner.snapshot(number) {
            Some(version) => Ok(version),
            None => return false,
        }
    } else if final_check || confirmed + pending < required {
        warn!(secret = %inner.id, version = number, confirmed, required, "quorum not reached");
        Err(DeRecError::UpdateNotSafe {
            version: number,
            confirmed,
            required,
        })
    } else {
        return false;
    };

    if let Some(reply) = reply.take() {
        let _ = reply.send(result);
    }
    inner.clear_in_flight(number);
    true
}

fn finish_canceled(inner: &SecretInner, number: u64, reply: &mut Reply) {
    let failed = inner.fail_pending(number);
    info!(secret = %inner.id, version = number, failed, "async update canceled");
    if let Some(reply) = reply.take() {
        let _ = reply.send(Err(DeRecError::Canceled { version: number }));
    }
    inner.clear_in_flight(number);
}
