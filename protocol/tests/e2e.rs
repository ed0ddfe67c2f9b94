//! End-to-end integration tests for the DeRec core.
//!
//! These drive a secret through its whole lifecycle against the in-memory
//! transport: creation, pairing, updates with and without quorum, async
//! supersession, removal and close. Time is paused, so timeouts resolve
//! instantly and deterministically.

use std::sync::Arc;
use std::time::Duration;

use derec_protocol::config::Quorum;
use derec_protocol::helper::HelperBehavior;
use derec_protocol::{
    AckStatus, DeRecError, Identity, IdentityId, KeyDeriver, MemoryTransport, Owner,
    PairingOutcome, PairingStatus, Secret, SecretConfig,
};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const SEED: &str = "000102030405060708090a0b0c0d0e0f";

fn helper(name: &str) -> Identity {
    Identity::new(
        name,
        &format!("mailto:{name}@example.com"),
        Some(format!("https://{name}.helpers.example/derec").as_str()),
    )
    .unwrap()
}

fn owner(transport: &MemoryTransport, config: SecretConfig) -> Owner {
    Owner::new(
        Identity::new("alice", "mailto:alice@example.com", None).unwrap(),
        Arc::new(KeyDeriver::from_hex_seed(SEED).unwrap()),
        Arc::new(transport.clone()),
    )
    .with_config(config)
    .unwrap()
}

/// Owner, secret and three paired helpers.
async fn paired_secret(
    transport: &MemoryTransport,
    config: SecretConfig,
) -> (Owner, Secret, Vec<Identity>) {
    let owner = owner(transport, config);
    let secret = owner.new_secret("wallet-backup", b"bytes0").unwrap();
    let helpers = vec![helper("h1"), helper("h2"), helper("h3")];
    let outcomes = secret.add_helpers(helpers.clone()).await.unwrap();
    assert!(outcomes.iter().all(|(_, o)| *o == PairingOutcome::Paired));
    (owner, secret, helpers)
}

fn quick_config() -> SecretConfig {
    SecretConfig::default()
        .with_quorum(Quorum::Fixed(2))
        .with_update_timeout(Duration::from_secs(10))
        .with_pairing_timeout(Duration::from_secs(5))
        .with_unpair_timeout(Duration::from_secs(5))
}

// ---------------------------------------------------------------------------
// 1. The wallet-backup scenario
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn wallet_backup_scenario() {
    let transport = MemoryTransport::new();
    let (_owner, secret, helpers) = paired_secret(&transport, quick_config()).await;
    let (h1, h2, h3) = (&helpers[0], &helpers[1], &helpers[2]);
    assert!(secret.is_available().unwrap());

    // h3 never acknowledges; h1 and h2 are enough.
    transport.set_update_behavior(h3, HelperBehavior::Silent);
    let v1 = secret.update(b"bytes1").await.unwrap();
    assert_eq!(v1.number(), 1);
    assert_eq!(v1.payload(), b"bytes1");
    assert!(v1.confirmed_count() >= 2);
    assert!(v1.verify_signature());
    assert!(secret.is_available().unwrap());

    // Drop h1; only h2 of the remaining two confirms.
    let removed = secret.remove_helpers(&[h1.id()]).await.unwrap();
    assert_eq!(removed, vec![h1.id()]);
    assert!(secret.is_available().unwrap());

    let err = secret.update(b"bytes2").await.unwrap_err();
    assert!(matches!(
        err,
        DeRecError::UpdateNotSafe { version: 2, confirmed: 1, required: 2 }
    ));

    let versions = secret.versions();
    assert_eq!(versions.len(), 3);
    let v2 = &versions[2];
    assert_eq!(v2.payload(), b"bytes2");
    assert_eq!(v2.acks().len(), 2);
    assert_eq!(v2.ack(&h2.id()), Some(AckStatus::Confirmed));
    assert!(matches!(
        v2.ack(&h3.id()),
        Some(AckStatus::Pending) | Some(AckStatus::Failed)
    ));
    assert_eq!(v2.ack(&h1.id()), None);
}

// ---------------------------------------------------------------------------
// 2. Version numbering
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn version_numbers_increase_by_one_across_failures() {
    let transport = MemoryTransport::new();
    let (_owner, secret, helpers) = paired_secret(&transport, quick_config()).await;

    let mut numbers = Vec::new();
    numbers.push(secret.update(b"a").await.unwrap().number());

    for h in &helpers[1..] {
        transport.set_update_behavior(h, HelperBehavior::Reject);
    }
    match secret.update(b"b").await {
        Err(DeRecError::UpdateNotSafe { version, .. }) => numbers.push(version),
        other => panic!("expected UpdateNotSafe, got {other:?}"),
    }

    for h in &helpers[1..] {
        transport.set_update_behavior(h, HelperBehavior::Accept);
    }
    numbers.push(secret.update(b"c").await.unwrap().number());
    numbers.push(secret.update_async(b"d").unwrap().await.unwrap().number());

    assert_eq!(numbers, vec![1, 2, 3, 4]);
    let listed: Vec<u64> = secret.versions().iter().map(|v| v.number()).collect();
    assert_eq!(listed, vec![0, 1, 2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn helpers_receive_every_confirmed_version() {
    let transport = MemoryTransport::new();
    let (_owner, secret, helpers) = paired_secret(&transport, quick_config()).await;

    secret.update(b"one").await.unwrap();
    secret.update(b"two").await.unwrap();
    // Let late deliveries land.
    tokio::time::sleep(Duration::from_secs(1)).await;

    for h in &helpers {
        assert_eq!(transport.stored_versions(secret.id(), h), vec![1, 2]);
    }
}

// ---------------------------------------------------------------------------
// 3. Async updates
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn newer_async_update_cancels_older() {
    let transport = MemoryTransport::new();
    let (_owner, secret, helpers) = paired_secret(&transport, quick_config()).await;
    for h in &helpers {
        transport.set_update_behavior(h, HelperBehavior::Delay(Duration::from_secs(2)));
    }

    let a = secret.update_async(b"A").unwrap();
    let b = secret.update_async(b"B").unwrap();
    assert_eq!((a.version(), b.version()), (1, 2));

    let a_result = a.await;
    assert!(matches!(a_result, Err(DeRecError::Canceled { version: 1 })));

    let b_version = b.await.unwrap();
    assert_eq!(b_version.number(), 2);
    assert_eq!(b_version.payload(), b"B");

    let canceled = secret.version(1).unwrap();
    assert_eq!(canceled.confirmed_count(), 0);
    assert_eq!(canceled.failed_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn canceled_while_fanning_out_keeps_confirmed_acks() {
    let transport = MemoryTransport::new();
    let (_owner, secret, helpers) = paired_secret(&transport, quick_config()).await;
    transport.set_update_behavior(&helpers[1], HelperBehavior::Silent);
    transport.set_update_behavior(&helpers[2], HelperBehavior::Silent);

    let a = secret.update_async(b"A").unwrap();
    // Let A take the lock and collect h1's acknowledgment.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let b = secret.update_async(b"B").unwrap();

    assert!(matches!(a.await, Err(DeRecError::Canceled { version: 1 })));
    let v1 = secret.version(1).unwrap();
    assert_eq!(v1.ack(&helpers[0].id()), Some(AckStatus::Confirmed));
    assert_eq!(v1.pending_count(), 0);

    assert!(matches!(
        b.await,
        Err(DeRecError::UpdateNotSafe { version: 2, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn canceled_version_is_never_delivered() {
    let transport = MemoryTransport::new();
    let config = quick_config().with_quorum(Quorum::Fixed(1));
    let (_owner, secret, helpers) = paired_secret(&transport, config).await;
    for h in &helpers {
        transport.set_update_behavior(h, HelperBehavior::Delay(Duration::from_secs(2)));
    }

    let a = secret.update_async(b"A").unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let b = secret.update_async(b"B").unwrap();

    assert!(matches!(a.await, Err(DeRecError::Canceled { version: 1 })));
    assert_eq!(b.await.unwrap().number(), 2);

    // Let every delivery that could still be running finish.
    tokio::time::sleep(Duration::from_secs(30)).await;
    for h in &helpers {
        assert_eq!(transport.stored_versions(secret.id(), h), vec![2]);
        assert_eq!(secret.version(1).unwrap().ack(&h.id()), Some(AckStatus::Failed));
        assert_eq!(secret.version(2).unwrap().ack(&h.id()), Some(AckStatus::Confirmed));
    }
}

#[tokio::test(start_paused = true)]
async fn blocking_update_is_not_canceled_by_async() {
    let transport = MemoryTransport::new();
    let (_owner, secret, helpers) = paired_secret(&transport, quick_config()).await;
    for h in &helpers {
        transport.set_update_behavior(h, HelperBehavior::Delay(Duration::from_secs(1)));
    }

    let blocking = {
        let secret = secret.clone();
        tokio::spawn(async move { secret.update(b"sync").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let pending = secret.update_async(b"async").unwrap();

    assert_eq!(blocking.await.unwrap().unwrap().number(), 1);
    assert_eq!(pending.await.unwrap().number(), 2);
}

// ---------------------------------------------------------------------------
// 4. Helper management
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn removing_unknown_helper_is_a_no_op() {
    let transport = MemoryTransport::new();
    let (_owner, secret, _helpers) = paired_secret(&transport, quick_config()).await;
    let before = secret.helpers().unwrap();

    let unknown = IdentityId::from_bytes([0xAB; 32]);
    let removed = secret.remove_helpers(&[unknown]).await.unwrap();
    assert!(removed.is_empty());

    let after = secret.helpers().unwrap();
    assert_eq!(before.len(), after.len());
    assert!(after.iter().all(|p| p.status() == PairingStatus::Paired));
}

#[tokio::test(start_paused = true)]
async fn unreachable_helper_is_still_removed_locally() {
    let transport = MemoryTransport::new();
    let (_owner, secret, helpers) = paired_secret(&transport, quick_config()).await;
    transport.set_unpair_behavior(&helpers[0], HelperBehavior::Silent);

    let removed = secret.remove_helpers(&[helpers[0].id()]).await.unwrap();
    assert_eq!(removed, vec![helpers[0].id()]);
    assert_eq!(
        secret.helpers().unwrap()[0].status(),
        PairingStatus::Removed
    );
}

#[tokio::test(start_paused = true)]
async fn async_pairing_resolves_per_helper() {
    let transport = MemoryTransport::new();
    let owner = owner(&transport, quick_config());
    let secret = owner.new_secret("s", b"x").unwrap();
    let (fast, slow, refusing) = (helper("fast"), helper("slow"), helper("refusing"));
    transport.set_pairing_behavior(&slow, HelperBehavior::Delay(Duration::from_secs(3)));
    transport.set_pairing_behavior(&refusing, HelperBehavior::Reject);

    let pending = secret
        .add_helpers_async(vec![fast.clone(), slow.clone(), refusing.clone()])
        .unwrap();
    assert_eq!(pending.len(), 3);
    assert!(secret
        .helpers()
        .unwrap()
        .iter()
        .all(|p| p.status() == PairingStatus::Pending));

    let mut outcomes = Vec::new();
    for handle in pending {
        let id = handle.helper();
        outcomes.push((id, handle.await));
    }
    assert_eq!(
        outcomes,
        vec![
            (fast.id(), PairingOutcome::Paired),
            (slow.id(), PairingOutcome::Paired),
            (refusing.id(), PairingOutcome::Removed),
        ]
    );
    assert!(transport.is_paired(secret.id(), &slow));
    assert!(!transport.is_paired(secret.id(), &refusing));
}

// ---------------------------------------------------------------------------
// 5. Close
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn close_is_idempotent_and_final() {
    let transport = MemoryTransport::new();
    let (_owner, secret, helpers) = paired_secret(&transport, quick_config()).await;
    secret.update(b"v1").await.unwrap();

    secret.close().await;
    let after_first: Vec<_> = secret.versions();
    secret.close().await;
    assert!(secret.is_closed());
    assert_eq!(secret.versions(), after_first);

    assert!(matches!(
        secret.update(b"v2").await,
        Err(DeRecError::IllegalState(_))
    ));
    assert!(matches!(
        secret.update_async(b"v2"),
        Err(DeRecError::IllegalState(_))
    ));
    assert!(matches!(
        secret.add_helpers(vec![helper("late")]).await,
        Err(DeRecError::IllegalState(_))
    ));
    assert!(matches!(
        secret.remove_helpers(&[helpers[0].id()]).await,
        Err(DeRecError::IllegalState(_))
    ));
    assert!(matches!(
        secret.is_available(),
        Err(DeRecError::IllegalState(_))
    ));

    // Read accessors keep working.
    assert_eq!(secret.description(), "wallet-backup");
    assert_eq!(secret.versions().len(), 2);

    // Best-effort unpairs go out in the background.
    tokio::time::sleep(Duration::from_millis(10)).await;
    for h in &helpers {
        assert!(transport.was_unpaired(secret.id(), h));
    }
}

#[tokio::test(start_paused = true)]
async fn close_cancels_in_flight_async_update() {
    let transport = MemoryTransport::new();
    let (_owner, secret, helpers) = paired_secret(&transport, quick_config()).await;
    for h in &helpers {
        transport.set_update_behavior(h, HelperBehavior::Silent);
    }

    let pending = secret.update_async(b"doomed").unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    secret.close().await;

    assert!(matches!(
        pending.await,
        Err(DeRecError::Canceled { version: 1 })
    ));
    assert_eq!(secret.version(1).unwrap().failed_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn close_stops_late_deliveries() {
    let transport = MemoryTransport::new();
    let config = quick_config().with_quorum(Quorum::Fixed(1));
    let (_owner, secret, helpers) = paired_secret(&transport, config).await;
    transport.set_update_behavior(&helpers[1], HelperBehavior::Delay(Duration::from_secs(5)));
    transport.set_update_behavior(&helpers[2], HelperBehavior::Delay(Duration::from_secs(5)));

    let v1 = secret.update(b"v1").await.unwrap();
    assert_eq!(v1.confirmed_count(), 1);

    secret.close().await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(transport.stored_versions(secret.id(), &helpers[0]), vec![1]);
    for h in &helpers[1..] {
        assert!(transport.stored_versions(secret.id(), h).is_empty());
        assert_eq!(secret.version(1).unwrap().ack(&h.id()), Some(AckStatus::Failed));
    }
}

// ---------------------------------------------------------------------------
// 6. Key derivation across restarts
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn helper_keys_are_reproducible_from_the_seed() {
    let first = MemoryTransport::new();
    let (_o1, s1, helpers) = paired_secret(&first, quick_config()).await;
    let second = MemoryTransport::new();
    let (_o2, s2, _) = paired_secret(&second, quick_config()).await;

    for h in &helpers {
        assert_eq!(
            first.pairing_key(s1.id(), h),
            second.pairing_key(s2.id(), h),
            "same seed, same index, same ordinal"
        );
    }
    assert_eq!(
        s1.latest_version().unwrap().signer(),
        s2.latest_version().unwrap().signer()
    );
}
