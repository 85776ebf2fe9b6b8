//! End-to-end key exchange scenarios against the public API.

use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::time::Duration;

use veil_core::{
    CryptoConfig, Error, KeyStore, ManualClock, MemoryKeyStore, SessionState, SqliteKeyStore, VeilCore,
};

fn core_with_clock(store: Arc<dyn KeyStore>) -> (VeilCore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_700_000_000));
    let core = VeilCore::with_clock(CryptoConfig::for_tests(), store, clock.clone()).unwrap();
    (core, clock)
}

fn memory_core() -> (VeilCore, Arc<ManualClock>) {
    core_with_clock(Arc::new(MemoryKeyStore::new()))
}

// ============================================================================
// SCENARIO A: KEY EXCHANGE
// ============================================================================

#[test]
fn test_key_exchange_between_two_users() {
    let (core, _) = memory_core();

    let alice = core.identities().get_or_create_active_key("alice").unwrap();
    let bob = core.identities().get_or_create_active_key("bob").unwrap();
    assert_ne!(alice.fingerprint, bob.fingerprint);
    assert_eq!(core.compute_fingerprint(&bob.public_key), bob.fingerprint);

    let participants = core.participant_keys(&["alice", "bob"]).unwrap();
    let record = core.create_session_key("dm-alice-bob", &participants, None).unwrap();
    let raw = record.session_key.clone().unwrap();

    let stored = core.get_active_session_key("dm-alice-bob").unwrap();
    assert!(stored.session_key.is_none());
    assert_eq!(stored.participants, BTreeSet::from(["alice".to_string(), "bob".to_string()]));

    let alice_copy = core.unwrap_session_key(&stored, "alice", &alice.private_key).unwrap();
    let bob_copy = core.unwrap_session_key(&stored, "bob", &bob.private_key).unwrap();
    assert_eq!(alice_copy, raw);
    assert_eq!(bob_copy, raw);

    let mallory = core.generate_identity_key_pair().unwrap();
    assert!(matches!(
        core.unwrap_session_key(&stored, "bob", &mallory.private),
        Err(Error::KeyExchangeFailed(_))
    ));
}

// ============================================================================
// SCENARIO B: MESSAGE FLOW
// ============================================================================

#[test]
fn test_message_flow() {
    let (core, _) = memory_core();

    let envelope = core
        .encrypt_message("group-1", &["alice", "bob", "carol"], b"meeting at noon")
        .unwrap();

    for user in ["alice", "bob", "carol"] {
        assert_eq!(core.decrypt_message(&envelope, user).unwrap(), b"meeting at noon");
    }

    let mut tampered = envelope.clone();
    tampered.ciphertext[0] ^= 0x01;
    let err = core.decrypt_message(&tampered, "bob").unwrap_err();
    assert!(matches!(err, Error::AuthTagMismatch));
    assert!(err.is_decryption_error());

    let json = serde_json::to_string(&envelope).unwrap();
    let received: veil_core::EncryptedMessage = serde_json::from_str(&json).unwrap();
    assert_eq!(core.decrypt_message(&received, "carol").unwrap(), b"meeting at noon");
}

// ============================================================================
// SCENARIO C: EXPIRY
// ============================================================================

#[test]
fn test_session_expiry_and_renewal() {
    let (core, clock) = memory_core();
    let participants = core.participant_keys(&["alice", "bob"]).unwrap();

    let first = core
        .create_session_key("conv", &participants, Some(Duration::from_secs(300)))
        .unwrap();
    let early = core.encrypt_message("conv", &["alice", "bob"], b"early").unwrap();
    assert_eq!(early.session_id, first.session_id);

    clock.advance(300);

    assert!(matches!(core.get_active_session_key("conv"), Err(Error::SessionExpired(_))));
    assert_eq!(core.sessions().session_state("conv").unwrap(), SessionState::Expired);

    let renewed = core
        .create_session_key("conv", &participants, Some(Duration::from_secs(300)))
        .unwrap();
    assert_ne!(renewed.session_id, first.session_id);
    assert!(renewed.session_key.is_some());
    assert_ne!(renewed.session_key, first.session_key);

    let late = core.encrypt_message("conv", &["alice", "bob"], b"late").unwrap();
    assert_eq!(late.session_id, renewed.session_id);
    assert_eq!(core.sessions().session_state("conv").unwrap(), SessionState::Active);

    // The expired epoch still decrypts its backlog.
    assert_eq!(core.decrypt_message(&early, "bob").unwrap(), b"early");
    assert_eq!(core.decrypt_message(&late, "bob").unwrap(), b"late");

    let history = core.sessions().session_history("conv").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history.iter().filter(|r| r.is_active).count(), 1);
}

// ============================================================================
// SCENARIO D: CONCURRENT ROTATION
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rotation_single_active_key() {
    let (core, _) = memory_core();
    core.identities().get_or_create_active_key("alice").unwrap();

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let core = core.clone();
            tokio::spawn(async move { core.rotate_key_async("alice").await })
        })
        .collect();

    let mut key_ids = BTreeSet::new();
    for task in tasks {
        key_ids.insert(task.await.unwrap().unwrap().key_id);
    }
    assert_eq!(key_ids.len(), 10);

    let history = core.identities().key_history("alice").unwrap();
    assert_eq!(history.len(), 11);
    assert_eq!(history.iter().filter(|r| r.is_active).count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_message_single_epoch() {
    let (core, _) = memory_core();
    core.participant_keys(&["alice", "bob"]).unwrap();

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let core = core.clone();
            tokio::task::spawn_blocking(move || {
                core.encrypt_message("brand-new", &["alice", "bob"], format!("msg {}", i).as_bytes())
            })
        })
        .collect();

    let mut session_ids = BTreeSet::new();
    for task in tasks {
        let envelope = task.await.unwrap().unwrap();
        session_ids.insert(envelope.session_id.clone());
        assert!(core.decrypt_message(&envelope, "bob").is_ok());
    }

    assert_eq!(session_ids.len(), 1);
}

#[test]
fn test_concurrent_create_session_key_reuses_winner() {
    let (core, _) = memory_core();
    let participants = core.participant_keys(&["alice", "bob"]).unwrap();
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let core = core.clone();
            let participants = participants.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                core.create_session_key("brand-new", &participants, None).unwrap()
            })
        })
        .collect();

    let records: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(records[0].session_id, records[1].session_id);
    assert_eq!(core.sessions().session_history("brand-new").unwrap().len(), 1);

    let alice = core.identities().active_key("alice").unwrap().unwrap();
    let raw = records
        .iter()
        .find_map(|r| r.session_key.clone())
        .unwrap();
    let loser = records.iter().find(|r| r.session_key.is_none()).unwrap();
    assert_eq!(core.unwrap_session_key(loser, "alice", &alice.private_key).unwrap(), raw);
}

#[test]
fn test_async_key_generation_from_sync_context() {
    let (core, _) = memory_core();
    let pair = tokio_test::block_on(core.generate_identity_key_pair_async()).unwrap();
    assert_eq!(pair.private.public_key(), pair.public);
}

// ============================================================================
// MEMBERSHIP CHANGES
// ============================================================================

#[test]
fn test_removed_member_cannot_read_new_messages() {
    let (core, _) = memory_core();

    let before = core.encrypt_message("group", &["alice", "bob", "carol"], b"all of us").unwrap();
    let after = core.encrypt_message("group", &["alice", "bob"], b"without carol").unwrap();

    assert_ne!(before.session_id, after.session_id);
    assert_eq!(core.decrypt_message(&before, "carol").unwrap(), b"all of us");
    assert!(matches!(
        core.decrypt_message(&after, "carol"),
        Err(Error::KeyExchangeFailed(_))
    ));

    let old = core.sessions().session_by_id(&before.session_id).unwrap().unwrap();
    assert!(old.revoked_at.is_some());
}

// ============================================================================
// PERSISTENCE
// ============================================================================

#[test]
fn test_sqlite_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("veil.db");
    let path = path.to_str().unwrap();

    let envelope = {
        let core = VeilCore::open_sqlite(CryptoConfig::for_tests(), path).unwrap();
        core.encrypt_message("conv", &["alice", "bob"], b"persisted").unwrap()
    };

    let core = VeilCore::open_sqlite(CryptoConfig::for_tests(), path).unwrap();
    assert_eq!(core.decrypt_message(&envelope, "bob").unwrap(), b"persisted");

    let again = core.encrypt_message("conv", &["alice", "bob"], b"same epoch").unwrap();
    assert_eq!(again.session_id, envelope.session_id);
}

#[test]
fn test_stores_agree_on_activation() {
    let stores: Vec<Arc<dyn KeyStore>> = vec![
        Arc::new(MemoryKeyStore::new()),
        Arc::new(SqliteKeyStore::open(None).unwrap()),
    ];

    for store in stores {
        let (core, clock) = core_with_clock(store.clone());

        core.identities().get_or_create_active_key("alice").unwrap();
        clock.advance(1);
        core.rotate_key("alice").unwrap();
        clock.advance(1);
        core.rotate_key("alice").unwrap();

        let keys = store.identity_keys("alice").unwrap();
        assert_eq!(keys.len(), 3);
        assert_eq!(keys.iter().filter(|r| r.is_active).count(), 1);
        assert!(keys[2].is_active);

        let participants = core.participant_keys(&["alice"]).unwrap();
        core.create_session_key("conv", &participants, None).unwrap();
        core.rotate_session_key("conv", &participants, None).unwrap();
        assert!(core.sessions().revoke_session("conv").unwrap());

        let sessions = store.session_keys("conv").unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().all(|r| !r.is_active));
        assert!(sessions[1].revoked_at.is_some());
        assert!(sessions[0].revoked_at.is_none());
    }
}

// ============================================================================
// PUBLIC ERRORS
// ============================================================================

#[test]
fn test_public_error_hides_diagnostics() {
    let (core, _) = memory_core();
    let envelope = core.encrypt_message("conv", &["alice"], b"x").unwrap();

    let err = core.decrypt_message(&envelope, "eve").unwrap_err();
    assert!(err.diagnostic().is_some());

    let public = err.to_public();
    assert_eq!(public.code, 400);
    assert!(public.recoverable);
    assert!(!public.message.contains("eve"));
}
