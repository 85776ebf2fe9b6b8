//! # Key Exchange Demo
//!
//! Walks through identity keys, a conversation session key and one message.
//!
//! ## Run
//!
//! ```bash
//! RUST_LOG=veil_core=debug cargo run --example key_exchange_demo
//! ```

use tracing_subscriber::EnvFilter;
use veil_core::{CryptoConfig, VeilCore};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Veil Core: Key Exchange Demo ===\n");

    let core = VeilCore::in_memory(CryptoConfig::for_tests()).expect("Failed to initialize core");

    // Step 1: Identity keys
    println!("Step 1: Creating identity keys for Alice and Bob...");
    let alice = core
        .identities()
        .get_or_create_active_key("alice")
        .expect("Failed to create Alice's key");
    let bob = core
        .identities()
        .get_or_create_active_key("bob")
        .expect("Failed to create Bob's key");
    println!("  Alice's fingerprint: {}", alice.fingerprint);
    println!("  Bob's fingerprint:   {}", bob.fingerprint);
    println!();

    // Step 2: Session key
    println!("Step 2: Creating a session key for their conversation...");
    println!();
    println!("  ┌─────────────────────────────────────────────────────────────┐");
    println!("  │                    SESSION KEY WRAPPING                     │");
    println!("  ├─────────────────────────────────────────────────────────────┤");
    println!("  │                                                             │");
    println!("  │            random 32-byte session key                       │");
    println!("  │                 │                │                          │");
    println!("  │       wrap(Alice pub)      wrap(Bob pub)                    │");
    println!("  │                 │                │                          │");
    println!("  │                 ▼                ▼                          │");
    println!("  │       ┌──────────────┐  ┌──────────────┐                    │");
    println!("  │       │ copy: alice  │  │ copy: bob    │  stored on record  │");
    println!("  │       └──────────────┘  └──────────────┘                    │");
    println!("  │                                                             │");
    println!("  └─────────────────────────────────────────────────────────────┘");
    println!();

    let participants = core
        .participant_keys(&["alice", "bob"])
        .expect("Failed to resolve participants");
    let record = core
        .create_session_key("dm-alice-bob", &participants, None)
        .expect("Failed to create session key");
    println!("  Session id: {}", record.session_id);
    println!("  Wrapped copies: {}", record.encrypted_session_key_by_participant.len());
    println!("  Expires at: {}", record.expires_at);
    println!();

    // Step 3: Message
    println!("Step 3: Alice encrypts a message...");
    let envelope = core
        .encrypt_message("dm-alice-bob", &["alice", "bob"], b"Hello Bob!")
        .expect("Failed to encrypt");
    println!(
        "  Envelope: {}",
        serde_json::to_string_pretty(&envelope).expect("Failed to serialize")
    );
    println!();

    // Step 4: Bob decrypts
    println!("Step 4: Bob decrypts it...");
    let plaintext = core
        .decrypt_message(&envelope, "bob")
        .expect("Failed to decrypt");
    println!("  Plaintext: {}", String::from_utf8_lossy(&plaintext));
    println!();

    // Step 5: Tampering
    println!("Step 5: Flipping one ciphertext bit...");
    let mut tampered = envelope.clone();
    tampered.ciphertext[0] ^= 0x01;
    match core.decrypt_message(&tampered, "bob") {
        Ok(_) => println!("  Unexpectedly decrypted!"),
        Err(e) => println!("  Rejected: {} (code {})", e, e.code()),
    }
    println!();

    println!("=== Demo Complete ===");
}
