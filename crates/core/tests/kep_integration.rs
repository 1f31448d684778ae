//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! Integration tests for the KEP handshake and session installation.

use anyhow::Result;
use std::sync::Arc;

use quietwire_core::config::CoreConfig;
use quietwire_core::crypto::{EphemeralKeypair, IdentityKeypair};
use quietwire_core::guard::unix_millis;
use quietwire_core::kep::{respond, KepError, KepInitiator};
use quietwire_core::session::{session_id_for, InMemorySessionStore, SessionStore};
use quietwire_core::MessageEngine;

struct Pair {
    alice: IdentityKeypair,
    bob: IdentityKeypair,
    config: CoreConfig,
    now: i64,
}

impl Pair {
    fn new() -> Self {
        Self {
            alice: IdentityKeypair::generate(),
            bob: IdentityKeypair::generate(),
            config: CoreConfig::default(),
            now: unix_millis(),
        }
    }
}

#[test]
fn test_handshake_installs_symmetric_sessions() -> Result<()> {
    let pair = Pair::new();

    let mut initiator = KepInitiator::new("alice", "bob");
    let init = initiator.start(&pair.alice, pair.now)?;

    assert_eq!(init.session_id, session_id_for("alice", "bob"));
    assert_eq!(init.seq, 1);

    let (response, bob_session) = respond(
        &pair.bob,
        "bob",
        &pair.alice.public_jwk(),
        &init,
        pair.now,
        &pair.config,
    )?;
    assert_eq!(response.seq, 2);

    let alice_session =
        initiator.handle_response(&pair.bob.public_jwk(), &response, pair.now, &pair.config)?;

    // Install on both sides through the stores, as the client runtime would.
    let alice_store = InMemorySessionStore::default();
    let bob_store = InMemorySessionStore::default();
    alice_store.install(alice_session)?;
    bob_store.install(bob_session)?;

    let session_id = session_id_for("alice", "bob");
    let alice_view = alice_store.load(&session_id, "alice")?;
    let bob_view = bob_store.load(&session_id, "bob")?;

    // What Alice seals with her send key, Bob opens with his receive key,
    // and vice versa.
    let sealed = alice_view.send_key().seal(b"alice speaking")?;
    let opened = bob_view
        .recv_key()
        .open(&sealed.iv, &sealed.ciphertext, &sealed.tag)?;
    assert_eq!(opened, b"alice speaking");

    let sealed = bob_view.send_key().seal(b"bob speaking")?;
    let opened = alice_view
        .recv_key()
        .open(&sealed.iv, &sealed.ciphertext, &sealed.tag)?;
    assert_eq!(opened, b"bob speaking");

    println!("✔ Handshake installed mirrored sessions on both sides");
    Ok(())
}

#[test]
fn test_rehandshake_supersedes_previous_session() -> Result<()> {
    let pair = Pair::new();
    let store = InMemorySessionStore::default();

    for round in 0..2 {
        let mut initiator = KepInitiator::new("alice", "bob");
        let init = initiator.start(&pair.alice, pair.now + round)?;
        let (response, _) = respond(
            &pair.bob,
            "bob",
            &pair.alice.public_jwk(),
            &init,
            pair.now + round,
            &pair.config,
        )?;
        let session = initiator.handle_response(
            &pair.bob.public_jwk(),
            &response,
            pair.now + round,
            &pair.config,
        )?;
        store.install(session)?;
    }

    // Exactly one session for the pair, with fresh counters.
    let session = store.find_by_pair("bob", "alice").expect("session exists");
    assert_eq!(session.send_seq, 1);
    assert_eq!(session.peer_last_seq, 0);

    println!("✔ Re-handshake superseded the previous session");
    Ok(())
}

#[test]
fn test_concurrent_handshakes_converge() -> Result<()> {
    let pair = Pair::new();
    let store = InMemorySessionStore::default();

    // Two racing handshakes produce two candidate sessions for one pair.
    let mut first = KepInitiator::new("alice", "bob");
    let init = first.start(&pair.alice, pair.now)?;
    let (response, _) = respond(
        &pair.bob,
        "bob",
        &pair.alice.public_jwk(),
        &init,
        pair.now,
        &pair.config,
    )?;
    let winner =
        first.handle_response(&pair.bob.public_jwk(), &response, pair.now, &pair.config)?;

    let mut second = KepInitiator::new("alice", "bob");
    let init = second.start(&pair.alice, pair.now)?;
    let (response, _) = respond(
        &pair.bob,
        "bob",
        &pair.alice.public_jwk(),
        &init,
        pair.now,
        &pair.config,
    )?;
    let loser =
        second.handle_response(&pair.bob.public_jwk(), &response, pair.now, &pair.config)?;

    let winner_id = winner.session_id.clone();
    store.create(winner)?;

    // The loser hits the pair index and adopts the winner.
    let adopted = store.create_or_adopt(loser)?;
    assert_eq!(adopted.session_id, winner_id);

    println!("✔ Racing handshakes converged to a single session");
    Ok(())
}

/// Scenario: man-in-the-middle against the handshake.
///
/// The control half shows that without an authentic identity binding the
/// substitution goes through and yields a fully decryptable attacker
/// session — signature verification is the sole barrier. The second half
/// shows the barrier holding.
#[tokio::test]
async fn test_mitm_negative_control() -> Result<()> {
    let pair = Pair::new();
    let attacker = IdentityKeypair::generate();

    // Control: the attacker impersonates "alice" end to end, and Bob is
    // (wrongly) given the attacker's public key as Alice's identity. The
    // handshake succeeds and the attacker reads Bob's traffic.
    let mut forged = KepInitiator::new("alice", "bob");
    let forged_init = forged.start(&attacker, pair.now)?;

    let (response, bob_session) = respond(
        &pair.bob,
        "bob",
        &attacker.public_jwk(), // no authentic binding to the real Alice
        &forged_init,
        pair.now,
        &pair.config,
    )?;
    let attacker_session =
        forged.handle_response(&pair.bob.public_jwk(), &response, pair.now, &pair.config)?;

    let bob_store = Arc::new(InMemorySessionStore::default());
    let session_id = bob_session.session_id.clone();
    bob_store.install(bob_session)?;
    let bob_engine = MessageEngine::new("bob", bob_store, pair.config.clone());

    let envelope = bob_engine.send_text(&session_id, b"for alice only").await?;
    let opened = attacker_session.recv_key().open(
        &envelope.decode_iv()?,
        &envelope.decode_ciphertext()?,
        &envelope.decode_auth_tag()?,
    )?;
    assert_eq!(opened, b"for alice only");

    // With the real identity key pinned, the same forged init dies.
    let result = respond(
        &pair.bob,
        "bob",
        &pair.alice.public_jwk(),
        &forged_init,
        pair.now,
        &pair.config,
    );
    assert!(matches!(result, Err(KepError::InvalidSignature)));

    // Likewise, swapping only the ephemeral key under a genuine signature fails.
    let mut genuine = KepInitiator::new("alice", "bob");
    let mut init = genuine.start(&pair.alice, pair.now)?;
    init.eph_pub = EphemeralKeypair::generate().public_jwk();
    let result = respond(
        &pair.bob,
        "bob",
        &pair.alice.public_jwk(),
        &init,
        pair.now,
        &pair.config,
    );
    assert!(matches!(result, Err(KepError::InvalidSignature)));

    println!("✔ Signature verification is the barrier the handshake relies on");
    Ok(())
}
