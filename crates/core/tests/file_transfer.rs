//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! End-to-end file transfer scenarios over established sessions, including
//! the wire-level JSON round trip through the structural codec.

use anyhow::Result;
use std::sync::Arc;

use quietwire_core::config::CoreConfig;
use quietwire_core::crypto::IdentityKeypair;
use quietwire_core::guard::unix_millis;
use quietwire_core::kep::{respond, KepInitiator};
use quietwire_core::session::{InMemorySessionStore, SessionStore};
use quietwire_core::MessageEngine;
use quietwire_types::envelope::{validate_structure, EnvelopeMeta, EnvelopeType};

fn paired_engines() -> Result<(
    MessageEngine<InMemorySessionStore>,
    MessageEngine<InMemorySessionStore>,
    String,
)> {
    let config = CoreConfig::default();
    let now = unix_millis();
    let alice_identity = IdentityKeypair::generate();
    let bob_identity = IdentityKeypair::generate();

    let mut initiator = KepInitiator::new("alice", "bob");
    let init = initiator.start(&alice_identity, now)?;
    let (response, bob_session) = respond(
        &bob_identity,
        "bob",
        &alice_identity.public_jwk(),
        &init,
        now,
        &config,
    )?;
    let alice_session =
        initiator.handle_response(&bob_identity.public_jwk(), &response, now, &config)?;
    let session_id = alice_session.session_id.clone();

    let alice_store = Arc::new(InMemorySessionStore::default());
    alice_store.install(alice_session)?;
    let bob_store = Arc::new(InMemorySessionStore::default());
    bob_store.install(bob_session)?;

    Ok((
        MessageEngine::new("alice", alice_store, config.clone()),
        MessageEngine::new("bob", bob_store, config),
        session_id,
    ))
}

/// Scenario: a 50 000-byte text file travels as one `FILE_META` plus one
/// `FILE_CHUNK`, and Bob recovers the exact bytes.
#[tokio::test]
async fn test_single_chunk_file_round_trip() -> Result<()> {
    let (alice, bob, session_id) = paired_engines()?;

    let mut data = b"Hello world".to_vec();
    data.resize(50_000, b' ');

    let run = alice
        .send_file(&session_id, "hello.txt", "text/plain", &data)
        .await?;
    assert_eq!(run.len(), 2);
    assert_eq!(run[0].envelope_type, EnvelopeType::FileMeta);
    match &run[0].meta {
        Some(EnvelopeMeta::File(meta)) => {
            assert_eq!(meta.total_chunks, 1);
            assert_eq!(meta.size, 50_000);
        }
        other => panic!("unexpected FILE_META meta: {other:?}"),
    }

    let file = bob.receive_file(&run[0], &run[1..]).await?;
    assert_eq!(file.data.as_slice(), data.as_slice());
    assert_eq!(file.filename, "hello.txt");

    println!("✔ Single-chunk file round trip");
    Ok(())
}

/// Scenario: 500 000 bytes split into two chunks with unique IVs; chunks
/// presented in order [1, 0] still reconstruct identical bytes.
#[tokio::test]
async fn test_multi_chunk_permuted_delivery() -> Result<()> {
    let (alice, bob, session_id) = paired_engines()?;

    let data: Vec<u8> = (0..500_000u32).map(|i| (i * 31 % 255) as u8).collect();
    let run = alice
        .send_file(&session_id, "blob.bin", "application/octet-stream", &data)
        .await?;
    assert_eq!(run.len(), 3);

    let indices: Vec<u32> = run[1..]
        .iter()
        .map(|envelope| match &envelope.meta {
            Some(EnvelopeMeta::Chunk(meta)) => meta.chunk_index,
            other => panic!("unexpected FILE_CHUNK meta: {other:?}"),
        })
        .collect();
    assert_eq!(indices, vec![0, 1]);

    let mut ivs: Vec<&str> = run.iter().map(|envelope| envelope.iv.as_str()).collect();
    ivs.sort_unstable();
    ivs.dedup();
    assert_eq!(ivs.len(), run.len(), "every envelope carries a fresh IV");

    let permuted = vec![run[2].clone(), run[1].clone()];
    let file = bob.receive_file(&run[0], &permuted).await?;
    assert_eq!(file.data.as_slice(), data.as_slice());

    println!("✔ Permuted chunk delivery reconstructed byte-identically");
    Ok(())
}

/// Envelopes survive the wire: serialize to JSON, re-validate structurally,
/// and decrypt what came back.
#[tokio::test]
async fn test_wire_json_round_trip() -> Result<()> {
    let (alice, bob, session_id) = paired_engines()?;

    let envelope = alice.send_text(&session_id, b"over the wire").await?;
    let wire = serde_json::to_value(&envelope)?;

    // The receiver's first step: structural validation of raw JSON.
    let parsed = validate_structure(&wire).expect("well-formed envelope");
    assert_eq!(parsed, envelope);

    let inbound = bob.receive(&parsed).await?;
    assert_eq!(inbound.plaintext.as_slice(), b"over the wire");

    println!("✔ Wire JSON round trip through the codec");
    Ok(())
}
