//! Peer manager integration tests over loopback sockets.

use lattice_net::{NetConfig, PeerManager, RelayBlock};
use lattice_types::{Block, BlockHeader, Hash256};
use std::sync::Arc;
use std::time::Duration;

fn test_config() -> NetConfig {
    NetConfig {
        connect_timeout: Duration::from_secs(2),
        handshake_timeout: Duration::from_secs(2),
        ..NetConfig::default()
    }
}

fn sealed_block(nonce: u64) -> Arc<Block> {
    let mut block = Block::new(
        BlockHeader {
            version: 1,
            milestone_hash: Hash256::ZERO,
            prev_hash: Hash256::ZERO,
            tip_hash: Hash256::ZERO,
            merkle_root: Hash256::ZERO,
            time: 1_700_000_000,
            bits: 0x2100_ffff,
            nonce,
        },
        Vec::new(),
    );
    block.seal().unwrap();
    Arc::new(block)
}

/// Poll until `check` holds or the deadline passes.
async fn wait_until(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn handshake_completes_both_sides() {
    let (server, _server_rx) = PeerManager::new(test_config());
    let (client, _client_rx) = PeerManager::new(test_config());

    server.bind("127.0.0.1").unwrap();
    let addr = server.listen(0).await.unwrap();
    client.connect_to(&addr.to_string()).await.unwrap();

    assert!(wait_until(|| server.fully_connected_count() == 1).await);
    assert!(wait_until(|| client.fully_connected_count() == 1).await);

    server.stop();
    client.stop();
}

#[tokio::test]
async fn duplicate_identity_counts_once_distinct_identities_both_count() {
    let (server, _rx) = PeerManager::new(test_config());
    server.bind("127.0.0.1").unwrap();
    let addr = server.listen(0).await.unwrap();

    let (client, _c_rx) = PeerManager::new(NetConfig {
        identity: Some(0xBEEF),
        ..test_config()
    });
    client.connect_to(&addr.to_string()).await.unwrap();
    assert!(wait_until(|| server.fully_connected_count() == 1).await);

    // Same remote identity again, even from a fresh socket: rejected.
    let (twin, _t_rx) = PeerManager::new(NetConfig {
        identity: Some(0xBEEF),
        ..test_config()
    });
    twin.connect_to(&addr.to_string()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.fully_connected_count(), 1);

    // A distinct identity sharing 127.0.0.1 is a different peer.
    let (other, _o_rx) = PeerManager::new(NetConfig {
        identity: Some(0xCAFE),
        ..test_config()
    });
    other.connect_to(&addr.to_string()).await.unwrap();
    assert!(wait_until(|| server.fully_connected_count() == 2).await);

    assert_eq!(server.randomly_select(2).len(), 2);

    for m in [&server, &client, &twin, &other] {
        m.stop();
    }
}

#[tokio::test]
async fn connect_to_same_address_twice_is_rejected_locally() {
    let (server, _rx) = PeerManager::new(test_config());
    server.bind("127.0.0.1").unwrap();
    let addr = server.listen(0).await.unwrap();

    let (client, _c_rx) = PeerManager::new(test_config());
    client.connect_to(&addr.to_string()).await.unwrap();
    assert!(wait_until(|| client.fully_connected_count() == 1).await);
    assert!(client.connect_to(&addr.to_string()).await.is_err());
    assert_eq!(client.fully_connected_count(), 1);

    server.stop();
    client.stop();
}

#[tokio::test]
async fn randomly_select_returns_min_of_n_and_peer_count() {
    let (server, _rx) = PeerManager::new(test_config());
    server.bind("127.0.0.1").unwrap();
    let addr = server.listen(0).await.unwrap();

    let mut clients = Vec::new();
    for _ in 0..3 {
        let (client, _c_rx) = PeerManager::new(test_config());
        client.connect_to(&addr.to_string()).await.unwrap();
        clients.push((client, _c_rx));
    }
    assert!(wait_until(|| server.fully_connected_count() == 3).await);

    let sample = server.randomly_select(5);
    assert_eq!(sample.len(), 3);
    let mut unique = sample.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 3);

    assert_eq!(server.randomly_select(2).len(), 2);
    assert_eq!(server.randomly_select(0).len(), 0);

    server.stop();
    for (c, _) in &clients {
        c.stop();
    }
}

#[tokio::test]
async fn relay_is_at_most_once_per_block() {
    let (server, _rx) = PeerManager::new(test_config());
    server.bind("127.0.0.1").unwrap();
    let addr = server.listen(0).await.unwrap();

    let relay = RelayBlock::new(sealed_block(1));
    relay.set_pending(1);

    // No peers yet: nothing to broadcast to, flag untouched.
    server.relay_block(&relay, None);
    assert_eq!(relay.pending(), 1);

    let (client, mut client_rx) = PeerManager::new(test_config());
    client.connect_to(&addr.to_string()).await.unwrap();
    assert!(wait_until(|| server.fully_connected_count() == 1).await);

    // One peer: broadcast happens and the flag latches to zero.
    server.relay_block(&relay, None);
    assert_eq!(relay.pending(), 0);
    let event = tokio::time::timeout(Duration::from_secs(2), client_rx.recv())
        .await
        .expect("relay delivered")
        .expect("channel open");
    match event {
        lattice_net::NetEvent::BlockReceived { block, .. } => {
            assert_eq!(block.hash().unwrap(), relay.block().hash().unwrap());
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // Already broadcast: no-op forever after.
    server.relay_block(&relay, None);
    assert_eq!(relay.pending(), 0);
    assert!(
        tokio::time::timeout(Duration::from_millis(200), client_rx.recv())
            .await
            .is_err(),
        "block must not be rebroadcast"
    );

    server.stop();
    client.stop();
}

#[tokio::test]
async fn relay_excludes_the_source_peer() {
    let (server, _rx) = PeerManager::new(test_config());
    server.bind("127.0.0.1").unwrap();
    let addr = server.listen(0).await.unwrap();

    let (client, mut client_rx) = PeerManager::new(test_config());
    client.connect_to(&addr.to_string()).await.unwrap();
    assert!(wait_until(|| server.fully_connected_count() == 1).await);

    let only_peer = server.randomly_select(1)[0];
    let relay = RelayBlock::new(sealed_block(2));
    server.relay_block(&relay, Some(&only_peer));

    // The only fully-connected peer is excluded, so nothing was sent and
    // the block still awaits broadcast.
    assert_eq!(relay.pending(), 1);
    assert!(
        tokio::time::timeout(Duration::from_millis(200), client_rx.recv())
            .await
            .is_err()
    );

    server.stop();
    client.stop();
}

#[tokio::test]
async fn disconnect_peer_tears_down_one_connection() {
    let (server, _rx) = PeerManager::new(test_config());
    server.bind("127.0.0.1").unwrap();
    let addr = server.listen(0).await.unwrap();

    let (a, _a_rx) = PeerManager::new(test_config());
    let (b, _b_rx) = PeerManager::new(test_config());
    a.connect_to(&addr.to_string()).await.unwrap();
    b.connect_to(&addr.to_string()).await.unwrap();
    assert!(wait_until(|| server.fully_connected_count() == 2).await);

    let victim = server.randomly_select(1)[0];
    assert!(server.disconnect_peer(&victim));
    assert!(wait_until(|| server.fully_connected_count() == 1).await);
    assert!(!server.disconnect_peer(&victim));

    server.disconnect_all_peers();
    assert!(wait_until(|| server.fully_connected_count() == 0).await);

    for m in [&server, &a, &b] {
        m.stop();
    }
}
