// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use les_crypto::{Keypair, Random};
use les_p2p::*;

#[ctor::ctor]
fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

async fn client(keypair: Keypair, reply_timeout: Duration) -> Arc<DiscoveryClient> {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let client = DiscoveryClient::bind(addr, Arc::new(keypair), STANDARD_PORT, reply_timeout)
        .await
        .expect("bind should be ok");
    Arc::new(client)
}

fn enode_of(keypair: &Keypair, client: &DiscoveryClient) -> Enode {
    let addr = client.local_addr();
    Enode::new(keypair.node_id(), addr.ip(), STANDARD_PORT, addr.port())
}

#[tokio::test]
async fn ping_pong_and_neighbours() {
    let mut rng = Random::from_os_entropy();
    let (alice_key, bob_key) = (rng.gen_keypair(), rng.gen_keypair());

    let alice = client(alice_key.clone(), Duration::from_secs(2)).await;
    let bob = client(bob_key.clone(), Duration::from_secs(2)).await;
    let bob_enode = enode_of(&bob_key, &bob);

    let known: Vec<Enode> = (0..20u16)
        .map(|i| {
            let node = rng.gen_keypair();
            Enode::new(node.node_id(), "10.1.2.3".parse().unwrap(), 30303 + i, 30303 + i)
        })
        .collect();
    known.iter().for_each(|enode| bob.add_known(enode));

    let cancel = CancellationToken::new();
    let serving = {
        let (bob, cancel) = (bob.clone(), cancel.clone());
        tokio::spawn(async move { bob.serve(cancel).await })
    };

    let pong = alice.ping(&bob_enode).await.expect("ping should be ok");
    assert_eq!(pong.to.udp_port, alice.local_addr().port());
    assert_eq!(pong.to.tcp_port, STANDARD_PORT);

    let neighbours = alice
        .find_neighbours(&bob_enode, alice_key.node_id())
        .await
        .expect("find neighbours should be ok");
    assert_eq!(neighbours.len(), 16);
    assert_eq!(neighbours[0].to_enode(), known[0]);

    cancel.cancel();
    serving.await.expect("serve should exit");
}

#[tokio::test]
async fn reply_from_unexpected_key_is_rejected() {
    let mut rng = Random::from_os_entropy();
    let alice = client(rng.gen_keypair(), Duration::from_secs(2)).await;
    let bob_key = rng.gen_keypair();
    let bob = client(bob_key, Duration::from_secs(2)).await;

    // Alice expects another identity behind Bob's address.
    let impostor = enode_of(&rng.gen_keypair(), &bob);

    let cancel = CancellationToken::new();
    let serving = {
        let (bob, cancel) = (bob.clone(), cancel.clone());
        tokio::spawn(async move { bob.serve(cancel).await })
    };

    let err = alice.ping(&impostor).await.expect_err("unexpected sender");
    assert!(matches!(err, DiscoveryError::UnexpectedSender(_)));

    cancel.cancel();
    serving.await.expect("serve should exit");
}

#[tokio::test]
async fn silent_peer_times_out() {
    let mut rng = Random::from_os_entropy();
    let alice = client(rng.gen_keypair(), Duration::from_millis(200)).await;
    let bob_key = rng.gen_keypair();
    let bob = client(bob_key.clone(), Duration::from_millis(200)).await;

    // Bob never serves.
    let err = alice.ping(&enode_of(&bob_key, &bob)).await.expect_err("no pong");
    assert!(matches!(err, DiscoveryError::Timeout(_)));
}

#[tokio::test]
async fn ping_over_endpoint_udp_route() {
    let mut rng = Random::from_os_entropy();
    let alice_key = rng.gen_keypair();
    let bob_key = rng.gen_keypair();
    let bob = client(bob_key.clone(), Duration::from_secs(2)).await;

    let cancel = CancellationToken::new();
    let serving = {
        let (bob, cancel) = (bob.clone(), cancel.clone());
        tokio::spawn(async move { bob.serve(cancel).await })
    };

    let mut endpoint = NodeEndpoint::new(enode_of(&bob_key, &bob));
    assert!(!endpoint.is_open(Route::Udp));

    let pong = ping_endpoint(&mut endpoint, &alice_key, STANDARD_PORT, Duration::from_secs(2))
        .await
        .expect("ping should be ok");
    assert!(endpoint.is_open(Route::Udp));
    let local = endpoint.local_addr(Route::Udp).expect("local addr");
    assert_eq!(pong.to.udp_port, local.port());
    assert_eq!(pong.to.tcp_port, STANDARD_PORT);

    // the open route is reused
    ping_endpoint(&mut endpoint, &alice_key, STANDARD_PORT, Duration::from_secs(2))
        .await
        .expect("second ping should be ok");
    assert_eq!(endpoint.local_addr(Route::Udp).expect("local addr"), local);

    endpoint.close(Route::Udp).await;
    assert!(!endpoint.is_open(Route::Udp));

    cancel.cancel();
    serving.await.expect("serve should exit");
}

#[tokio::test]
async fn endpoint_ping_to_impostor_is_rejected() {
    let mut rng = Random::from_os_entropy();
    let bob = client(rng.gen_keypair(), Duration::from_secs(2)).await;

    let cancel = CancellationToken::new();
    let serving = {
        let (bob, cancel) = (bob.clone(), cancel.clone());
        tokio::spawn(async move { bob.serve(cancel).await })
    };

    let mut endpoint = NodeEndpoint::new(enode_of(&rng.gen_keypair(), &bob));
    let err = ping_endpoint(&mut endpoint, &rng.gen_keypair(), STANDARD_PORT, Duration::from_secs(2))
        .await
        .expect_err("unexpected sender");
    assert!(matches!(err, DiscoveryError::UnexpectedSender(_)));

    cancel.cancel();
    serving.await.expect("serve should exit");
}
