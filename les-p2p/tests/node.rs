// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::timeout;

use les_base::UInt256;
use les_crypto::{Keypair, Random};
use les_p2p::*;

const WAIT: Duration = Duration::from_secs(10);

#[ctor::ctor]
fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn localhost() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn status() -> Status {
    Status {
        protocol_version: LES_VERSION_2,
        network_id: MAINNET_NETWORK_ID,
        head_td: UInt256::from_u64(17_179_869_184),
        head_hash: UInt256::new([0x11; 32]),
        head_num: 0,
        genesis_hash: UInt256::new([0x22; 32]),
        announce_type: 1,
        ..Status::default()
    }
}

fn config() -> P2pConfig {
    P2pConfig {
        connect_timeout: Duration::from_millis(500),
        io_timeout: Duration::from_secs(2),
        hello_timeout: Duration::from_secs(2),
        status_timeout: Duration::from_secs(2),
        bootstrap: Vec::new(),
        ..P2pConfig::default()
    }
}

struct Peer {
    keypair: Keypair,
    context: NodeContext,
    events: mpsc::Receiver<NodeEvent>,
}

impl Peer {
    fn new(rng: &mut Random, config: P2pConfig) -> Self {
        let keypair = rng.gen_keypair();
        let (events_tx, events) = mpsc::channel(128);
        let context = NodeContext::new(Handle::current(), config, keypair.clone(), status(), events_tx);
        Self { keypair, context, events }
    }

    fn enode(&self, port: u16) -> Enode {
        Enode::new(self.keypair.node_id(), localhost(), port, port)
    }

    fn node_for(&self, remote: Enode) -> Node {
        Node::new(self.context.clone(), NodeEndpoint::new(remote)).expect("node should be ok")
    }

    /// Skips events until one matches.
    async fn wait_for<F: Fn(&NodeEventKind) -> bool>(&mut self, matches: F) -> NodeEventKind {
        let waiting = async {
            loop {
                let event = self.events.recv().await.expect("events should be open");
                if matches(&event.kind) {
                    return event.kind;
                }
            }
        };
        timeout(WAIT, waiting).await.expect("event should arrive in time")
    }

    async fn disconnected(&mut self) -> DisconnectReason {
        match self.wait_for(|kind| matches!(kind, NodeEventKind::Disconnected(_))).await {
            NodeEventKind::Disconnected(reason) => reason,
            _ => unreachable!(),
        }
    }
}

/// Alice dials Bob; Bob accepts on a loopback listener.
async fn connect_pair(alice: &Peer, bob: &Peer) -> (Node, Node) {
    let listener = TcpListener::bind((localhost(), 0)).await.expect("bind should be ok");
    let port = listener.local_addr().expect("local addr").port();

    let to_bob = alice.node_for(bob.enode(port));
    to_bob.connect().expect("connect should be ok");

    let (stream, _) = timeout(WAIT, listener.accept()).await.expect("accept in time").expect("accept");
    let to_alice = bob.node_for(alice.enode(STANDARD_PORT));
    to_alice.accept(stream).expect("accept should be ok");
    (to_bob, to_alice)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn loopback_hello_status_and_disconnect() {
    let mut rng = Random::from_os_entropy();
    let mut alice = Peer::new(&mut rng, config());
    let mut bob = Peer::new(&mut rng, config());

    let (to_bob, to_alice) = connect_pair(&alice, &bob).await;

    let hello = alice.wait_for(|kind| matches!(kind, NodeEventKind::Hello(_))).await;
    let NodeEventKind::Hello(hello) = hello else { unreachable!() };
    assert_eq!(hello.node_id, bob.keypair.node_id());
    assert_eq!(hello.client_id, DEFAULT_CLIENT_ID);

    let got = alice.wait_for(|kind| matches!(kind, NodeEventKind::Status(_))).await;
    assert_eq!(got, NodeEventKind::Status(status()));
    bob.wait_for(|kind| matches!(kind, NodeEventKind::Status(_))).await;

    assert_eq!(to_bob.state(), NodeState::Connected);
    assert_eq!(to_bob.remote().status(), Some(&status()));
    assert!(to_bob.remote().hello().is_some());

    // GetBlockHeaders
    let payload = Bytes::from_static(&[0xc6, 0x82, 0x01, 0x01, 0xc2, 0x0a, 0x01]);
    to_bob.send(Message::Other { id: 0x12, payload: payload.clone() }).expect("send should be ok");
    to_bob.send(Message::Ping).expect("send should be ok");
    let got = bob.wait_for(|kind| matches!(kind, NodeEventKind::Message { .. })).await;
    assert_eq!(got, NodeEventKind::Message { id: 0x12, payload: payload.clone() });

    let message = Message::Other { id: 0x13, payload: payload.clone() };
    to_bob.send_timeout(message, Duration::from_secs(1)).await.expect("send should be ok");
    let got = bob.wait_for(|kind| matches!(kind, NodeEventKind::Message { .. })).await;
    assert_eq!(got, NodeEventKind::Message { id: 0x13, payload });

    assert!(to_bob.disconnect(DisconnectReason::Requested));
    assert!(!to_bob.disconnect(DisconnectReason::Exhausted));

    // Disconnecting is reported before Disconnected
    alice
        .wait_for(|kind| matches!(kind, NodeEventKind::StateChanged(NodeState::Disconnecting)))
        .await;
    assert_eq!(alice.disconnected().await, DisconnectReason::Requested);
    assert_eq!(bob.disconnected().await, DisconnectReason::Peer(P2pDisconnect::ClientQuitting));

    // exactly one teardown on Alice's side
    let extra = timeout(Duration::from_millis(300), alice.wait_for(|kind| matches!(kind, NodeEventKind::Disconnected(_)))).await;
    assert!(extra.is_err());

    assert_eq!(to_bob.state(), NodeState::Disconnected);
    assert_eq!(to_bob.disconnect_reason(), Some(DisconnectReason::Requested));
    assert!(matches!(to_bob.send(Message::Ping), Err(P2pError::NotConnected)));
    assert!(matches!(
        to_bob.send_timeout(Message::Ping, Duration::from_millis(10)).await,
        Err(P2pError::NotConnected)
    ));
    assert_eq!(to_alice.state(), NodeState::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capabilities_mismatch() {
    let mut rng = Random::from_os_entropy();
    let mut alice = Peer::new(&mut rng, config());
    let bob_config = P2pConfig { capabilities: vec![Capability::new("eth", 63)], ..config() };
    let bob = Peer::new(&mut rng, bob_config);

    let (to_bob, _to_alice) = connect_pair(&alice, &bob).await;
    let reason = alice.disconnected().await;
    assert!(matches!(
        reason,
        DisconnectReason::Protocol(ProtocolReason::CapabilitiesMismatch)
            | DisconnectReason::Peer(P2pDisconnect::UselessPeer)
    ));
    assert_eq!(to_bob.state(), NodeState::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrong_identity_fails_authentication() {
    let mut rng = Random::from_os_entropy();
    let alice = Peer::new(&mut rng, config());
    let mut bob = Peer::new(&mut rng, config());
    let stranger = rng.gen_keypair();

    let listener = TcpListener::bind((localhost(), 0)).await.expect("bind should be ok");
    let port = listener.local_addr().expect("local addr").port();

    // Alice believes the listener is someone else; Bob cannot open her auth.
    let to_stranger = alice.node_for(Enode::new(stranger.node_id(), localhost(), port, port));
    to_stranger.connect().expect("connect should be ok");

    let (stream, _) = timeout(WAIT, listener.accept()).await.expect("accept in time").expect("accept");
    let to_alice = bob.node_for(alice.enode(STANDARD_PORT));
    to_alice.accept(stream).expect("accept should be ok");

    assert_eq!(bob.disconnected().await, DisconnectReason::Protocol(ProtocolReason::Authentication));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_peer_times_out() {
    let mut rng = Random::from_os_entropy();
    let config = P2pConfig { io_timeout: Duration::from_millis(300), ..config() };
    let mut alice = Peer::new(&mut rng, config);
    let silent = rng.gen_keypair();

    let listener = TcpListener::bind((localhost(), 0)).await.expect("bind should be ok");
    let port = listener.local_addr().expect("local addr").port();

    let node = alice.node_for(Enode::new(silent.node_id(), localhost(), port, port));
    node.connect().expect("connect should be ok");
    let (_stream, _) = timeout(WAIT, listener.accept()).await.expect("accept in time").expect("accept");

    let started = Instant::now();
    assert_eq!(alice.disconnected().await, DisconnectReason::Protocol(ProtocolReason::Timeout));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_peer_leaves_connecting_in_time() {
    let mut rng = Random::from_os_entropy();
    let mut alice = Peer::new(&mut rng, config());
    let remote = rng.gen_keypair();

    // TEST-NET-1, never routed
    let unreachable = Enode::new(remote.node_id(), "192.0.2.1".parse().unwrap(), 30303, 30303);
    let node = alice.node_for(unreachable);

    let started = Instant::now();
    node.connect().expect("connect should be ok");
    assert!(matches!(node.connect(), Err(P2pError::InvalidState(_))));

    let reason = alice.disconnected().await;
    assert!(matches!(reason, DisconnectReason::Os(_)), "reason: {}", reason);
    assert!(started.elapsed() < config().connect_timeout + Duration::from_secs(1));
    assert_eq!(node.state(), NodeState::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_during_handshake() {
    let mut rng = Random::from_os_entropy();
    let config = P2pConfig { io_timeout: Duration::from_secs(5), ..config() };
    let mut alice = Peer::new(&mut rng, config);
    let silent = rng.gen_keypair();

    let listener = TcpListener::bind((localhost(), 0)).await.expect("bind should be ok");
    let port = listener.local_addr().expect("local addr").port();

    let node = alice.node_for(Enode::new(silent.node_id(), localhost(), port, port));
    node.connect().expect("connect should be ok");
    let (_stream, _) = timeout(WAIT, listener.accept()).await.expect("accept in time").expect("accept");
    alice
        .wait_for(|kind| matches!(kind, NodeEventKind::StateChanged(NodeState::PerformingHandshake)))
        .await;

    let started = Instant::now();
    assert!(node.disconnect(DisconnectReason::Exhausted));
    assert!(!node.disconnect(DisconnectReason::Requested));

    alice
        .wait_for(|kind| matches!(kind, NodeEventKind::StateChanged(NodeState::Disconnecting)))
        .await;
    assert_eq!(alice.disconnected().await, DisconnectReason::Exhausted);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(node.state(), NodeState::Disconnected);
}

#[tokio::test]
async fn nonstandard_port_refused() {
    let mut rng = Random::from_os_entropy();
    let config = P2pConfig { standard_port_only: true, ..config() };
    let mut alice = Peer::new(&mut rng, config);
    let remote = rng.gen_keypair();

    let node = alice.node_for(Enode::new(remote.node_id(), localhost(), 30304, 30304));
    node.connect().expect("connect should be ok");
    assert_eq!(alice.disconnected().await, DisconnectReason::Protocol(ProtocolReason::NonstandardPort));
    assert_eq!(node.state(), NodeState::Disconnected);
}

/// Copies bytes one way until `silenced`, then swallows them.
async fn pump(mut from: OwnedReadHalf, mut to: OwnedWriteHalf, silenced: Arc<AtomicBool>) {
    let mut buf = [0u8; 4096];
    loop {
        let size = match from.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(size) => size,
        };
        if silenced.load(Ordering::SeqCst) {
            continue;
        }
        if to.write_all(&buf[..size]).await.is_err() {
            return;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_connected_peer_misses_pong() {
    let mut rng = Random::from_os_entropy();
    let mut alice = Peer::new(&mut rng, P2pConfig { io_timeout: Duration::from_millis(300), ..config() });
    // Bob notices late, so his side stays open while Alice gives up
    let mut bob = Peer::new(&mut rng, P2pConfig { io_timeout: Duration::from_secs(5), ..config() });

    let bob_listener = TcpListener::bind((localhost(), 0)).await.expect("bind should be ok");
    let bob_port = bob_listener.local_addr().expect("local addr").port();
    let relay = TcpListener::bind((localhost(), 0)).await.expect("bind should be ok");
    let relay_port = relay.local_addr().expect("local addr").port();

    // Alice dials the relay believing it is Bob.
    let to_bob = alice.node_for(bob.enode(relay_port));
    to_bob.connect().expect("connect should be ok");

    let (from_alice, _) = timeout(WAIT, relay.accept()).await.expect("accept in time").expect("accept");
    let to_bob_stream = TcpStream::connect((localhost(), bob_port)).await.expect("relay dial");
    let (stream, _) = timeout(WAIT, bob_listener.accept()).await.expect("accept in time").expect("accept");
    let _to_alice = bob.node_for(alice.enode(STANDARD_PORT));
    _to_alice.accept(stream).expect("accept should be ok");

    let silenced = Arc::new(AtomicBool::new(false));
    let (alice_rx, alice_tx) = from_alice.into_split();
    let (bob_rx, bob_tx) = to_bob_stream.into_split();
    tokio::spawn(pump(alice_rx, bob_tx, silenced.clone()));
    tokio::spawn(pump(bob_rx, alice_tx, silenced.clone()));

    alice.wait_for(|kind| matches!(kind, NodeEventKind::Status(_))).await;
    bob.wait_for(|kind| matches!(kind, NodeEventKind::Status(_))).await;

    // idle but alive: Pings are answered
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(to_bob.state(), NodeState::Connected);

    silenced.store(true, Ordering::SeqCst);
    let started = Instant::now();
    assert_eq!(alice.disconnected().await, DisconnectReason::Protocol(ProtocolReason::PingPongMissed));
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(to_bob.state(), NodeState::Disconnected);
    assert_eq!(to_bob.disconnect_reason(), Some(DisconnectReason::Protocol(ProtocolReason::PingPongMissed)));
}
