// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use les_base::UInt256;
use les_crypto::{Keypair, PublicKey, Random};

use crate::codec::{frame_error, FrameCoder, FrameError, RlpxFrameCodec};
use crate::endpoint::{errno_of, Enode, NodeEndpoint, Route, STANDARD_PORT};
use crate::handshake::{HandshakeError, HandshakeMachine, HandshakeRole};
use crate::message::{Hello, Message, P2pDisconnect, Status, P2P_VERSION};
use crate::{NodeEvent, NodeEventKind, P2pConfig, P2pError, P2pResult, SendError};
use crate::NodeEventKind::{Disconnected, StateChanged};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

pub const OUTBOUND_CHAN_SIZE: usize = 128;

type Transport = Framed<TcpStream, RlpxFrameCodec>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    Disconnected,
    Connecting,
    PerformingHandshake,
    Connected,
    Disconnecting,
}

impl NodeState {
    #[inline]
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Disconnected | Self::Disconnecting)
    }
}

impl Display for NodeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::PerformingHandshake => "performing-handshake",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// Protocol level causes for dropping a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolReason {
    NonstandardPort,
    PingPongMissed,
    ExcessiveByteCount,
    Authentication,
    HelloMissed,
    StatusMissed,
    CapabilitiesMismatch,
    Framing,
    Timeout,
}

impl Display for ProtocolReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::NonstandardPort => "non-standard port",
            Self::PingPongMissed => "ping/pong missed",
            Self::ExcessiveByteCount => "excessive byte count",
            Self::Authentication => "authentication failed",
            Self::HelloMissed => "hello missed",
            Self::StatusMissed => "status missed",
            Self::CapabilitiesMismatch => "capabilities mismatch",
            Self::Framing => "framing error",
            Self::Timeout => "io timeout",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    Requested,

    /// The caller gave up on this peer.
    Exhausted,

    /// Socket failure, carries the errno.
    Os(i32),

    /// The peer sent a Disconnect.
    Peer(P2pDisconnect),
    Protocol(ProtocolReason),
}

impl Display for DisconnectReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("requested"),
            Self::Exhausted => f.write_str("exhausted"),
            Self::Os(errno) => write!(f, "os error: {}", io::Error::from_raw_os_error(*errno)),
            Self::Peer(reason) => write!(f, "peer: {}", reason),
            Self::Protocol(reason) => write!(f, "protocol: {}", reason),
        }
    }
}

impl From<ProtocolReason> for DisconnectReason {
    #[inline]
    fn from(reason: ProtocolReason) -> Self {
        Self::Protocol(reason)
    }
}

#[inline]
fn io_reason(err: &io::Error) -> DisconnectReason {
    match frame_error(err) {
        Some(FrameError::FrameTooLarge { .. }) => ProtocolReason::ExcessiveByteCount.into(),
        Some(_) => ProtocolReason::Framing.into(),
        None => DisconnectReason::Os(errno_of(err)),
    }
}

/// Like `io_reason`, but a route timeout is a protocol timeout.
#[inline]
fn route_reason(err: &io::Error) -> DisconnectReason {
    match err.kind() {
        io::ErrorKind::TimedOut => ProtocolReason::Timeout.into(),
        _ => io_reason(err),
    }
}

#[inline]
fn send_timeout_error<T>(err: SendTimeoutError<T>, wait: Duration) -> P2pError {
    match err {
        SendTimeoutError::Timeout(_) => SendError::Timeout(wait).into(),
        SendTimeoutError::Closed(_) => SendError::Closed.into(),
    }
}

#[inline]
fn auth_failed(err: HandshakeError) -> DisconnectReason {
    log::debug!("node: {}", err);
    ProtocolReason::Authentication.into()
}

/// Everything the nodes of one local peer share: runtime, config, identity,
/// our announced Hello/Status and the event sink.
#[derive(Clone)]
pub struct NodeContext {
    runtime: Handle,
    config: Arc<P2pConfig>,
    keypair: Arc<Keypair>,
    local: Arc<NodeEndpoint>,
    events: mpsc::Sender<NodeEvent>,
}

impl NodeContext {
    pub fn new(
        runtime: Handle,
        config: P2pConfig,
        keypair: Keypair,
        status: Status,
        events: mpsc::Sender<NodeEvent>,
    ) -> Self {
        let node_id = keypair.node_id();
        let unspecified = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        let mut local = NodeEndpoint::new(Enode::new(node_id, unspecified, config.listen_port, config.listen_port));
        local.set_hello(Hello {
            p2p_version: P2P_VERSION,
            client_id: config.client_id.clone(),
            capabilities: config.capabilities.clone(),
            listen_port: config.listen_port,
            node_id,
        });
        local.set_status(status);

        Self {
            runtime,
            config: Arc::new(config),
            keypair: Arc::new(keypair),
            local: Arc::new(local),
            events,
        }
    }

    #[inline]
    pub fn config(&self) -> &P2pConfig {
        &self.config
    }

    #[inline]
    pub fn public_key(&self) -> &PublicKey {
        &self.keypair.public_key
    }

    #[inline]
    pub fn local(&self) -> &NodeEndpoint {
        &self.local
    }

    #[inline]
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    fn local_hello(&self) -> Option<&Hello> {
        self.local.hello()
    }
}

struct NodeShared {
    state: NodeState,
    reason: Option<DisconnectReason>,
    last_reason: Option<DisconnectReason>,
    cancel: Option<CancellationToken>,
    outbound: Option<mpsc::Sender<Message>>,
}

struct NodeInner {
    id: UInt256,
    context: NodeContext,
    remote_key: PublicKey,
    remote: Mutex<NodeEndpoint>,
    shared: Mutex<NodeShared>,
}

enum Origin {
    Dial,
    Accept(TcpStream),
}

/// Pings a peer that stays quiet for `quiet` and gives up when another `quiet`
/// passes without any frame.
struct Keepalive {
    quiet: Duration,
    since: Instant,
    pinged: bool,
}

impl Keepalive {
    fn new(quiet: Duration) -> Self {
        Self { quiet, since: Instant::now(), pinged: false }
    }

    #[inline]
    fn deadline(&self) -> Instant {
        self.since + self.quiet
    }

    #[inline]
    fn is_pinged(&self) -> bool {
        self.pinged
    }

    fn on_ping(&mut self) {
        self.since = Instant::now();
        self.pinged = true;
    }

    fn on_frame(&mut self) {
        self.since = Instant::now();
        self.pinged = false;
    }
}

/// One remote peer and its connection lifecycle.
///
/// `connect`/`accept` spawn a task on the context's runtime that owns the socket
/// and frame coder; callers observe progress through [`NodeEvent`]s and `state()`.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    pub fn new(context: NodeContext, remote: NodeEndpoint) -> P2pResult<Self> {
        let id = remote.hash();
        let remote_key = remote.enode().public_key()?;
        let shared = NodeShared {
            state: NodeState::Disconnected,
            reason: None,
            last_reason: None,
            cancel: None,
            outbound: None,
        };

        Ok(Self {
            inner: Arc::new(NodeInner {
                id,
                context,
                remote_key,
                remote: Mutex::new(remote),
                shared: Mutex::new(shared),
            }),
        })
    }

    #[inline]
    pub fn id(&self) -> UInt256 {
        self.inner.id
    }

    #[inline]
    pub fn state(&self) -> NodeState {
        self.inner.shared.lock().state
    }

    /// A snapshot of the remote endpoint, including its Hello and Status once received.
    pub fn remote(&self) -> NodeEndpoint {
        self.inner.remote.lock().clone()
    }

    /// Why the last connection ended.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.inner.shared.lock().last_reason
    }

    /// Dials the remote and runs the connection in the background.
    pub fn connect(&self) -> P2pResult<()> {
        let port = self.inner.remote.lock().enode().tcp_port;
        if self.inner.context.config.standard_port_only && port != STANDARD_PORT {
            let reason = ProtocolReason::NonstandardPort.into();
            self.inner.shared.lock().last_reason = Some(reason);
            self.emit_nowait(Disconnected(reason));
            return Ok(());
        }

        self.start(Origin::Dial)
    }

    /// Runs an inbound connection from this remote; the handshake rejects any other peer.
    pub fn accept(&self, stream: TcpStream) -> P2pResult<()> {
        self.start(Origin::Accept(stream))
    }

    fn start(&self, origin: Origin) -> P2pResult<()> {
        let cancel = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHAN_SIZE);
        {
            let mut shared = self.inner.shared.lock();
            if shared.state != NodeState::Disconnected {
                return Err(P2pError::InvalidState(shared.state));
            }

            shared.state = NodeState::Connecting;
            shared.reason = None;
            shared.cancel = Some(cancel.clone());
            shared.outbound = Some(outbound_tx);
        }
        self.emit_nowait(StateChanged(NodeState::Connecting));

        let node = self.clone();
        let _task = self.inner.context.runtime.spawn(async move {
            let reason = node.run(origin, cancel, outbound_rx).await;
            node.finish(reason).await;
        });
        Ok(())
    }

    /// Asks the connection to end. Only the first call on an active node has any
    /// effect; it returns whether this call started the teardown.
    pub fn disconnect(&self, reason: DisconnectReason) -> bool {
        {
            let mut shared = self.inner.shared.lock();
            if !shared.state.is_active() {
                return false;
            }

            shared.state = NodeState::Disconnecting;
            shared.reason = Some(reason);
            if let Some(cancel) = shared.cancel.take() {
                cancel.cancel();
            }
        }

        // the task reports Disconnecting right before Disconnected
        log::info!("node: {} disconnecting: {}", self.id(), reason);
        true
    }

    /// Queues a message for a connected peer.
    pub fn send(&self, message: Message) -> P2pResult<()> {
        let shared = self.inner.shared.lock();
        let outbound = match (shared.state, shared.outbound.as_ref()) {
            (NodeState::Connected, Some(outbound)) => outbound,
            _ => return Err(P2pError::NotConnected),
        };

        outbound.try_send(message).map_err(|err| match err {
            TrySendError::Full(_) => SendError::Fulled.into(),
            TrySendError::Closed(_) => SendError::Closed.into(),
        })
    }

    /// Queues a message, waiting up to `wait` for room in the outbound queue.
    pub async fn send_timeout(&self, message: Message, wait: Duration) -> P2pResult<()> {
        let outbound = {
            let shared = self.inner.shared.lock();
            match (shared.state, shared.outbound.as_ref()) {
                (NodeState::Connected, Some(outbound)) => outbound.clone(),
                _ => return Err(P2pError::NotConnected),
            }
        };

        outbound.send_timeout(message, wait).await.map_err(|err| send_timeout_error(err, wait))
    }

    async fn run(
        &self,
        origin: Origin,
        cancel: CancellationToken,
        mut outbound_rx: mpsc::Receiver<Message>,
    ) -> DisconnectReason {
        let config = self.inner.context.config.clone();
        let mut endpoint = self.remote();
        let role = match origin {
            Origin::Accept(stream) => {
                endpoint.attach_tcp(stream);
                HandshakeRole::Receiver
            }
            Origin::Dial => match cancellable(&cancel, endpoint.open(Route::Tcp, config.connect_timeout)).await {
                None => return DisconnectReason::Requested,
                Some(Ok(())) => HandshakeRole::Originator,
                Some(Err(err)) => {
                    log::info!("node: dial {} err: {}", endpoint.tcp_addr(), err);
                    return DisconnectReason::Os(errno_of(&err));
                }
            },
        };

        if !self.transition(NodeState::PerformingHandshake).await {
            endpoint.close(Route::Tcp).await;
            return DisconnectReason::Requested;
        }

        let coder = match cancellable(&cancel, self.handshake(&mut endpoint, role)).await {
            None => {
                endpoint.close(Route::Tcp).await;
                return DisconnectReason::Requested;
            }
            Some(Err(reason)) => return reason,
            Some(Ok(coder)) => coder,
        };

        let Some(stream) = endpoint.take_tcp() else {
            return DisconnectReason::Os(libc::ENOTCONN);
        };
        if !self.transition(NodeState::Connected).await {
            endpoint.attach_tcp(stream);
            endpoint.close(Route::Tcp).await;
            return DisconnectReason::Requested;
        }

        let mut transport = Framed::new(stream, RlpxFrameCodec::new(coder));
        let exchanged = cancellable(&cancel, self.exchange(&mut transport)).await;
        match exchanged {
            None => return self.close(&mut endpoint, transport).await,
            Some(Err(reason)) => return reason,
            Some(Ok(())) => {}
        }

        let mut keepalive = Keepalive::new(config.io_timeout);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return self.close(&mut endpoint, transport).await,
                _ = sleep_until(keepalive.deadline()) => {
                    if keepalive.is_pinged() {
                        log::info!("node: {} no Pong within {:?}", self.id(), config.io_timeout);
                        return ProtocolReason::PingPongMissed.into();
                    }
                    if let Err(reason) = self.write(&mut transport, &Message::Ping).await {
                        return reason;
                    }
                    keepalive.on_ping();
                }
                frame = transport.next() => {
                    keepalive.on_frame();
                    let message = match decode_frame(frame) {
                        Ok(message) => message,
                        Err(reason) => return reason,
                    };
                    if let Err(reason) = self.on_message(&mut transport, message).await {
                        return reason;
                    }
                }
                message = outbound_rx.recv() => {
                    let Some(message) = message else { return DisconnectReason::Requested; };
                    if let Err(reason) = self.write(&mut transport, &message).await {
                        return reason;
                    }
                }
            }
        }
    }

    async fn handshake(&self, endpoint: &mut NodeEndpoint, role: HandshakeRole) -> Result<FrameCoder, DisconnectReason> {
        let context = &self.inner.context;
        let io_timeout = context.config.io_timeout;

        let mut rng = Random::from_os_entropy();
        let remote = Some(self.inner.remote_key);
        let mut machine = HandshakeMachine::new(role, context.keypair.clone(), remote, &mut rng)
            .map_err(auth_failed)?;

        if let Some(auth) = machine.start(&mut rng).map_err(auth_failed)? {
            endpoint.send(Route::Tcp, &auth, io_timeout).await.map_err(|err| route_reason(&err))?;
        }

        while !machine.is_complete() {
            let expected = machine.expected_len().ok_or(ProtocolReason::Authentication)?;
            let mut buf = vec![0u8; expected];
            endpoint.recv(Route::Tcp, &mut buf, io_timeout).await.map_err(|err| route_reason(&err))?;

            if let Some(reply) = machine.on_message(&mut rng, &buf).map_err(auth_failed)? {
                endpoint.send(Route::Tcp, &reply, io_timeout).await.map_err(|err| route_reason(&err))?;
            }
        }

        let coder = machine.finish().map_err(auth_failed)?;
        log::debug!("node: {} handshake finished as {:?}", self.id(), role);
        Ok(coder.with_max_frame_size(context.config.max_frame_size))
    }

    /// Hello, capability check, then Status.
    async fn exchange(&self, transport: &mut Transport) -> Result<(), DisconnectReason> {
        let context = &self.inner.context;
        let config = &context.config;

        let local_hello = context.local_hello().cloned().ok_or(ProtocolReason::HelloMissed)?;
        self.write(transport, &Message::Hello(local_hello)).await?;

        let deadline = Instant::now() + config.hello_timeout;
        let hello = match self.await_message(transport, deadline, ProtocolReason::HelloMissed).await? {
            Message::Hello(hello) => hello,
            other => {
                log::info!("node: {} expected Hello, got {}", self.id(), other.name());
                return Err(ProtocolReason::HelloMissed.into());
            }
        };

        let expected = self.inner.remote.lock().enode().node_id;
        if hello.node_id != expected {
            log::info!("node: {} announced node id {}", self.id(), hello.node_id);
            let _ = self.write(transport, &Message::Disconnect(P2pDisconnect::UnexpectedIdentity)).await;
            return Err(ProtocolReason::Authentication.into());
        }

        let matched = {
            let mut remote = self.inner.remote.lock();
            remote.set_hello(hello.clone());
            context.local.has_hello_matching_capability(&remote).cloned()
        };
        let Some(matched) = matched else {
            log::info!("node: {} shares no capability with {:?}", self.id(), hello.capabilities);
            let _ = self.write(transport, &Message::Disconnect(P2pDisconnect::UselessPeer)).await;
            return Err(ProtocolReason::CapabilitiesMismatch.into());
        };
        log::info!("node: {} '{}' speaks {}", self.id(), hello.client_id, matched);
        self.emit(NodeEventKind::Hello(hello)).await;

        if let Some(status) = context.local.status().cloned() {
            self.write(transport, &Message::Status(status)).await?;
        }

        let deadline = Instant::now() + config.status_timeout;
        let status = match self.await_message(transport, deadline, ProtocolReason::StatusMissed).await? {
            Message::Status(status) => status,
            other => {
                log::info!("node: {} expected Status, got {}", self.id(), other.name());
                return Err(ProtocolReason::StatusMissed.into());
            }
        };

        self.inner.remote.lock().set_status(status.clone());
        self.emit(NodeEventKind::Status(status)).await;
        Ok(())
    }

    /// Next non-keepalive message before `deadline`; a Ping is answered on the way.
    async fn await_message(
        &self,
        transport: &mut Transport,
        deadline: Instant,
        missed: ProtocolReason,
    ) -> Result<Message, DisconnectReason> {
        loop {
            let frame = timeout_at(deadline, transport.next()).await.map_err(|_| missed)?;
            match decode_frame(frame)? {
                Message::Ping => self.write(transport, &Message::Pong).await?,
                Message::Pong => {}
                Message::Disconnect(reason) => return Err(DisconnectReason::Peer(reason)),
                message => return Ok(message),
            }
        }
    }

    async fn on_message(&self, transport: &mut Transport, message: Message) -> Result<(), DisconnectReason> {
        match message {
            Message::Ping => self.write(transport, &Message::Pong).await?,
            Message::Pong => {}
            Message::Disconnect(reason) => return Err(DisconnectReason::Peer(reason)),
            Message::Hello(_) => log::debug!("node: {} repeated Hello ignored", self.id()),
            Message::Status(status) => {
                self.inner.remote.lock().set_status(status.clone());
                self.emit(NodeEventKind::Status(status)).await;
            }
            Message::Other { id, payload } => self.emit(NodeEventKind::Message { id, payload }).await,
        }
        Ok(())
    }

    async fn write(&self, transport: &mut Transport, message: &Message) -> Result<(), DisconnectReason> {
        log::trace!("node: {} send {}", self.id(), message.name());
        let io_timeout = self.inner.context.config.io_timeout;
        with_io_timeout(io_timeout, transport.send(Bytes::from(message.encode()))).await
    }

    /// Requested teardown: best-effort Disconnect, then the TCP route is closed.
    async fn close(&self, endpoint: &mut NodeEndpoint, mut transport: Transport) -> DisconnectReason {
        let _ = self.write(&mut transport, &Message::Disconnect(P2pDisconnect::ClientQuitting)).await;
        endpoint.attach_tcp(transport.into_inner());

        let io_timeout = self.inner.context.config.io_timeout;
        let _ = timeout(io_timeout, endpoint.close(Route::Tcp)).await;
        DisconnectReason::Requested
    }

    async fn transition(&self, state: NodeState) -> bool {
        {
            let mut shared = self.inner.shared.lock();
            if !shared.state.is_active() {
                return false;
            }
            shared.state = state;
        }

        log::debug!("node: {} -> {}", self.id(), state);
        self.emit(StateChanged(state)).await;
        true
    }

    /// Runs once per connection; a reason given to `disconnect` wins over the task's own.
    async fn finish(&self, reason: DisconnectReason) {
        let (reason, requested) = {
            let mut shared = self.inner.shared.lock();
            let requested = shared.reason.take();
            let reason = requested.unwrap_or(reason);
            shared.state = NodeState::Disconnected;
            shared.last_reason = Some(reason);
            shared.cancel = None;
            shared.outbound = None;
            (reason, requested.is_some())
        };

        if requested {
            self.emit(StateChanged(NodeState::Disconnecting)).await;
        }
        log::info!("node: {} disconnected: {}", self.id(), reason);
        self.emit(StateChanged(NodeState::Disconnected)).await;
        self.emit(Disconnected(reason)).await;
    }

    async fn emit(&self, kind: NodeEventKind) {
        let event = kind.with_node(self.id());
        if let Err(err) = self.inner.context.events.send_timeout(event, SEND_TIMEOUT).await {
            log::warn!("node: emit event err: {}", err);
        }
    }

    fn emit_nowait(&self, kind: NodeEventKind) {
        if let Err(err) = self.inner.context.events.try_send(kind.with_node(self.id())) {
            log::warn!("node: emit event err: {}", err);
        }
    }
}

async fn cancellable<F: Future>(cancel: &CancellationToken, task: F) -> Option<F::Output> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        output = task => Some(output),
    }
}

async fn with_io_timeout<T, F>(io_timeout: Duration, task: F) -> Result<T, DisconnectReason>
where
    F: Future<Output = io::Result<T>>,
{
    match timeout(io_timeout, task).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => Err(io_reason(&err)),
        Err(_elapsed) => Err(ProtocolReason::Timeout.into()),
    }
}

fn decode_frame(frame: Option<io::Result<Bytes>>) -> Result<Message, DisconnectReason> {
    let body = match frame {
        Some(Ok(body)) => body,
        Some(Err(err)) => return Err(io_reason(&err)),
        None => return Err(DisconnectReason::Os(libc::ECONNRESET)),
    };

    Message::decode(&body).map_err(|err| {
        log::debug!("node: undecodable message: {}", err);
        ProtocolReason::Framing.into()
    })
}
