// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use std::fmt::{self, Display, Formatter};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream, UdpSocket};
use tokio::time::{timeout, timeout_at, Instant};

use les_base::{hash::Keccak256, UInt256, UInt512};
use les_crypto::{KeyError, PublicKey};

use crate::message::{Capability, Hello, Status};

pub const STANDARD_PORT: u16 = 30303;

const ENODE_SCHEME: &str = "enode://";
const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);

/// Mainnet peers known to serve LES.
pub const BOOTSTRAP_LES_ENODES: &[&str] = &[
    "enode://e70d9a9175a2cd27b55821c29967fdbfdfaa400328679e98ed61060bc7acba2e1ddd175332ee4a651292743ffd26c9a9de8c4fce931f8d7271b8afd7d221e851@35.226.238.26:30303",
    "enode://03f178d5d4511937933b50b7af683b467abaef8cfc5f7c2c9b271f61e228578ae192aaafc7f0d8035dfa994e734c2c2f72c229e383706be2f4fa43efbe9f94f4@163.172.149.200:30303",
    "enode://0f740f471e876020566c2ce331c81b4128b9a18f636b1d4757c4eaea7f077f4b15597a743f163280293b0a7e35092064be11c4ec199b9905541852a36be9004b@206.221.178.149:30303",
    "enode://16d92fc94f4ec4386aca44d255853c27cbe97a4274c0df98d2b642b0cc4b2f2330e99b00b46db8a031da1a631c85e2b4742d52f5eaeca46612cd28db41fb1d7f@91.223.175.173:30303",
    "enode://1d70e87a2ee28a2762f1b2cd56f1b9134824a84264030539bba297f67a5bc9ec7ae3016b5f900dc59b1c27b4e258a63fc282a37b2dd6e25a8377473530513394@208.88.169.151:30303",
    "enode://242b68a4e37b4478c46901c3512315f36bd1aa513566d1f061939b202258b55d63d66367bc5807e62ec03ae673bead9a351846e3f23284ce79537ff7afa65615@34.201.26.61:30303",
    "enode://2af1ef12967d112f527648819f89e55bfe61f77f5920a0edc1c21de274092bc4839a68405b13d845a0c133b101050c5fb04f5b4a8683663fc20d9ccc5f68d0f3@34.239.156.26:30303",
    "enode://31b5db1136a0ebceeb0ab6879e95dc66e8c52bcce9c8de50e2f722b5868f782aa0306b6b137b9e0c6271a419c5562a194d7f2abd78e22dcd1f55700dfc30c46a@35.165.17.127:30303",
    "enode://3afdfd40713a8b188a94e4c7a9ddc61bc6ef176c3abbb13d1dd35eb367725b95329a7570039044dbffa49c50d4aa65f0a1f99ee68e46b8e2f09100d11d4fc85a@31.17.196.138:30303",
    "enode://3d0bce4775635c65733b7534f1bccd48720632f5d66a44030c1d13e2e5883262d9d22cdb8365c03137e8d5fbbf5355772acf35b08d6f9b5ad69bb24ad52a20cc@35.184.255.33:30303",
    "enode://4baa9b4ea9f3219e595f52c817ce4829ae916e7b1ea0f356a543c73de0c7d7ff889b6360f4b7dfbbcae7d2f60b51a16bc02ccc510df6be0aee63cba94ff5a923@18.207.138.205:30303",
    "enode://4c2b5c5d9503b7f4e76a551c827f19200f7f9ebb62f2cb5078c352de1e8d4d1006efa8fc143f9ccf2c8fd85836198dc1c69729dfa1c54d63f5d1d57fd8781bf8@62.151.178.212:30303",
    "enode://63acf19ecd1f7a365176cc4ccf0b410e8fa05a60a5b298102a7a0194e86570a6f9e15abbb23cb3791fd92ddd4e25d32dba7a6c6887f6b76e4b266288fa99cf98@76.170.48.252:30303",
    "enode://89495deb21261a4542d50167d6e69cf3b1a585609e6843a23becbd349d92755bd2ddcc55bb1f2c017099b774454d95ef5ebccbed1859fc530fb34843ddfc32e2@52.39.91.131:30303",
    "enode://95176fe178be55d40aae49a5c11f21aa58968e13c681a6b1f571b2bb3e45927a7fb3888361bef85c0e28a52ea0e4afa17dcaa9d6c61baf504b3559f056f78581@163.172.145.241:30303",
    "enode://a979fb575495b8d6db44f750317d0f4622bf4c2aa3365d6af7c284339968eef29b69ad0dce72a4d8db5ebb4968de0e3bec910127f134779fbcb0cb6d3331163c@52.16.188.185:30303",
    "enode://ae1d9252428fa66371bc68e9c4fc0f9c60d09943b521cede6c60b50c67fd6dc1d614525c07030afe52586cbf35d43ad83368ad71c57639125698c3392f8b4a89@121.140.198.219:30303",
    "enode://bfad505cbb2bde72e161a7cff044d66d20ceb85c8a61047b50037881f289bd2dcc064189ade2077daddd5b20fd2fc6dee7208f227ae2a34361bf51751d225e8e@51.15.220.91:30303",
    "enode://d324187ba8da3ac7ad454eeb9aa395eae610fc032bccf9dae63c1e3206458cf55c7e9e454ce23acf9706fb89d0ce9d47038ab261676776b5c6fa1b76c6cf829c@198.58.126.224:30303",
    "enode://d5d63b7b26027d54f1d03656d8aed536b3c914999cbedddf7a4733e1286984ae99ebe2e7a1b3ada1ae4b10af4ddd9c5ed235ef908795f7142ef2061ca1751a11@198.74.52.106:30303",
    "enode://d70756f1aa07246a61731c8b0ce3e89046e07e8a18c497172dd4baa4b380998b4ee669396140effe65affbcd79bb269ec3f2c698b97507656291c88e7f8e1bc3@50.116.21.236:30303",
    "enode://ea1737bf696928b4b686a2ccf61a6f2295d149281a80b0d83a9bce242e7bb084434c0837a2002d4cc2840663571ecf3e45517545499c466e4373c69951d090fe@163.172.181.92:30303",
    "enode://f251404ab66f10df6f541d69d735616a7d78e04673ec40cdfe6bf3d1fb5d84647ba627f22a1e8c5e2aa45629c88e33bc394cc1633a63fed11d84304892e51fe9@196.54.41.2:38065",
    "enode://3e9301c797f3863d7d0f29eec9a416f13956bd3a14eec7e0cf5eb56942841526269209edf6f57cd1315bef60c4ebbe3476bc5457bed4e479cac844c8c9e375d3@109.232.77.21:30303",
    "enode://81863f47e9bd652585d3f78b4b2ee07b93dad603fd9bc3c293e1244250725998adc88da0cef48f1de89b15ab92b15db8f43dc2b6fb8fbd86a6f217a1dd886701@193.70.55.37:30303",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnodeError {
    #[error("enode: missing 'enode://' scheme")]
    MissingScheme,

    #[error("enode: missing '@' between node id and address")]
    MissingAddress,

    #[error("enode: invalid node id")]
    InvalidNodeId,

    #[error("enode: invalid address '{0}'")]
    InvalidAddress(String),

    #[error("enode: invalid discport '{0}'")]
    InvalidDiscPort(String),
}

/// A peer's identity and address: `enode://<node-id>@<ip>:<tcp-port>[?discport=<udp-port>]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Enode {
    pub node_id: UInt512,
    pub ip: IpAddr,
    pub tcp_port: u16,
    pub udp_port: u16,
}

impl Enode {
    pub fn new(node_id: UInt512, ip: IpAddr, tcp_port: u16, udp_port: u16) -> Self {
        Self { node_id, ip, tcp_port, udp_port }
    }

    #[inline]
    pub fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.tcp_port)
    }

    #[inline]
    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.udp_port)
    }

    #[inline]
    pub fn public_key(&self) -> Result<PublicKey, KeyError> {
        PublicKey::from_node_id(self.node_id.as_bytes())
    }

    /// Identity for set membership: keccak256 of the node id.
    #[inline]
    pub fn hash(&self) -> UInt256 {
        UInt256::new(self.node_id.as_bytes().keccak256())
    }
}

impl FromStr for Enode {
    type Err = EnodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.trim().strip_prefix(ENODE_SCHEME).ok_or(EnodeError::MissingScheme)?;
        let (id, address) = rest.split_once('@').ok_or(EnodeError::MissingAddress)?;
        if id.len() != 2 * UInt512::LENGTH {
            return Err(EnodeError::InvalidNodeId);
        }

        let node_id = UInt512::from_str(id).map_err(|_| EnodeError::InvalidNodeId)?;
        PublicKey::from_node_id(node_id.as_bytes()).map_err(|_| EnodeError::InvalidNodeId)?;

        let (address, query) = match address.split_once('?') {
            Some((address, query)) => (address, Some(query)),
            None => (address, None),
        };
        let addr = SocketAddr::from_str(address)
            .map_err(|_| EnodeError::InvalidAddress(address.into()))?;

        let udp_port = match query {
            Some(query) => query
                .strip_prefix("discport=")
                .and_then(|port| port.parse().ok())
                .ok_or_else(|| EnodeError::InvalidDiscPort(query.into()))?,
            None => addr.port(),
        };

        Ok(Self { node_id, ip: addr.ip(), tcp_port: addr.port(), udp_port })
    }
}

impl Display for Enode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}@{}", ENODE_SCHEME, self.node_id, self.tcp_addr())?;
        if self.udp_port != self.tcp_port {
            write!(f, "?discport={}", self.udp_port)?;
        }
        Ok(())
    }
}

/// Returns the first capability in `local` that `remote` also announces.
/// The order of `local` is the preference order.
pub fn matching_capability<'a>(local: &'a [Capability], remote: &[Capability]) -> Option<&'a Capability> {
    local.iter().find(|cap| remote.contains(cap))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Udp,
    Tcp,
}

impl Display for Route {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
        })
    }
}

/// One side of a connection: address, identity, the Hello/Status it announced
/// and a socket per route.
#[derive(Debug)]
pub struct NodeEndpoint {
    enode: Enode,
    hash: UInt256,
    hello: Option<Hello>,
    status: Option<Status>,
    udp: Option<UdpSocket>,
    tcp: Option<TcpStream>,
}

/// A clone copies identity, Hello and Status; its routes start closed.
impl Clone for NodeEndpoint {
    fn clone(&self) -> Self {
        Self {
            enode: self.enode.clone(),
            hash: self.hash,
            hello: self.hello.clone(),
            status: self.status.clone(),
            udp: None,
            tcp: None,
        }
    }
}

impl NodeEndpoint {
    pub fn new(enode: Enode) -> Self {
        let hash = enode.hash();
        Self { enode, hash, hello: None, status: None, udp: None, tcp: None }
    }

    #[inline]
    pub fn enode(&self) -> &Enode {
        &self.enode
    }

    #[inline]
    pub fn hash(&self) -> UInt256 {
        self.hash
    }

    #[inline]
    pub fn tcp_addr(&self) -> SocketAddr {
        self.enode.tcp_addr()
    }

    #[inline]
    pub fn udp_addr(&self) -> SocketAddr {
        self.enode.udp_addr()
    }

    #[inline]
    pub fn hello(&self) -> Option<&Hello> {
        self.hello.as_ref()
    }

    #[inline]
    pub fn set_hello(&mut self, hello: Hello) {
        self.hello = Some(hello);
    }

    #[inline]
    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    #[inline]
    pub fn set_status(&mut self, status: Status) {
        self.status = Some(status);
    }

    /// True if the announced Hello lists `capability`.
    pub fn has_hello_capability(&self, capability: &Capability) -> bool {
        self.hello.as_ref().is_some_and(|hello| hello.has_capability(capability))
    }

    /// The first of our capabilities that `target` also announced.
    pub fn has_hello_matching_capability(&self, target: &NodeEndpoint) -> Option<&Capability> {
        let (source, target) = (self.hello.as_ref()?, target.hello.as_ref()?);
        matching_capability(&source.capabilities, &target.capabilities)
    }

    #[inline]
    pub fn is_open(&self, route: Route) -> bool {
        match route {
            Route::Udp => self.udp.is_some(),
            Route::Tcp => self.tcp.is_some(),
        }
    }

    /// Opens `route` to this endpoint, closing any socket it had. TCP dials within
    /// `open_timeout`; UDP binds an ephemeral port connected to the discovery address.
    pub async fn open(&mut self, route: Route, open_timeout: Duration) -> io::Result<()> {
        self.close(route).await;
        match route {
            Route::Udp => {
                let addr = self.udp_addr();
                let socket = UdpSocket::bind(unspecified_for(addr)).await?;
                socket.connect(addr).await?;
                self.udp = Some(socket);
            }
            Route::Tcp => self.tcp = Some(dial(self.tcp_addr(), open_timeout).await?),
        }
        log::debug!("endpoint: {} {} route open", self.enode.ip, route);
        Ok(())
    }

    /// Uses an accepted stream as the TCP route.
    pub fn attach_tcp(&mut self, stream: TcpStream) {
        self.tcp = Some(stream);
    }

    /// Hands the TCP route over to the caller, leaving it closed here.
    pub fn take_tcp(&mut self) -> Option<TcpStream> {
        self.tcp.take()
    }

    /// Shuts down and drops the socket of `route`. Closing a closed route does nothing.
    pub async fn close(&mut self, route: Route) {
        match route {
            Route::Udp => {
                self.udp = None;
            }
            Route::Tcp => {
                if let Some(mut stream) = self.tcp.take() {
                    if let Err(err) = stream.shutdown().await {
                        log::debug!("endpoint: {} tcp shutdown err: {}", self.enode.ip, err);
                    }
                }
            }
        }
    }

    pub fn local_addr(&self, route: Route) -> io::Result<SocketAddr> {
        match route {
            Route::Udp => self.udp.as_ref().ok_or_else(not_open)?.local_addr(),
            Route::Tcp => self.tcp.as_ref().ok_or_else(not_open)?.local_addr(),
        }
    }

    /// Sends all of `buf`, a whole datagram on UDP.
    pub async fn send(&mut self, route: Route, buf: &[u8], io_timeout: Duration) -> io::Result<()> {
        match route {
            Route::Udp => {
                let socket = self.udp.as_ref().ok_or_else(not_open)?;
                let sent = bounded(io_timeout, socket.send(buf)).await?;
                if sent != buf.len() {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "partial datagram"));
                }
                Ok(())
            }
            Route::Tcp => {
                let stream = self.tcp.as_mut().ok_or_else(not_open)?;
                bounded(io_timeout, stream.write_all(buf)).await
            }
        }
    }

    /// Receives into `buf`: exactly `buf.len()` bytes on TCP, one datagram on UDP.
    /// Returns the number of bytes received.
    pub async fn recv(&mut self, route: Route, buf: &mut [u8], io_timeout: Duration) -> io::Result<usize> {
        match route {
            Route::Udp => {
                let socket = self.udp.as_ref().ok_or_else(not_open)?;
                bounded(io_timeout, socket.recv(buf)).await
            }
            Route::Tcp => {
                let stream = self.tcp.as_mut().ok_or_else(not_open)?;
                bounded(io_timeout, stream.read_exact(buf)).await
            }
        }
    }
}

#[inline]
fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "endpoint: route not open")
}

fn unspecified_for(addr: SocketAddr) -> SocketAddr {
    let ip = match addr {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

/// `task` within `io_timeout`, else an `ErrorKind::TimedOut` error.
async fn bounded<T, F>(io_timeout: Duration, task: F) -> io::Result<T>
where
    F: std::future::Future<Output = io::Result<T>>,
{
    match timeout(io_timeout, task).await {
        Ok(output) => output,
        Err(_elapsed) => Err(io::Error::new(io::ErrorKind::TimedOut, "endpoint: io timeout")),
    }
}

/// Dials `addr`, falling back to the IPv4-mapped IPv6 address when the IPv4 route fails.
/// The whole attempt is bounded by `connect_timeout`.
pub async fn dial(addr: SocketAddr, connect_timeout: Duration) -> io::Result<TcpStream> {
    let deadline = Instant::now() + connect_timeout;
    let mut last_err = None;
    for candidate in dial_candidates(addr) {
        match timeout_at(deadline, connect(candidate)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(err)) => {
                log::debug!("dial: {} failed: {}", candidate, err);
                last_err = Some(err);
            }
            Err(_elapsed) => return Err(io::Error::from_raw_os_error(libc::ETIMEDOUT)),
        }
    }

    Err(last_err.unwrap_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable)))
}

fn dial_candidates(addr: SocketAddr) -> Vec<SocketAddr> {
    match addr {
        SocketAddr::V4(v4) => vec![addr, SocketAddr::new(IpAddr::V6(v4.ip().to_ipv6_mapped()), v4.port())],
        SocketAddr::V6(_) => vec![addr],
    }
}

async fn connect(addr: SocketAddr) -> io::Result<TcpStream> {
    let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
    socket.set_keepalive(true)?;

    let stream = socket.connect(addr).await?;
    stream.set_nodelay(true)?;
    SockRef::from(&stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_IDLE))?;
    Ok(stream)
}

/// Maps an I/O failure to the errno reported in disconnect reasons.
pub fn errno_of(err: &io::Error) -> i32 {
    if let Some(errno) = err.raw_os_error() {
        return errno;
    }

    match err.kind() {
        io::ErrorKind::TimedOut => libc::ETIMEDOUT,
        io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset => libc::ECONNRESET,
        io::ErrorKind::ConnectionRefused => libc::ECONNREFUSED,
        io::ErrorKind::ConnectionAborted => libc::ECONNABORTED,
        io::ErrorKind::BrokenPipe => libc::EPIPE,
        io::ErrorKind::WouldBlock => libc::EWOULDBLOCK,
        _ => libc::EIO,
    }
}
