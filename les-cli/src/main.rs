// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use les_base::{UInt256, UInt512};
use les_crypto::{Keypair, PrivateKey, Random};
use les_p2p::*;

/// Mainnet genesis block hash.
const MAINNET_GENESIS: &str = "d4e56740f876aef8c010b86a40d5f56745a118d0906a34e69aec8c0db1cb8fa3";

/// Mainnet genesis difficulty.
const MAINNET_GENESIS_TD: u64 = 17_179_869_184;

const EVENTS_CHAN_SIZE: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "les-node", version, about = "Dial, ping and query LES peers")]
struct Args {
    /// TOML file with a `P2pConfig`, missing fields take their defaults
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Hex encoded secp256k1 secret, a fresh key is generated if absent
    #[arg(long, env = "LES_NODE_KEY", hide_env_values = true)]
    key: Option<String>,

    #[arg(long)]
    listen_port: Option<u16>,

    #[arg(long)]
    network_id: Option<u64>,

    #[arg(long)]
    client_id: Option<String>,

    /// Refuse peers whose TCP port is not 30303
    #[arg(long)]
    standard_port_only: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect over RLPx, exchange Hello and Status, then print events until ctrl-c.
    /// Dials the configured bootstrap nodes when no enode is given.
    Connect { enodes: Vec<String> },

    /// Send a discovery Ping and wait for the Pong
    Ping { enode: String },

    /// Ask a peer for the nodes closest to `target`, our own node id by default
    Neighbours {
        enode: String,

        #[arg(long)]
        target: Option<String>,
    },
}

impl Args {
    fn p2p_config(&self) -> anyhow::Result<P2pConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
                toml::from_str(&text).with_context(|| format!("parse {}", path.display()))?
            }
            None => P2pConfig::default(),
        };

        if let Some(port) = self.listen_port {
            config.listen_port = port;
        }
        if let Some(network_id) = self.network_id {
            config.network_id = network_id;
        }
        if let Some(client_id) = &self.client_id {
            config.client_id = client_id.clone();
        }
        config.standard_port_only |= self.standard_port_only;
        Ok(config)
    }

    fn keypair(&self) -> anyhow::Result<Keypair> {
        let Some(key) = &self.key else {
            return Ok(Random::from_os_entropy().gen_keypair());
        };

        let secret = hex::decode(key.trim_start_matches("0x")).context("decode key")?;
        let private_key = PrivateKey::from_slice(&secret).context("invalid key")?;
        Ok(Keypair::from_private(private_key))
    }
}

fn genesis_status(config: &P2pConfig) -> anyhow::Result<Status> {
    let genesis: UInt256 = MAINNET_GENESIS.parse()?;
    Ok(Status {
        protocol_version: LES_VERSION_2,
        network_id: config.network_id,
        head_td: UInt256::from_u64(MAINNET_GENESIS_TD),
        head_hash: genesis,
        head_num: 0,
        genesis_hash: genesis,
        announce_type: 1,
        ..Status::default()
    })
}

fn parse_enodes(enodes: &[String]) -> anyhow::Result<Vec<Enode>> {
    enodes
        .iter()
        .map(|enode| enode.parse::<Enode>().with_context(|| format!("parse '{}'", enode)))
        .collect()
}

async fn connect(config: P2pConfig, keypair: Keypair, enodes: &[String]) -> anyhow::Result<()> {
    let mut remotes = parse_enodes(enodes)?;
    if remotes.is_empty() {
        remotes = config.bootstrap_enodes();
    }
    remotes.truncate(config.max_peers);
    anyhow::ensure!(!remotes.is_empty(), "no enode to connect");

    log::info!("les-node: local node id {}", keypair.node_id());
    let status = genesis_status(&config)?;
    let (events_tx, mut events) = mpsc::channel(EVENTS_CHAN_SIZE);
    let context = NodeContext::new(Handle::current(), config, keypair, status, events_tx);

    let registry = NodeRegistry::with_capacity(remotes.len());
    let mut names = HashMap::with_capacity(remotes.len());
    for remote in remotes {
        let node = Node::new(context.clone(), NodeEndpoint::new(remote.clone()))?;
        if registry.insert(node.clone()).is_some() {
            log::warn!("les-node: duplicate {}", remote);
            continue;
        }
        names.insert(node.id(), remote.to_string());
        node.connect()?;
    }

    let mut active = registry.len();
    let mut stopping = false;
    while active > 0 {
        let event = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                if stopping {
                    break;
                }
                log::info!("les-node: ctrl-c, disconnecting (again to quit)");
                active = registry.shutdown();
                stopping = true;
                continue;
            }
            event = events.recv() => event,
        };
        let Some(event) = event else { break };

        let peer = names.get(&event.id).cloned().unwrap_or_else(|| event.id.to_string());
        match event.kind {
            NodeEventKind::StateChanged(state) => log::info!("{}: {}", peer, state),
            NodeEventKind::Hello(hello) => {
                let capabilities: Vec<String> = hello.capabilities.iter().map(ToString::to_string).collect();
                println!("{}: hello {} [{}]", peer, hello.client_id, capabilities.join(", "));
            }
            NodeEventKind::Status(status) => {
                println!(
                    "{}: status network {} head #{} {} genesis {}",
                    peer, status.network_id, status.head_num, status.head_hash, status.genesis_hash
                );
            }
            NodeEventKind::Message { id, payload } => {
                println!("{}: message {:#x} ({} bytes)", peer, id, payload.len());
            }
            NodeEventKind::Disconnected(reason) => {
                println!("{}: disconnected, {}", peer, reason);
                active = active.saturating_sub(1);
            }
        }
    }
    Ok(())
}

async fn discovery_client(config: &P2pConfig, keypair: Keypair) -> anyhow::Result<DiscoveryClient> {
    let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
    let client = DiscoveryClient::bind(bind, Arc::new(keypair), config.listen_port, config.discovery_timeout).await?;
    log::info!("les-node: discovery on {}", client.local_addr());
    Ok(client)
}

async fn ping(config: P2pConfig, keypair: Keypair, enode: &str) -> anyhow::Result<()> {
    let enode: Enode = enode.parse().with_context(|| format!("parse '{}'", enode))?;
    let mut endpoint = NodeEndpoint::new(enode.clone());

    let pong = ping_endpoint(&mut endpoint, &keypair, config.listen_port, config.discovery_timeout).await?;
    println!("{}: pong, seen us as {}", enode, pong.to.udp_addr());
    endpoint.close(Route::Udp).await;
    Ok(())
}

async fn neighbours(config: P2pConfig, keypair: Keypair, enode: &str, target: Option<&str>) -> anyhow::Result<()> {
    let enode: Enode = enode.parse().with_context(|| format!("parse '{}'", enode))?;
    let target: UInt512 = match target {
        Some(target) => target.parse().context("parse target")?,
        None => keypair.node_id(),
    };
    let client = discovery_client(&config, keypair).await?;

    let found = client.find_neighbours(&enode, target).await?;
    for neighbour in found {
        println!("{}", neighbour.to_enode());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.p2p_config()?;
    let keypair = args.keypair()?;

    match &args.command {
        Command::Connect { enodes } => connect(config, keypair, enodes).await,
        Command::Ping { enode } => ping(config, keypair, enode).await,
        Command::Neighbours { enode, target } => neighbours(config, keypair, enode, target.as_deref()).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_override_config() {
        let args = Args::parse_from([
            "les-node",
            "--listen-port",
            "30304",
            "--standard-port-only",
            "ping",
            BOOTSTRAP_LES_ENODES[0],
        ]);
        let config = args.p2p_config().expect("config should be ok");
        assert_eq!(config.listen_port, 30304);
        assert!(config.standard_port_only);
        assert_eq!(config.network_id, MAINNET_NETWORK_ID);
        assert!(matches!(args.command, Command::Ping { .. }));
    }

    #[test]
    fn test_config_from_toml() {
        let config: P2pConfig = toml::from_str(
            r#"
            client_id = "test"
            max_peers = 2
            bootstrap = []

            [connect_timeout]
            secs = 1
            nanos = 0
            "#,
        )
        .expect("toml should be ok");
        assert_eq!(config.client_id, "test");
        assert_eq!(config.max_peers, 2);
        assert_eq!(config.connect_timeout.as_secs(), 1);
        assert!(config.bootstrap_enodes().is_empty());
        assert_eq!(config.capabilities, P2pConfig::default().capabilities);
    }

    #[test]
    fn test_key_and_status() {
        let args = Args::parse_from(["les-node", "--key", &"11".repeat(32), "connect"]);
        let keypair = args.keypair().expect("key should be ok");
        assert_eq!(keypair.node_id(), args.keypair().expect("key should be ok").node_id());

        let status = genesis_status(&P2pConfig::default()).expect("status should be ok");
        assert_eq!(status.head_hash, status.genesis_hash);
        assert_eq!(status.network_id, MAINNET_NETWORK_ID);
    }
}
