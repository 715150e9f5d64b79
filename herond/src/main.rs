//! The heron daemon: chain, mempool, peer loops, and the query channel.

mod node;
mod requests;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use color_eyre::eyre::Report;
use structopt::StructOpt;
use tracing::{info, warn};

use heron_chain::parameters::Network;
use heron_consensus::Chain;
use heron_mempool::Mempool;
use heron_network::AddressBook;
use heron_state::Config as StateConfig;

use node::Node;
use requests::RequestChannel;

/// Construction parameters; everything else is compiled in.
#[derive(Debug, StructOpt)]
#[structopt(name = "herond", about = "A Bitcoin Cash full node")]
struct Args {
    /// The directory holding all persisted state.
    #[structopt(long, default_value = "./heron-data", parse(from_os_str))]
    data_dir: PathBuf,

    /// Run against the test network.
    #[structopt(long)]
    testnet: bool,

    /// The p2p listening port; defaults to the network's standard port.
    #[structopt(long)]
    port: Option<u16>,

    /// The local query channel port.
    #[structopt(long, default_value = "8334")]
    request_port: u16,

    /// A peer to dial at startup; may be given more than once.
    #[structopt(long = "peer", number_of_values = 1)]
    peers: Vec<SocketAddr>,
}

impl Args {
    fn network(&self) -> Network {
        if self.testnet {
            Network::Testnet
        } else {
            Network::Mainnet
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Report> {
    color_eyre::install()?;
    tracing_subscriber::fmt::init();

    let args = Args::from_args();
    let network = args.network();
    let port = args.port.unwrap_or_else(|| network.default_port());
    std::fs::create_dir_all(&args.data_dir)?;

    let config = StateConfig::new(&args.data_dir, network);
    let chain = Arc::new(Chain::new(&config)?);
    let mempool = Arc::new(Mempool::new(heron_mempool::Config::default()));
    let address_book = Arc::new(AddressBook::open(&args.data_dir, network)?);
    let stop = Arc::new(AtomicBool::new(false));

    let (height, hash) = chain.tip();
    info!(network = %network, height = height.0, %hash, "chain open");

    let node = Node::new(
        chain.clone(),
        mempool.clone(),
        address_book.clone(),
        stop.clone(),
    );

    tokio::spawn(node::maintenance_loop(node.clone(), stop.clone()));
    tokio::spawn(node.clone().listen(port));

    for peer in args.peers {
        tokio::spawn(node.clone().connect(peer));
    }

    let channel = Arc::new(RequestChannel::new(
        chain.clone(),
        mempool,
        args.data_dir.clone(),
    ));
    tokio::spawn(channel.serve(args.request_port, stop.clone()));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    stop.store(true, Ordering::Relaxed);

    // Flush durable state; in-flight commits finished before we got here.
    if let Err(error) = chain.save() {
        warn!(%error, "failed to save the UTXO tables");
    }
    if let Err(error) = address_book.save() {
        warn!(%error, "failed to save the peer list");
    }
    Ok(())
}
