use clap::Parser;
use tessera_relay::{RelayConfig, RelayServer};

#[derive(Debug, Parser)]
#[command(
    name = "tessera-relay",
    about = "Topic relay connecting the tiles of a display wall",
    version
)]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:9190")]
    bind: String,

    /// Maximum simultaneously joined peers
    #[arg(long = "max-peers", default_value_t = 256)]
    max_peers: usize,

    /// Frames buffered per subscriber and topic
    #[arg(long = "topic-capacity", default_value_t = 256)]
    topic_capacity: usize,

    /// Seconds between pings
    #[arg(long = "heartbeat-secs", default_value_t = 30)]
    heartbeat_secs: u64,
}

impl From<Cli> for RelayConfig {
    fn from(cli: Cli) -> Self {
        Self {
            bind_addr: cli.bind,
            max_peers: cli.max_peers,
            topic_capacity: cli.topic_capacity,
            heartbeat_secs: cli.heartbeat_secs,
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let server = RelayServer::new(Cli::parse().into());

    if let Err(e) = server.run().await {
        log::error!("Relay stopped: {e}");
        std::process::exit(1);
    }
}
