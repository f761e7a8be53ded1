//! Hub relay process: peer fan-out plus gateway ingress

use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;

use lantern_node::config::HubConfig;
use lantern_node::hub::HubState;

#[derive(Parser)]
#[command(name = "lantern-hub", version, about = "Lantern mesh hub relay")]
struct Args {
    /// Listen address for peer sessions (/mesh) and the gateway (/gateway)
    #[arg(long, env = "LANTERN_HUB_BIND", default_value = "0.0.0.0:3000")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = HubConfig {
        bind: args.bind,
        ..HubConfig::default()
    };
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    HubState::new(config).serve(listener).await?;
    Ok(())
}
