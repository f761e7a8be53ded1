//! Headless Lantern node daemon
//!
//! Connects a relay to one or more hubs, logs mesh traffic, optionally
//! runs the admin join, and offers one-shot sends plus the operator
//! export/reset surface.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use lantern_node::admin::AdminJoin;
use lantern_node::envelope::MessageEnvelope;
use lantern_node::identity::{self, NodeIdentity};
use lantern_node::relay::NodeRelay;
use lantern_node::store::MeshStore;

#[derive(Parser)]
#[command(name = "lantern-node", version, about = "Lantern mesh node relay")]
struct Args {
    /// Data directory holding the mesh log
    #[arg(long, env = "LANTERN_DATA_DIR", default_value = "./lantern-data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to hub(s) and relay traffic until interrupted
    Run {
        /// Hub session URL, e.g. ws://127.0.0.1:3000/mesh (repeatable to
        /// bridge hubs)
        #[arg(long = "hub", required = true)]
        hubs: Vec<String>,

        /// Run the admin join with this node's admin key pair, creating
        /// one on first use
        #[arg(long)]
        admin: bool,

        /// Send one broadcast after registering, then keep relaying
        #[arg(long)]
        broadcast: Option<String>,

        /// Send one encrypted message to the admin public key given with
        /// --admin-key
        #[arg(long, requires = "admin_key")]
        send_encrypted: Option<String>,

        /// Admin public key (base64) for --send-encrypted
        #[arg(long)]
        admin_key: Option<String>,
    },
    /// Print the JSON audit export of the local log
    Export,
    /// Wipe the local log, identity and admin keys
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let store = Arc::new(
        MeshStore::open(&args.data_dir.join("mesh.db")).context("opening mesh log")?,
    );

    match args.command {
        Command::Run {
            hubs,
            admin,
            broadcast,
            send_encrypted,
            admin_key,
        } => run(store, hubs, admin, broadcast, send_encrypted, admin_key).await,
        Command::Export => {
            let doc = store.export().context("exporting mesh log")?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
            Ok(())
        }
        Command::Reset => {
            store.reset().context("wiping mesh log")?;
            println!("Local log and identity wiped");
            Ok(())
        }
    }
}

async fn run(
    store: Arc<MeshStore>,
    hubs: Vec<String>,
    admin: bool,
    broadcast: Option<String>,
    send_encrypted: Option<String>,
    admin_key: Option<String>,
) -> Result<()> {
    let node = NodeIdentity::load_or_create(&store)?;
    log::info!("Node {} ({})", node.pseudo_id(), node.node_id());

    let relay = NodeRelay::new(node, store.clone())?;

    relay.on_message(|env| {
        log::info!(
            "Message {} from {} (type {:?}, ttl {})",
            env.msg_id,
            env.from,
            env.kind,
            env.ttl
        );
    });
    relay.on_key(|key| {
        log::info!("Key envelope {} from {}", key.msg_id, key.from);
    });

    if admin {
        let keys = identity::load_or_create_admin_keys(&store)?;
        println!("Admin public key: {}", keys.public_base64());
        let join = AdminJoin::with_keys(store.clone(), keys);
        join.attach(&relay);
        join.replay_log()?;
        let mut decrypted = join.subscribe();
        tokio::spawn(async move {
            while let Ok(msg) = decrypted.recv().await {
                log::info!("Decrypted {} from {}: {}", msg.msg_id, msg.from, msg.content);
            }
        });
    }

    for hub in &hubs {
        relay
            .connect(hub)
            .await
            .with_context(|| format!("connecting to {hub}"))?;
    }

    if let Some(content) = broadcast {
        let env = MessageEnvelope::broadcast(content, None, relay.node_id(), relay.pseudo_id());
        relay.broadcast(env).await?;
    }
    if let Some(content) = send_encrypted {
        relay
            .send_encrypted(&content, None, admin_key.as_deref())
            .await?;
    }

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");
    relay.close().await;
    Ok(())
}
