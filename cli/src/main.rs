//! ChainPubSub CLI — talk to a ledger node's PubSub endpoint from the terminal.
//!
//! # Commands
//! ```text
//! chainpubsub account   --address <pubkey>
//! chainpubsub signature --signature <sig> [--timeout-secs <N>]
//! chainpubsub call      --method <name> [--params '<json array>']
//! chainpubsub version
//! ```

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use chainpubsub_ws::{PubSubClient, PubSubConfig};

mod cmd_call;
mod cmd_subscribe;
mod logging;

use logging::LogConfig;

#[derive(Parser)]
#[command(
    name = "chainpubsub",
    about = "Persistent JSON-RPC PubSub client for ledger nodes",
    long_about = "
ChainPubSub CLI: stream account changes, wait for signature confirmations and
send ad hoc JSON-RPC calls over one WebSocket connection.

ENVIRONMENT VARIABLES:
  CHAINPUBSUB_URL   PubSub WebSocket endpoint (overridden by --url)
  RUST_LOG          Log filter (overrides --log-level)
",
    version
)]
struct Cli {
    /// PubSub WebSocket endpoint
    #[arg(
        long,
        global = true,
        env = "CHAINPUBSUB_URL",
        default_value = "wss://api.mainnet-beta.solana.com"
    )]
    url: String,

    /// Log level or filter directive
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Send a ping every N seconds while connected
    #[arg(long, global = true)]
    heartbeat_secs: Option<u64>,

    /// Commitment level for subscriptions (processed, confirmed, finalized)
    #[arg(long, global = true)]
    commitment: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream notifications for an account until Ctrl-C
    Account {
        /// Account address (base58)
        #[arg(long)]
        address: String,
    },

    /// Wait for a transaction signature to be confirmed
    Signature {
        /// Transaction signature (base58)
        #[arg(long)]
        signature: String,
        /// Give up after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Send one JSON-RPC request over the socket and print the result
    Call {
        /// Method name, e.g. getSlot
        #[arg(long)]
        method: String,
        /// JSON array of parameters
        #[arg(long, default_value = "[]")]
        params: String,
    },

    /// Print version
    Version,
}

impl Cli {
    fn pubsub_config(&self) -> PubSubConfig {
        let mut config = PubSubConfig::default();
        if let Some(secs) = self.heartbeat_secs {
            config = config.with_heartbeat(Duration::from_secs(secs));
        }
        if let Some(commitment) = &self.commitment {
            config = config.with_commitment(commitment.clone());
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("chainpubsub {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    logging::init_tracing(&LogConfig {
        level: cli.log_level.clone(),
        json: cli.json_logs,
    });

    let client = PubSubClient::with_url(cli.url.clone(), cli.pubsub_config());

    match cli.command {
        Commands::Account { address } => cmd_subscribe::account(&client, &address).await,
        Commands::Signature {
            signature,
            timeout_secs,
        } => {
            cmd_subscribe::signature(&client, &signature, timeout_secs.map(Duration::from_secs))
                .await
        }
        Commands::Call { method, params } => cmd_call::run(&client, &method, &params).await,
        Commands::Version => Ok(()),
    }
}
