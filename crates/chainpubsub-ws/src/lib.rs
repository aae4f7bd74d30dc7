//! chainpubsub-ws — persistent PubSub client for ledger nodes.
//!
//! # Features
//! - Request multiplexing over a single connection
//! - Lazy reconnect: the next write or subscribe reopens a dropped connection
//! - Subscription replay after every reconnect
//! - Account notification streams and one-shot signature confirmations
//! - Optional heartbeat pings
//!
//! # Example
//!
//! ```rust,no_run
//! use chainpubsub_ws::{PubSubClient, PubSubConfig};
//!
//! # async fn run() -> Result<(), chainpubsub_core::PubSubError> {
//! let client = PubSubClient::with_url("wss://api.mainnet-beta.solana.com", PubSubConfig::default());
//! let mut account = client.subscribe_account("Acct1").await?;
//! while let Some(update) = account.recv().await {
//!     println!("lamports = {}", update?.account.lamports);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod demux;
mod manager;
pub mod transport;

pub use client::{AccountSubscription, PendingResponse, PubSubClient};
pub use config::PubSubConfig;
pub use demux::{BusMessage, Demultiplexer, NotificationBus, Routed};
pub use transport::WsConnector;
