//! Clap CLI definitions for agent-messenger.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// agent-messenger — a message listener and router for agent peers.
#[derive(Parser)]
#[command(
    name = "agent-messenger",
    version,
    about = "Message listener and router for agent peers",
    long_about = "Message listener and router for agent peers.\n\n\
                  Run `listen` to accept connections and route messages, or use\n\
                  `send` and `peers` to talk to a running listener."
)]
pub struct Cli {
    /// Path to config file (default: ~/.agent-messenger/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Peer id to identify as (default: from config, or a fresh UUID).
    #[arg(long, global = true)]
    pub node_id: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Listen for peer connections and route their messages.
    Listen {
        /// Address to listen on (overrides config).
        #[arg(long)]
        addr: Option<String>,
        /// Print node status as JSON on shutdown.
        #[arg(long)]
        json: bool,
    },
    /// Connect to a listener and send a single message.
    Send {
        /// Message text to send.
        message: String,
        /// Listener address to connect to (overrides config).
        #[arg(long)]
        addr: Option<String>,
        /// Destination: `local`, `broadcast`, or a peer id.
        #[arg(long, default_value = "local")]
        dest: String,
    },
    /// Connect to a listener and print its connected peers.
    Peers {
        /// Listener address to connect to (overrides config).
        #[arg(long)]
        addr: Option<String>,
    },
}
