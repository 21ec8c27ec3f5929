//! agent-messenger CLI — listen for agent messages or talk to a running
//! listener with `send` and `peers`.

mod cli;
mod config;

use crate::cli::{Cli, Commands};
use agent_messenger_core::{Client, Node};
use agent_messenger_types::{Destination, Message, MessengerConfig, PeerId};
use agent_messenger_wire::TcpTransport;
use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing_stderr();

    let cli = Cli::parse();
    let mut config = config::load_config(cli.config.as_deref());
    if let Some(id) = cli.node_id {
        config.node_id = Some(id);
    }

    match cli.command {
        Commands::Listen { addr, json } => cmd_listen(config, addr, json).await,
        Commands::Send {
            message,
            addr,
            dest,
        } => cmd_send(config, addr, &dest, message).await,
        Commands::Peers { addr } => cmd_peers(config, addr).await,
    }
}

fn parse_addr(config: &MessengerConfig, addr: Option<String>) -> anyhow::Result<SocketAddr> {
    match addr {
        Some(s) => s
            .parse()
            .with_context(|| format!("invalid address: {s}")),
        None => Ok(config.listen_addr),
    }
}

fn parse_dest(dest: &str) -> Destination {
    match dest {
        "local" => Destination::Local,
        "broadcast" => Destination::Broadcast,
        other => Destination::Peer(PeerId::from(other)),
    }
}

async fn cmd_listen(
    mut config: MessengerConfig,
    addr: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    config.listen_addr = parse_addr(&config, addr)?;

    let (node, accept) = Node::bind(config, None)
        .await
        .context("failed to start listener")?;
    node.register_consumer(Arc::new(|msg: Message| {
        let stamp = chrono::Local::now().format("%H:%M:%S");
        println!("[{stamp}] {}: {}", msg.sender.short(), msg.payload_text());
    }));
    println!(
        "Listening on {} as {}. Press Ctrl+C to stop.",
        node.local_addr(),
        node.node_id().short()
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for Ctrl+C")?;
    node.shutdown();
    accept.await.context("accept loop panicked")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&node.status())?);
    }
    Ok(())
}

async fn connect(config: &MessengerConfig, addr: Option<String>) -> anyhow::Result<Client> {
    let addr = parse_addr(config, addr)?;
    let conn = TcpTransport::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    let peer_id = config
        .node_id
        .clone()
        .map(PeerId::from)
        .unwrap_or_else(PeerId::generate);
    Client::handshake(conn, peer_id, config)
        .await
        .context("handshake failed")
}

async fn cmd_send(
    config: MessengerConfig,
    addr: Option<String>,
    dest: &str,
    message: String,
) -> anyhow::Result<()> {
    let mut client = connect(&config, addr).await?;
    client
        .send(parse_dest(dest), message.into_bytes())
        .await
        .context("send failed")?;
    client.close().await.context("close failed")?;
    println!("Sent.");
    Ok(())
}

async fn cmd_peers(config: MessengerConfig, addr: Option<String>) -> anyhow::Result<()> {
    let client = connect(&config, addr).await?;
    println!("Listener: {}", client.remote_id());
    if client.roster().is_empty() {
        println!("No peers connected.");
    } else {
        println!("Connected peers ({}):", client.roster().len());
        for peer in client.roster() {
            println!("  {peer}");
        }
    }
    client.close().await.context("close failed")?;
    Ok(())
}
