//! Presence server for content locking
//! Tracks who has each document open and who owns it

mod room;
mod ws;

use clap::Parser;
use room::RoomMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "presence-server")]
#[command(about = "Presence and ownership broadcaster for content locking")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("presence_server=debug,content_locking=debug")),
        )
        .init();

    let args = Args::parse();
    let listener = TcpListener::bind(&args.addr).await?;
    info!("Presence server listening on: {}", args.addr);

    let rooms: RoomMap = Arc::new(RwLock::new(HashMap::new()));

    while let Ok((stream, addr)) = listener.accept().await {
        info!("New connection from: {}", addr);
        tokio::spawn(ws::handle_connection(stream, addr, rooms.clone()));
    }

    Ok(())
}
