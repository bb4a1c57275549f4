//! TCP Chat Relay - Entry Point
//!
//! Parses flags, starts the ChatServer and stops it on Ctrl+C.

use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use relay_chat::config::{DEFAULT_CLIENT_BUFFER, DEFAULT_MAX_CLIENTS, DEFAULT_QUEUE_CAPACITY};
use relay_chat::{ChatServer, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "relay_chat")]
#[command(about = "Multi-client TCP chat relay", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,

    /// Maximum number of concurrently authenticated clients
    #[arg(long, default_value_t = DEFAULT_MAX_CLIENTS)]
    max_clients: usize,

    /// Capacity of the broadcast queue
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Outbound frames buffered per client
    #[arg(long, default_value_t = DEFAULT_CLIENT_BUFFER)]
    client_buffer: usize,

    /// Seconds a broadcast waits on a slow client
    #[arg(long, default_value = "5")]
    write_timeout_secs: u64,

    /// Seconds to wait for connections to close on shutdown
    #[arg(long, default_value = "5")]
    shutdown_timeout_secs: u64,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            bind_addr: format!("{}:{}", args.host, args.port),
            max_clients: args.max_clients,
            queue_capacity: args.queue_capacity,
            client_buffer: args.client_buffer,
            write_timeout: Duration::from_secs(args.write_timeout_secs),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=relay_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("relay_chat=info")),
        )
        .init();

    let config = ServerConfig::from(Args::parse());

    let server = match ChatServer::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start server: {}", e);
            return Err(e.into());
        }
    };

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down gracefully...");
                shutdown.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    server.run().await?;

    Ok(())
}
