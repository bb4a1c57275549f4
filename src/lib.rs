//! Multi-client TCP Chat Relay Library
//!
//! Clients authenticate with a unique username, then exchange broadcast
//! messages through the server over a newline-delimited text protocol.
//!
//! # Architecture
//! - One `handler` task per connection: the only reader of its socket
//! - `ClientRegistry`: mutex-guarded table of authenticated clients
//! - `MessageQueue`: bounded FIFO fed by every handler
//! - `Broadcaster`: the single consumer, fanning each message out to a
//!   registry snapshot
//! - `ChatServer`: accept loop, supervised handler set, graceful shutdown
//!
//! # Example
//! ```ignore
//! use relay_chat::{ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = ChatServer::bind(ServerConfig::default()).await.unwrap();
//!     let shutdown = server.shutdown_token();
//!
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         shutdown.cancel();
//!     });
//!
//!     server.run().await.unwrap();
//! }
//! ```

pub mod broadcast;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod message;
pub mod queue;
pub mod registry;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use broadcast::Broadcaster;
pub use client::{ClientEntry, ClientHandle};
pub use config::ServerConfig;
pub use error::{
    AppError, ConfigError, ParseError, QueueError, RegisterError, SendError, ValidationError,
};
pub use handler::{handle_connection, ServerContext};
pub use message::{Frame, Message};
pub use queue::{Broadcast, MessageQueue};
pub use registry::ClientRegistry;
pub use server::ChatServer;
pub use types::{ClientId, Username};
