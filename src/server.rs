//! Chat server: accept loop and lifecycle
//!
//! Owns the registry, the message queue and the broadcast loop for one
//! server instance. Nothing is global, so several servers can run side by
//! side (tests do).

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::Broadcaster;
use crate::config::ServerConfig;
use crate::error::AppError;
use crate::handler::{handle_connection, ServerContext};
use crate::queue::MessageQueue;
use crate::registry::ClientRegistry;

/// A bound, not yet running, chat server
pub struct ChatServer {
    listener: TcpListener,
    config: ServerConfig,
    registry: Arc<ClientRegistry>,
    queue: Arc<MessageQueue>,
    shutdown: CancellationToken,
}

impl ChatServer {
    /// Validate the configuration and bind the listening socket
    pub async fn bind(config: ServerConfig) -> Result<Self, AppError> {
        config.validate()?;

        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Chat server listening on {}", listener.local_addr()?);
        info!(
            "Maximum clients: {}, queue capacity: {}",
            config.max_clients, config.queue_capacity
        );

        Ok(Self {
            listener,
            registry: Arc::new(ClientRegistry::new(config.max_clients)),
            queue: Arc::new(MessageQueue::new(config.queue_capacity)),
            shutdown: CancellationToken::new(),
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, AppError> {
        Ok(self.listener.local_addr()?)
    }

    /// Token that stops the server when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn queue(&self) -> Arc<MessageQueue> {
        Arc::clone(&self.queue)
    }

    /// Accept connections until the shutdown token is cancelled
    ///
    /// On shutdown: stop accepting, shut the queue down, give handlers up to
    /// `shutdown_timeout` to close, abort the rest, wait for the broadcast
    /// loop, then release the listener.
    pub async fn run(self) -> Result<(), AppError> {
        let ChatServer {
            listener,
            config,
            registry,
            queue,
            shutdown,
        } = self;

        let ctx = ServerContext {
            registry: Arc::clone(&registry),
            queue: Arc::clone(&queue),
            client_buffer: config.client_buffer,
            write_timeout: config.write_timeout,
            shutdown: shutdown.clone(),
        };

        let broadcaster = Broadcaster::new(
            Arc::clone(&queue),
            Arc::clone(&registry),
            config.write_timeout,
        );
        let broadcast_task = tokio::spawn(broadcaster.run());

        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }

                result = listener.accept() => match result {
                    Ok((stream, addr)) => {
                        info!("New connection from {}", addr);
                        let ctx = ctx.clone();
                        handlers.spawn(async move {
                            if let Err(e) = handle_connection(stream, ctx).await {
                                warn!("Connection from {} ended with error: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },

                // Reap finished handlers so the set does not grow unbounded
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        error!("Connection handler panicked: {}", e);
                    }
                }
            }
        }

        queue.shutdown();

        info!("Waiting for {} connection handler(s)", handlers.len());
        let drained = tokio::time::timeout(config.shutdown_timeout, async {
            while let Some(joined) = handlers.join_next().await {
                if let Err(e) = joined {
                    error!("Connection handler panicked: {}", e);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "{} connection handler(s) still running, aborting",
                handlers.len()
            );
            handlers.shutdown().await;
        }

        match broadcast_task.await {
            Ok(count) => debug!("Broadcast loop delivered {} broadcasts", count),
            Err(e) => error!("Broadcast loop failed: {}", e),
        }

        let remaining = registry.len().await;
        if remaining > 0 {
            warn!("{} client(s) still registered at shutdown", remaining);
        }

        drop(listener);
        info!("Server shut down");
        Ok(())
    }
}
