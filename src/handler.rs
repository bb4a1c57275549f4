//! Per-connection handler
//!
//! Drives one connection through `AwaitingAuth → Authenticated → Closing →
//! Closed`. The handler is the only reader of its socket; everything it
//! writes, and everything the broadcast loop writes to it, goes through a
//! bounded channel drained by a dedicated writer task.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::ClientHandle;
use crate::error::{AppError, QueueError, RegisterError, ValidationError};
use crate::message::{Frame, Message, MAX_CONTENT_LEN, MAX_LINE_LEN};
use crate::queue::{Broadcast, MessageQueue};
use crate::registry::ClientRegistry;
use crate::types::{ClientId, Username};

/// Shared state every connection handler works against
#[derive(Debug, Clone)]
pub struct ServerContext {
    pub registry: Arc<ClientRegistry>,
    pub queue: Arc<MessageQueue>,
    /// Per-client outbound buffer size
    pub client_buffer: usize,
    /// Bound on flushing remaining frames while closing
    pub write_timeout: Duration,
    /// Server-wide shutdown signal
    pub shutdown: CancellationToken,
}

/// Connection lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConnectionState {
    AwaitingAuth,
    Authenticated(Username),
    /// `username` is set when the client had been registered
    Closing { username: Option<Username> },
    Closed,
}

/// Result of waiting for the next inbound line
enum Inbound {
    Line(String),
    /// Line longer than `MAX_LINE_LEN`; the codec skips to the next newline
    Oversized,
    /// Line that is not valid UTF-8; already consumed by the codec
    Undecodable,
    /// End of stream, read error, or the writer task died
    Gone,
    Shutdown,
}

/// Handle a new connection until it closes
///
/// Generic over the byte stream so it runs on TCP sockets as well as
/// in-memory duplex pipes.
pub async fn handle_connection<S>(stream: S, ctx: ServerContext) -> Result<(), AppError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let client_id = ClientId::new();
    debug!("Client {} connection opened", client_id);

    let (read_half, write_half) = tokio::io::split(stream);
    let lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let sink = FramedWrite::new(write_half, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    // Channel for server -> client frames
    let (frame_tx, frame_rx) = mpsc::channel::<Frame>(ctx.client_buffer);
    let handle = ClientHandle::new(client_id, frame_tx);
    let write_timeout = ctx.write_timeout;

    let mut write_task = tokio::spawn(write_frames(client_id, sink, frame_rx));

    let mut connection = Connection {
        id: client_id,
        lines,
        resume_after_error: false,
        handle,
        ctx,
    };
    connection.run().await;

    // Dropping the last handle lets the writer flush and shut the socket down
    drop(connection);

    match tokio::time::timeout(write_timeout, &mut write_task).await {
        Ok(Ok(result)) => result?,
        Ok(Err(e)) => error!("Writer task for {} failed: {}", client_id, e),
        Err(_) => {
            warn!("Writer task for {} did not finish in time", client_id);
            write_task.abort();
        }
    }

    info!("Client {} connection closed", client_id);
    Ok(())
}

/// Drain outbound frames into the socket
async fn write_frames<W>(
    client_id: ClientId,
    mut sink: FramedWrite<WriteHalf<W>, LinesCodec>,
    mut frames: mpsc::Receiver<Frame>,
) -> Result<(), AppError>
where
    W: AsyncWrite,
{
    while let Some(frame) = frames.recv().await {
        if let Err(e) = sink.send(frame.to_string()).await {
            debug!("Write to {} failed, ending writer: {}", client_id, e);
            return Err(e.into());
        }
    }

    // Flush and send FIN
    SinkExt::<String>::close(&mut sink).await?;
    debug!("Writer task ended for {}", client_id);
    Ok(())
}

struct Connection<R> {
    id: ClientId,
    lines: FramedRead<ReadHalf<R>, LinesCodec>,
    /// Set after a decode error so the codec's pause is not read as EOF
    resume_after_error: bool,
    handle: ClientHandle,
    ctx: ServerContext,
}

impl<R> Connection<R>
where
    R: AsyncRead,
{
    async fn run(&mut self) {
        let mut state = ConnectionState::AwaitingAuth;
        loop {
            state = match state {
                ConnectionState::AwaitingAuth => self.authenticate().await,
                ConnectionState::Authenticated(username) => self.relay(username).await,
                ConnectionState::Closing { username } => {
                    self.close(username).await;
                    ConnectionState::Closed
                }
                ConnectionState::Closed => break,
            };
        }
    }

    /// Wait for the next line, the writer dying, or server shutdown
    async fn next_inbound(&mut self) -> Inbound {
        loop {
            tokio::select! {
                line = self.lines.next() => match line {
                    Some(Ok(line)) => {
                        self.resume_after_error = false;
                        return Inbound::Line(line);
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        self.resume_after_error = true;
                        return Inbound::Oversized;
                    }
                    Some(Err(LinesCodecError::Io(e))) if e.kind() == io::ErrorKind::InvalidData => {
                        self.resume_after_error = true;
                        return Inbound::Undecodable;
                    }
                    Some(Err(LinesCodecError::Io(e))) => {
                        debug!("Read error from {}: {}", self.id, e);
                        return Inbound::Gone;
                    }
                    // FramedRead pauses with a single `None` after a decode error
                    None if std::mem::take(&mut self.resume_after_error) => continue,
                    None => {
                        debug!("Client {} closed the stream", self.id);
                        return Inbound::Gone;
                    }
                },
                _ = self.handle.closed() => {
                    debug!("Writer for {} is gone", self.id);
                    return Inbound::Gone;
                }
                _ = self.ctx.shutdown.cancelled() => return Inbound::Shutdown,
            }
        }
    }

    /// Queue a direct response to this client
    async fn reply(&self, frame: Frame) {
        if let Err(e) = self
            .handle
            .send_timeout(frame, self.ctx.write_timeout)
            .await
        {
            debug!("Reply to {} dropped: {}", self.id, e);
        }
    }

    async fn authenticate(&mut self) -> ConnectionState {
        let closing = ConnectionState::Closing { username: None };

        let line = match self.next_inbound().await {
            Inbound::Line(line) => line,
            Inbound::Oversized => {
                warn!("Client {} sent an oversized auth frame", self.id);
                self.reply(Frame::error("Invalid authentication format")).await;
                return closing;
            }
            Inbound::Undecodable => {
                warn!("Client {} sent a non UTF-8 auth frame", self.id);
                self.reply(Frame::error("Invalid authentication format")).await;
                return closing;
            }
            Inbound::Gone => return closing,
            Inbound::Shutdown => {
                self.reply(Frame::notify("Server is shutting down")).await;
                return closing;
            }
        };

        let candidate = match Frame::parse(&line) {
            Ok(Frame::Auth { username }) => username,
            Ok(other) => {
                warn!("Client {} sent {:?} before authenticating", self.id, other);
                self.reply(Frame::error("Invalid authentication format")).await;
                return closing;
            }
            Err(e) => {
                warn!("Client {} sent an invalid auth frame: {}", self.id, e);
                self.reply(Frame::error("Invalid authentication format")).await;
                return closing;
            }
        };

        let username = match Username::parse(&candidate) {
            Ok(username) => username,
            Err(_) => {
                info!("Client {} rejected: invalid username {:?}", self.id, candidate);
                self.reply(RegisterError::InvalidUsername.into()).await;
                return closing;
            }
        };

        // AUTH_OK is queued inside the registry's critical section so that no
        // broadcast can overtake it
        let registered = self
            .ctx
            .registry
            .try_register_with(self.handle.clone(), username.clone(), |entry| {
                if let Err(e) = entry.handle.try_send(Frame::AuthOk) {
                    debug!("AUTH_OK to {} dropped: {}", entry.id(), e);
                }
            })
            .await;

        if let Err(e) = registered {
            info!("Client {} rejected as '{}': {}", self.id, username, e);
            self.reply(e.into()).await;
            return closing;
        }

        info!("User '{}' authenticated on {}", username, self.id);
        self.broadcast_notice(format!("{} joined the chat", username));

        ConnectionState::Authenticated(username)
    }

    async fn relay(&mut self, username: Username) -> ConnectionState {
        loop {
            let line = match self.next_inbound().await {
                Inbound::Line(line) => line,
                Inbound::Oversized => {
                    warn!("'{}' sent an oversized frame", username);
                    let too_long = ValidationError::ContentTooLong {
                        len: MAX_LINE_LEN,
                        max: MAX_CONTENT_LEN,
                    };
                    self.reply(Frame::error(too_long.to_string())).await;
                    continue;
                }
                Inbound::Undecodable => {
                    warn!("Ignoring non UTF-8 frame from '{}'", username);
                    continue;
                }
                Inbound::Gone => {
                    info!("User '{}' disconnected", username);
                    return ConnectionState::Closing {
                        username: Some(username),
                    };
                }
                Inbound::Shutdown => {
                    self.reply(Frame::notify("Server is shutting down")).await;
                    return ConnectionState::Closing {
                        username: Some(username),
                    };
                }
            };

            match Frame::parse(&line) {
                // Client-supplied sender is ignored
                Ok(Frame::Msg { content, .. }) => self.submit(&username, content).await,
                Ok(Frame::Disconnect { .. }) => {
                    info!("User '{}' requested disconnect", username);
                    self.reply(Frame::DisconnectAck).await;
                    return ConnectionState::Closing {
                        username: Some(username),
                    };
                }
                Ok(other) => {
                    warn!("Ignoring unexpected {:?} from '{}'", other, username);
                }
                Err(e) => {
                    warn!("Failed to parse frame from '{}': {}", username, e);
                }
            }
        }
    }

    /// Validate and enqueue one chat message
    async fn submit(&self, username: &Username, content: String) {
        let message = match Message::new(username.clone(), content) {
            Ok(message) => message,
            Err(e) => {
                debug!("Rejected message from '{}': {:?}", username, e);
                self.reply(Frame::error(e.to_string())).await;
                return;
            }
        };

        debug!("[{}] {}", username, message.content());
        match self.ctx.queue.enqueue(Broadcast::Chat(message)) {
            Ok(()) => {}
            Err(QueueError::Full) => {
                warn!("Message queue full, dropping message from '{}'", username);
            }
            Err(QueueError::Closed) => {
                debug!("Message queue closed, dropping message from '{}'", username);
            }
        }
    }

    /// Best-effort system notice through the broadcast loop
    fn broadcast_notice(&self, text: String) {
        if let Err(e) = self.ctx.queue.enqueue(Broadcast::Notice(text.clone())) {
            warn!("Notice {:?} not broadcast: {}", text, e);
        }
    }

    async fn close(&mut self, username: Option<Username>) {
        let removed = self.ctx.registry.unregister(self.id).await;

        if let Some(username) = username {
            if removed.is_none() {
                error!("User '{}' on {} was missing from the registry", username, self.id);
            }
            self.broadcast_notice(format!("{} left the chat", username));
        }
    }
}
