//! Client handle and registry entry
//!
//! A `ClientHandle` is the write side of one connection: a bounded channel
//! drained by that connection's writer task. Cloning it never grants read
//! access; only the owning handler reads from the socket.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::SendError;
use crate::message::Frame;
use crate::types::{ClientId, Username};

/// Outbound handle to a single connection
#[derive(Debug, Clone)]
pub struct ClientHandle {
    /// Connection identity
    pub id: ClientId,
    /// Server → Client frame channel
    sender: mpsc::Sender<Frame>,
}

impl ClientHandle {
    /// Create a new handle for the given connection and writer channel
    pub fn new(id: ClientId, sender: mpsc::Sender<Frame>) -> Self {
        Self { id, sender }
    }

    /// Send a frame to this client
    ///
    /// Waits for room in the outbound buffer. Returns an error if the
    /// channel is closed (client disconnected).
    pub async fn send(&self, frame: Frame) -> Result<(), SendError> {
        self.sender
            .send(frame)
            .await
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Send a frame, giving up after `timeout`
    pub async fn send_timeout(&self, frame: Frame, timeout: Duration) -> Result<(), SendError> {
        self.sender
            .send_timeout(frame, timeout)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => SendError::Timeout,
                mpsc::error::SendTimeoutError::Closed(_) => SendError::ChannelClosed,
            })
    }

    /// Queue a frame only if there is room right now
    pub fn try_send(&self, frame: Frame) -> Result<(), SendError> {
        self.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// Whether the writer side has gone away
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Completes once the writer side has gone away
    pub async fn closed(&self) {
        self.sender.closed().await
    }
}

/// One authenticated, connected participant
#[derive(Debug, Clone)]
pub struct ClientEntry {
    pub handle: ClientHandle,
    pub username: Username,
}

impl ClientEntry {
    pub fn new(handle: ClientHandle, username: Username) -> Self {
        Self { handle, username }
    }

    pub fn id(&self) -> ClientId {
        self.handle.id
    }
}
