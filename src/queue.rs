//! Bounded broadcast queue
//!
//! Many connection handlers produce, the single broadcast loop consumes.
//! Producers never block: a full queue is reported as backpressure and the
//! caller decides what to drop. The consumer blocks on an empty queue until
//! a producer fills it or the queue is shut down.

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::QueueError;
use crate::message::{Frame, Message};

/// One unit of work for the broadcast loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Broadcast {
    /// Chat message from an authenticated client
    Chat(Message),
    /// System notification (joins, leaves)
    Notice(String),
}

impl Broadcast {
    /// Wire frame fanned out to every client
    pub fn to_frame(&self) -> Frame {
        match self {
            Broadcast::Chat(message) => Frame::chat(message),
            Broadcast::Notice(text) => Frame::notify(text.clone()),
        }
    }
}

/// Bounded FIFO between connection handlers and the broadcast loop
#[derive(Debug)]
pub struct MessageQueue {
    sender: mpsc::Sender<Broadcast>,
    receiver: Mutex<mpsc::Receiver<Broadcast>>,
    shutdown: CancellationToken,
}

impl MessageQueue {
    /// Create a queue holding at most `capacity` items
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Mutex::new(receiver),
            shutdown: CancellationToken::new(),
        }
    }

    /// Add an item without blocking
    ///
    /// Wakes the consumer on success. Returns `QueueError::Full` when the
    /// queue holds `capacity` items and `QueueError::Closed` after shutdown.
    pub fn enqueue(&self, item: Broadcast) -> Result<(), QueueError> {
        if self.shutdown.is_cancelled() {
            return Err(QueueError::Closed);
        }
        self.sender.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Take the oldest item, waiting while the queue is empty
    ///
    /// Returns `None` once the queue has been shut down and every item
    /// accepted before shutdown has been handed out. The first empty read
    /// after shutdown closes the channel, so an `enqueue` that passed its
    /// shutdown check concurrently either lands before the close and is
    /// drained here, or fails with `QueueError::Closed`.
    pub async fn dequeue(&self) -> Option<Broadcast> {
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            biased;
            item = receiver.recv() => item,
            _ = self.shutdown.cancelled() => {
                receiver.close();
                receiver.recv().await
            }
        }
    }

    /// Stop accepting items and wake any waiting consumer
    ///
    /// Items already accepted are still handed out by `dequeue`.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }
}
