//! Broadcast loop
//!
//! The single consumer of the message queue. Each item is encoded once and
//! written to every client in a registry snapshot taken for that item.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::queue::{Broadcast, MessageQueue};
use crate::registry::ClientRegistry;

/// Fans queued messages out to all registered clients
pub struct Broadcaster {
    queue: Arc<MessageQueue>,
    registry: Arc<ClientRegistry>,
    /// Per-client bound on waiting for outbound buffer space
    write_timeout: Duration,
}

impl Broadcaster {
    pub fn new(
        queue: Arc<MessageQueue>,
        registry: Arc<ClientRegistry>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            registry,
            write_timeout,
        }
    }

    /// Run until the queue is shut down and drained
    ///
    /// Returns the number of items broadcast.
    pub async fn run(self) -> u64 {
        info!("Broadcast loop started");
        let mut broadcasts = 0u64;

        while let Some(item) = self.queue.dequeue().await {
            self.deliver(&item).await;
            broadcasts += 1;
        }

        info!("Broadcast loop exiting after {} broadcasts", broadcasts);
        broadcasts
    }

    /// Write one item to every client in a fresh snapshot
    ///
    /// Returns how many clients accepted it. Failures are logged only: the
    /// owning handler notices the dead connection and unregisters it.
    async fn deliver(&self, item: &Broadcast) -> usize {
        let frame = item.to_frame();
        match item {
            Broadcast::Chat(message) => {
                info!("[Broadcast] {}: {}", message.sender(), message.content())
            }
            Broadcast::Notice(text) => info!("[Broadcast] notice: {}", text),
        }

        // Lock is released before any write
        let targets = self.registry.snapshot().await;

        let mut delivered = 0;
        for handle in &targets {
            match handle.send_timeout(frame.clone(), self.write_timeout).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Broadcast to {} failed: {}", handle.id, e),
            }
        }

        debug!("Delivered to {}/{} clients", delivered, targets.len());
        delivered
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::client::ClientHandle;
    use crate::message::{Frame, Message};
    use crate::types::{ClientId, Username};

    async fn register(
        registry: &ClientRegistry,
        name: &str,
        buffer: usize,
    ) -> (ClientId, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(buffer);
        let handle = ClientHandle::new(ClientId::new(), tx);
        let id = handle.id;
        registry
            .try_register(handle, Username::parse(name).unwrap())
            .await
            .unwrap();
        (id, rx)
    }

    fn chat(sender: &str, content: &str) -> Broadcast {
        Broadcast::Chat(Message::new(Username::parse(sender).unwrap(), content).unwrap())
    }

    fn setup() -> (Arc<MessageQueue>, Arc<ClientRegistry>, Broadcaster) {
        let queue = Arc::new(MessageQueue::new(16));
        let registry = Arc::new(ClientRegistry::new(8));
        let broadcaster = Broadcaster::new(
            Arc::clone(&queue),
            Arc::clone(&registry),
            Duration::from_millis(50),
        );
        (queue, registry, broadcaster)
    }

    #[tokio::test]
    async fn test_fan_out_in_fifo_order() {
        let (queue, registry, broadcaster) = setup();
        let (_, mut alice) = register(&registry, "alice", 8).await;
        let (_, mut bob) = register(&registry, "bob", 8).await;

        queue.enqueue(chat("alice", "m1")).unwrap();
        queue.enqueue(chat("alice", "m2")).unwrap();
        queue.shutdown();

        assert_eq!(broadcaster.run().await, 2);

        for rx in [&mut alice, &mut bob] {
            assert_eq!(rx.recv().await.unwrap().to_string(), "MSG:alice:m1");
            assert_eq!(rx.recv().await.unwrap().to_string(), "MSG:alice:m2");
        }
    }

    #[tokio::test]
    async fn test_notice_encoded_as_notify() {
        let (queue, registry, broadcaster) = setup();
        let (_, mut alice) = register(&registry, "alice", 8).await;

        queue
            .enqueue(Broadcast::Notice("bob left the chat".to_string()))
            .unwrap();
        queue.shutdown();
        broadcaster.run().await;

        assert_eq!(
            alice.recv().await.unwrap().to_string(),
            "NOTIFY:bob left the chat"
        );
    }

    #[tokio::test]
    async fn test_failed_client_does_not_block_others_or_get_removed() {
        let (_queue, registry, broadcaster) = setup();
        let (_, dead) = register(&registry, "dead", 8).await;
        drop(dead);

        // Buffer of one, filled and never drained
        let (stalled_tx, _stalled_rx) = mpsc::channel(1);
        let stalled = ClientHandle::new(ClientId::new(), stalled_tx);
        stalled.send(Frame::AuthOk).await.unwrap();
        registry
            .try_register(stalled, Username::parse("stalled").unwrap())
            .await
            .unwrap();

        let (_, mut alice) = register(&registry, "alice", 8).await;

        let delivered = broadcaster.deliver(&chat("alice", "hello")).await;

        assert_eq!(delivered, 1);
        assert_eq!(
            alice.recv().await.unwrap().to_string(),
            "MSG:alice:hello"
        );
        assert_eq!(registry.len().await, 3);
    }

    #[tokio::test]
    async fn test_no_clients_is_not_an_error() {
        let (_queue, _registry, broadcaster) = setup();
        assert_eq!(broadcaster.deliver(&chat("alice", "anyone?")).await, 0);
    }
}
