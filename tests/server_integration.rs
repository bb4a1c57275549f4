//! End-to-end tests against a real ChatServer on an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use relay_chat::{AppError, ChatServer, ClientRegistry, ServerConfig};

/// A running server plus the handles needed to inspect and stop it
struct TestServer {
    addr: SocketAddr,
    registry: Arc<ClientRegistry>,
    shutdown: CancellationToken,
    task: JoinHandle<Result<(), AppError>>,
}

impl TestServer {
    async fn start(max_clients: usize) -> Self {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            max_clients,
            shutdown_timeout: Duration::from_secs(2),
            ..ServerConfig::default()
        };
        let server = ChatServer::bind(config).await.expect("bind");
        let addr = server.local_addr().unwrap();
        let registry = server.registry();
        let shutdown = server.shutdown_token();
        let task = tokio::spawn(server.run());

        TestServer {
            addr,
            registry,
            shutdown,
            task,
        }
    }

    async fn connect(&self) -> TestClient {
        let stream = TcpStream::connect(self.addr).await.expect("connect");
        let (read, write) = stream.into_split();
        TestClient {
            lines: BufReader::new(read).lines(),
            write,
        }
    }

    /// Poll the registry until it reaches `expected` entries
    async fn wait_for_clients(&self, expected: usize) {
        for _ in 0..100 {
            if self.registry.len().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "registry has {} clients, expected {}",
            self.registry.len().await,
            expected
        );
    }

    async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not stop in time")
            .unwrap()
            .unwrap();
    }
}

struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl TestClient {
    async fn send(&mut self, line: &str) {
        self.write
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(2), self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .ok()
            .flatten()
    }

    async fn login(&mut self, name: &str) {
        self.send(&format!("AUTH:{name}")).await;
        assert_eq!(self.recv().await.as_deref(), Some("AUTH_OK"));
        assert_eq!(
            self.recv().await,
            Some(format!("NOTIFY:{name} joined the chat"))
        );
    }
}

#[tokio::test]
async fn test_chat_and_disconnect_scenario() {
    let server = TestServer::start(10).await;

    let mut alice = server.connect().await;
    alice.login("alice").await;

    let mut bob = server.connect().await;
    bob.login("bob").await;
    assert_eq!(alice.recv().await.as_deref(), Some("NOTIFY:bob joined the chat"));

    alice.send("MSG:alice:hi").await;
    assert_eq!(alice.recv().await.as_deref(), Some("MSG:alice:hi"));
    assert_eq!(bob.recv().await.as_deref(), Some("MSG:alice:hi"));

    bob.send("DISCONNECT:bob").await;
    assert_eq!(bob.recv().await.as_deref(), Some("DISCONNECT_ACK"));
    assert_eq!(bob.recv().await, None);

    assert_eq!(alice.recv().await.as_deref(), Some("NOTIFY:bob left the chat"));
    server.wait_for_clients(1).await;

    server.stop().await;
}

#[tokio::test]
async fn test_duplicate_username_while_connected() {
    let server = TestServer::start(10).await;

    let mut alice = server.connect().await;
    alice.login("alice").await;
    let mut bob = server.connect().await;
    bob.login("bob").await;
    server.wait_for_clients(2).await;

    let mut imposter = server.connect().await;
    imposter.send("AUTH:alice").await;
    assert_eq!(
        imposter.recv().await.as_deref(),
        Some("AUTH_FAILED:Username already taken")
    );
    assert_eq!(imposter.recv().await, None);
    assert_eq!(server.registry.len().await, 2);

    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_auth_same_username() {
    let server = TestServer::start(50).await;

    let mut attempts = Vec::new();
    for _ in 0..10 {
        let mut client = server.connect().await;
        attempts.push(tokio::spawn(async move {
            client.send("AUTH:alice").await;
            let reply = client.recv().await;
            (reply, client)
        }));
    }

    let mut winners = 0;
    let mut clients = Vec::new();
    for attempt in attempts {
        let (reply, client) = attempt.await.unwrap();
        match reply.as_deref() {
            Some("AUTH_OK") => winners += 1,
            Some("AUTH_FAILED:Username already taken") => {}
            other => panic!("unexpected reply {other:?}"),
        }
        clients.push(client);
    }

    assert_eq!(winners, 1);
    server.wait_for_clients(1).await;
    assert!(server.registry.contains_username("alice").await);

    server.stop().await;
}

#[tokio::test]
async fn test_server_full() {
    let server = TestServer::start(2).await;

    let mut alice = server.connect().await;
    alice.login("alice").await;
    let mut bob = server.connect().await;
    bob.login("bob").await;

    let mut carol = server.connect().await;
    carol.send("AUTH:carol").await;
    assert_eq!(carol.recv().await.as_deref(), Some("ERROR:Server is full"));
    assert_eq!(carol.recv().await, None);
    assert_eq!(server.registry.len().await, 2);

    server.stop().await;
}

#[tokio::test]
async fn test_messages_from_one_client_arrive_in_order() {
    let server = TestServer::start(10).await;

    let mut alice = server.connect().await;
    alice.login("alice").await;
    let mut bob = server.connect().await;
    bob.login("bob").await;
    assert_eq!(alice.recv().await.as_deref(), Some("NOTIFY:bob joined the chat"));

    for i in 0..20 {
        alice.send(&format!("MSG:alice:m{i}")).await;
    }
    for i in 0..20 {
        let expected = format!("MSG:alice:m{i}");
        assert_eq!(alice.recv().await, Some(expected.clone()));
        assert_eq!(bob.recv().await, Some(expected));
    }

    server.stop().await;
}

#[tokio::test]
async fn test_abrupt_disconnect_is_cleaned_up() {
    let server = TestServer::start(10).await;

    let mut alice = server.connect().await;
    alice.login("alice").await;
    let mut bob = server.connect().await;
    bob.login("bob").await;
    assert_eq!(alice.recv().await.as_deref(), Some("NOTIFY:bob joined the chat"));

    drop(bob);

    assert_eq!(alice.recv().await.as_deref(), Some("NOTIFY:bob left the chat"));
    server.wait_for_clients(1).await;

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_connected_clients() {
    let server = TestServer::start(10).await;

    // Connected but never authenticated; accepted before alice is
    let mut lurker = server.connect().await;
    let mut alice = server.connect().await;
    alice.login("alice").await;

    let registry = Arc::clone(&server.registry);
    server.stop().await;

    assert_eq!(
        alice.recv().await.as_deref(),
        Some("NOTIFY:Server is shutting down")
    );
    assert_eq!(alice.recv().await, None);
    assert_eq!(
        lurker.recv().await.as_deref(),
        Some("NOTIFY:Server is shutting down")
    );
    assert_eq!(lurker.recv().await, None);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_independent_server_instances() {
    let first = TestServer::start(10).await;
    let second = TestServer::start(10).await;

    let mut a = first.connect().await;
    a.login("alice").await;
    let mut b = second.connect().await;
    b.login("alice").await;

    assert_eq!(first.registry.len().await, 1);
    assert_eq!(second.registry.len().await, 1);

    first.stop().await;
    second.stop().await;
}

#[tokio::test]
async fn test_bind_applies_config_limits() {
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        max_clients: 3,
        queue_capacity: 7,
        ..ServerConfig::default()
    };
    let server = ChatServer::bind(config).await.expect("bind");

    assert_eq!(server.registry().max_clients(), 3);
    let queue = server.queue();
    assert_eq!(queue.capacity(), 7);
    assert!(queue.is_empty());
    assert!(!queue.is_shutdown());

    let shutdown = server.shutdown_token();
    let task = tokio::spawn(server.run());
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("server did not stop in time")
        .unwrap()
        .unwrap();
    assert!(queue.is_shutdown());
}
