//! Shared client registry
//!
//! The table of authenticated, connected clients keyed by connection
//! identity. Every mutation and every broadcast snapshot goes through the
//! same mutex; no network write ever happens while it is held.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::client::{ClientEntry, ClientHandle};
use crate::error::RegisterError;
use crate::types::{ClientId, Username};

/// Registry of authenticated clients
#[derive(Debug)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<ClientId, ClientEntry>>,
    max_clients: usize,
}

impl ClientRegistry {
    /// Create an empty registry holding at most `max_clients` entries
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: Mutex::new(HashMap::with_capacity(max_clients)),
            max_clients,
        }
    }

    /// Register a client if its username is free and there is room
    ///
    /// Uniqueness and capacity are checked and the entry inserted under a
    /// single lock acquisition. On error nothing is modified. `Username`
    /// can only hold a validated name, so format is not re-checked here.
    pub async fn try_register(
        &self,
        handle: ClientHandle,
        username: Username,
    ) -> Result<(), RegisterError> {
        self.try_register_with(handle, username, |_| {}).await
    }

    /// Like [`try_register`](Self::try_register), running `on_insert` inside
    /// the critical section right after the entry is added
    ///
    /// No snapshot can observe the entry before `on_insert` returns, so a
    /// frame queued there reaches the client ahead of any broadcast.
    /// `on_insert` must not block.
    pub async fn try_register_with<F>(
        &self,
        handle: ClientHandle,
        username: Username,
        on_insert: F,
    ) -> Result<(), RegisterError>
    where
        F: FnOnce(&ClientEntry),
    {
        let mut clients = self.clients.lock().await;

        if clients.values().any(|entry| entry.username == username) {
            return Err(RegisterError::AlreadyExists);
        }

        if clients.len() >= self.max_clients {
            if clients.len() > self.max_clients {
                error!(
                    "Registry holds {} clients, above the limit of {}",
                    clients.len(),
                    self.max_clients
                );
            }
            return Err(RegisterError::Full);
        }

        if clients.contains_key(&handle.id) {
            error!("Client {} is already registered", handle.id);
            return Err(RegisterError::AlreadyExists);
        }

        let id = handle.id;
        info!("Client {} registered as '{}'", id, username);
        let entry = clients
            .entry(id)
            .or_insert_with(|| ClientEntry::new(handle, username));
        on_insert(entry);
        debug!("Total clients: {}", clients.len());

        Ok(())
    }

    /// Remove a client by connection identity
    ///
    /// Returns the removed entry, or `None` if it was not registered.
    pub async fn unregister(&self, id: ClientId) -> Option<ClientEntry> {
        let mut clients = self.clients.lock().await;
        let removed = clients.remove(&id);
        if let Some(entry) = &removed {
            info!("Client {} ('{}') unregistered", id, entry.username);
            debug!("Total clients: {}", clients.len());
        }
        removed
    }

    /// Copy of every registered handle, for fan-out
    pub async fn snapshot(&self) -> Vec<ClientHandle> {
        let clients = self.clients.lock().await;
        clients.values().map(|entry| entry.handle.clone()).collect()
    }

    pub async fn contains_username(&self, username: &str) -> bool {
        let clients = self.clients.lock().await;
        clients.values().any(|entry| entry.username.as_str() == username)
    }

    pub async fn usernames(&self) -> Vec<Username> {
        let clients = self.clients.lock().await;
        clients.values().map(|entry| entry.username.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }
}
