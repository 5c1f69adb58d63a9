//! Directory of live participant connections, keyed by user id.
//!
//! Each connection owns a bounded outbound queue drained by its writer task.
//! Sends never block: a closed or full queue drops the frame, since the next
//! broadcast carries the full history anyway.

use axum::extract::ws::Utf8Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use engage_common::id::{prefix, prefixed_ulid};

/// Frames a single connection may have queued before new ones are dropped.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Sending half of one connection's outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    connection_id: String,
    session_id: String,
    tx: mpsc::Sender<Utf8Bytes>,
}

impl ConnectionHandle {
    /// Create a handle for a connection attached to `session_id`, and the
    /// receiver its writer task should drain.
    pub fn new(session_id: impl Into<String>) -> (Self, mpsc::Receiver<Utf8Bytes>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let handle = Self {
            connection_id: prefixed_ulid(prefix::CONNECTION),
            session_id: session_id.into(),
            tx,
        };
        (handle, rx)
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    fn try_send(&self, payload: &Utf8Bytes) -> bool {
        match self.tx.try_send(payload.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!(connection_id = %self.connection_id, "outbound queue full, frame dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Concurrency-safe map of user id → live connection.
pub struct ConnectionDirectory {
    connections: DashMap<String, ConnectionHandle>,
}

impl ConnectionDirectory {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Install `handle` for `user_id`, returning whatever it superseded.
    ///
    /// The superseded connection is not closed; it simply stops receiving.
    pub fn register(&self, user_id: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.connections.insert(user_id.to_string(), handle)
    }

    /// Remove the entry for `user_id` if it still belongs to `connection_id`.
    /// No-op if absent.
    ///
    /// A connection closing after it was superseded must not evict its
    /// replacement.
    pub fn unregister(&self, user_id: &str, connection_id: &str) -> bool {
        self.connections
            .remove_if(user_id, |_, handle| handle.connection_id == connection_id)
            .is_some()
    }

    /// Session the user's current connection is attached to.
    pub fn session_of(&self, user_id: &str) -> Option<String> {
        self.connections
            .get(user_id)
            .map(|handle| handle.session_id.clone())
    }

    /// Deliver `payload` to `user_id` if connected and open. At most once;
    /// nothing is queued for later.
    pub fn send(&self, user_id: &str, payload: &Utf8Bytes) -> bool {
        match self.connections.get(user_id) {
            Some(handle) if handle.is_open() => handle.try_send(payload),
            _ => false,
        }
    }

    /// Send the same frame to every listed user. Returns how many accepted it.
    pub fn broadcast<'a, I>(&self, user_ids: I, payload: &Utf8Bytes) -> usize
    where
        I: IntoIterator<Item = &'a String>,
    {
        user_ids
            .into_iter()
            .filter(|user_id| self.send(user_id, payload))
            .count()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.connections.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionDirectory {
    fn default() -> Self {
        Self::new()
    }
}
