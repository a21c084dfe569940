//! Connection lifecycle: one `Session` per live websocket.
//!
//! LIFECYCLE
//! =========
//! 1. `ConnectionManager::connect` registers the id → `Connected`
//! 2. `join-poll` / `join-form` add memberships → `Joined`
//! 3. `leave-poll` / `leave-form` drop one membership
//! 4. `Session::disconnect` (or drop) purges exactly once → `Disconnected`
//!
//! Malformed messages are ignored: the feed stays up even when a client
//! sends garbage.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::event::ClientMessage;
use super::{ChannelKey, ConnectionId, RoomRegistry};

/// Observable state of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Joined(Vec<ChannelKey>),
    Disconnected,
}

/// Hands out sessions bound to the shared registry.
#[derive(Clone)]
pub struct ConnectionManager {
    registry: RoomRegistry,
    outbound_buffer: usize,
    accepting: Arc<AtomicBool>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(registry: RoomRegistry, outbound_buffer: usize, accepting: Arc<AtomicBool>) -> Self {
        Self { registry, outbound_buffer: outbound_buffer.max(1), accepting }
    }

    /// Register a fresh connection. Returns the session and the receiving end
    /// of its outbound queue, or `None` while the service is stopped.
    #[must_use]
    pub fn connect(&self) -> Option<(Session, mpsc::Receiver<Arc<str>>)> {
        if !self.accepting.load(Ordering::SeqCst) {
            return None;
        }
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.outbound_buffer);
        self.registry.register(id, tx);
        debug!(connection_id = %id, "session opened");
        Some((Session { id, registry: self.registry.clone(), disconnected: false }, rx))
    }
}

/// One client's view of the registry. Owned by the socket task.
pub struct Session {
    id: ConnectionId,
    registry: RoomRegistry,
    disconnected: bool,
}

impl Session {
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// `Disconnected` once purged, including when the service stopped and
    /// cleared the registry underneath this session.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        if self.disconnected {
            return ConnectionState::Disconnected;
        }
        match self.registry.membership(self.id) {
            None => ConnectionState::Disconnected,
            Some(channels) if channels.is_empty() => ConnectionState::Connected,
            Some(channels) => ConnectionState::Joined(channels),
        }
    }

    /// Apply one parsed message. Returns `true` if membership changed.
    pub fn handle(&mut self, msg: ClientMessage) -> bool {
        if self.disconnected {
            return false;
        }
        let key = msg.channel();
        let changed = if msg.is_join() {
            self.registry.join(self.id, key)
        } else {
            self.registry.leave(self.id, key)
        };
        debug!(connection_id = %self.id, channel = %key, join = msg.is_join(), changed, "membership");
        changed
    }

    /// Parse and apply one inbound text frame; anything unparseable is dropped.
    pub fn handle_text(&mut self, text: &str) -> bool {
        match ClientMessage::parse(text) {
            Ok(msg) => self.handle(msg),
            Err(e) => {
                debug!(connection_id = %self.id, error = %e, "ignoring malformed message");
                false
            }
        }
    }

    /// End the session and release every membership.
    pub fn disconnect(mut self) {
        self.purge_once();
    }

    fn purge_once(&mut self) {
        if self.disconnected {
            return;
        }
        self.disconnected = true;
        match self.registry.purge(self.id) {
            Some(channels) => info!(connection_id = %self.id, channels = channels.len(), "session purged"),
            None => debug!(connection_id = %self.id, "session already purged"),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.purge_once();
    }
}

#[cfg(test)]
#[path = "lifecycle_test.rs"]
mod tests;
