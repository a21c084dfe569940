//! Real-time result broadcast.
//!
//! ARCHITECTURE
//! ============
//! Four pieces, leaf-first:
//! - `registry`: channel key -> members, connection -> channel keys
//! - `lifecycle`: one `Session` per websocket, drives join/leave/purge
//! - `dispatcher`: serializes an event once and fans it out to a snapshot
//! - `notifier`: turns "an aggregate changed" into a publish
//!
//! `BroadcastService` owns all four and lives in `AppState`. Nothing in this
//! module touches the database: the write path hands over post-commit
//! aggregates and the notifier only propagates them.
//!
//! CONCURRENCY
//! ===========
//! Registry operations run under a synchronous mutex and never `.await`, so a
//! disconnect's purge cannot interleave with a join for the same connection.
//! The only suspending step is the socket send, which happens in each
//! connection's own task after it drains its bounded outbound queue.

pub mod dispatcher;
pub mod event;
pub mod lifecycle;
pub mod notifier;
pub mod registry;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

pub use dispatcher::Dispatcher;
pub use lifecycle::{ConnectionManager, Session};
pub use notifier::Notifier;
pub use registry::RoomRegistry;

// =============================================================================
// KEYS
// =============================================================================

/// Opaque identifier for one live client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What a channel broadcasts about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Poll,
    Form,
}

impl ChannelKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Poll => "poll",
            Self::Form => "form",
        }
    }
}

/// Tagged channel key. Two kinds never collide even if their ids do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub kind: ChannelKind,
    pub id: Uuid,
}

impl ChannelKey {
    #[must_use]
    pub fn poll(id: Uuid) -> Self {
        Self { kind: ChannelKind::Poll, id }
    }

    #[must_use]
    pub fn form(id: Uuid) -> Self {
        Self { kind: ChannelKind::Form, id }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind.as_str(), self.id)
    }
}

/// Sender half of a connection's outbound queue. Payloads are serialized
/// once per publish and shared between members.
pub type Outbound = mpsc::Sender<Arc<str>>;

// =============================================================================
// SERVICE
// =============================================================================

/// Long-lived broadcast service. Constructed once at startup and cloned into
/// whatever needs to publish; every clone shares the same registry.
#[derive(Clone)]
pub struct BroadcastService {
    registry: RoomRegistry,
    connections: ConnectionManager,
    dispatcher: Dispatcher,
    notifier: Notifier,
    running: Arc<AtomicBool>,
}

impl BroadcastService {
    /// Build a stopped service. `outbound_buffer` bounds each connection's
    /// queue; a member whose queue is full misses that update.
    #[must_use]
    pub fn new(outbound_buffer: usize) -> Self {
        let registry = RoomRegistry::new();
        let running = Arc::new(AtomicBool::new(false));
        let connections = ConnectionManager::new(registry.clone(), outbound_buffer, running.clone());
        let dispatcher = Dispatcher::new(registry.clone(), running.clone());
        let notifier = Notifier::new(dispatcher.clone());
        Self { registry, connections, dispatcher, notifier, running }
    }

    /// Begin accepting connections and delivering publishes.
    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!("broadcast service started");
        }
    }

    /// Refuse new connections, drop every live one, and turn publishes into
    /// no-ops. Dropping the registry's senders closes each socket task's queue.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            let dropped = self.registry.clear();
            info!(dropped, "broadcast service stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Open a session for a new transport connection. `None` once stopped.
    #[must_use]
    pub fn connect(&self) -> Option<(Session, mpsc::Receiver<Arc<str>>)> {
        self.connections.connect()
    }

    #[must_use]
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    #[cfg(test)]
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
