//! Room registry: channel membership in both directions.
//!
//! DESIGN
//! ======
//! `channels` maps a key to its member ids; `connections` maps each live
//! connection to its outbound sender and the keys it has joined. The reverse
//! map makes `purge` proportional to the connection's own memberships.
//!
//! `published` remembers the newest version sent on each channel. Versioned
//! fan-out checks and records it and enqueues to members under one lock
//! acquisition, so two publishers racing on a channel cannot interleave and
//! an older aggregate never lands after a newer one.
//!
//! INVARIANTS
//! ==========
//! - A channel entry exists iff it has at least one member.
//! - `c ∈ channels[k]` iff `k ∈ connections[c].channels`.
//! - Only registered connections can join; a purged id stays out.
//! - `published[k]` only grows until `clear`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{ChannelKey, ConnectionId, Outbound};

/// A channel member as seen by the dispatcher.
#[derive(Debug, Clone)]
pub struct Member {
    pub connection_id: ConnectionId,
    pub tx: Outbound,
}

struct ConnectionEntry {
    tx: Outbound,
    channels: HashSet<ChannelKey>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    channels: HashMap<ChannelKey, HashSet<ConnectionId>>,
    published: HashMap<ChannelKey, i64>,
}

impl RegistryInner {
    fn members(&self, key: ChannelKey) -> Vec<Member> {
        let Some(ids) = self.channels.get(&key) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| {
                self.connections
                    .get(id)
                    .map(|entry| Member { connection_id: *id, tx: entry.tx.clone() })
            })
            .collect()
    }
}

/// Shared handle to the membership maps. Cloning shares the same state.
#[derive(Clone, Default)]
pub struct RoomRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a new connection with no memberships.
    pub fn register(&self, connection_id: ConnectionId, tx: Outbound) {
        self.lock()
            .connections
            .insert(connection_id, ConnectionEntry { tx, channels: HashSet::new() });
    }

    /// Add a connection to a channel, creating the channel on demand.
    /// Returns `true` only when membership actually changed.
    pub fn join(&self, connection_id: ConnectionId, key: ChannelKey) -> bool {
        let mut inner = self.lock();
        let Some(entry) = inner.connections.get_mut(&connection_id) else {
            return false;
        };
        if !entry.channels.insert(key) {
            return false;
        }
        inner.channels.entry(key).or_default().insert(connection_id);
        true
    }

    /// Remove one membership; deletes the channel when it empties.
    /// Returns `true` only when membership actually changed.
    pub fn leave(&self, connection_id: ConnectionId, key: ChannelKey) -> bool {
        let mut inner = self.lock();
        let Some(entry) = inner.connections.get_mut(&connection_id) else {
            return false;
        };
        if !entry.channels.remove(&key) {
            return false;
        }
        remove_member(&mut inner.channels, key, connection_id);
        true
    }

    /// Forget a connection entirely. Returns the channels it was removed
    /// from, or `None` if it was already gone.
    pub fn purge(&self, connection_id: ConnectionId) -> Option<Vec<ChannelKey>> {
        let mut inner = self.lock();
        let entry = inner.connections.remove(&connection_id)?;
        let keys: Vec<ChannelKey> = entry.channels.into_iter().collect();
        for key in &keys {
            remove_member(&mut inner.channels, *key, connection_id);
        }
        Some(keys)
    }

    /// Snapshot of a channel's members. Not kept current after return.
    #[must_use]
    pub fn members_of(&self, key: ChannelKey) -> Vec<Member> {
        self.lock().members(key)
    }

    /// Accept `version` for `key` if it is newer than the last accepted one,
    /// then run `send` over the channel's members before releasing the lock.
    /// Returns `None`, without calling `send`, for a stale or repeated version.
    ///
    /// `send` runs under the registry lock and must not block.
    pub fn publish_if_newer<R>(
        &self,
        key: ChannelKey,
        version: i64,
        send: impl FnOnce(&[Member]) -> R,
    ) -> Option<R> {
        let mut inner = self.lock();
        if inner.published.get(&key).is_some_and(|&last| last >= version) {
            return None;
        }
        inner.published.insert(key, version);
        let members = inner.members(key);
        Some(send(&members))
    }

    /// Snapshot of every live connection, joined or not.
    #[must_use]
    pub fn all_members(&self) -> Vec<Member> {
        self.lock()
            .connections
            .iter()
            .map(|(id, entry)| Member { connection_id: *id, tx: entry.tx.clone() })
            .collect()
    }

    /// Channels a connection currently belongs to. Empty if unknown.
    #[must_use]
    pub fn channels_of(&self, connection_id: ConnectionId) -> Vec<ChannelKey> {
        self.membership(connection_id).unwrap_or_default()
    }

    /// Channels of a registered connection, or `None` if it is not registered.
    #[must_use]
    pub fn membership(&self, connection_id: ConnectionId) -> Option<Vec<ChannelKey>> {
        self.lock()
            .connections
            .get(&connection_id)
            .map(|entry| entry.channels.iter().copied().collect())
    }

    #[must_use]
    pub fn is_registered(&self, connection_id: ConnectionId) -> bool {
        self.lock().connections.contains_key(&connection_id)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.lock().channels.len()
    }

    /// Drop every connection and channel. Returns how many connections went.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let dropped = inner.connections.len();
        inner.connections.clear();
        inner.channels.clear();
        inner.published.clear();
        dropped
    }
}

fn remove_member(
    channels: &mut HashMap<ChannelKey, HashSet<ConnectionId>>,
    key: ChannelKey,
    connection_id: ConnectionId,
) {
    if let Some(members) = channels.get_mut(&key) {
        members.remove(&connection_id);
        if members.is_empty() {
            channels.remove(&key);
        }
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
