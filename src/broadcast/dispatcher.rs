//! Broadcast dispatcher: best-effort fan-out.
//!
//! DESIGN
//! ======
//! `publish` serializes once, snapshots the channel's members, and
//! `try_send`s to each. A full or closed queue only costs that member the
//! update; the next publish carries the newer aggregate anyway. The
//! dispatcher reads membership but never mutates it.
//!
//! ORDERING
//! ========
//! Result updates carry a version (post-commit `total_votes` or
//! `submission_count`). Writers notify after commit with no lock held, so two
//! commits on one poll can reach `publish` in either order. For a versioned
//! event the registry checks the version and enqueues under one lock, and an
//! update older than one already sent on that channel is dropped. Members
//! therefore see each channel's aggregates in commit order, possibly with
//! gaps, and always end on the newest.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::event::ServerEvent;
use super::registry::Member;
use super::{ChannelKey, RoomRegistry};

#[derive(Clone)]
pub struct Dispatcher {
    registry: RoomRegistry,
    running: Arc<AtomicBool>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: RoomRegistry, running: Arc<AtomicBool>) -> Self {
        Self { registry, running }
    }

    /// Deliver `event` to every current member of `key`.
    /// Returns how many members accepted it into their queue; a stale
    /// versioned event counts as zero.
    pub fn publish(&self, key: ChannelKey, event: &ServerEvent) -> usize {
        let Some(payload) = self.prepare(event) else {
            return 0;
        };
        let Some(version) = event.version() else {
            let members = self.registry.members_of(key);
            let delivered = deliver(&payload, &members, event.name());
            debug!(channel = %key, event = event.name(), members = members.len(), delivered, "published");
            return delivered;
        };

        let sent = self.registry.publish_if_newer(key, version, |members| {
            (members.len(), deliver(&payload, members, event.name()))
        });
        match sent {
            Some((members, delivered)) => {
                debug!(channel = %key, event = event.name(), version, members, delivered, "published");
                delivered
            }
            None => {
                debug!(channel = %key, event = event.name(), version, "stale update dropped");
                0
            }
        }
    }

    /// Deliver `event` to every live connection, joined or not.
    pub fn publish_all(&self, event: &ServerEvent) -> usize {
        let Some(payload) = self.prepare(event) else {
            return 0;
        };
        let members = self.registry.all_members();
        let delivered = deliver(&payload, &members, event.name());
        debug!(event = event.name(), members = members.len(), delivered, "published to all");
        delivered
    }

    fn prepare(&self, event: &ServerEvent) -> Option<Arc<str>> {
        if !self.running.load(Ordering::SeqCst) {
            debug!(event = event.name(), "broadcast service stopped; dropping event");
            return None;
        }
        match event.encode() {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(event = event.name(), error = %e, "failed to serialize event");
                None
            }
        }
    }
}

fn deliver(payload: &Arc<str>, members: &[Member], event: &str) -> usize {
    let mut delivered = 0;
    for member in members {
        match member.tx.try_send(payload.clone()) {
            Ok(()) => delivered += 1,
            Err(TrySendError::Full(_)) => {
                warn!(connection_id = %member.connection_id, event, "outbound queue full; update dropped");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection_id = %member.connection_id, event, "outbound queue closed");
            }
        }
    }
    delivered
}

#[cfg(test)]
#[path = "dispatcher_test.rs"]
mod tests;
