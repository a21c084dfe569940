//! Wire events for the live-results websocket.
//!
//! DESIGN
//! ======
//! Both directions use the same JSON envelope, `{"event": <name>, "data": ..}`.
//! Inbound messages only name a channel to join or leave. Outbound events
//! carry fresh aggregates and are never stored.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{ChannelKey, ConnectionId};

// =============================================================================
// INBOUND
// =============================================================================

/// A message a client may send over its websocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(alias = "joinPoll")]
    JoinPoll(Uuid),
    #[serde(alias = "leavePoll")]
    LeavePoll(Uuid),
    #[serde(alias = "joinForm")]
    JoinForm(Uuid),
    #[serde(alias = "leaveForm")]
    LeaveForm(Uuid),
}

impl ClientMessage {
    /// Parse one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns the JSON error for malformed input, unknown events, or a
    /// missing/non-UUID channel id.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    #[must_use]
    pub fn channel(self) -> ChannelKey {
        match self {
            Self::JoinPoll(id) | Self::LeavePoll(id) => ChannelKey::poll(id),
            Self::JoinForm(id) | Self::LeaveForm(id) => ChannelKey::form(id),
        }
    }

    #[must_use]
    pub fn is_join(self) -> bool {
        matches!(self, Self::JoinPoll(_) | Self::JoinForm(_))
    }
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// One option's share of a poll's votes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionResult {
    pub option_id: Uuid,
    pub option_text: String,
    pub vote_count: i64,
    /// Share of `total_votes`, 0..=100, two decimals.
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollUpdate {
    pub poll_id: Uuid,
    /// Post-commit vote total; orders updates for the same poll.
    pub total_votes: i64,
    pub results: Vec<OptionResult>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormUpdate {
    pub form_id: Uuid,
    pub submission_count: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Lobby announcement for a newly created poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollSummary {
    pub poll_id: Uuid,
    pub title: String,
    pub description: String,
    pub poll_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Lobby announcement for a newly created form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSummary {
    pub form_id: Uuid,
    pub title: String,
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// An event pushed from the server to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    Connected { connection_id: ConnectionId },
    PollUpdate(PollUpdate),
    FormUpdate(FormUpdate),
    NewPoll(PollSummary),
    NewForm(FormSummary),
}

impl ServerEvent {
    /// Event name as it appears on the wire.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::PollUpdate(_) => "poll-update",
            Self::FormUpdate(_) => "form-update",
            Self::NewPoll(_) => "new-poll",
            Self::NewForm(_) => "new-form",
        }
    }

    /// Ordering key for per-channel result updates. Later commits on the
    /// same poll or form always carry a larger value.
    #[must_use]
    pub fn version(&self) -> Option<i64> {
        match self {
            Self::PollUpdate(update) => Some(update.total_votes),
            Self::FormUpdate(update) => Some(update.submission_count),
            Self::Connected { .. } | Self::NewPoll(_) | Self::NewForm(_) => None,
        }
    }

    /// Serialize once for fan-out.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; callers log and drop the event.
    pub fn encode(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}

#[cfg(test)]
#[path = "event_test.rs"]
mod tests;
