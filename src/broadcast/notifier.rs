//! Mutation-triggered notifier.
//!
//! Called by the write path after its transaction commits, never before, so a
//! client cannot see a result that is not durable yet. None of these methods
//! can fail: a broadcast problem must not turn a recorded vote into an error.
//!
//! Result updates take the post-commit counter as their version. Callers may
//! race each other here; the dispatcher drops whichever arrives out of date.

use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use super::event::{FormSummary, FormUpdate, OptionResult, PollSummary, PollUpdate, ServerEvent};
use super::{ChannelKey, Dispatcher};

#[derive(Clone)]
pub struct Notifier {
    dispatcher: Dispatcher,
}

impl Notifier {
    #[must_use]
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Push fresh vote results to everyone watching `poll_id`.
    /// `total_votes` is the poll's total as of the commit that produced `results`.
    pub fn notify_poll_update(&self, poll_id: Uuid, total_votes: i64, results: Vec<OptionResult>) {
        let event = ServerEvent::PollUpdate(PollUpdate {
            poll_id,
            total_votes,
            results,
            timestamp: OffsetDateTime::now_utc(),
        });
        let delivered = self.dispatcher.publish(ChannelKey::poll(poll_id), &event);
        debug!(%poll_id, total_votes, delivered, "poll update sent");
    }

    /// Push the new submission count to everyone watching `form_id`.
    pub fn notify_form_update(&self, form_id: Uuid, submission_count: i64) {
        let event =
            ServerEvent::FormUpdate(FormUpdate { form_id, submission_count, timestamp: OffsetDateTime::now_utc() });
        let delivered = self.dispatcher.publish(ChannelKey::form(form_id), &event);
        debug!(%form_id, submission_count, delivered, "form update sent");
    }

    /// Announce a new poll to every connected client.
    pub fn notify_new_poll(&self, summary: PollSummary) {
        let poll_id = summary.poll_id;
        let delivered = self.dispatcher.publish_all(&ServerEvent::NewPoll(summary));
        debug!(%poll_id, delivered, "new poll announced");
    }

    /// Announce a new form to every connected client.
    pub fn notify_new_form(&self, summary: FormSummary) {
        let form_id = summary.form_id;
        let delivered = self.dispatcher.publish_all(&ServerEvent::NewForm(summary));
        debug!(%form_id, delivered, "new form announced");
    }
}

#[cfg(test)]
#[path = "notifier_test.rs"]
mod tests;
