use super::*;
use crate::broadcast::BroadcastService;
use crate::broadcast::event::ClientMessage;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, timeout};

fn running_service() -> BroadcastService {
    let service = BroadcastService::new(16);
    service.start();
    service
}

#[allow(clippy::cast_precision_loss)]
fn results(counts: &[(&str, i64)]) -> Vec<OptionResult> {
    let total: i64 = counts.iter().map(|(_, c)| c).sum();
    counts
        .iter()
        .map(|(text, count)| OptionResult {
            option_id: Uuid::new_v4(),
            option_text: (*text).to_string(),
            vote_count: *count,
            percentage: if total == 0 { 0.0 } else { *count as f64 / total as f64 * 100.0 },
        })
        .collect()
}

async fn recv_event(rx: &mut mpsc::Receiver<Arc<str>>) -> ServerEvent {
    let payload = timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("event receive timed out")
        .expect("queue closed unexpectedly");
    serde_json::from_str(&payload).expect("payload should decode")
}

async fn assert_no_event(rx: &mut mpsc::Receiver<Arc<str>>) {
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected no event"
    );
}

#[tokio::test]
async fn poll_update_reaches_watcher_only() {
    let service = running_service();
    let poll_id = Uuid::new_v4();
    let (mut a, mut rx_a) = service.connect().expect("connect a");
    let (_b, mut rx_b) = service.connect().expect("connect b");
    a.handle(ClientMessage::JoinPoll(poll_id));

    let sent = results(&[("yes", 3), ("no", 1)]);
    service.notifier().notify_poll_update(poll_id, 4, sent.clone());

    let ServerEvent::PollUpdate(update) = recv_event(&mut rx_a).await else {
        panic!("expected poll-update");
    };
    assert_eq!(update.poll_id, poll_id);
    assert_eq!(update.total_votes, 4);
    assert_eq!(update.results, sent);
    assert_no_event(&mut rx_a).await;
    assert_no_event(&mut rx_b).await;
}

#[tokio::test]
async fn disconnected_watcher_gets_nothing_and_notify_does_not_fail() {
    let service = running_service();
    let poll_id = Uuid::new_v4();
    let (mut a, mut rx_a) = service.connect().expect("connect a");
    a.handle(ClientMessage::JoinPoll(poll_id));
    a.disconnect();

    assert!(service.registry().members_of(ChannelKey::poll(poll_id)).is_empty());
    service.notifier().notify_poll_update(poll_id, 1, results(&[("yes", 1)]));

    // The purge dropped the registry's sender, so the queue is closed and empty.
    let next = timeout(Duration::from_millis(80), rx_a.recv())
        .await
        .expect("closed queue should resolve immediately");
    assert!(next.is_none());
}

#[tokio::test]
async fn late_notify_of_an_older_commit_does_not_overwrite_newer_results() {
    let service = running_service();
    let poll_id = Uuid::new_v4();
    let (mut a, mut rx_a) = service.connect().expect("connect a");
    let (mut b, mut rx_b) = service.connect().expect("connect b");
    a.handle(ClientMessage::JoinPoll(poll_id));
    b.handle(ClientMessage::JoinPoll(poll_id));

    // Commit 1 left ("yes" 1, "no" 0); commit 2 left ("yes" 1, "no" 1).
    // The second writer reaches the notifier first.
    let (newer_sent, newer_done) = oneshot::channel();
    let newer = {
        let notifier = service.notifier().clone();
        tokio::spawn(async move {
            notifier.notify_poll_update(poll_id, 2, results(&[("yes", 1), ("no", 1)]));
            let _ = newer_sent.send(());
        })
    };
    let older = {
        let notifier = service.notifier().clone();
        tokio::spawn(async move {
            newer_done.await.expect("newer writer finished");
            notifier.notify_poll_update(poll_id, 1, results(&[("yes", 1), ("no", 0)]));
        })
    };
    newer.await.expect("join newer");
    older.await.expect("join older");

    for rx in [&mut rx_a, &mut rx_b] {
        let ServerEvent::PollUpdate(update) = recv_event(rx).await else {
            panic!("expected poll-update");
        };
        assert_eq!(update.total_votes, 2);
        assert_eq!(update.results[1].vote_count, 1);
        assert_no_event(rx).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_writers_leave_members_on_the_highest_total() {
    let service = BroadcastService::new(64);
    service.start();
    let form_id = Uuid::new_v4();
    let (mut watcher, mut rx) = service.connect().expect("connect");
    watcher.handle(ClientMessage::JoinForm(form_id));

    // Counts reach the notifier in a scrambled order.
    let counts: Vec<i64> = (1..=32).map(|i| (i * 13) % 32 + 1).collect();
    let handles: Vec<_> = counts
        .into_iter()
        .map(|count| {
            let notifier = service.notifier().clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                notifier.notify_form_update(form_id, count);
            })
        })
        .collect();
    for h in handles {
        h.await.expect("join");
    }

    let mut seen = Vec::new();
    while let Ok(payload) = rx.try_recv() {
        let ServerEvent::FormUpdate(update) = serde_json::from_str(&payload).expect("decode") else {
            panic!("expected form-update");
        };
        seen.push(update.submission_count);
    }
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "counts went backwards: {seen:?}");
    assert_eq!(seen.last(), Some(&32));
}

#[tokio::test]
async fn form_update_reaches_form_watchers_not_poll_watchers() {
    let service = running_service();
    let id = Uuid::new_v4();
    let (mut form_watcher, mut rx_form) = service.connect().expect("connect form");
    let (mut poll_watcher, mut rx_poll) = service.connect().expect("connect poll");
    form_watcher.handle(ClientMessage::JoinForm(id));
    poll_watcher.handle(ClientMessage::JoinPoll(id));

    service.notifier().notify_form_update(id, 7);

    let ServerEvent::FormUpdate(update) = recv_event(&mut rx_form).await else {
        panic!("expected form-update");
    };
    assert_eq!(update.form_id, id);
    assert_eq!(update.submission_count, 7);
    assert_no_event(&mut rx_poll).await;
}

#[tokio::test]
async fn new_poll_and_form_go_to_everyone() {
    let service = running_service();
    let (_a, mut rx_a) = service.connect().expect("connect a");
    let (mut b, mut rx_b) = service.connect().expect("connect b");
    b.handle(ClientMessage::JoinForm(Uuid::new_v4()));

    let poll_id = Uuid::new_v4();
    service.notifier().notify_new_poll(PollSummary {
        poll_id,
        title: "Lunch?".into(),
        description: String::new(),
        poll_type: "single".into(),
        created_at: OffsetDateTime::now_utc(),
    });
    let form_id = Uuid::new_v4();
    service.notifier().notify_new_form(FormSummary {
        form_id,
        title: "Retro".into(),
        description: String::new(),
        created_at: OffsetDateTime::now_utc(),
    });

    for rx in [&mut rx_a, &mut rx_b] {
        assert!(matches!(recv_event(rx).await, ServerEvent::NewPoll(s) if s.poll_id == poll_id));
        assert!(matches!(recv_event(rx).await, ServerEvent::NewForm(s) if s.form_id == form_id));
    }
}
