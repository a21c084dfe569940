use super::*;
use serde_json::json;

#[test]
fn parse_join_and_leave_messages() {
    let id = Uuid::new_v4();
    let join = ClientMessage::parse(&json!({"event": "join-poll", "data": id}).to_string()).unwrap();
    assert_eq!(join, ClientMessage::JoinPoll(id));
    assert!(join.is_join());
    assert_eq!(join.channel(), ChannelKey::poll(id));

    let leave = ClientMessage::parse(&json!({"event": "leave-form", "data": id}).to_string()).unwrap();
    assert_eq!(leave, ClientMessage::LeaveForm(id));
    assert!(!leave.is_join());
    assert_eq!(leave.channel(), ChannelKey::form(id));
}

#[test]
fn parse_accepts_camel_case_aliases() {
    let id = Uuid::new_v4();
    for (name, expected) in [
        ("joinPoll", ClientMessage::JoinPoll(id)),
        ("leavePoll", ClientMessage::LeavePoll(id)),
        ("joinForm", ClientMessage::JoinForm(id)),
        ("leaveForm", ClientMessage::LeaveForm(id)),
    ] {
        let msg = ClientMessage::parse(&json!({"event": name, "data": id}).to_string()).unwrap();
        assert_eq!(msg, expected, "alias {name}");
    }
}

#[test]
fn parse_rejects_malformed_messages() {
    let cases = [
        "not json".to_string(),
        json!({"event": "join-poll"}).to_string(),
        json!({"event": "join-poll", "data": "not-a-uuid"}).to_string(),
        json!({"event": "join-poll", "data": 42}).to_string(),
        json!({"event": "vote", "data": Uuid::new_v4()}).to_string(),
        json!({"data": Uuid::new_v4()}).to_string(),
    ];
    for case in cases {
        assert!(ClientMessage::parse(&case).is_err(), "should reject {case}");
    }
}

#[test]
fn poll_update_wire_shape() {
    let poll_id = Uuid::new_v4();
    let option_id = Uuid::new_v4();
    let event = ServerEvent::PollUpdate(PollUpdate {
        poll_id,
        total_votes: 4,
        results: vec![OptionResult {
            option_id,
            option_text: "Rust".into(),
            vote_count: 3,
            percentage: 75.0,
        }],
        timestamp: OffsetDateTime::UNIX_EPOCH,
    });

    let value: serde_json::Value = serde_json::from_str(&event.encode().unwrap()).unwrap();
    assert_eq!(value["event"], "poll-update");
    assert_eq!(value["data"]["poll_id"], json!(poll_id));
    assert_eq!(value["data"]["total_votes"], 4);
    assert_eq!(value["data"]["results"][0]["option_id"], json!(option_id));
    assert_eq!(value["data"]["results"][0]["option_text"], "Rust");
    assert_eq!(value["data"]["results"][0]["vote_count"], 3);
    assert_eq!(value["data"]["results"][0]["percentage"], 75.0);
    assert_eq!(value["data"]["timestamp"], "1970-01-01T00:00:00Z");
}

#[test]
fn form_update_wire_shape() {
    let form_id = Uuid::new_v4();
    let event = ServerEvent::FormUpdate(FormUpdate {
        form_id,
        submission_count: 12,
        timestamp: OffsetDateTime::UNIX_EPOCH,
    });

    let value: serde_json::Value = serde_json::from_str(&event.encode().unwrap()).unwrap();
    assert_eq!(value["event"], "form-update");
    assert_eq!(value["data"]["form_id"], json!(form_id));
    assert_eq!(value["data"]["submission_count"], 12);
}

#[test]
fn connected_carries_connection_id() {
    let connection_id = ConnectionId::new();
    let event = ServerEvent::Connected { connection_id };
    let value: serde_json::Value = serde_json::from_str(&event.encode().unwrap()).unwrap();
    assert_eq!(value["event"], "connected");
    assert_eq!(value["data"]["connection_id"], json!(connection_id.to_string()));
}

#[test]
fn event_names_match_wire_tags() {
    let events = [
        ServerEvent::Connected { connection_id: ConnectionId::new() },
        ServerEvent::NewPoll(PollSummary {
            poll_id: Uuid::new_v4(),
            title: "Lunch".into(),
            description: String::new(),
            poll_type: "single".into(),
            created_at: OffsetDateTime::UNIX_EPOCH,
        }),
        ServerEvent::NewForm(FormSummary {
            form_id: Uuid::new_v4(),
            title: "Feedback".into(),
            description: String::new(),
            created_at: OffsetDateTime::UNIX_EPOCH,
        }),
    ];
    for event in events {
        let value: serde_json::Value = serde_json::from_str(&event.encode().unwrap()).unwrap();
        assert_eq!(value["event"], event.name());
    }
}

#[test]
fn server_event_decodes_back() {
    let event = ServerEvent::FormUpdate(FormUpdate {
        form_id: Uuid::new_v4(),
        submission_count: 1,
        timestamp: OffsetDateTime::UNIX_EPOCH,
    });
    let restored: ServerEvent = serde_json::from_str(&event.encode().unwrap()).unwrap();
    assert_eq!(restored, event);
}

#[test]
fn only_result_updates_carry_a_version() {
    let poll = ServerEvent::PollUpdate(PollUpdate {
        poll_id: Uuid::new_v4(),
        total_votes: 7,
        results: Vec::new(),
        timestamp: OffsetDateTime::UNIX_EPOCH,
    });
    let form = ServerEvent::FormUpdate(FormUpdate {
        form_id: Uuid::new_v4(),
        submission_count: 3,
        timestamp: OffsetDateTime::UNIX_EPOCH,
    });
    assert_eq!(poll.version(), Some(7));
    assert_eq!(form.version(), Some(3));
    assert_eq!(ServerEvent::Connected { connection_id: ConnectionId::new() }.version(), None);
}
