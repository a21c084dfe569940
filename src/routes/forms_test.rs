use super::*;
use crate::broadcast::ChannelKey;
use crate::state::test_helpers;

fn peer() -> ConnectInfo<SocketAddr> {
    ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40_001)))
}

#[test]
fn form_error_to_status_maps_rejections() {
    assert_eq!(form_error_to_status(&FormError::NotFound(Uuid::nil())), StatusCode::NOT_FOUND);
    assert_eq!(form_error_to_status(&FormError::Inactive), StatusCode::BAD_REQUEST);
    assert_eq!(form_error_to_status(&FormError::Invalid("x".into())), StatusCode::BAD_REQUEST);

    let err = ApiError::from(FormError::NotFound(Uuid::new_v4()));
    assert_eq!(err.message, "Form not found");
    let err = ApiError::from(FormError::Database(sqlx::Error::PoolTimedOut));
    assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn create_without_questions_is_bad_request() {
    let state = test_helpers::test_app_state();
    let body = CreateFormBody { title: Some("Feedback".into()), description: None, questions: Vec::new() };
    let err = create_form(State(state), ApiJson(body)).await.unwrap_err();
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn submit_requires_answer_array() {
    let state = test_helpers::test_app_state();
    let form_id = Uuid::new_v4();
    let (mut session, mut rx) = state.broadcast.connect().expect("connect");
    assert!(session.handle(crate::broadcast::event::ClientMessage::JoinForm(form_id)));
    assert_eq!(state.broadcast.registry().members_of(ChannelKey::form(form_id)).len(), 1);

    let missing = submit_response(
        State(state.clone()),
        ApiPath(form_id),
        peer(),
        HeaderMap::new(),
        ApiJson(SubmitBody { answers: None }),
    )
    .await
    .unwrap_err();
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);

    let not_array = submit_response(
        State(state),
        ApiPath(form_id),
        peer(),
        HeaderMap::new(),
        ApiJson(SubmitBody { answers: Some(serde_json::json!({"q": 1})) }),
    )
    .await
    .unwrap_err();
    assert_eq!(not_array.status, StatusCode::BAD_REQUEST);

    assert!(rx.try_recv().is_err(), "rejected submissions are not broadcast");
}
