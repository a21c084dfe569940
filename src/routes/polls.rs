//! Poll REST routes.
//!
//! Handlers translate JSON to service calls. Every successful mutation is
//! handed to the broadcast notifier after the service has committed, and a
//! publish never changes the HTTP outcome.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::broadcast::event::OptionResult;
use crate::routes::ApiError;
use crate::routes::extract::{ApiJson, ApiPath, ApiQuery};
use crate::services::poll::{self, Ballot, NewPoll, PollError, PollRow, PollType};
use crate::state::AppState;

pub(crate) fn poll_error_to_status(err: &PollError) -> StatusCode {
    match err {
        PollError::NotFound(_) => StatusCode::NOT_FOUND,
        PollError::AlreadyVoted => StatusCode::CONFLICT,
        PollError::Invalid(_)
        | PollError::Inactive
        | PollError::Ended
        | PollError::InvalidOption(_)
        | PollError::SingleChoice => StatusCode::BAD_REQUEST,
        PollError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<PollError> for ApiError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Database(e) => ApiError::internal(&e),
            PollError::NotFound(_) => ApiError::new(StatusCode::NOT_FOUND, "Poll not found"),
            other => ApiError::new(poll_error_to_status(&other), other.to_string()),
        }
    }
}

// =============================================================================
// BODIES
// =============================================================================

/// An option may be sent as a bare string or as `{"option_text": ".."}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OptionInput {
    Text(String),
    Object { option_text: String },
}

impl OptionInput {
    fn into_text(self) -> String {
        match self {
            Self::Text(text) | Self::Object { option_text: text } => text,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePollBody {
    pub title: Option<String>,
    pub description: Option<String>,
    pub poll_type: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start_time: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
    #[serde(default)]
    pub options: Vec<OptionInput>,
}

impl CreatePollBody {
    fn into_new_poll(self) -> Result<NewPoll, ApiError> {
        let poll_type = match self.poll_type.as_deref() {
            None => PollType::default(),
            Some(raw) => PollType::parse(raw).ok_or_else(|| {
                ApiError::new(StatusCode::BAD_REQUEST, "Poll type must be 'single' or 'multiple'")
            })?,
        };
        Ok(NewPoll {
            title: self.title.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            poll_type,
            is_anonymous: self.is_anonymous,
            start_time: self.start_time,
            end_time: self.end_time,
            options: self.options.into_iter().map(OptionInput::into_text).collect(),
        })
    }
}

/// `option_id` accepts one id or a list; `option_ids` is an alias.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(Uuid),
    Many(Vec<Uuid>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<Uuid> {
        match self {
            Self::One(id) => vec![id],
            Self::Many(ids) => ids,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VoteBody {
    pub voter_id: Option<Uuid>,
    #[serde(alias = "option_ids")]
    pub option_id: Option<OneOrMany>,
}

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    pub voter_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct PollDetail {
    #[serde(flatten)]
    pub poll: PollRow,
    pub options: Vec<OptionResult>,
    /// Options the queried voter picked; absent when no `voter_id` was given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_votes: Option<Vec<Uuid>>,
    pub can_vote: bool,
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `POST /api/polls`: create a poll and announce it to every connection.
pub async fn create_poll(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CreatePollBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let new_poll = body.into_new_poll()?;
    let (row, _) = poll::create_poll(&state.pool, new_poll).await?;

    state.broadcast.notifier().notify_new_poll(row.summary());

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": "Poll created successfully", "poll_id": row.id })),
    ))
}

/// `GET /api/polls`: list polls, newest first.
pub async fn list_polls(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let polls = poll::list_polls(&state.pool).await?;
    Ok(Json(json!({ "success": true, "polls": polls })))
}

/// `GET /api/polls/{id}`: one poll with its current results. With
/// `?voter_id=`, also the options that voter picked.
pub async fn get_poll(
    State(state): State<AppState>,
    ApiPath(poll_id): ApiPath<Uuid>,
    ApiQuery(query): ApiQuery<PollQuery>,
) -> Result<Json<Value>, ApiError> {
    let (row, options) = poll::get_poll(&state.pool, poll_id).await?;
    let user_votes = match query.voter_id {
        Some(voter_id) => Some(poll::voter_choices(&state.pool, poll_id, voter_id).await?),
        None => None,
    };
    let can_vote = row.can_vote_at(OffsetDateTime::now_utc());
    let detail = PollDetail { poll: row, options, user_votes, can_vote };
    Ok(Json(json!({ "success": true, "poll": detail })))
}

/// `POST /api/polls/{id}/vote`: record a ballot, then push fresh results to
/// the poll's channel.
pub async fn cast_vote(
    State(state): State<AppState>,
    ApiPath(poll_id): ApiPath<Uuid>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ApiJson(body): ApiJson<VoteBody>,
) -> Result<Json<Value>, ApiError> {
    let (Some(voter_id), Some(option_ids)) = (body.voter_id, body.option_id) else {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "Voter ID and option ID are required"));
    };

    let ballot = Ballot {
        poll_id,
        voter_id,
        option_ids: option_ids.into_vec(),
        ip_address: Some(addr.ip().to_string()),
    };
    let outcome = poll::cast_vote(&state.pool, ballot).await?;

    state
        .broadcast
        .notifier()
        .notify_poll_update(poll_id, outcome.total_votes, outcome.results.clone());

    Ok(Json(json!({
        "success": true,
        "message": "Vote recorded successfully",
        "results": outcome.results,
        "total_votes": outcome.total_votes,
    })))
}

#[cfg(test)]
#[path = "polls_test.rs"]
mod tests;
