//! Form REST routes.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::routes::ApiError;
use crate::routes::extract::{ApiJson, ApiPath};
use crate::services::form::{self, FormError, Submission};
use crate::state::AppState;

pub(crate) fn form_error_to_status(err: &FormError) -> StatusCode {
    match err {
        FormError::NotFound(_) => StatusCode::NOT_FOUND,
        FormError::Inactive | FormError::Invalid(_) => StatusCode::BAD_REQUEST,
        FormError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<FormError> for ApiError {
    fn from(err: FormError) -> Self {
        match err {
            FormError::Database(e) => ApiError::internal(&e),
            FormError::NotFound(_) => ApiError::new(StatusCode::NOT_FOUND, "Form not found"),
            other => ApiError::new(form_error_to_status(&other), other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateFormBody {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub questions: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    pub answers: Option<Value>,
}

/// `POST /api/forms`: create a form and announce it to every connection.
pub async fn create_form(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CreateFormBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let row = form::create_form(
        &state.pool,
        body.title.as_deref().unwrap_or_default(),
        body.description.as_deref().unwrap_or_default(),
        body.questions,
    )
    .await?;

    state.broadcast.notifier().notify_new_form(row.summary());

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": "Form created successfully", "form_id": row.id })),
    ))
}

/// `GET /api/forms`: list active forms.
pub async fn list_forms(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let forms = form::list_forms(&state.pool).await?;
    Ok(Json(json!({ "success": true, "forms": forms })))
}

/// `GET /api/forms/{id}`
pub async fn get_form(
    State(state): State<AppState>,
    ApiPath(form_id): ApiPath<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let row = form::get_form(&state.pool, form_id).await?;
    Ok(Json(json!({ "success": true, "form": row })))
}

/// `GET /api/forms/{id}/responses`: stored responses, newest first.
pub async fn list_responses(
    State(state): State<AppState>,
    ApiPath(form_id): ApiPath<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let (form, responses) = form::list_responses(&state.pool, form_id).await?;
    Ok(Json(json!({ "success": true, "responses": responses, "form": form })))
}

/// `POST /api/forms/{id}/submit`: store a response, then push the new
/// submission count to the form's channel.
pub async fn submit_response(
    State(state): State<AppState>,
    ApiPath(form_id): ApiPath<Uuid>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<SubmitBody>,
) -> Result<Json<Value>, ApiError> {
    let Some(answers) = body.answers else {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "Answers are required"));
    };

    let submission = Submission {
        form_id,
        answers,
        submitter_ip: Some(addr.ip().to_string()),
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
    };
    let submission_count = form::submit_response(&state.pool, submission).await?;

    state.broadcast.notifier().notify_form_update(form_id, submission_count);

    Ok(Json(json!({
        "success": true,
        "message": "Response submitted successfully",
        "submission_count": submission_count,
    })))
}

#[cfg(test)]
#[path = "forms_test.rs"]
mod tests;
