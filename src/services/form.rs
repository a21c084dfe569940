//! Form service: form definitions and response submission.
//!
//! Question schemas are stored as JSONB and not interpreted beyond assigning
//! each question a stable id and position. A submission only bumps the
//! form's counter; routes broadcast the returned count after commit.

use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::broadcast::event::FormSummary;

use super::poll::{MAX_DESCRIPTION_LEN, MAX_TITLE_LEN};

#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error("form not found: {0}")]
    NotFound(Uuid),
    #[error("form is not active")]
    Inactive,
    #[error("{0}")]
    Invalid(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct FormRow {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub questions: Value,
    pub is_active: bool,
    pub submission_count: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl FormRow {
    #[must_use]
    pub fn summary(&self) -> FormSummary {
        FormSummary {
            form_id: self.id,
            title: self.title.clone(),
            description: self.description.clone(),
            created_at: self.created_at,
        }
    }
}

/// One stored response, as listed back to the form's owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseRow {
    pub id: Uuid,
    pub form_id: Uuid,
    pub answers: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
}

/// Input for `submit_response`.
#[derive(Debug, Clone)]
pub struct Submission {
    pub form_id: Uuid,
    pub answers: Value,
    pub submitter_ip: Option<String>,
    pub user_agent: Option<String>,
}

type FormTuple = (Uuid, String, String, Value, bool, i64, OffsetDateTime);

const FORM_COLUMNS: &str = "id, title, description, questions, is_active, submission_count, created_at";

fn row_from_tuple(t: FormTuple) -> FormRow {
    let (id, title, description, questions, is_active, submission_count, created_at) = t;
    FormRow { id, title, description, questions, is_active, submission_count, created_at }
}

/// Give each question object a `question_id` (kept if already present) and
/// a 1-based `order_index`.
///
/// # Errors
///
/// Returns `Invalid` when there are no questions or one is not an object.
pub fn normalize_questions(questions: Vec<Value>) -> Result<Vec<Value>, FormError> {
    if questions.is_empty() {
        return Err(FormError::Invalid("Title and at least one question are required".into()));
    }
    questions
        .into_iter()
        .enumerate()
        .map(|(index, question)| {
            let Value::Object(mut map) = question else {
                return Err(FormError::Invalid(format!("Question {} must be an object", index + 1)));
            };
            map.entry("question_id")
                .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
            map.insert("order_index".into(), Value::from(index + 1));
            Ok(Value::Object(map))
        })
        .collect()
}

/// Create a form.
///
/// # Errors
///
/// Returns `Invalid` for an empty or oversized title/description or bad
/// questions, or a database error.
pub async fn create_form(
    pool: &PgPool,
    title: &str,
    description: &str,
    questions: Vec<Value>,
) -> Result<FormRow, FormError> {
    let title = title.trim();
    let description = description.trim();
    if title.is_empty() {
        return Err(FormError::Invalid("Title and at least one question are required".into()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(FormError::Invalid(format!("Title must be at most {MAX_TITLE_LEN} characters")));
    }
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(FormError::Invalid(format!(
            "Description must be at most {MAX_DESCRIPTION_LEN} characters"
        )));
    }
    let questions = Value::Array(normalize_questions(questions)?);

    let row = sqlx::query_as::<_, FormTuple>(&format!(
        "INSERT INTO forms (id, title, description, questions) VALUES ($1, $2, $3, $4) RETURNING {FORM_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(title)
    .bind(description)
    .bind(&questions)
    .fetch_one(pool)
    .await?;

    Ok(row_from_tuple(row))
}

/// List active forms, newest first.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn list_forms(pool: &PgPool) -> Result<Vec<FormRow>, FormError> {
    let rows = sqlx::query_as::<_, FormTuple>(&format!(
        "SELECT {FORM_COLUMNS} FROM forms WHERE is_active ORDER BY created_at DESC"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(row_from_tuple).collect())
}

/// Fetch one form.
///
/// # Errors
///
/// Returns `NotFound` if the form does not exist, or a database error.
pub async fn get_form(pool: &PgPool, form_id: Uuid) -> Result<FormRow, FormError> {
    let row = sqlx::query_as::<_, FormTuple>(&format!("SELECT {FORM_COLUMNS} FROM forms WHERE id = $1"))
        .bind(form_id)
        .fetch_optional(pool)
        .await?
        .ok_or(FormError::NotFound(form_id))?;
    Ok(row_from_tuple(row))
}

/// A form and its responses, newest first.
///
/// # Errors
///
/// Returns `NotFound` if the form does not exist, or a database error.
pub async fn list_responses(pool: &PgPool, form_id: Uuid) -> Result<(FormRow, Vec<ResponseRow>), FormError> {
    let form = get_form(pool, form_id).await?;
    let rows = sqlx::query_as::<_, (Uuid, Uuid, Value, OffsetDateTime)>(
        "SELECT id, form_id, answers, submitted_at FROM form_responses \
         WHERE form_id = $1 ORDER BY submitted_at DESC, id",
    )
    .bind(form_id)
    .fetch_all(pool)
    .await?;
    let responses = rows
        .into_iter()
        .map(|(id, form_id, answers, submitted_at)| ResponseRow { id, form_id, answers, submitted_at })
        .collect();
    Ok((form, responses))
}

/// Store a response and return the form's new submission count.
///
/// # Errors
///
/// Returns `Invalid` when `answers` is not an array, `NotFound` or
/// `Inactive` for an unusable form, or a database error.
pub async fn submit_response(pool: &PgPool, submission: Submission) -> Result<i64, FormError> {
    let Submission { form_id, answers, submitter_ip, user_agent } = submission;
    if !answers.is_array() {
        return Err(FormError::Invalid("Answers must be an array".into()));
    }

    let mut tx = pool.begin().await?;

    let is_active: bool = sqlx::query_scalar("SELECT is_active FROM forms WHERE id = $1 FOR UPDATE")
        .bind(form_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(FormError::NotFound(form_id))?;
    if !is_active {
        return Err(FormError::Inactive);
    }

    sqlx::query(
        "INSERT INTO form_responses (id, form_id, answers, submitter_ip, submitter_user_agent) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(Uuid::new_v4())
    .bind(form_id)
    .bind(&answers)
    .bind(submitter_ip.as_deref())
    .bind(user_agent.as_deref())
    .execute(&mut *tx)
    .await?;

    let count: i64 = sqlx::query_scalar(
        "UPDATE forms SET submission_count = submission_count + 1 WHERE id = $1 RETURNING submission_count",
    )
    .bind(form_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(%form_id, submission_count = count, "form response recorded");
    Ok(count)
}

#[cfg(test)]
#[path = "form_test.rs"]
mod tests;
