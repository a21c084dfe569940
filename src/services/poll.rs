//! Poll service: creation, vote recording, and result aggregation.
//!
//! DESIGN
//! ======
//! A vote is one transaction: lock the poll row, validate the ballot, insert
//! vote rows, bump the option and poll counters, and read the post-write
//! results before commit. Locking the poll row serializes concurrent ballots
//! for the same poll, so the returned results reflect commit order.
//!
//! Broadcasting is not done here. Routes publish the returned results after
//! this function has returned `Ok`, i.e. after commit, tagged with the
//! post-commit `total_votes` so the dispatcher can drop a late, older update.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::broadcast::event::{OptionResult, PollSummary};

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 1000;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("poll not found: {0}")]
    NotFound(Uuid),
    #[error("{0}")]
    Invalid(String),
    #[error("poll is not active")]
    Inactive,
    #[error("poll has ended")]
    Ended,
    #[error("invalid option: {0}")]
    InvalidOption(Uuid),
    #[error("only one option allowed for single choice polls")]
    SingleChoice,
    #[error("you have already voted in this poll")]
    AlreadyVoted,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollType {
    #[default]
    Single,
    Multiple,
}

impl PollType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multiple => "multiple",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "single" => Some(Self::Single),
            "multiple" => Some(Self::Multiple),
            _ => None,
        }
    }
}

/// Row returned from poll queries.
#[derive(Debug, Clone, Serialize)]
pub struct PollRow {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub poll_type: PollType,
    pub is_anonymous: bool,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
    pub total_votes: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl PollRow {
    /// Whether a ballot would be accepted at `now`.
    #[must_use]
    pub fn can_vote_at(&self, now: OffsetDateTime) -> bool {
        self.is_active && self.end_time.is_none_or(|end| now < end)
    }

    #[must_use]
    pub fn summary(&self) -> PollSummary {
        PollSummary {
            poll_id: self.id,
            title: self.title.clone(),
            description: self.description.clone(),
            poll_type: self.poll_type.as_str().to_owned(),
            created_at: self.created_at,
        }
    }
}

/// Input for `create_poll`.
#[derive(Debug, Clone, Default)]
pub struct NewPoll {
    pub title: String,
    pub description: String,
    pub poll_type: PollType,
    pub is_anonymous: bool,
    pub start_time: Option<OffsetDateTime>,
    pub end_time: Option<OffsetDateTime>,
    pub options: Vec<String>,
}

/// Input for `cast_vote`.
#[derive(Debug, Clone)]
pub struct Ballot {
    pub poll_id: Uuid,
    pub voter_id: Uuid,
    pub option_ids: Vec<Uuid>,
    pub ip_address: Option<String>,
}

/// What a committed ballot produced.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteOutcome {
    pub results: Vec<OptionResult>,
    /// The poll's `total_votes` after this commit. Strictly increases with
    /// each committed ballot, so it orders updates for the same poll.
    pub total_votes: i64,
}

type PollTuple = (
    Uuid,
    String,
    String,
    String,
    bool,
    bool,
    OffsetDateTime,
    Option<OffsetDateTime>,
    i64,
    OffsetDateTime,
);

const POLL_COLUMNS: &str =
    "id, title, description, poll_type, is_anonymous, is_active, start_time, end_time, total_votes, created_at";

fn row_from_tuple(t: PollTuple) -> PollRow {
    let (id, title, description, poll_type, is_anonymous, is_active, start_time, end_time, total_votes, created_at) = t;
    PollRow {
        id,
        title,
        description,
        poll_type: PollType::parse(&poll_type).unwrap_or_default(),
        is_anonymous,
        is_active,
        start_time,
        end_time,
        total_votes,
        created_at,
    }
}

// =============================================================================
// VALIDATION / AGGREGATION
// =============================================================================

/// Check the shape of a new poll and trim its text fields.
///
/// # Errors
///
/// Returns `Invalid` when the title is empty or too long, the description is
/// too long, fewer than two non-empty options remain, or the end time is not
/// after the start time.
pub fn validate_new_poll(mut poll: NewPoll) -> Result<NewPoll, PollError> {
    poll.title = poll.title.trim().to_owned();
    poll.description = poll.description.trim().to_owned();
    poll.options = poll
        .options
        .into_iter()
        .map(|o| o.trim().to_owned())
        .filter(|o| !o.is_empty())
        .collect();

    if poll.title.is_empty() || poll.options.len() < 2 {
        return Err(PollError::Invalid("Title and at least 2 options are required".into()));
    }
    if poll.title.chars().count() > MAX_TITLE_LEN {
        return Err(PollError::Invalid(format!("Title must be at most {MAX_TITLE_LEN} characters")));
    }
    if poll.description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(PollError::Invalid(format!(
            "Description must be at most {MAX_DESCRIPTION_LEN} characters"
        )));
    }
    if let (Some(start), Some(end)) = (poll.start_time, poll.end_time) {
        if end <= start {
            return Err(PollError::Invalid("End time must be after start time".into()));
        }
    }
    Ok(poll)
}

/// Turn `(option_id, option_text, vote_count)` rows into results with
/// percentages rounded to two decimals. All zero when nobody has voted.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn compute_results(rows: Vec<(Uuid, String, i64)>) -> Vec<OptionResult> {
    let total: i64 = rows.iter().map(|(_, _, count)| *count).sum();
    rows.into_iter()
        .map(|(option_id, option_text, vote_count)| {
            let percentage = if total > 0 {
                (vote_count as f64 / total as f64 * 10_000.0).round() / 100.0
            } else {
                0.0
            };
            OptionResult { option_id, option_text, vote_count, percentage }
        })
        .collect()
}

/// Remove repeated option ids, keeping first-seen order.
fn dedupe(ids: Vec<Uuid>) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

// =============================================================================
// CRUD
// =============================================================================

/// Create a poll with its options.
///
/// # Errors
///
/// Returns `Invalid` for a malformed poll, or a database error.
pub async fn create_poll(pool: &PgPool, poll: NewPoll) -> Result<(PollRow, Vec<OptionResult>), PollError> {
    let poll = validate_new_poll(poll)?;
    let id = Uuid::new_v4();

    let mut tx = pool.begin().await?;
    let row = sqlx::query_as::<_, PollTuple>(&format!(
        "INSERT INTO polls (id, title, description, poll_type, is_anonymous, start_time, end_time) \
         VALUES ($1, $2, $3, $4, $5, COALESCE($6, now()), $7) \
         RETURNING {POLL_COLUMNS}"
    ))
    .bind(id)
    .bind(&poll.title)
    .bind(&poll.description)
    .bind(poll.poll_type.as_str())
    .bind(poll.is_anonymous)
    .bind(poll.start_time)
    .bind(poll.end_time)
    .fetch_one(&mut *tx)
    .await?;

    for (index, text) in poll.options.iter().enumerate() {
        let order = i32::try_from(index + 1).unwrap_or(i32::MAX);
        sqlx::query("INSERT INTO poll_options (id, poll_id, option_text, option_order) VALUES ($1, $2, $3, $4)")
            .bind(Uuid::new_v4())
            .bind(id)
            .bind(text)
            .bind(order)
            .execute(&mut *tx)
            .await?;
    }

    let results = load_results(&mut *tx, id).await?;
    tx.commit().await?;

    Ok((row_from_tuple(row), results))
}

/// List all polls, newest first.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn list_polls(pool: &PgPool) -> Result<Vec<PollRow>, PollError> {
    let rows = sqlx::query_as::<_, PollTuple>(&format!("SELECT {POLL_COLUMNS} FROM polls ORDER BY created_at DESC"))
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(row_from_tuple).collect())
}

/// Fetch one poll with its current results.
///
/// # Errors
///
/// Returns `NotFound` if the poll does not exist, or a database error.
pub async fn get_poll(pool: &PgPool, poll_id: Uuid) -> Result<(PollRow, Vec<OptionResult>), PollError> {
    let row = sqlx::query_as::<_, PollTuple>(&format!("SELECT {POLL_COLUMNS} FROM polls WHERE id = $1"))
        .bind(poll_id)
        .fetch_optional(pool)
        .await?
        .ok_or(PollError::NotFound(poll_id))?;
    let results = load_results(pool, poll_id).await?;
    Ok((row_from_tuple(row), results))
}

// =============================================================================
// VOTING
// =============================================================================

/// Record a ballot and return the post-commit results and total.
///
/// # Errors
///
/// Returns `NotFound`, `Inactive`, `Ended`, `InvalidOption`, `SingleChoice`,
/// or `AlreadyVoted` when the ballot is rejected, or a database error.
pub async fn cast_vote(pool: &PgPool, ballot: Ballot) -> Result<VoteOutcome, PollError> {
    let Ballot { poll_id, voter_id, option_ids, ip_address } = ballot;
    let option_ids = dedupe(option_ids);
    if option_ids.is_empty() {
        return Err(PollError::Invalid("At least one option is required".into()));
    }

    let mut tx = pool.begin().await?;

    let (poll_type, is_active, ended) = sqlx::query_as::<_, (String, bool, bool)>(
        "SELECT poll_type, is_active, (end_time IS NOT NULL AND now() > end_time) \
         FROM polls WHERE id = $1 FOR UPDATE",
    )
    .bind(poll_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(PollError::NotFound(poll_id))?;

    if !is_active {
        return Err(PollError::Inactive);
    }
    if ended {
        return Err(PollError::Ended);
    }

    let valid: HashSet<Uuid> = sqlx::query_scalar::<_, Uuid>("SELECT id FROM poll_options WHERE poll_id = $1")
        .bind(poll_id)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .collect();
    if let Some(bad) = option_ids.iter().find(|id| !valid.contains(id)) {
        return Err(PollError::InvalidOption(*bad));
    }

    if PollType::parse(&poll_type) != Some(PollType::Multiple) && option_ids.len() > 1 {
        return Err(PollError::SingleChoice);
    }

    let already: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM votes WHERE poll_id = $1 AND voter_id = $2)")
        .bind(poll_id)
        .bind(voter_id)
        .fetch_one(&mut *tx)
        .await?;
    if already {
        return Err(PollError::AlreadyVoted);
    }

    for option_id in &option_ids {
        sqlx::query("INSERT INTO votes (id, poll_id, option_id, voter_id, ip_address) VALUES ($1, $2, $3, $4, $5)")
            .bind(Uuid::new_v4())
            .bind(poll_id)
            .bind(option_id)
            .bind(voter_id)
            .bind(ip_address.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(map_unique_violation)?;
    }

    sqlx::query("UPDATE poll_options SET vote_count = vote_count + 1 WHERE poll_id = $1 AND id = ANY($2)")
        .bind(poll_id)
        .bind(&option_ids)
        .execute(&mut *tx)
        .await?;

    let added = i64::try_from(option_ids.len()).unwrap_or(i64::MAX);
    let total_votes: i64 =
        sqlx::query_scalar("UPDATE polls SET total_votes = total_votes + $2 WHERE id = $1 RETURNING total_votes")
            .bind(poll_id)
            .bind(added)
            .fetch_one(&mut *tx)
            .await?;

    let results = load_results(&mut *tx, poll_id).await?;
    tx.commit().await?;

    tracing::info!(%poll_id, %voter_id, options = option_ids.len(), total_votes, "vote recorded");
    Ok(VoteOutcome { results, total_votes })
}

/// Option ids `voter_id` has chosen in `poll_id`. Empty if they have not voted.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn voter_choices(pool: &PgPool, poll_id: Uuid, voter_id: Uuid) -> Result<Vec<Uuid>, PollError> {
    let ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT option_id FROM votes WHERE poll_id = $1 AND voter_id = $2 ORDER BY voted_at, option_id",
    )
    .bind(poll_id)
    .bind(voter_id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

// =============================================================================
// HELPERS
// =============================================================================

async fn load_results<'e>(executor: impl PgExecutor<'e>, poll_id: Uuid) -> Result<Vec<OptionResult>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (Uuid, String, i64)>(
        "SELECT id, option_text, vote_count FROM poll_options WHERE poll_id = $1 ORDER BY option_order ASC",
    )
    .bind(poll_id)
    .fetch_all(executor)
    .await?;
    Ok(compute_results(rows))
}

fn map_unique_violation(err: sqlx::Error) -> PollError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => PollError::AlreadyVoted,
        _ => PollError::Database(err),
    }
}

#[cfg(test)]
#[path = "poll_test.rs"]
mod tests;
