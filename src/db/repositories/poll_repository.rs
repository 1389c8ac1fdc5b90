use crate::db::connection::DbPool;
use crate::db::models::{
    Color, Creator, OptionDraft, Poll, PollDraft, PollId, PollOption, PollSummary, UserId,
};
use crate::db::pagination::PageWindow;
use crate::db::repositories::vote_repository::{increment_option_votes, record_voter};
use crate::db::store::{PollStore, Upsert};
use crate::error::PollError;
use chrono::{DateTime, Utc};
use sqlx::{Error, PgConnection};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
struct PollRow {
    id: String,
    question: String,
    creator_id: Uuid,
    creator_name: String,
    created_at: DateTime<Utc>,
    voters: Vec<Uuid>,
}

#[derive(Debug, sqlx::FromRow)]
struct OptionRow {
    poll_id: String,
    option_text: String,
    color: Option<String>,
    votes: i64,
}

/// Postgres-backed store. Vote counts live in their own rows so an
/// increment is a single `votes = votes + 1` statement.
#[derive(Debug, Clone)]
pub struct PgPollStore {
    pool: DbPool,
}

impl PgPollStore {
    pub fn new(pool: DbPool) -> Self {
        PgPollStore { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

async fn attach_options(conn: &mut PgConnection, rows: Vec<PollRow>) -> Result<Vec<Poll>, Error> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let option_rows = sqlx::query_as::<_, OptionRow>(
        "SELECT poll_id, option_text, color, votes FROM poll_options WHERE poll_id = ANY($1) ORDER BY poll_id, position",
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut options: HashMap<String, Vec<PollOption>> = HashMap::new();
    for row in option_rows {
        options.entry(row.poll_id).or_default().push(PollOption {
            text: row.option_text,
            votes: u64::try_from(row.votes).unwrap_or(0),
            color: row.color.as_deref().and_then(Color::parse),
        });
    }

    Ok(rows
        .into_iter()
        .map(|row| Poll {
            options: options.remove(&row.id).unwrap_or_default(),
            id: PollId::from(row.id),
            question: row.question,
            date: row.created_at,
            creator: Creator {
                id: row.creator_id,
                name: row.creator_name,
            },
            voters: row.voters.into_iter().collect::<BTreeSet<_>>(),
        })
        .collect())
}

async fn fetch_poll(conn: &mut PgConnection, id: &PollId) -> Result<Option<Poll>, Error> {
    let row = sqlx::query_as::<_, PollRow>(
        "SELECT id, question, creator_id, creator_name, created_at, voters FROM polls WHERE id = $1",
    )
    .bind(id.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(attach_options(conn, vec![row]).await?.pop()),
        None => Ok(None),
    }
}

async fn poll_exists(conn: &mut PgConnection, id: &PollId) -> Result<bool, Error> {
    let row = sqlx::query("SELECT 1 FROM polls WHERE id = $1")
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.is_some())
}

/// Writes text and color for every position in `options` and drops the
/// positions past its end. Existing vote counts are never written.
async fn write_options(
    conn: &mut PgConnection,
    id: &PollId,
    options: &[OptionDraft],
) -> Result<(), PollError> {
    let count = i32::try_from(options.len()).map_err(|_| PollError::validation("too many options"))?;

    for (position, option) in (0..count).zip(options) {
        sqlx::query(
            r#"
            INSERT INTO poll_options (poll_id, position, option_text, color)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (poll_id, position)
            DO UPDATE SET option_text = EXCLUDED.option_text, color = EXCLUDED.color
            "#,
        )
        .bind(id.as_str())
        .bind(position)
        .bind(&option.text)
        .bind(option.color.as_ref().map(Color::as_str))
        .execute(&mut *conn)
        .await?;
    }

    sqlx::query("DELETE FROM poll_options WHERE poll_id = $1 AND position >= $2")
        .bind(id.as_str())
        .bind(count)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

async fn insert_poll_row(
    conn: &mut PgConnection,
    id: &PollId,
    question: &str,
    creator: &Creator,
) -> Result<bool, Error> {
    let result = sqlx::query(
        "INSERT INTO polls (id, question, creator_id, creator_name) VALUES ($1, $2, $3, $4) ON CONFLICT (id) DO NOTHING",
    )
    .bind(id.as_str())
    .bind(question)
    .bind(creator.id)
    .bind(&creator.name)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Locks the poll row for the rest of the transaction.
async fn lock_owner(conn: &mut PgConnection, id: &PollId) -> Result<Option<Uuid>, Error> {
    sqlx::query_scalar::<_, Uuid>("SELECT creator_id FROM polls WHERE id = $1 FOR UPDATE")
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await
}

async fn apply_edit(
    conn: &mut PgConnection,
    id: &PollId,
    draft: &PollDraft,
) -> Result<Poll, PollError> {
    draft.validate()?;

    sqlx::query("UPDATE polls SET question = $2 WHERE id = $1")
        .bind(id.as_str())
        .bind(&draft.question)
        .execute(&mut *conn)
        .await?;

    write_options(conn, id, &draft.options).await?;
    fetch_poll(conn, id).await?.ok_or(PollError::NotFound)
}

impl PollStore for PgPollStore {
    async fn find_by_id(&self, id: &PollId) -> Result<Poll, PollError> {
        let mut conn = self.pool.acquire().await?;
        fetch_poll(&mut conn, id).await?.ok_or(PollError::NotFound)
    }

    async fn list_recent(&self, window: PageWindow) -> Result<Vec<PollSummary>, PollError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, PollRow>(
            "SELECT id, question, creator_id, creator_name, created_at, voters FROM polls ORDER BY created_at DESC, id ASC LIMIT $1 OFFSET $2",
        )
        .bind(i64::try_from(window.take()).unwrap_or(i64::MAX))
        .bind(i64::try_from(window.skip()).unwrap_or(i64::MAX))
        .fetch_all(&mut *conn)
        .await?;

        let polls = attach_options(&mut conn, rows).await?;
        Ok(polls.into_iter().map(PollSummary::from).collect())
    }

    async fn list_by_creator(&self, creator: UserId) -> Result<Vec<Poll>, PollError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, PollRow>(
            "SELECT id, question, creator_id, creator_name, created_at, voters FROM polls WHERE creator_id = $1 ORDER BY created_at DESC, id ASC",
        )
        .bind(creator)
        .fetch_all(&mut *conn)
        .await?;

        Ok(attach_options(&mut conn, rows).await?)
    }

    async fn insert(&self, draft: PollDraft, creator: Creator) -> Result<Poll, PollError> {
        draft.validate()?;
        let mut tx = self.pool.begin().await?;

        let id = loop {
            let id = PollId::generate();
            if insert_poll_row(&mut tx, &id, &draft.question, &creator).await? {
                break id;
            }
            debug!(poll_id = %id, "generated poll id already taken, drawing another");
        };

        write_options(&mut tx, &id, &draft.options).await?;
        let poll = fetch_poll(&mut tx, &id).await?.ok_or(PollError::NotFound)?;
        tx.commit().await?;

        Ok(poll)
    }

    async fn increment_vote(
        &self,
        id: &PollId,
        index: usize,
        voter: Option<UserId>,
    ) -> Result<Poll, PollError> {
        let position = i32::try_from(index).map_err(|_| PollError::InvalidVoteIndex)?;
        let mut tx = self.pool.begin().await?;

        if !increment_option_votes(&mut tx, id, position).await? {
            let exists = poll_exists(&mut tx, id).await?;
            tx.rollback().await?;
            return Err(if exists {
                PollError::InvalidVoteIndex
            } else {
                PollError::NotFound
            });
        }

        if let Some(voter) = voter {
            record_voter(&mut tx, id, voter).await?;
        }

        let poll = fetch_poll(&mut tx, id).await?.ok_or(PollError::NotFound)?;
        tx.commit().await?;

        Ok(poll)
    }

    async fn edit(&self, id: &PollId, draft: PollDraft, caller: UserId) -> Result<Poll, PollError> {
        let mut tx = self.pool.begin().await?;

        let owner = lock_owner(&mut tx, id).await?.ok_or(PollError::NotFound)?;
        if owner != caller {
            return Err(PollError::Unauthorized);
        }

        let poll = apply_edit(&mut tx, id, &draft).await?;
        tx.commit().await?;

        Ok(poll)
    }

    async fn patch<F>(&self, id: &PollId, caller: UserId, apply: F) -> Result<Poll, PollError>
    where
        F: FnOnce(PollDraft) -> Result<PollDraft, PollError> + Send,
    {
        let mut tx = self.pool.begin().await?;

        let owner = lock_owner(&mut tx, id).await?.ok_or(PollError::NotFound)?;
        if owner != caller {
            return Err(PollError::Unauthorized);
        }

        // the row lock is held until commit, so the draft cannot go stale
        let current = fetch_poll(&mut tx, id).await?.ok_or(PollError::NotFound)?;
        let draft = apply(current.draft())?;

        let poll = apply_edit(&mut tx, id, &draft).await?;
        tx.commit().await?;

        Ok(poll)
    }

    async fn upsert(
        &self,
        id: &PollId,
        draft: PollDraft,
        creator: Creator,
    ) -> Result<Upsert, PollError> {
        let mut tx = self.pool.begin().await?;

        let outcome = match lock_owner(&mut tx, id).await? {
            Some(owner) if owner != creator.id => return Err(PollError::Unauthorized),
            Some(_) => Upsert::Updated(apply_edit(&mut tx, id, &draft).await?),
            None => {
                draft.validate()?;
                if !insert_poll_row(&mut tx, id, &draft.question, &creator).await? {
                    // created by someone else between the lookup and the insert
                    return Err(PollError::Conflict);
                }
                write_options(&mut tx, id, &draft.options).await?;
                let poll = fetch_poll(&mut tx, id).await?.ok_or(PollError::NotFound)?;
                Upsert::Created(poll)
            }
        };
        tx.commit().await?;

        Ok(outcome)
    }

    async fn remove(&self, id: &PollId, caller: UserId) -> Result<(), PollError> {
        let mut conn = self.pool.acquire().await?;
        let result = sqlx::query("DELETE FROM polls WHERE id = $1 AND creator_id = $2")
            .bind(id.as_str())
            .bind(caller)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        if poll_exists(&mut conn, id).await? {
            Err(PollError::Unauthorized)
        } else {
            Err(PollError::NotFound)
        }
    }
}
