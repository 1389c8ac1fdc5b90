use crate::db::models::{PollId, UserId};
use sqlx::{Error, PgConnection};

/// Adds one vote in place. Returns `false` when no option sits at
/// `position`, which covers both an unknown poll and an out-of-range index.
pub async fn increment_option_votes(
    conn: &mut PgConnection,
    poll_id: &PollId,
    position: i32,
) -> Result<bool, Error> {
    let result = sqlx::query(
        "UPDATE poll_options SET votes = votes + 1 WHERE poll_id = $1 AND position = $2",
    )
    .bind(poll_id.as_str())
    .bind(position)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn record_voter(
    conn: &mut PgConnection,
    poll_id: &PollId,
    voter: UserId,
) -> Result<(), Error> {
    sqlx::query(
        "UPDATE polls SET voters = array_append(voters, $2) WHERE id = $1 AND NOT ($2 = ANY(voters))",
    )
    .bind(poll_id.as_str())
    .bind(voter)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
