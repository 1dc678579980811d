//! Note repository.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::{Note, TranscriptionStatus};

use super::{Page, StoreError, StoreResult};

const NOTE_COLUMNS: &str = "id, user_id, content, voice_url, voice_duration_seconds, \
     transcription_status, archived, created_at, updated_at";

fn validate_content(content: &str) -> StoreResult<()> {
    let len = content.chars().count();
    if len == 0 || len > 2000 {
        return Err(StoreError::Validation(
            "note content must be 1-2000 characters".to_owned(),
        ));
    }
    Ok(())
}

/// Count unarchived notes for the cap check.
pub async fn count_active(conn: &mut PgConnection, user_id: Uuid) -> StoreResult<i64> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT count(*) FROM notes WHERE user_id = $1 AND archived = FALSE")
            .bind(user_id)
            .fetch_one(conn)
            .await?;
    Ok(count)
}

/// Insert a note, enforcing the effective note cap.
///
/// Voice fields require pro tier (enforced by the caller) and a duration
/// of 1–300 seconds.
pub async fn create(
    conn: &mut PgConnection,
    user_id: Uuid,
    content: &str,
    voice_url: Option<&str>,
    voice_duration_seconds: Option<i32>,
    effective_max: i64,
) -> StoreResult<Note> {
    validate_content(content)?;
    if let Some(duration) = voice_duration_seconds {
        if !(1..=300).contains(&duration) {
            return Err(StoreError::Validation(
                "voice duration must be 1-300 seconds".to_owned(),
            ));
        }
    }

    let count = count_active(conn, user_id).await?;
    if count >= effective_max {
        return Err(StoreError::LimitExceeded {
            what: "note",
            limit: effective_max,
        });
    }

    let transcription_status = voice_url.map(|_| TranscriptionStatus::Pending);

    let note = sqlx::query_as::<_, Note>(&format!(
        "INSERT INTO notes
             (id, user_id, content, voice_url, voice_duration_seconds, transcription_status)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING {NOTE_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(content)
    .bind(voice_url)
    .bind(voice_duration_seconds)
    .bind(transcription_status)
    .fetch_one(conn)
    .await?;

    Ok(note)
}

/// Fetch a note owned by `user_id`.
pub async fn get(conn: &mut PgConnection, user_id: Uuid, note_id: Uuid) -> StoreResult<Note> {
    sqlx::query_as::<_, Note>(&format!(
        "SELECT {NOTE_COLUMNS} FROM notes WHERE id = $1 AND user_id = $2"
    ))
    .bind(note_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?
    .ok_or(StoreError::NotFound)
}

/// List unarchived notes, newest first.
pub async fn list(
    conn: &mut PgConnection,
    user_id: Uuid,
    offset: i64,
    limit: i64,
) -> StoreResult<Page<Note>> {
    let (total,): (i64,) =
        sqlx::query_as("SELECT count(*) FROM notes WHERE user_id = $1 AND archived = FALSE")
            .bind(user_id)
            .fetch_one(&mut *conn)
            .await?;

    let items = sqlx::query_as::<_, Note>(&format!(
        "SELECT {NOTE_COLUMNS} FROM notes
         WHERE user_id = $1 AND archived = FALSE
         ORDER BY created_at DESC OFFSET $2 LIMIT $3"
    ))
    .bind(user_id)
    .bind(offset)
    .bind(limit)
    .fetch_all(conn)
    .await?;

    Ok(Page {
        items,
        offset,
        limit,
        total,
    })
}

/// Update a note's text content.
pub async fn update_content(
    conn: &mut PgConnection,
    user_id: Uuid,
    note_id: Uuid,
    content: &str,
) -> StoreResult<Note> {
    validate_content(content)?;
    sqlx::query_as::<_, Note>(&format!(
        "UPDATE notes SET content = $1, updated_at = now()
         WHERE id = $2 AND user_id = $3 AND archived = FALSE
         RETURNING {NOTE_COLUMNS}"
    ))
    .bind(content)
    .bind(note_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?
    .ok_or(StoreError::NotFound)
}

/// Record the outcome of a transcription attempt. On success the
/// transcript replaces the note content.
pub async fn set_transcription(
    conn: &mut PgConnection,
    note_id: Uuid,
    status: TranscriptionStatus,
    transcript: Option<&str>,
) -> StoreResult<()> {
    match transcript {
        Some(text) => {
            sqlx::query(
                "UPDATE notes SET transcription_status = $1, content = $2, updated_at = now()
                 WHERE id = $3",
            )
            .bind(status)
            .bind(text)
            .bind(note_id)
            .execute(conn)
            .await?;
        }
        None => {
            sqlx::query(
                "UPDATE notes SET transcription_status = $1, updated_at = now() WHERE id = $2",
            )
            .bind(status)
            .bind(note_id)
            .execute(conn)
            .await?;
        }
    }
    Ok(())
}

/// Archive a note (conversion to a task archives rather than deletes).
pub async fn archive(conn: &mut PgConnection, user_id: Uuid, note_id: Uuid) -> StoreResult<Note> {
    sqlx::query_as::<_, Note>(&format!(
        "UPDATE notes SET archived = TRUE, updated_at = now()
         WHERE id = $1 AND user_id = $2 AND archived = FALSE
         RETURNING {NOTE_COLUMNS}"
    ))
    .bind(note_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?
    .ok_or(StoreError::NotFound)
}

/// Delete a note outright.
pub async fn delete(conn: &mut PgConnection, user_id: Uuid, note_id: Uuid) -> StoreResult<()> {
    let result = sqlx::query("DELETE FROM notes WHERE id = $1 AND user_id = $2")
        .bind(note_id)
        .bind(user_id)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_bounds() {
        assert!(validate_content("").is_err());
        assert!(validate_content(&"n".repeat(2001)).is_err());
        assert!(validate_content("buy milk").is_ok());
    }
}
