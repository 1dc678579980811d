//! Note entity with optional voice attachment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Voice transcription lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transcription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionStatus {
    /// Transcription requested but not yet finished.
    Pending,
    /// Transcript stored in the note text.
    Completed,
    /// Vendor failed; the voice attachment remains.
    Failed,
}

/// A user-owned note.
///
/// Converting a note to a task archives it rather than deleting it.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Note {
    /// Primary key.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Text content, 1–2000 characters.
    pub content: String,
    /// Voice attachment URL (pro only).
    pub voice_url: Option<String>,
    /// Voice duration in seconds (1–300).
    pub voice_duration_seconds: Option<i32>,
    /// Transcription state for voice notes.
    pub transcription_status: Option<TranscriptionStatus>,
    /// Archived notes are excluded from listing and the notes cap.
    pub archived: bool,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}
