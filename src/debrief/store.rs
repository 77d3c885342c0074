//! Persistence for `debrief_meeting_notes`.

use crate::debrief::tasks::NormalizedTask;
use crate::error::{Error, Result};

use serde::Serialize;
use sqlx::SqlitePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Processed => "processed",
            ProcessingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ProcessingStatus::Pending),
            "processing" => Some(ProcessingStatus::Processing),
            "processed" => Some(ProcessingStatus::Processed),
            "failed" => Some(ProcessingStatus::Failed),
            _ => None,
        }
    }
}

/// A note as produced by one sync pass, before it is written.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteUpsert {
    pub google_doc_id: String,
    pub title: String,
    pub owner_email: String,
    pub doc_url: String,
    pub content: Option<String>,
    pub modified_time: Option<String>,
}

/// Full stored note.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MeetingNote {
    pub id: String,
    pub google_doc_id: String,
    pub title: String,
    pub owner_email: String,
    pub doc_url: String,
    pub content: Option<String>,
    pub modified_time: Option<String>,
    pub topics: Option<String>,
    pub tasks: Option<String>,
    pub processing_status: String,
    pub processing_error: Option<String>,
    pub processed_at: Option<String>,
    pub synced_at: String,
    pub created_at: String,
    pub updated_at: String,
}

impl MeetingNote {
    pub fn topics(&self) -> Vec<String> {
        self.topics
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    pub fn tasks(&self) -> Vec<NormalizedTask> {
        self.tasks
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

const NOTE_COLUMNS: &str = "id, google_doc_id, title, owner_email, doc_url, content, modified_time, \
     topics, tasks, processing_status, processing_error, processed_at, synced_at, created_at, updated_at";

/// Upsert every row by `google_doc_id` inside one transaction.
///
/// Later writes overwrite earlier ones. A note whose content changed goes
/// back to `pending` so it is processed again. The first failing statement
/// rolls the whole batch back.
pub async fn upsert_notes(pool: &SqlitePool, rows: &[NoteUpsert]) -> Result<usize> {
    let now = crate::now_timestamp();
    let mut transaction = pool.begin().await?;

    for row in rows {
        sqlx::query(
            "INSERT INTO debrief_meeting_notes \
                 (id, google_doc_id, title, owner_email, doc_url, content, modified_time, \
                  processing_status, synced_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?) \
             ON CONFLICT(google_doc_id) DO UPDATE SET \
                 title = excluded.title, \
                 owner_email = excluded.owner_email, \
                 doc_url = excluded.doc_url, \
                 processing_status = CASE \
                     WHEN debrief_meeting_notes.content IS excluded.content \
                     THEN debrief_meeting_notes.processing_status \
                     ELSE 'pending' END, \
                 processing_error = CASE \
                     WHEN debrief_meeting_notes.content IS excluded.content \
                     THEN debrief_meeting_notes.processing_error \
                     ELSE NULL END, \
                 content = excluded.content, \
                 modified_time = excluded.modified_time, \
                 synced_at = excluded.synced_at, \
                 updated_at = excluded.updated_at",
        )
        .bind(crate::new_id())
        .bind(&row.google_doc_id)
        .bind(&row.title)
        .bind(&row.owner_email)
        .bind(&row.doc_url)
        .bind(&row.content)
        .bind(&row.modified_time)
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .execute(&mut *transaction)
        .await?;
    }

    transaction.commit().await?;
    Ok(rows.len())
}

pub async fn get_note(pool: &SqlitePool, id: &str) -> Result<MeetingNote> {
    sqlx::query_as::<_, MeetingNote>(&format!(
        "SELECT {NOTE_COLUMNS} FROM debrief_meeting_notes WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::not_found("meeting note", id))
}

pub async fn get_note_by_doc_id(pool: &SqlitePool, google_doc_id: &str) -> Result<MeetingNote> {
    sqlx::query_as::<_, MeetingNote>(&format!(
        "SELECT {NOTE_COLUMNS} FROM debrief_meeting_notes WHERE google_doc_id = ?"
    ))
    .bind(google_doc_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::not_found("meeting note", google_doc_id))
}

/// Ids of notes still waiting for topic processing.
pub async fn pending_note_ids(pool: &SqlitePool) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar(
        "SELECT id FROM debrief_meeting_notes WHERE processing_status = 'pending' \
         ORDER BY modified_time DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

pub async fn set_status(
    pool: &SqlitePool,
    id: &str,
    status: ProcessingStatus,
    error: Option<&str>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE debrief_meeting_notes SET processing_status = ?, processing_error = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(error)
    .bind(crate::now_timestamp())
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::not_found("meeting note", id));
    }
    Ok(())
}

/// Store extraction output and mark the note processed.
///
/// Only applies while the note is still `processing`. Returns false when a
/// sync reset it to `pending` in the meantime, leaving the row untouched.
pub async fn store_extraction(
    pool: &SqlitePool,
    id: &str,
    topics: &[String],
    tasks: &[NormalizedTask],
) -> Result<bool> {
    let topics_json = serde_json::to_string(topics).map_err(anyhow::Error::from)?;
    let tasks_json = serde_json::to_string(tasks).map_err(anyhow::Error::from)?;
    let now = crate::now_timestamp();

    let result = sqlx::query(
        "UPDATE debrief_meeting_notes \
         SET topics = ?, tasks = ?, processing_status = 'processed', processing_error = NULL, \
             processed_at = ?, updated_at = ? \
         WHERE id = ? AND processing_status = 'processing'",
    )
    .bind(&topics_json)
    .bind(&tasks_json)
    .bind(&now)
    .bind(&now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Mark a `processing` note failed. Returns false when it was superseded.
pub async fn mark_failed(pool: &SqlitePool, id: &str, message: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE debrief_meeting_notes SET processing_status = 'failed', processing_error = ?, \
             updated_at = ? \
         WHERE id = ? AND processing_status = 'processing'",
    )
    .bind(message)
    .bind(crate::now_timestamp())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Put notes stuck in `processing` for longer than `stale_after` back to
/// `pending`, so a job lost with its process gets queued again.
pub async fn requeue_stale_processing(
    pool: &SqlitePool,
    stale_after: chrono::Duration,
) -> Result<u64> {
    let cutoff = (chrono::Utc::now() - stale_after)
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string();
    let result = sqlx::query(
        "UPDATE debrief_meeting_notes SET processing_status = 'pending', updated_at = ? \
         WHERE processing_status = 'processing' AND updated_at < ?",
    )
    .bind(crate::now_timestamp())
    .bind(&cutoff)
    .execute(pool)
    .await?;

    let requeued = result.rows_affected();
    if requeued > 0 {
        tracing::warn!(requeued, "requeued notes stuck in processing");
    }
    Ok(requeued)
}
