//! Meeting-note sync: list Drive folder, export text, upsert rows.

use crate::config::DebriefConfig;
use crate::debrief::store::{self, NoteUpsert};
use crate::error::{Error, Result};
use crate::google::{DriveFile, DriveSource};

use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;

pub const MIN_SYNC_LIMIT: u32 = 1;
pub const MAX_SYNC_LIMIT: u32 = 50;

/// Outcome of one sync batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Files returned by the Drive listing.
    pub listed: usize,
    /// Rows written.
    pub synced: usize,
}

/// Clamp a requested batch size into `[1, 50]`, falling back to `default`.
pub fn clamp_limit(requested: Option<i64>, default: u32) -> u32 {
    let raw = requested.unwrap_or(i64::from(default));
    raw.clamp(i64::from(MIN_SYNC_LIMIT), i64::from(MAX_SYNC_LIMIT)) as u32
}

/// Canonical editor URL for a document without a `webViewLink`.
pub fn fallback_doc_url(google_doc_id: &str) -> String {
    format!("https://docs.google.com/document/d/{google_doc_id}/edit")
}

/// Shape one Drive file into the row to upsert.
pub fn build_row(file: &DriveFile, content: Option<String>, default_owner_email: &str) -> NoteUpsert {
    let title = match file.name.trim() {
        "" => "Untitled meeting notes".to_string(),
        name => name.to_string(),
    };

    NoteUpsert {
        google_doc_id: file.id.clone(),
        title,
        owner_email: file
            .owner_email()
            .unwrap_or(default_owner_email)
            .to_string(),
        doc_url: file
            .web_view_link
            .as_deref()
            .filter(|link| !link.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| fallback_doc_url(&file.id)),
        content,
        modified_time: file.modified_time.clone(),
    }
}

/// Sequential batch sync of one Drive folder into `debrief_meeting_notes`.
pub struct DebriefSync {
    pool: SqlitePool,
    drive: Arc<dyn DriveSource>,
    folder_id: Option<String>,
    config: DebriefConfig,
}

impl DebriefSync {
    pub fn new(
        pool: SqlitePool,
        drive: Arc<dyn DriveSource>,
        folder_id: Option<String>,
        config: DebriefConfig,
    ) -> Self {
        Self {
            pool,
            drive,
            folder_id,
            config,
        }
    }

    /// Run one batch. Any Drive or database failure aborts the batch and
    /// nothing from it is written.
    pub async fn sync_meeting_notes(&self, limit: Option<i64>) -> Result<SyncReport> {
        let folder_id = self
            .folder_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| Error::Config("google.drive_folder_id is not set".into()))?;
        let limit = clamp_limit(limit, self.config.default_limit);

        let files = self.drive.list_files(folder_id, limit).await?;
        let listed = files.len();

        let mut rows = Vec::with_capacity(listed);
        for file in files.iter().take(limit as usize) {
            let content = if file.is_google_doc() {
                Some(self.drive.export_text(&file.id).await?)
            } else {
                None
            };
            rows.push(build_row(file, content, &self.config.default_owner_email));
        }

        let synced = store::upsert_notes(&self.pool, &rows).await?;
        tracing::info!(folder_id, limit, listed, synced, "debrief sync complete");

        Ok(SyncReport { listed, synced })
    }
}
