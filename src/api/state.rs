//! Shared state for the HTTP API.

use crate::config::AppConfig;
use crate::debrief::{DebriefSync, NoteExtractor};
use crate::google::DriveSource;

use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;

/// State shared across all API handlers.
pub struct ApiState {
    pub started_at: Instant,
    pub pool: SqlitePool,
    pub config: Arc<AppConfig>,
    pub drive: Arc<dyn DriveSource>,
    pub extractor: Arc<dyn NoteExtractor>,
}

impl ApiState {
    pub fn new(
        pool: SqlitePool,
        config: Arc<AppConfig>,
        drive: Arc<dyn DriveSource>,
        extractor: Arc<dyn NoteExtractor>,
    ) -> Self {
        Self {
            started_at: Instant::now(),
            pool,
            config,
            drive,
            extractor,
        }
    }

    pub fn debrief_sync(&self) -> DebriefSync {
        DebriefSync::new(
            self.pool.clone(),
            self.drive.clone(),
            self.config.google.drive_folder_id.clone(),
            self.config.debrief.clone(),
        )
    }
}
