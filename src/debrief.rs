//! Meeting debriefs: Drive sync, note simplification, task normalization
//! and background topic extraction.

pub mod simplify;
pub mod store;
pub mod sync;
pub mod tasks;
pub mod topics;

pub use simplify::simplify_notes_for_extraction;
pub use store::{MeetingNote, NoteUpsert, ProcessingStatus};
pub use sync::{DebriefSync, SyncReport};
pub use tasks::{normalize_tasks, NormalizedTask, TaskPriority};
pub use topics::{process_topics, spawn_topics_job, Extraction, HeuristicExtractor, NoteExtractor};

use crate::config::DebriefConfig;
use crate::error::Result;

use sqlx::SqlitePool;
use std::sync::Arc;

/// Sync one batch, then fire topic jobs for every note left pending when
/// `auto_process` is on. Job handles are detached.
pub async fn sync_and_queue(
    sync: &DebriefSync,
    pool: &SqlitePool,
    extractor: Arc<dyn NoteExtractor>,
    config: &DebriefConfig,
    limit: Option<i64>,
) -> Result<SyncReport> {
    let report = sync.sync_meeting_notes(limit).await?;

    if config.auto_process {
        store::requeue_stale_processing(
            pool,
            chrono::Duration::minutes(config.stale_processing_minutes),
        )
        .await?;
        let pending = store::pending_note_ids(pool).await?;
        tracing::debug!(count = pending.len(), "queueing topic jobs");
        for note_id in pending {
            spawn_topics_job(pool.clone(), extractor.clone(), config.clone(), note_id);
        }
    }

    Ok(report)
}
