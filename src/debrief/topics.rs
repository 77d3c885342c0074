//! Topic and task extraction for synced notes.
//!
//! `spawn_topics_job` is fire-and-forget: the caller gets control back
//! immediately, and a failure is only logged and recorded on the row.

use crate::config::DebriefConfig;
use crate::debrief::simplify::{simplify_notes_for_extraction, HEADING_MARKERS};
use crate::debrief::store::{self, ProcessingStatus};
use crate::debrief::tasks::{normalize_tasks, NormalizedTask};
use crate::error::Result;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

/// Output of one extraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub topics: Vec<String>,
    pub tasks: Vec<NormalizedTask>,
}

/// Pulls topics and tasks out of simplified note text.
#[async_trait]
pub trait NoteExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Extraction>;
}

static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*•]|\[\s?\]|\d+[.)])\s+(.+)$").expect("bullet regex"));
static OWNER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z0-9._-]+)").expect("owner regex"));
static DUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:by|due)\s*:?\s*(\d{4}-\d{2}-\d{2})").expect("due regex")
});

const MAX_TOPIC_LINE: usize = 80;

/// Line-based extractor with no external dependencies.
///
/// Topics are markdown headings and short lines ending in `:`. Tasks are
/// bullets that follow an action-items style heading.
#[derive(Debug, Default, Clone)]
pub struct HeuristicExtractor;

impl HeuristicExtractor {
    fn topic_of(line: &str) -> Option<String> {
        let trimmed = line.trim();
        let topic = if let Some(heading) = trimmed.strip_prefix('#') {
            heading.trim_start_matches('#').trim()
        } else if trimmed.len() < MAX_TOPIC_LINE && trimmed.ends_with(':') && !BULLET.is_match(trimmed) {
            trimmed.trim_end_matches(':').trim()
        } else {
            return None;
        };
        (!topic.is_empty()).then(|| topic.to_string())
    }

    fn is_task_heading(line: &str) -> bool {
        let lowered = line.trim().to_ascii_lowercase();
        let lowered = lowered.trim_start_matches('#').trim();
        HEADING_MARKERS
            .iter()
            .filter(|marker| !matches!(**marker, "summary" | "decisions" | "takeaways"))
            .any(|marker| lowered.starts_with(marker))
    }

    fn task_from_bullet(body: &str) -> Value {
        let owner = OWNER.captures(body).map(|c| c[1].to_string());
        let due = DUE.captures(body).map(|c| c[1].to_string());
        let lowered = body.to_ascii_lowercase();
        let priority = if body.contains('!') || lowered.contains("urgent") {
            "high"
        } else {
            "medium"
        };

        let title = DUE.replace_all(body, "");
        let title = title.trim().trim_end_matches(['-', ',', '!']).trim();

        json!({
            "title": title,
            "owner": owner,
            "due_date": due,
            "priority": priority,
        })
    }
}

#[async_trait]
impl NoteExtractor for HeuristicExtractor {
    async fn extract(&self, text: &str) -> Result<Extraction> {
        let mut topics = Vec::new();
        let mut seen = HashSet::new();
        let mut raw_tasks = Vec::new();
        let mut in_task_section = false;

        for line in text.lines() {
            if let Some(body) = BULLET.captures(line).map(|c| c[1].to_string()) {
                if in_task_section {
                    raw_tasks.push(Self::task_from_bullet(&body));
                }
                continue;
            }

            if line.trim().is_empty() {
                continue;
            }

            if Self::is_task_heading(line) {
                in_task_section = true;
            } else if Self::topic_of(line).is_some() {
                // A new non-task heading closes the task section.
                in_task_section = false;
            }

            if let Some(topic) = Self::topic_of(line) {
                if seen.insert(topic.to_lowercase()) {
                    topics.push(topic);
                }
            }
        }

        Ok(Extraction {
            topics,
            tasks: normalize_tasks(&Value::Array(raw_tasks)),
        })
    }
}

/// Run extraction for one note in the foreground.
pub async fn process_topics(
    pool: &SqlitePool,
    extractor: &dyn NoteExtractor,
    config: &DebriefConfig,
    note_id: &str,
) -> Result<Extraction> {
    let note = store::get_note(pool, note_id).await?;
    store::set_status(pool, note_id, ProcessingStatus::Processing, None).await?;

    let outcome = async {
        let text = simplify_notes_for_extraction(
            note.content.as_deref().unwrap_or_default(),
            config.max_chars,
            config.context_before,
        );
        let extraction = extractor.extract(&text).await?;
        let stored =
            store::store_extraction(pool, note_id, &extraction.topics, &extraction.tasks).await?;
        if !stored {
            tracing::info!(note_id, "note content changed during extraction, left pending");
        }
        Ok::<_, crate::Error>(extraction)
    }
    .await;

    if let Err(error) = &outcome {
        match store::mark_failed(pool, note_id, &error.to_string()).await {
            Ok(true) => {}
            Ok(false) => tracing::info!(note_id, "note content changed during extraction, left pending"),
            Err(status_error) => {
                tracing::warn!(note_id, error = %status_error, "failed to record processing failure")
            }
        }
    }

    outcome
}

/// Fire topic processing on a background task.
pub fn spawn_topics_job(
    pool: SqlitePool,
    extractor: Arc<dyn NoteExtractor>,
    config: DebriefConfig,
    note_id: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match process_topics(&pool, extractor.as_ref(), &config, &note_id).await {
            Ok(extraction) => tracing::info!(
                note_id = %note_id,
                topics = extraction.topics.len(),
                tasks = extraction.tasks.len(),
                "topics job complete"
            ),
            Err(error) => tracing::error!(note_id = %note_id, %error, "topics job failed"),
        }
    })
}
