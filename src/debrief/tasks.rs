//! Normalization of loosely-shaped task objects.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Upper bound on tasks kept per note.
pub const MAX_TASKS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

impl TaskPriority {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|p| p.trim().to_ascii_lowercase()).as_deref() {
            Some("high" | "urgent" | "p0" | "p1") => TaskPriority::High,
            Some("low" | "p3" | "p4") => TaskPriority::Low,
            _ => TaskPriority::Medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedTask {
    pub title: String,
    pub owner: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub priority: TaskPriority,
}

/// Map an extraction payload into the normalized task list.
///
/// Accepts a bare array, or an object holding the array under `tasks` or
/// `action_items`. Elements may be strings or objects; anything without a
/// usable title is dropped, as are case-insensitive duplicate titles.
pub fn normalize_tasks(value: &Value) -> Vec<NormalizedTask> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("tasks").or_else(|| map.get("action_items")) {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    let mut seen = HashSet::new();
    items
        .iter()
        .filter_map(normalize_one)
        .filter(|task| seen.insert(task.title.to_lowercase()))
        .take(MAX_TASKS)
        .collect()
}

fn normalize_one(item: &Value) -> Option<NormalizedTask> {
    match item {
        Value::String(title) => {
            let title = title.trim();
            (!title.is_empty()).then(|| NormalizedTask {
                title: title.to_string(),
                owner: None,
                due_date: None,
                priority: TaskPriority::Medium,
            })
        }
        Value::Object(_) => {
            let title = first_text(item, &["title", "task", "description", "text"])?;
            Some(NormalizedTask {
                title,
                owner: first_text(item, &["owner", "assignee", "assigned_to"]),
                due_date: first_text(item, &["due_date", "dueDate", "due"])
                    .and_then(|raw| parse_due_date(&raw)),
                priority: TaskPriority::parse(item.get("priority").and_then(Value::as_str)),
            })
        }
        _ => None,
    }
}

/// First non-blank string among `keys`, trimmed.
fn first_text(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| item.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

/// Accepts `YYYY-MM-DD`, optionally followed by a time component.
pub fn parse_due_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let date = raw.get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_mixed_shapes() {
        let tasks = normalize_tasks(&json!([
            "  Send recap  ",
            {"task": "Book venue", "assignee": " Ben ", "due": "2026-10-20T09:00:00Z", "priority": "URGENT"},
            {"title": "", "description": "Review copy", "owner": "   ", "priority": "p3"},
            {"title": "Call vendor", "dueDate": "next week"},
        ]));

        assert_eq!(tasks.len(), 4);
        assert_eq!(tasks[0].title, "Send recap");
        assert_eq!(tasks[0].priority, TaskPriority::Medium);

        assert_eq!(tasks[1].title, "Book venue");
        assert_eq!(tasks[1].owner.as_deref(), Some("Ben"));
        assert_eq!(tasks[1].due_date, NaiveDate::from_ymd_opt(2026, 10, 20));
        assert_eq!(tasks[1].priority, TaskPriority::High);

        assert_eq!(tasks[2].title, "Review copy");
        assert_eq!(tasks[2].owner, None);
        assert_eq!(tasks[2].priority, TaskPriority::Low);

        assert_eq!(tasks[3].due_date, None);
    }

    #[test]
    fn accepts_wrapped_arrays() {
        let wrapped = normalize_tasks(&json!({"tasks": ["a"]}));
        assert_eq!(wrapped.len(), 1);
        let action_items = normalize_tasks(&json!({"action_items": [{"text": "b"}]}));
        assert_eq!(action_items[0].title, "b");
    }

    #[test]
    fn rejects_unusable_input() {
        assert!(normalize_tasks(&json!("just text")).is_empty());
        assert!(normalize_tasks(&json!({"tasks": "nope"})).is_empty());
        assert!(normalize_tasks(&json!([null, 3, {"owner": "x"}, "  "])).is_empty());
    }

    #[test]
    fn drops_case_insensitive_duplicates() {
        let tasks = normalize_tasks(&json!([
            {"title": "Ship it", "owner": "ana"},
            {"title": "SHIP IT", "owner": "ben"},
        ]));
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].owner.as_deref(), Some("ana"));
    }

    #[test]
    fn caps_task_count() {
        let many: Vec<String> = (0..80).map(|i| format!("task {i}")).collect();
        assert_eq!(normalize_tasks(&json!(many)).len(), MAX_TASKS);
    }

    #[test]
    fn serializes_priority_lowercase() {
        let task = NormalizedTask {
            title: "x".into(),
            owner: None,
            due_date: NaiveDate::from_ymd_opt(2026, 1, 2),
            priority: TaskPriority::High,
        };
        let value = serde_json::to_value(&task).expect("serialize");
        assert_eq!(value["priority"], "high");
        assert_eq!(value["due_date"], "2026-01-02");
    }
}
