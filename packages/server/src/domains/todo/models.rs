//! `TodoList` and `TodoItem`: the ordinary-CRUD surface the recurrence
//! system generates into. Also `StatusHistory`, the ambient table behind
//! server-side `actual_duration` computation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::common::{StatusHistoryId, TemplateId, TodoItemId, TodoListId};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TodoList {
    pub id: TodoListId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub total_items: i64,
    pub undone_items: i64,
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Todo,
    InProgress,
    Blocked,
    Done,
    Archived,
    Cancelled,
}

impl ItemStatus {
    /// The "undone" set referenced by `TodoList::undone_items`.
    pub fn is_undone(&self) -> bool {
        matches!(self, Self::Todo | Self::InProgress | Self::Blocked)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: TodoItemId,
    pub list_id: TodoListId,
    pub title: String,
    pub status: ItemStatus,
    pub priority: Option<String>,
    pub tags: Vec<String>,
    pub estimated_duration: Option<i64>,
    pub actual_duration: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub due_at: Option<DateTime<Utc>>,
    pub starts_at: Option<DateTime<Utc>>,
    pub occurs_at: Option<DateTime<Utc>>,
    pub due_offset: Option<i64>,
    pub timezone: Option<String>,
    pub recurring_template_id: Option<TemplateId>,
    pub version: i64,
}

impl TodoItem {
    /// `due_at = starts_at + due_offset` when both exist.
    pub fn computed_due_at(&self) -> Option<DateTime<Utc>> {
        match (self.starts_at, self.due_offset) {
            (Some(starts_at), Some(offset)) => Some(starts_at + chrono::Duration::seconds(offset)),
            _ => self.due_at,
        }
    }
}

/// Fields whose change on a template-linked item triggers detachment, per
/// §4.5. Status and timezone changes are deliberately excluded.
pub const CONTENT_FIELDS: &[&str] = &["title", "tags", "priority", "estimated_duration"];
pub const SCHEDULE_FIELDS: &[&str] = &["due_at", "starts_at", "occurs_at"];

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StatusHistory {
    pub id: StatusHistoryId,
    pub item_id: TodoItemId,
    pub status: ItemStatus,
    pub entered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undone_set_matches_todo_in_progress_blocked() {
        assert!(ItemStatus::Todo.is_undone());
        assert!(ItemStatus::InProgress.is_undone());
        assert!(ItemStatus::Blocked.is_undone());
        assert!(!ItemStatus::Done.is_undone());
        assert!(!ItemStatus::Archived.is_undone());
        assert!(!ItemStatus::Cancelled.is_undone());
    }

    #[test]
    fn computed_due_at_prefers_starts_at_plus_offset() {
        let mut item = sample_item();
        item.starts_at = Some(Utc::now());
        item.due_offset = Some(3600);
        item.due_at = None;
        assert_eq!(
            item.computed_due_at(),
            Some(item.starts_at.unwrap() + chrono::Duration::seconds(3600))
        );
    }

    fn sample_item() -> TodoItem {
        TodoItem {
            id: TodoItemId::new(),
            list_id: TodoListId::new(),
            title: "x".into(),
            status: ItemStatus::Todo,
            priority: None,
            tags: vec![],
            estimated_duration: None,
            actual_duration: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            due_at: None,
            starts_at: None,
            occurs_at: None,
            due_offset: None,
            timezone: None,
            recurring_template_id: None,
            version: 1,
        }
    }
}
