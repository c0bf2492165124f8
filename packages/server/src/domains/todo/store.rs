//! CRUD and optimistic-concurrency operations for lists and items, plus the
//! user-edit detachment rule from §4.5.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;

use crate::common::{CoordinatorError, Record, TodoItemId, TodoListId};

use super::models::{TodoItem, TodoList, CONTENT_FIELDS, SCHEDULE_FIELDS};

#[async_trait]
impl Record for TodoList {
    const TABLE: &'static str = "todo_lists";
    type Id = TodoListId;

    async fn find_by_id(id: Self::Id, db: &PgPool) -> anyhow::Result<Self> {
        Ok(find_list(db, id).await?)
    }

    async fn insert(&self, db: &PgPool) -> anyhow::Result<Self> {
        Ok(insert_list(db, &self.title).await?)
    }

    async fn delete(&self, db: &PgPool) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM todo_lists WHERE id = $1")
            .bind(self.id)
            .execute(db)
            .await?;
        Ok(())
    }
}

pub async fn find_list(db: &PgPool, id: TodoListId) -> Result<TodoList, CoordinatorError> {
    sqlx::query_as::<_, TodoList>(
        "SELECT id, title, created_at, version,
                (SELECT count(*) FROM todo_items WHERE list_id = todo_lists.id) AS total_items,
                (SELECT count(*) FROM todo_items WHERE list_id = todo_lists.id
                    AND status IN ('todo','in_progress','blocked')) AS undone_items
         FROM todo_lists WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(db)
    .await
    .map_err(CoordinatorError::StorageUnavailable)?
    .ok_or_else(|| CoordinatorError::ListNotFound(id.to_string()))
}

pub async fn insert_list(db: &PgPool, title: &str) -> Result<TodoList, CoordinatorError> {
    let id = TodoListId::new();
    sqlx::query("INSERT INTO todo_lists (id, title, created_at, version) VALUES ($1, $2, now(), 1)")
        .bind(id)
        .bind(title)
        .execute(db)
        .await
        .map_err(CoordinatorError::StorageUnavailable)?;
    find_list(db, id).await
}

pub async fn find_item(db: &PgPool, id: TodoItemId) -> Result<TodoItem, CoordinatorError> {
    sqlx::query_as::<_, TodoItem>("SELECT * FROM todo_items WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await
        .map_err(CoordinatorError::StorageUnavailable)?
        .ok_or_else(|| CoordinatorError::ItemNotFound(id.to_string()))
}

/// Applies a validated update mask to an item, honoring the expected
/// version (optimistic concurrency) and the detachment rule: when a
/// template-linked item's mask touches a content or schedule field, the
/// item is detached and an exception row is written before the update is
/// applied, all in one transaction.
pub async fn update_item(
    db: &PgPool,
    id: TodoItemId,
    expected_version: i64,
    mask: &[&str],
    values: &Value,
) -> Result<TodoItem, CoordinatorError> {
    let mut tx = db.begin().await.map_err(CoordinatorError::StorageUnavailable)?;

    let current = sqlx::query_as::<_, TodoItem>("SELECT * FROM todo_items WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(CoordinatorError::StorageUnavailable)?
        .ok_or_else(|| CoordinatorError::ItemNotFound(id.to_string()))?;

    if current.version != expected_version {
        return Err(CoordinatorError::VersionConflict {
            expected: expected_version,
            actual: current.version,
        });
    }

    if current.recurring_template_id.is_some() {
        let touches_content = mask.iter().any(|f| CONTENT_FIELDS.contains(f));
        let touches_schedule = mask.iter().any(|f| SCHEDULE_FIELDS.contains(f));

        if touches_content || touches_schedule {
            let exception_type = if touches_schedule {
                crate::domains::recurrence::ExceptionType::Rescheduled
            } else {
                crate::domains::recurrence::ExceptionType::Edited
            };

            if let (Some(template_id), Some(occurs_at)) =
                (current.recurring_template_id, current.occurs_at)
            {
                crate::domains::recurrence::store::insert_exception(
                    &mut tx,
                    template_id,
                    occurs_at,
                    exception_type,
                    Some(id),
                )
                .await?;
            }

            sqlx::query("UPDATE todo_items SET recurring_template_id = NULL WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(CoordinatorError::StorageUnavailable)?;
        }
    }

    for field in mask {
        apply_field(&mut *tx, id, field, values).await?;
    }

    sqlx::query("UPDATE todo_items SET version = version + 1, updated_at = now() WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(CoordinatorError::StorageUnavailable)?;

    let updated = sqlx::query_as::<_, TodoItem>("SELECT * FROM todo_items WHERE id = $1")
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(CoordinatorError::StorageUnavailable)?;

    tx.commit().await.map_err(CoordinatorError::StorageUnavailable)?;
    Ok(updated)
}

async fn apply_field(
    tx: &mut sqlx::PgConnection,
    id: TodoItemId,
    field: &str,
    values: &Value,
) -> Result<(), CoordinatorError> {
    let value = values.get(field);

    macro_rules! set_text {
        ($column:literal) => {{
            let v = value.and_then(|v| v.as_str());
            sqlx::query(concat!("UPDATE todo_items SET ", $column, " = $2 WHERE id = $1"))
                .bind(id)
                .bind(v)
                .execute(&mut *tx)
                .await
                .map_err(CoordinatorError::StorageUnavailable)?;
        }};
    }

    match field {
        "title" => set_text!("title"),
        "priority" => set_text!("priority"),
        "status" => set_text!("status"),
        "tags" => {
            let tags: Vec<String> = value
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                .unwrap_or_default();
            sqlx::query("UPDATE todo_items SET tags = $2 WHERE id = $1")
                .bind(id)
                .bind(tags)
                .execute(&mut *tx)
                .await
                .map_err(CoordinatorError::StorageUnavailable)?;
        }
        "estimated_duration" => {
            let v = value.and_then(|v| v.as_i64());
            sqlx::query("UPDATE todo_items SET estimated_duration = $2 WHERE id = $1")
                .bind(id)
                .bind(v)
                .execute(&mut *tx)
                .await
                .map_err(CoordinatorError::StorageUnavailable)?;
        }
        "due_at" | "starts_at" | "occurs_at" => {
            let v = value
                .and_then(|v| v.as_str())
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));
            let column = field;
            sqlx::query(&format!("UPDATE todo_items SET {column} = $2 WHERE id = $1"))
                .bind(id)
                .bind(v)
                .execute(&mut *tx)
                .await
                .map_err(CoordinatorError::StorageUnavailable)?;
        }
        _ => return Err(CoordinatorError::Validation(format!("unrecognized field {field}"))),
    }
    Ok(())
}
