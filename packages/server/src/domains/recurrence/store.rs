//! Typed persistence operations for the recurrence domain.
//!
//! Every transaction-spanning operation lives here as a single function that
//! takes an already-open `&mut PgConnection` (inside the caller's
//! transaction) or a `&PgPool` (for standalone reads). The Coordinator
//! composes these into the operations described in its contract; this module
//! never decides retry policy or detachment rules itself.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use crate::common::{
    CoordinatorError, DeadLetterId, ExceptionId, JobId, TemplateId, TodoItemId, TodoListId,
};

use super::job::{DeadLetterErrorType, DeadLetterJob, GenerationJob};
use super::models::{ExceptionType, NewTemplate, RecurringTemplate, RecurringTemplateException};

pub async fn insert_template(
    db: &PgPool,
    new: &NewTemplate,
) -> Result<RecurringTemplate, CoordinatorError> {
    new.recurrence_config
        .validate()
        .map_err(|e| CoordinatorError::Validation(e.to_string()))?;

    let id = TemplateId::new();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO recurring_task_templates
            (id, list_id, title, tags, priority, estimated_duration, recurrence_config,
             due_offset, timezone, is_active, created_at, updated_at, generated_through,
             sync_horizon_days, generation_horizon_days, version)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, true, $10, $10, $10, $11, $12, 1)",
    )
    .bind(id)
    .bind(new.list_id)
    .bind(&new.title)
    .bind(&new.tags)
    .bind(&new.priority)
    .bind(new.estimated_duration)
    .bind(sqlx::types::Json(&new.recurrence_config))
    .bind(new.due_offset)
    .bind(&new.timezone)
    .bind(now)
    .bind(new.sync_horizon_days)
    .bind(new.generation_horizon_days)
    .execute(db)
    .await
    .map_err(|e| crate::common::errors::classify_db_error(e))?;

    find_template(db, id).await
}

pub async fn find_template(
    db: &PgPool,
    id: TemplateId,
) -> Result<RecurringTemplate, CoordinatorError> {
    sqlx::query_as::<_, RecurringTemplate>(
        "SELECT * FROM recurring_task_templates WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(db)
    .await
    .map_err(CoordinatorError::StorageUnavailable)?
    .ok_or_else(|| CoordinatorError::TemplateNotFound(id.to_string()))
}

pub async fn find_exceptions_in_window(
    db: &PgPool,
    template_id: TemplateId,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<RecurringTemplateException>, CoordinatorError> {
    sqlx::query_as::<_, RecurringTemplateException>(
        "SELECT * FROM recurring_template_exceptions
         WHERE template_id = $1 AND occurs_at >= $2 AND occurs_at < $3",
    )
    .bind(template_id)
    .bind(from)
    .bind(until)
    .fetch_all(db)
    .await
    .map_err(CoordinatorError::StorageUnavailable)
}

pub async fn find_detached_items_in_window(
    db: &PgPool,
    template_id: TemplateId,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<super::expander::DetachedOccurrence>, CoordinatorError> {
    let rows: Vec<(TodoItemId, DateTime<Utc>)> = sqlx::query_as(
        "SELECT i.id, e.occurs_at FROM recurring_template_exceptions e
         JOIN todo_items i ON i.id = e.item_id
         WHERE e.template_id = $1 AND e.occurs_at >= $2 AND e.occurs_at < $3
           AND i.recurring_template_id IS NULL",
    )
    .bind(template_id)
    .bind(from)
    .bind(until)
    .fetch_all(db)
    .await
    .map_err(CoordinatorError::StorageUnavailable)?;

    Ok(rows
        .into_iter()
        .map(|(item_id, occurs_at)| super::expander::DetachedOccurrence { occurs_at, item_id })
        .collect())
}

/// Inserts candidate items for one template inside the caller's transaction.
/// Idempotent via `ON CONFLICT (template_id, occurs_at) DO NOTHING`.
pub async fn insert_candidate_items(
    tx: &mut PgConnection,
    list_id: TodoListId,
    template: &RecurringTemplate,
    candidates: &[super::expander::Candidate],
) -> Result<i64, CoordinatorError> {
    let mut inserted = 0i64;
    for candidate in candidates {
        if candidate.no_op {
            continue;
        }
        let result = sqlx::query(
            "INSERT INTO todo_items
                (id, list_id, title, status, priority, tags, estimated_duration,
                 occurs_at, due_offset, timezone, recurring_template_id, version,
                 created_at, updated_at)
             VALUES ($1, $2, $3, 'todo', $4, $5, $6, $7, $8, $9, $10, 1, now(), now())
             ON CONFLICT (recurring_template_id, occurs_at) DO NOTHING",
        )
        .bind(TodoItemId::new())
        .bind(list_id)
        .bind(&template.title)
        .bind(&template.priority)
        .bind(&template.tags)
        .bind(template.estimated_duration)
        .bind(candidate.occurs_at)
        .bind(template.due_offset)
        .bind(&template.timezone)
        .bind(template.id)
        .execute(&mut *tx)
        .await
        .map_err(CoordinatorError::StorageUnavailable)?;

        inserted += result.rows_affected() as i64;
    }
    Ok(inserted)
}

pub async fn advance_generated_through(
    tx: &mut PgConnection,
    template_id: TemplateId,
    through: DateTime<Utc>,
) -> Result<(), CoordinatorError> {
    sqlx::query(
        "UPDATE recurring_task_templates SET generated_through = $2, updated_at = now()
         WHERE id = $1 AND generated_through < $2",
    )
    .bind(template_id)
    .bind(through)
    .execute(&mut *tx)
    .await
    .map_err(CoordinatorError::StorageUnavailable)?;
    Ok(())
}

/// Inserts a pending job. Swallows the unique-active-job-per-template
/// violation as a successful no-op, per §4.1.
pub async fn enqueue(
    db: &PgPool,
    template_id: TemplateId,
    scheduled_for: DateTime<Utc>,
    generate_from: DateTime<Utc>,
    generate_until: DateTime<Utc>,
) -> Result<(), CoordinatorError> {
    let result = sqlx::query(
        "INSERT INTO recurring_generation_jobs
            (id, template_id, scheduled_for, status, generate_from, generate_until,
             available_at, created_at, retry_count)
         VALUES ($1, $2, $3, 'pending', $4, $5, $3, now(), 0)
         ON CONFLICT DO NOTHING",
    )
    .bind(JobId::new())
    .bind(template_id)
    .bind(scheduled_for)
    .bind(generate_from)
    .bind(generate_until)
    .execute(db)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(ref db_err)) if is_active_job_conflict(db_err.as_ref()) => {
            Ok(())
        }
        Err(e) => Err(CoordinatorError::StorageUnavailable(e)),
    }
}

fn is_active_job_conflict(db_err: &dyn sqlx::error::DatabaseError) -> bool {
    db_err
        .constraint()
        .map(|c| c.contains("active_per_template"))
        .unwrap_or(false)
}

/// Atomically reclaims stale `running` rows back to `pending`, then claims
/// one runnable row with skip-locked semantics.
pub async fn claim_next(
    db: &PgPool,
    worker_id: &str,
    availability_timeout_secs: i64,
) -> Result<Option<GenerationJob>, CoordinatorError> {
    let mut tx = db.begin().await.map_err(CoordinatorError::StorageUnavailable)?;

    sqlx::query(
        "UPDATE recurring_generation_jobs
         SET status = 'pending', claimed_by = NULL, claimed_at = NULL
         WHERE status = 'running' AND available_at < now()",
    )
    .execute(&mut *tx)
    .await
    .map_err(CoordinatorError::StorageUnavailable)?;

    let job = sqlx::query_as::<_, GenerationJob>(
        "UPDATE recurring_generation_jobs
         SET status = 'running', claimed_by = $1, claimed_at = now(),
             available_at = now() + make_interval(secs => $2), started_at = now()
         WHERE id = (
             SELECT id FROM recurring_generation_jobs
             WHERE status = 'pending' AND scheduled_for <= now()
             ORDER BY scheduled_for ASC, id ASC
             FOR UPDATE SKIP LOCKED
             LIMIT 1
         )
         RETURNING *",
    )
    .bind(worker_id)
    .bind(availability_timeout_secs as f64)
    .fetch_optional(&mut *tx)
    .await
    .map_err(CoordinatorError::StorageUnavailable)?;

    tx.commit().await.map_err(CoordinatorError::StorageUnavailable)?;
    Ok(job)
}

pub async fn extend(
    db: &PgPool,
    job_id: JobId,
    worker_id: &str,
    extension_secs: i64,
) -> Result<(), CoordinatorError> {
    let result = sqlx::query(
        "UPDATE recurring_generation_jobs
         SET available_at = now() + make_interval(secs => $3)
         WHERE id = $1 AND claimed_by = $2",
    )
    .bind(job_id)
    .bind(worker_id)
    .bind(extension_secs as f64)
    .execute(db)
    .await
    .map_err(CoordinatorError::StorageUnavailable)?;

    if result.rows_affected() == 0 {
        return Err(CoordinatorError::JobOwnershipLost(job_id.to_string()));
    }
    Ok(())
}

pub async fn complete(db: &PgPool, job_id: JobId, worker_id: &str) -> Result<(), CoordinatorError> {
    let result = sqlx::query(
        "UPDATE recurring_generation_jobs
         SET status = 'completed', completed_at = now()
         WHERE id = $1 AND claimed_by = $2 AND status = 'running'",
    )
    .bind(job_id)
    .bind(worker_id)
    .execute(db)
    .await
    .map_err(CoordinatorError::StorageUnavailable)?;

    if result.rows_affected() == 0 {
        return Err(CoordinatorError::JobOwnershipLost(job_id.to_string()));
    }
    Ok(())
}

/// Reads a job's `retry_count` under ownership, for the coordinator's retry
/// computation. Fails with `ownership-lost` if the caller no longer holds it.
pub async fn read_owned_retry_count(
    db: &PgPool,
    job_id: JobId,
    worker_id: &str,
) -> Result<i32, CoordinatorError> {
    sqlx::query_scalar::<_, i32>(
        "SELECT retry_count FROM recurring_generation_jobs WHERE id = $1 AND claimed_by = $2",
    )
    .bind(job_id)
    .bind(worker_id)
    .fetch_optional(db)
    .await
    .map_err(CoordinatorError::StorageUnavailable)?
    .ok_or_else(|| CoordinatorError::JobOwnershipLost(job_id.to_string()))
}

pub async fn reschedule_for_retry(
    db: &PgPool,
    job_id: JobId,
    worker_id: &str,
    new_retry_count: i32,
    delay: chrono::Duration,
) -> Result<(), CoordinatorError> {
    let result = sqlx::query(
        "UPDATE recurring_generation_jobs
         SET status = 'pending', scheduled_for = now() + $3, retry_count = $4,
             claimed_by = NULL, claimed_at = NULL, available_at = now() + $3
         WHERE id = $1 AND claimed_by = $2",
    )
    .bind(job_id)
    .bind(worker_id)
    .bind(delay)
    .bind(new_retry_count)
    .execute(db)
    .await
    .map_err(CoordinatorError::StorageUnavailable)?;

    if result.rows_affected() == 0 {
        return Err(CoordinatorError::JobOwnershipLost(job_id.to_string()));
    }
    Ok(())
}

/// Moves a job to the dead letter inside one transaction: insert the
/// dead-letter row, discard the job.
pub async fn move_to_dead_letter(
    db: &PgPool,
    job: &GenerationJob,
    worker_id: &str,
    error_type: DeadLetterErrorType,
    message: &str,
    stack_trace: Option<&str>,
    retry_count: i32,
) -> Result<(), CoordinatorError> {
    let mut tx = db.begin().await.map_err(CoordinatorError::StorageUnavailable)?;

    sqlx::query(
        "INSERT INTO dead_letter_jobs
            (id, original_job_id, template_id, generate_from, generate_until, error_type,
             error_message, stack_trace, retry_count, last_worker_id, failed_at,
             original_scheduled_for, original_created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now(), $11, $12)",
    )
    .bind(DeadLetterId::new())
    .bind(job.id)
    .bind(job.template_id)
    .bind(job.generate_from)
    .bind(job.generate_until)
    .bind(error_type)
    .bind(message)
    .bind(stack_trace)
    .bind(retry_count)
    .bind(worker_id)
    .bind(job.scheduled_for)
    .bind(job.created_at)
    .execute(&mut *tx)
    .await
    .map_err(CoordinatorError::StorageUnavailable)?;

    let result = sqlx::query(
        "UPDATE recurring_generation_jobs SET status = 'discarded', failed_at = now(), error_message = $3
         WHERE id = $1 AND claimed_by = $2",
    )
    .bind(job.id)
    .bind(worker_id)
    .bind(message)
    .execute(&mut *tx)
    .await
    .map_err(CoordinatorError::StorageUnavailable)?;

    if result.rows_affected() == 0 {
        return Err(CoordinatorError::JobOwnershipLost(job.id.to_string()));
    }

    tx.commit().await.map_err(CoordinatorError::StorageUnavailable)?;
    Ok(())
}

pub async fn try_transition_pending_or_scheduled_to_cancelled(
    db: &PgPool,
    job_id: JobId,
) -> Result<bool, CoordinatorError> {
    let result = sqlx::query(
        "UPDATE recurring_generation_jobs SET status = 'cancelled'
         WHERE id = $1 AND status IN ('pending', 'scheduled')",
    )
    .bind(job_id)
    .execute(db)
    .await
    .map_err(CoordinatorError::StorageUnavailable)?;
    Ok(result.rows_affected() > 0)
}

pub async fn try_transition_running_to_cancelling(
    db: &PgPool,
    job_id: JobId,
) -> Result<bool, CoordinatorError> {
    let result = sqlx::query(
        "UPDATE recurring_generation_jobs SET status = 'cancelling' WHERE id = $1 AND status = 'running'",
    )
    .bind(job_id)
    .execute(db)
    .await
    .map_err(CoordinatorError::StorageUnavailable)?;
    Ok(result.rows_affected() > 0)
}

pub async fn mark_cancelled(
    db: &PgPool,
    job_id: JobId,
    worker_id: &str,
) -> Result<(), CoordinatorError> {
    let result = sqlx::query(
        "UPDATE recurring_generation_jobs SET status = 'cancelled'
         WHERE id = $1 AND claimed_by = $2 AND status = 'cancelling'",
    )
    .bind(job_id)
    .bind(worker_id)
    .execute(db)
    .await
    .map_err(CoordinatorError::StorageUnavailable)?;

    if result.rows_affected() == 0 {
        return Err(CoordinatorError::JobOwnershipLost(job_id.to_string()));
    }
    Ok(())
}

pub async fn publish_cancellation(db: &PgPool, job_id: JobId) -> Result<(), CoordinatorError> {
    sqlx::query("SELECT pg_notify('job_cancellations', $1)")
        .bind(job_id.to_string())
        .execute(db)
        .await
        .map_err(CoordinatorError::StorageUnavailable)?;
    Ok(())
}

pub async fn list_dead_letter(
    db: &PgPool,
    limit: i64,
) -> Result<Vec<DeadLetterJob>, CoordinatorError> {
    sqlx::query_as::<_, DeadLetterJob>(
        "SELECT * FROM dead_letter_jobs WHERE reviewed_at IS NULL ORDER BY failed_at ASC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(db)
    .await
    .map_err(CoordinatorError::StorageUnavailable)
}

pub async fn find_dead_letter(
    db: &PgPool,
    id: DeadLetterId,
) -> Result<DeadLetterJob, CoordinatorError> {
    sqlx::query_as::<_, DeadLetterJob>("SELECT * FROM dead_letter_jobs WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await
        .map_err(CoordinatorError::StorageUnavailable)?
        .ok_or_else(|| CoordinatorError::DeadLetterNotFound(id.to_string()))
}

pub async fn retry_dead_letter(
    db: &PgPool,
    dl: &DeadLetterJob,
    reviewed_by: &str,
) -> Result<JobId, CoordinatorError> {
    let mut tx = db.begin().await.map_err(CoordinatorError::StorageUnavailable)?;
    let new_job_id = JobId::new();

    sqlx::query(
        "INSERT INTO recurring_generation_jobs
            (id, template_id, scheduled_for, status, generate_from, generate_until,
             available_at, created_at, retry_count)
         VALUES ($1, $2, now(), 'pending', $3, $4, now(), now(), 0)",
    )
    .bind(new_job_id)
    .bind(dl.template_id)
    .bind(dl.generate_from)
    .bind(dl.generate_until)
    .execute(&mut *tx)
    .await
    .map_err(CoordinatorError::StorageUnavailable)?;

    sqlx::query(
        "UPDATE dead_letter_jobs SET reviewed_at = now(), reviewed_by = $2, resolution = 'retried'
         WHERE id = $1",
    )
    .bind(dl.id)
    .bind(reviewed_by)
    .execute(&mut *tx)
    .await
    .map_err(CoordinatorError::StorageUnavailable)?;

    tx.commit().await.map_err(CoordinatorError::StorageUnavailable)?;
    Ok(new_job_id)
}

pub async fn discard_dead_letter(
    db: &PgPool,
    id: DeadLetterId,
    reviewed_by: &str,
    note: Option<&str>,
) -> Result<(), CoordinatorError> {
    let result = sqlx::query(
        "UPDATE dead_letter_jobs
         SET reviewed_at = now(), reviewed_by = $2, resolution = 'discarded', reviewer_note = $3
         WHERE id = $1",
    )
    .bind(id)
    .bind(reviewed_by)
    .bind(note)
    .execute(db)
    .await
    .map_err(CoordinatorError::StorageUnavailable)?;

    if result.rows_affected() == 0 {
        return Err(CoordinatorError::DeadLetterNotFound(id.to_string()));
    }
    Ok(())
}

/// Upserts the exclusive-run lease row for `run_type`. Returns `true` when
/// the caller now holds it.
pub async fn try_acquire_exclusive(
    db: &PgPool,
    run_type: &str,
    holder_id: &str,
    lease_duration: chrono::Duration,
) -> Result<bool, CoordinatorError> {
    let result = sqlx::query(
        "INSERT INTO exclusive_run_leases (run_type, holder_id, acquired_at, expires_at)
         VALUES ($1, $2, now(), now() + $3)
         ON CONFLICT (run_type) DO UPDATE
           SET holder_id = EXCLUDED.holder_id, acquired_at = now(), expires_at = now() + $3
         WHERE exclusive_run_leases.expires_at < now()",
    )
    .bind(run_type)
    .bind(holder_id)
    .bind(lease_duration)
    .execute(db)
    .await
    .map_err(CoordinatorError::StorageUnavailable)?;

    if result.rows_affected() > 0 {
        return Ok(true);
    }

    // The insert path above only fires when the row doesn't already exist
    // and the update path only fires when expired; a fresh held-by-us row
    // falls into neither, so check directly.
    let held_by_us: bool = sqlx::query_scalar(
        "SELECT holder_id = $2 FROM exclusive_run_leases WHERE run_type = $1",
    )
    .bind(run_type)
    .bind(holder_id)
    .fetch_optional(db)
    .await
    .map_err(CoordinatorError::StorageUnavailable)?
    .unwrap_or(false);

    Ok(held_by_us)
}

pub async fn release_exclusive(
    db: &PgPool,
    run_type: &str,
    holder_id: &str,
) -> Result<(), CoordinatorError> {
    sqlx::query("DELETE FROM exclusive_run_leases WHERE run_type = $1 AND holder_id = $2")
        .bind(run_type)
        .bind(holder_id)
        .execute(db)
        .await
        .map_err(CoordinatorError::StorageUnavailable)?;
    Ok(())
}

pub async fn find_stale_templates(
    db: &PgPool,
) -> Result<Vec<RecurringTemplate>, CoordinatorError> {
    sqlx::query_as::<_, RecurringTemplate>(
        "SELECT * FROM recurring_task_templates
         WHERE is_active
           AND generated_through < now() + make_interval(days => sync_horizon_days)",
    )
    .fetch_all(db)
    .await
    .map_err(CoordinatorError::StorageUnavailable)
}

/// Deletes future pending template-linked items ahead of `from`, as part of
/// an update-triggered regeneration. Only rows still linked to the template
/// are touched; detached (user-edited) items are untouched by construction.
pub async fn delete_future_pending_template_items(
    tx: &mut PgConnection,
    template_id: TemplateId,
    from: DateTime<Utc>,
) -> Result<(), CoordinatorError> {
    sqlx::query(
        "DELETE FROM todo_items WHERE recurring_template_id = $1 AND occurs_at >= $2 AND status = 'todo'",
    )
    .bind(template_id)
    .bind(from)
    .execute(&mut *tx)
    .await
    .map_err(CoordinatorError::StorageUnavailable)?;
    Ok(())
}

pub async fn begin(db: &PgPool) -> Result<Transaction<'_, Postgres>, CoordinatorError> {
    db.begin().await.map_err(CoordinatorError::StorageUnavailable)
}

pub async fn insert_exception(
    tx: &mut PgConnection,
    template_id: TemplateId,
    occurs_at: DateTime<Utc>,
    exception_type: ExceptionType,
    item_id: Option<TodoItemId>,
) -> Result<(), CoordinatorError> {
    sqlx::query(
        "INSERT INTO recurring_template_exceptions (id, template_id, occurs_at, exception_type, item_id, created_at)
         VALUES ($1, $2, $3, $4, $5, now())
         ON CONFLICT (template_id, occurs_at) DO NOTHING",
    )
    .bind(ExceptionId::new())
    .bind(template_id)
    .bind(occurs_at)
    .bind(exception_type)
    .bind(item_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| crate::common::errors::classify_db_error(e))?;
    Ok(())
}
