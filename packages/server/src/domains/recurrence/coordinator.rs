//! The transactional façade: the sole owner of job-state transitions,
//! exclusive-run leases, and the sync+async initial generation pattern.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sqlx::PgPool;

use crate::common::{CoordinatorError, DeadLetterId, JobId, TemplateId, TodoListId};

use super::expander;
use super::job::{DeadLetterErrorType, DeadLetterJob, GenerationJob};
use super::models::{NewTemplate, RecurringTemplate};
use super::store;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: i32,
    pub base_backoff_ms: i64,
    pub max_backoff_secs: i64,
}

/// Handle returned by a successful `try_acquire_exclusive`; releasing it
/// clears the lease row. Dropping it without calling `release` leaves the
/// lease to expire naturally.
pub struct ExclusiveRunGuard<'a> {
    db: &'a PgPool,
    run_type: String,
    holder_id: String,
}

impl<'a> ExclusiveRunGuard<'a> {
    pub async fn release(self) -> Result<(), CoordinatorError> {
        store::release_exclusive(self.db, &self.run_type, &self.holder_id).await
    }
}

pub struct Coordinator {
    db: PgPool,
}

impl Coordinator {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db
    }

    /// Creates a template and runs the sync+async initial generation pattern
    /// in its wake (§4.5).
    pub async fn create_template(&self, new: NewTemplate) -> Result<RecurringTemplate, CoordinatorError> {
        let template = store::insert_template(&self.db, &new).await?;
        template
            .validate_horizons()
            .map_err(|e| CoordinatorError::Validation(e.to_string()))?;
        self.generate_initial(&template, Utc::now()).await?;
        store::find_template(&self.db, template.id).await
    }

    pub async fn enqueue(
        &self,
        template_id: TemplateId,
        scheduled_for: DateTime<Utc>,
        generate_from: DateTime<Utc>,
        generate_until: DateTime<Utc>,
    ) -> Result<(), CoordinatorError> {
        store::enqueue(&self.db, template_id, scheduled_for, generate_from, generate_until).await
    }

    pub async fn enqueue_many(
        &self,
        jobs: &[(TemplateId, DateTime<Utc>, DateTime<Utc>, DateTime<Utc>)],
    ) -> Result<(), CoordinatorError> {
        for (template_id, scheduled_for, from, until) in jobs {
            store::enqueue(&self.db, *template_id, *scheduled_for, *from, *until).await?;
        }
        Ok(())
    }

    pub async fn claim_next(
        &self,
        worker_id: &str,
        availability_timeout: Duration,
    ) -> Result<Option<GenerationJob>, CoordinatorError> {
        store::claim_next(&self.db, worker_id, availability_timeout.num_seconds()).await
    }

    pub async fn extend(
        &self,
        job_id: JobId,
        worker_id: &str,
        extension: Duration,
    ) -> Result<(), CoordinatorError> {
        store::extend(&self.db, job_id, worker_id, extension.num_seconds()).await
    }

    pub async fn complete(&self, job_id: JobId, worker_id: &str) -> Result<(), CoordinatorError> {
        store::complete(&self.db, job_id, worker_id).await
    }

    /// Fails a job, applying exponential backoff with full jitter, or moving
    /// it to the dead letter once `max_retries` is exceeded. Returns whether
    /// the job will be retried.
    pub async fn fail(
        &self,
        job: &GenerationJob,
        worker_id: &str,
        error: &str,
        retry_config: RetryConfig,
    ) -> Result<bool, CoordinatorError> {
        let retry_count = store::read_owned_retry_count(&self.db, job.id, worker_id).await?;
        let new_retry_count = retry_count + 1;

        if new_retry_count > retry_config.max_retries {
            store::move_to_dead_letter(
                &self.db,
                job,
                worker_id,
                DeadLetterErrorType::Exhausted,
                error,
                None,
                new_retry_count,
            )
            .await?;
            return Ok(false);
        }

        let delay = full_jitter_backoff(
            new_retry_count,
            retry_config.base_backoff_ms,
            retry_config.max_backoff_secs,
        );
        store::reschedule_for_retry(&self.db, job.id, worker_id, new_retry_count, delay).await?;
        Ok(true)
    }

    pub async fn move_to_dead_letter(
        &self,
        job: &GenerationJob,
        worker_id: &str,
        error_type: DeadLetterErrorType,
        message: &str,
        stack_trace: Option<&str>,
    ) -> Result<(), CoordinatorError> {
        let retry_count = store::read_owned_retry_count(&self.db, job.id, worker_id)
            .await
            .unwrap_or(job.retry_count);
        store::move_to_dead_letter(
            &self.db,
            job,
            worker_id,
            error_type,
            message,
            stack_trace,
            retry_count,
        )
        .await
    }

    pub async fn cancel(&self, job_id: JobId) -> Result<CancelOutcome, CoordinatorError> {
        if store::try_transition_pending_or_scheduled_to_cancelled(&self.db, job_id).await? {
            return Ok(CancelOutcome::Cancelled);
        }

        if store::try_transition_running_to_cancelling(&self.db, job_id).await? {
            if let Err(e) = store::publish_cancellation(&self.db, job_id).await {
                tracing::warn!(job_id = %job_id, error = %e, "failed to publish cancellation notice");
            }
            return Ok(CancelOutcome::CancellationRequested);
        }

        Ok(CancelOutcome::NotCancellable)
    }

    pub async fn mark_cancelled(&self, job_id: JobId, worker_id: &str) -> Result<(), CoordinatorError> {
        store::mark_cancelled(&self.db, job_id, worker_id).await
    }

    pub async fn list_dead_letter(&self, limit: i64) -> Result<Vec<DeadLetterJob>, CoordinatorError> {
        store::list_dead_letter(&self.db, limit).await
    }

    pub async fn retry_dead_letter(
        &self,
        dl_id: DeadLetterId,
        reviewed_by: &str,
    ) -> Result<JobId, CoordinatorError> {
        let dl = store::find_dead_letter(&self.db, dl_id).await?;
        store::retry_dead_letter(&self.db, &dl, reviewed_by).await
    }

    pub async fn discard_dead_letter(
        &self,
        dl_id: DeadLetterId,
        reviewed_by: &str,
        note: Option<&str>,
    ) -> Result<(), CoordinatorError> {
        store::discard_dead_letter(&self.db, dl_id, reviewed_by, note).await
    }

    pub async fn try_acquire_exclusive(
        &self,
        run_type: &str,
        holder_id: &str,
        lease_duration: Duration,
    ) -> Result<Option<ExclusiveRunGuard<'_>>, CoordinatorError> {
        let acquired =
            store::try_acquire_exclusive(&self.db, run_type, holder_id, lease_duration).await?;
        Ok(acquired.then(|| ExclusiveRunGuard {
            db: &self.db,
            run_type: run_type.to_string(),
            holder_id: holder_id.to_string(),
        }))
    }

    /// Runs the sync+async initial generation pattern for a newly created or
    /// recurrence-changed template: write the template, expand+insert the
    /// sync window inline, advance `generated_through`, enqueue an async job
    /// for the remainder. Skips the async job when the horizons are equal.
    pub async fn generate_initial(
        &self,
        template: &RecurringTemplate,
        now: DateTime<Utc>,
    ) -> Result<(), CoordinatorError> {
        let sync_until = now + Duration::days(template.sync_horizon_days as i64);
        let generation_until = now + Duration::days(template.generation_horizon_days as i64);

        let exceptions = store::find_exceptions_in_window(&self.db, template.id, now, sync_until).await?;
        let detached = store::find_detached_items_in_window(&self.db, template.id, now, sync_until).await?;
        let candidates = expander::expand(template, now, sync_until, &exceptions, &detached);

        let mut tx = store::begin(&self.db).await?;
        let inserted = store::insert_candidate_items(&mut tx, template.list_id, template, &candidates)
            .await?;
        store::advance_generated_through(&mut tx, template.id, sync_until).await?;
        tx.commit().await.map_err(CoordinatorError::StorageUnavailable)?;

        tracing::debug!(template_id = %template.id, inserted, "sync window generated");

        if sync_until < generation_until {
            self.enqueue(template.id, sync_until, sync_until, generation_until).await?;
        }
        Ok(())
    }

    /// Re-runs initial generation after a recurrence-changing update: deletes
    /// future pending template-linked items from `now` forward, then
    /// regenerates exactly as `generate_initial` does.
    pub async fn regenerate_after_update(
        &self,
        template: &RecurringTemplate,
        now: DateTime<Utc>,
    ) -> Result<(), CoordinatorError> {
        let mut tx = store::begin(&self.db).await?;
        store::delete_future_pending_template_items(&mut tx, template.id, now).await?;
        tx.commit().await.map_err(CoordinatorError::StorageUnavailable)?;

        self.generate_initial(template, now).await
    }

    pub async fn find_stale_templates(&self) -> Result<Vec<RecurringTemplate>, CoordinatorError> {
        store::find_stale_templates(&self.db).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    CancellationRequested,
    NotCancellable,
}

/// `delay = Uniform(0, min(max_delay, base_delay * 2^(attempt-1)))`.
fn full_jitter_backoff(attempt: i32, base_backoff_ms: i64, max_backoff_secs: i64) -> Duration {
    let max_delay_ms = max_backoff_secs.saturating_mul(1000);
    let exponent = (attempt - 1).clamp(0, 62) as u32;
    let raw_ms = base_backoff_ms.saturating_mul(1i64.checked_shl(exponent).unwrap_or(i64::MAX).max(1));
    let capped_ms = raw_ms.min(max_delay_ms).max(0);

    let jittered_ms = if capped_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=capped_ms)
    };
    Duration::milliseconds(jittered_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_jitter_backoff_is_bounded_by_the_cap() {
        for attempt in 1..=10 {
            let delay = full_jitter_backoff(attempt, 500, 3600);
            assert!(delay >= Duration::zero());
            assert!(delay <= Duration::seconds(3600));
        }
    }

    #[test]
    fn full_jitter_backoff_respects_max_delay_cap_at_high_attempt_counts() {
        let delay = full_jitter_backoff(50, 500, 10);
        assert!(delay <= Duration::seconds(10));
    }
}
