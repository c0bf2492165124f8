//! The worker pool: a fixed set of long-lived workers, each looping
//! acquire -> heartbeat-while-working -> generation transaction -> ack.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::postgres::PgListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::common::CoordinatorError;
use crate::kernel::service_host::Service;

use super::coordinator::{Coordinator, RetryConfig};
use super::events::JobEvent;
use super::expander;
use super::job::{DeadLetterErrorType, GenerationJob};
use super::store;

pub struct WorkerPool {
    coordinator: Arc<Coordinator>,
    worker_count: usize,
    availability_timeout: Duration,
    retry_config: RetryConfig,
    poll_interval: StdDuration,
}

impl WorkerPool {
    pub fn new(
        coordinator: Arc<Coordinator>,
        worker_count: usize,
        availability_timeout: Duration,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            coordinator,
            worker_count,
            availability_timeout,
            retry_config,
            poll_interval: StdDuration::from_millis(500),
        }
    }
}

#[async_trait::async_trait]
impl Service for WorkerPool {
    fn name(&self) -> &'static str {
        "worker-pool"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let running_jobs: Arc<RwLock<HashMap<Uuid, CancellationToken>>> =
            Arc::new(RwLock::new(HashMap::new()));

        let mut handles = Vec::with_capacity(self.worker_count);
        for index in 0..self.worker_count {
            let worker_id = format!("worker-{index}");
            let coordinator = self.coordinator.clone();
            let availability_timeout = self.availability_timeout;
            let retry_config = self.retry_config;
            let poll_interval = self.poll_interval;
            let shutdown = shutdown.clone();
            let running_jobs = running_jobs.clone();

            handles.push(tokio::spawn(async move {
                worker_loop(
                    worker_id,
                    coordinator,
                    availability_timeout,
                    retry_config,
                    poll_interval,
                    shutdown,
                    running_jobs,
                )
                .await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }
}

async fn worker_loop(
    worker_id: String,
    coordinator: Arc<Coordinator>,
    availability_timeout: Duration,
    retry_config: RetryConfig,
    poll_interval: StdDuration,
    shutdown: CancellationToken,
    running_jobs: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
) {
    while !shutdown.is_cancelled() {
        let claimed = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = coordinator.claim_next(&worker_id, availability_timeout) => result,
        };

        let job = match claimed {
            Ok(Some(job)) => job,
            Ok(None) => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => continue,
                }
            }
            Err(e) => {
                tracing::error!(worker_id, error = %e, "claim_next failed");
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        let job_token = shutdown.child_token();
        running_jobs.write().await.insert(*job.id.as_ref(), job_token.clone());

        let heartbeat_handle = spawn_heartbeat(
            coordinator.clone(),
            job.id,
            worker_id.clone(),
            availability_timeout,
            job_token.clone(),
        );

        let outcome = run_job(&coordinator, &job, &worker_id, retry_config, &job_token).await;

        job_token.cancel();
        let _ = heartbeat_handle.await;
        running_jobs.write().await.remove(job.id.as_ref());

        if let Err(e) = outcome {
            tracing::error!(worker_id, job_id = %job.id, error = %e, "job processing failed");
        }
    }
}

fn spawn_heartbeat(
    coordinator: Arc<Coordinator>,
    job_id: crate::common::JobId,
    worker_id: String,
    availability_timeout: Duration,
    job_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let interval = availability_timeout / 3;
    let interval_std = StdDuration::from_millis(interval.num_milliseconds().max(1) as u64);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = job_token.cancelled() => break,
                _ = tokio::time::sleep(interval_std) => {
                    if let Err(e) = coordinator.extend(job_id, &worker_id, availability_timeout).await {
                        tracing::warn!(job_id = %job_id, error = %e, "heartbeat extend failed");
                        break;
                    }
                }
            }
        }
    })
}

/// Runs the five-step generation sequence from the worker-pool contract,
/// classifying the outcome into complete / fail / dead-letter.
async fn run_job(
    coordinator: &Coordinator,
    job: &GenerationJob,
    worker_id: &str,
    retry_config: RetryConfig,
    job_token: &CancellationToken,
) -> Result<(), CoordinatorError> {
    let result = futures::FutureExt::catch_unwind(AssertUnwindSafe(generate(
        coordinator,
        job,
        worker_id,
        job_token,
    )))
    .await;

    match result {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(GenerateError::Cancelled)) => {
            coordinator.mark_cancelled(job.id, worker_id).await
        }
        Ok(Err(GenerateError::Permanent(message))) => {
            coordinator
                .move_to_dead_letter(job, worker_id, DeadLetterErrorType::Permanent, &message, None)
                .await
        }
        Ok(Err(GenerateError::Other(message))) => {
            coordinator.fail(job, worker_id, &message, retry_config).await.map(|_| ())
        }
        Err(panic) => {
            let message = panic_message(&panic);
            coordinator
                .move_to_dead_letter(job, worker_id, DeadLetterErrorType::Panic, &message, None)
                .await
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked with a non-string payload".to_string()
    }
}

enum GenerateError {
    Cancelled,
    Permanent(String),
    Other(String),
}

async fn generate(
    coordinator: &Coordinator,
    job: &GenerationJob,
    worker_id: &str,
    job_token: &CancellationToken,
) -> Result<JobEvent, GenerateError> {
    let template = match store::find_template(coordinator.pool(), job.template_id).await {
        Ok(t) => t,
        Err(CoordinatorError::TemplateNotFound(_)) => {
            coordinator
                .complete(job.id, worker_id)
                .await
                .map_err(|e| GenerateError::Other(e.to_string()))?;
            return Ok(JobEvent::Succeeded { job_id: job.id, items_inserted: 0 });
        }
        Err(e) => return Err(GenerateError::Other(e.to_string())),
    };

    if !template.is_active {
        coordinator
            .complete(job.id, worker_id)
            .await
            .map_err(|e| GenerateError::Other(e.to_string()))?;
        return Ok(JobEvent::Succeeded { job_id: job.id, items_inserted: 0 });
    }

    if job_token.is_cancelled() {
        return Err(GenerateError::Cancelled);
    }

    let exceptions = store::find_exceptions_in_window(
        coordinator.pool(),
        job.template_id,
        job.generate_from,
        job.generate_until,
    )
    .await
    .map_err(|e| GenerateError::Other(e.to_string()))?;

    let detached = store::find_detached_items_in_window(
        coordinator.pool(),
        job.template_id,
        job.generate_from,
        job.generate_until,
    )
    .await
    .map_err(|e| GenerateError::Other(e.to_string()))?;

    let candidates = expander::expand(
        &template,
        job.generate_from,
        job.generate_until,
        &exceptions,
        &detached,
    );

    if job_token.is_cancelled() {
        return Err(GenerateError::Cancelled);
    }

    let mut tx = store::begin(coordinator.pool())
        .await
        .map_err(|e| GenerateError::Other(e.to_string()))?;

    let inserted = store::insert_candidate_items(&mut tx, template.list_id, &template, &candidates)
        .await
        .map_err(|e| GenerateError::Other(e.to_string()))?;

    store::advance_generated_through(&mut tx, template.id, job.generate_until)
        .await
        .map_err(|e| GenerateError::Other(e.to_string()))?;

    tx.commit()
        .await
        .map_err(|e| GenerateError::Other(e.to_string()))?;

    coordinator
        .complete(job.id, worker_id)
        .await
        .map_err(|e| GenerateError::Other(e.to_string()))?;

    Ok(JobEvent::Succeeded { job_id: job.id, items_inserted: inserted })
}

/// Connects a dedicated listener on `job_cancellations` and forwards job ids
/// as they arrive. Workers treat this as a best-effort signal, backed by the
/// periodic poll in the main loop.
pub async fn subscribe_cancellations(
    database_url: &str,
) -> Result<impl futures::Stream<Item = Uuid>> {
    let mut listener = PgListener::connect(database_url).await?;
    listener.listen("job_cancellations").await?;

    Ok(futures::stream::unfold(listener, |mut listener| async move {
        loop {
            match listener.recv().await {
                Ok(notification) => {
                    if let Ok(id) = notification.payload().parse::<Uuid>() {
                        return Some((id, listener));
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "cancellation listener error, stopping stream");
                    return None;
                }
            }
        }
    }))
}
