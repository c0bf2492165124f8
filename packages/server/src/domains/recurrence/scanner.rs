//! Scheduler/Scanner: a single background task per replica that finds stale
//! templates and enqueues generation jobs for them, serialized across
//! replicas by the exclusive-run lease.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;

use crate::kernel::service_host::Service;

use super::coordinator::Coordinator;

const RUN_TYPE: &str = "scan-stale";

pub struct Scanner {
    coordinator: Arc<Coordinator>,
    holder_id: String,
    scan_interval: StdDuration,
    lease_duration: Duration,
}

impl Scanner {
    pub fn new(coordinator: Arc<Coordinator>, holder_id: String, scan_interval: StdDuration) -> Self {
        Self {
            coordinator,
            holder_id,
            scan_interval,
            lease_duration: Duration::from_std(scan_interval)
                .unwrap_or_else(|_| Duration::seconds(60))
                * 2,
        }
    }
}

#[async_trait::async_trait]
impl Service for Scanner {
    fn name(&self) -> &'static str {
        "scanner"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        while !shutdown.is_cancelled() {
            if let Err(e) = self.scan_once().await {
                tracing::error!(error = %e, "scanner tick failed");
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.scan_interval) => {}
            }
        }
        Ok(())
    }
}

impl Scanner {
    async fn scan_once(&self) -> Result<()> {
        let guard = self
            .coordinator
            .try_acquire_exclusive(RUN_TYPE, &self.holder_id, self.lease_duration)
            .await?;

        let Some(guard) = guard else {
            return Ok(());
        };

        let templates = self.coordinator.find_stale_templates().await?;
        let now = Utc::now();

        for template in &templates {
            let generation_until = now + Duration::days(template.generation_horizon_days as i64);
            if template.generated_through >= generation_until {
                continue;
            }
            if let Err(e) = self
                .coordinator
                .enqueue(
                    template.id,
                    template.generated_through,
                    template.generated_through,
                    generation_until,
                )
                .await
            {
                tracing::error!(template_id = %template.id, error = %e, "failed to enqueue generation job");
            }
        }

        tracing::debug!(count = templates.len(), "scanner enqueued stale templates");
        guard.release().await?;
        Ok(())
    }
}
